pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod model;
pub mod response;
pub mod routes;

use actix_web::web;

use response::{json_error_handler, path_error_handler, query_error_handler};
use routes::{application, opportunity, profile, user};

/// Resumes travel as base64 inside the JSON body.
pub const JSON_LIMIT: usize = 50 * 1024 * 1024;

/// Registers extractor settings and every route. The caller provides
/// `web::Data<AppConfig>` and `web::Data<DatabaseConnection>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(JSON_LIMIT)
            .error_handler(json_error_handler),
    )
    .app_data(web::PathConfig::default().error_handler(path_error_handler))
    .app_data(web::QueryConfig::default().error_handler(query_error_handler))
    .route("/", web::get().to(routes::health))
    .service(
        web::scope("/api")
            .service(web::scope("/auth").configure(routes::auth::config))
            .service(web::scope("/users").configure(user::config))
            .service(web::scope("/profiles").configure(profile::config))
            .service(web::scope("/opportunities").configure(opportunity::config))
            .service(web::scope("/applications").configure(application::config))
            .default_service(web::to(routes::not_found)),
    );
}
