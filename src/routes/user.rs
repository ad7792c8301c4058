use actix_web::{web, HttpResponse};
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder};

use crate::auth::AuthUser;
use crate::entity::user;
use crate::error::AppError;
use crate::routes::UserDto;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::get().to(list_users)))
        .service(web::resource("/{id:\\d+}").route(web::get().to(get_user)));
}

async fn list_users(
    db: web::Data<DatabaseConnection>,
    _auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let users = user::Entity::find()
        .order_by_asc(user::Column::Id)
        .all(db.get_ref())
        .await
        .map_err(AppError::db)?;
    let list: Vec<UserDto> = users.iter().map(UserDto::from).collect();
    Ok(HttpResponse::Ok().json(list))
}

async fn get_user(
    db: web::Data<DatabaseConnection>,
    _auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let user = user::Entity::find_by_id(path.into_inner())
        .one(db.get_ref())
        .await
        .map_err(AppError::db)?
        .ok_or_else(|| AppError::not_found("User"))?;
    Ok(HttpResponse::Ok().json(UserDto::from(&user)))
}
