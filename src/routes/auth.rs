use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, issue_token, verify_password, AuthUser};
use crate::config::AppConfig;
use crate::entity::{profile, user};
use crate::error::{is_unique_violation, AppError};
use crate::model::Role;
use crate::routes::{map_tx_error, non_blank, UserDto};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

const MIN_PASSWORD_LEN: usize = 6;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/register").route(web::post().to(register)))
        .service(web::resource("/login").route(web::post().to(login)))
        .service(web::resource("/me").route(web::get().to(me)));
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub full_name: Option<String>,
}

struct NewUser {
    email: String,
    password: String,
    role: Role,
    full_name: String,
}

impl RegisterRequest {
    fn validate(&self) -> Result<NewUser, AppError> {
        let email = normalize_email(self.email.as_deref())
            .ok_or_else(|| AppError::param_error("email cannot be empty"))?;
        if !EMAIL_RE.is_match(&email) {
            return Err(AppError::param_error("email is not valid"));
        }
        let password = self.password.clone().unwrap_or_default();
        if password.trim().is_empty() {
            return Err(AppError::param_error("password cannot be empty"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::param_error(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        let role = self
            .role
            .as_deref()
            .ok_or_else(|| AppError::param_error("role cannot be empty"))?
            .parse::<Role>()?;
        let full_name = non_blank(self.full_name.clone())
            .ok_or_else(|| AppError::param_error("full_name cannot be empty"))?;
        Ok(NewUser {
            email,
            password,
            role,
            full_name,
        })
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
struct RegisterResponse {
    message: String,
    user: UserDto,
}

#[derive(Serialize)]
struct LoginResponse {
    access: String,
    user: UserDto,
}

fn normalize_email(raw: Option<&str>) -> Option<String> {
    raw.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty())
}

async fn register(
    db: web::Data<DatabaseConnection>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    let new_user = payload.validate()?;

    let existing = user::Entity::find()
        .filter(user::Column::Email.eq(new_user.email.clone()))
        .one(db.get_ref())
        .await
        .map_err(AppError::db)?;
    if existing.is_some() {
        return Err(AppError::conflict("User exists"));
    }

    let password_hash = hash_password(&new_user.password)?;
    let user_model = user::ActiveModel {
        email: Set(new_user.email.clone()),
        password_hash: Set(password_hash),
        role: Set(new_user.role.as_str().to_string()),
        full_name: Set(new_user.full_name.clone()),
        created: Set(Some(Utc::now())),
        ..Default::default()
    };

    let created = db
        .transaction::<_, user::Model, AppError>(|txn| {
            Box::pin(async move {
                let inserted = user_model.insert(txn).await.map_err(|e| {
                    if is_unique_violation(&e) {
                        AppError::conflict("User exists")
                    } else {
                        AppError::db(e)
                    }
                })?;
                profile::ActiveModel {
                    user_id: Set(inserted.id),
                    full_name: Set(Some(inserted.full_name.clone())),
                    role: Set(Some(inserted.role.clone())),
                    skills: Set(Some("[]".to_string())),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(AppError::db)?;
                Ok(inserted)
            })
        })
        .await
        .map_err(map_tx_error)?;

    info!("registered user id={} role={}", created.id, created.role);
    Ok(HttpResponse::Created().json(RegisterResponse {
        message: "User registered".to_string(),
        user: UserDto::from(&created),
    }))
}

async fn login(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let email = normalize_email(payload.email.as_deref())
        .ok_or_else(|| AppError::param_error("email cannot be empty"))?;
    let password = payload.password.clone().unwrap_or_default();
    if password.is_empty() {
        return Err(AppError::param_error("password cannot be empty"));
    }

    let user = user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(db.get_ref())
        .await
        .map_err(AppError::db)?
        .ok_or_else(AppError::invalid_credentials)?;

    if !verify_password(&password, &user.password_hash) {
        warn!("failed login for user id={}", user.id);
        return Err(AppError::invalid_credentials());
    }

    let access = issue_token(&config, &user)?;
    Ok(HttpResponse::Ok().json(LoginResponse {
        access,
        user: UserDto::from(&user),
    }))
}

async fn me(auth: AuthUser) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(UserDto {
        id: auth.id,
        email: auth.email,
        full_name: auth.full_name,
        role: auth.role.as_str().to_string(),
    }))
}
