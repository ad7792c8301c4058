pub mod application;
pub mod auth;
pub mod cors;
pub mod opportunity;
pub mod profile;
pub mod user;

use std::collections::HashMap;

use actix_web::HttpResponse;
use chrono::SecondsFormat;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, TransactionError};
use serde::Serialize;

use crate::entity::user as user_entity;
use crate::error::AppError;
use crate::response::MessageDto;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(MessageDto::new("Campus Talent Connect API is running"))
}

/// Fallback for `/api` paths no route matches, including non-numeric ids.
pub async fn not_found() -> Result<HttpResponse, AppError> {
    Err(AppError::not_found("Resource"))
}

/// Public fields of a user, embedded wherever a record references one.
#[derive(Serialize, Clone, Debug)]
pub struct UserDto {
    pub id: i32,
    pub email: String,
    pub full_name: String,
    pub role: String,
}

impl From<&user_entity::Model> for UserDto {
    fn from(model: &user_entity::Model) -> Self {
        Self {
            id: model.id,
            email: model.email.clone(),
            full_name: model.full_name.clone(),
            role: model.role.clone(),
        }
    }
}

pub(crate) async fn load_users<C: ConnectionTrait>(
    db: &C,
    ids: impl IntoIterator<Item = i32>,
) -> Result<HashMap<i32, user_entity::Model>, AppError> {
    let mut ids: Vec<i32> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = user_entity::Entity::find()
        .filter(user_entity::Column::Id.is_in(ids))
        .all(db)
        .await
        .map_err(AppError::db)?;
    Ok(rows.into_iter().map(|u| (u.id, u)).collect())
}

pub(crate) fn to_rfc3339(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// Trimmed value, or `None` when blank.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn map_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(e) => AppError::db(e),
        TransactionError::Transaction(app) => app,
    }
}
