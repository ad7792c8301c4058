use actix_web::{http::StatusCode, ResponseError};
use log::error;
use sea_orm::DbErr;
use thiserror::Error;

use crate::response::response_from_error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Internal server error")]
    Internal,
}

impl AppError {
    pub fn param_error(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn need_login() -> Self {
        Self::Unauthorized("No token, authorization denied".to_string())
    }

    pub fn token_invalid() -> Self {
        Self::Unauthorized("Token is not valid".to_string())
    }

    pub fn invalid_credentials() -> Self {
        Self::Unauthorized("Invalid credentials".to_string())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// `what` is the capitalised resource name, e.g. "Opportunity".
    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} not found", what))
    }

    pub fn system_exception() -> Self {
        Self::Internal
    }

    pub fn db(err: DbErr) -> Self {
        error!("database error: {}", err);
        Self::Internal
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        response_from_error(self)
    }
}

/// True when the database rejected a write because of a UNIQUE index.
pub fn is_unique_violation(err: &DbErr) -> bool {
    let msg = err.to_string();
    msg.contains("UNIQUE") || msg.contains("Duplicate")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_shares_the_validation_status() {
        assert_eq!(AppError::conflict("dup").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::param_error("bad").status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_hides_the_cause() {
        let err = AppError::db(DbErr::Custom("disk I/O error at /var/db".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Internal server error");
    }

    #[test]
    fn not_found_names_the_resource() {
        assert_eq!(AppError::not_found("Profile").to_string(), "Profile not found");
    }

    #[test]
    fn detects_sqlite_unique_failures() {
        let err = DbErr::Exec(sea_orm::RuntimeErr::Internal(
            "UNIQUE constraint failed: t_application.opportunity_id".to_string(),
        ));
        assert!(is_unique_violation(&err));
        assert!(!is_unique_violation(&DbErr::RecordNotInserted));
    }
}
