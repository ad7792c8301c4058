use actix_web::{
    error::{JsonPayloadError, PathError, QueryPayloadError},
    HttpRequest, HttpResponse, ResponseError,
};
use log::debug;
use serde::Serialize;

use crate::error::AppError;

#[derive(Serialize)]
pub struct MessageDto {
    pub message: String,
}

impl MessageDto {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    debug!("rejected json payload: {}", err);
    let app_err = match err {
        JsonPayloadError::ContentType => AppError::param_error("Content-Type must be application/json"),
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            AppError::param_error("Request payload too large")
        }
        JsonPayloadError::Deserialize(e) => AppError::param_error(format!("Invalid request payload: {}", e)),
        _ => AppError::param_error("Invalid request payload"),
    };
    app_err.into()
}

pub fn path_error_handler(err: PathError, _req: &HttpRequest) -> actix_web::Error {
    debug!("rejected path: {}", err);
    AppError::NotFound("Resource not found".to_string()).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    debug!("rejected query: {}", err);
    AppError::param_error("Invalid query string").into()
}

pub fn response_from_error(err: &AppError) -> HttpResponse {
    HttpResponse::build(err.status_code()).json(MessageDto::new(err.to_string()))
}
