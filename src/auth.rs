use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use futures_util::future::{ready, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, MAX_TOKEN_TTL_HOURS};
use crate::entity::user;
use crate::error::AppError;
use crate::model::Role;

const BCRYPT_COST: u32 = 10;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: i32,
    pub email: String,
    pub role: Role,
    pub full_name: String,
    pub iat: i64,
    pub exp: i64,
}

/// Identity decoded from the bearer token. Handlers re-derive ownership
/// from stored records and compare against `id`.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub role: Role,
    pub full_name: String,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.id,
            email: claims.email,
            role: claims.role,
            full_name: claims.full_name,
        }
    }
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let config = match req.app_data::<web::Data<AppConfig>>() {
            Some(cfg) => cfg,
            None => {
                error!("AppConfig missing from app data");
                return ready(Err(AppError::system_exception().into()));
            }
        };
        let result = extract_token(req)
            .ok_or_else(AppError::need_login)
            .and_then(|token| decode_token(config, &token))
            .map(AuthUser::from)
            .map_err(actix_web::Error::from);
        ready(result)
    }
}

fn extract_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim().to_string()).filter(|t| !t.is_empty())
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    hash(password, BCRYPT_COST).map_err(|e| {
        error!("bcrypt hash failed: {}", e);
        AppError::system_exception()
    })
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    verify(password, password_hash).unwrap_or_else(|e| {
        debug!("bcrypt verify failed: {}", e);
        false
    })
}

pub fn issue_token(config: &AppConfig, user: &user::Model) -> Result<String, AppError> {
    let role = user.role.parse::<Role>().map_err(|_| {
        error!("user {} has unknown role {:?}", user.id, user.role);
        AppError::system_exception()
    })?;
    let now = Utc::now();
    let claims = Claims {
        id: user.id,
        email: user.email.clone(),
        role,
        full_name: user.full_name.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::hours(config.token_ttl_hours.clamp(1, MAX_TOKEN_TTL_HOURS)))
            .timestamp(),
    };
    encode_claims(config, &claims)
}

pub fn encode_claims(config: &AppConfig, claims: &Claims) -> Result<String, AppError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        error!("token encode failed: {}", e);
        AppError::system_exception()
    })
}

pub fn decode_token(config: &AppConfig, token: &str) -> Result<Claims, AppError> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("token rejected: {}", e);
            AppError::token_invalid()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn sample_user() -> user::Model {
        user::Model {
            id: 7,
            email: "a@campus.edu".to_string(),
            password_hash: String::new(),
            role: "alumni".to_string(),
            full_name: "Ada".to_string(),
            created: None,
        }
    }

    #[test]
    fn issued_token_carries_identity() {
        let config = AppConfig::for_tests();
        let token = issue_token(&config, &sample_user()).unwrap();
        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.id, 7);
        assert_eq!(claims.role, Role::Alumni);
        assert_eq!(claims.full_name, "Ada");
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn oversized_ttl_is_capped() {
        let mut config = AppConfig::for_tests();
        config.token_ttl_hours = 3_000_000_000_000_000;
        let token = issue_token(&config, &sample_user()).unwrap();
        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.exp - claims.iat, MAX_TOKEN_TTL_HOURS * 3600);
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let config = AppConfig::for_tests();
        let token = issue_token(&config, &sample_user()).unwrap();
        let mut other = AppConfig::for_tests();
        other.jwt_secret = "another".to_string();
        assert!(matches!(decode_token(&other, &token), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = AppConfig::for_tests();
        let past = Utc::now() - Duration::hours(25);
        let claims = Claims {
            id: 1,
            email: "s@campus.edu".to_string(),
            role: Role::Student,
            full_name: "S".to_string(),
            iat: past.timestamp(),
            exp: (past + Duration::hours(24)).timestamp(),
        };
        let token = encode_claims(&config, &claims).unwrap();
        assert!(decode_token(&config, &token).is_err());
    }

    #[test]
    fn password_round_trip() {
        let hashed = hash_password("password123").unwrap();
        assert!(verify_password("password123", &hashed));
        assert!(!verify_password("password124", &hashed));
        assert!(!verify_password("password123", "not-a-hash"));
    }

    #[test]
    fn bearer_scheme_is_required() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer abc.def"))
            .to_http_request();
        assert_eq!(extract_token(&req).as_deref(), Some("abc.def"));

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Basic abc"))
            .to_http_request();
        assert_eq!(extract_token(&req), None);

        let req = TestRequest::default().to_http_request();
        assert_eq!(extract_token(&req), None);
    }
}
