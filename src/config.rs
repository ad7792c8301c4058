use std::env;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::warn;
use rand::RngCore;

const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
/// One year.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 366;

#[derive(Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub sqlite_path: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let server_port = env::var("SERVER_PORT")
            .or_else(|_| env::var("PORT"))
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8000);

        let sqlite_path = env::var("SQLITE_PATH").unwrap_or_else(|_| "./data/ctc.sqlite".to_string());
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());

        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| {
                warn!("JWT_SECRET not set, using a random secret; issued tokens will not survive a restart");
                random_secret()
            });

        let token_ttl_hours = parse_ttl_hours(env::var("TOKEN_TTL_HOURS").ok().as_deref());

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| parse_origins(&v))
            .unwrap_or_default();

        Self {
            server_port,
            sqlite_path,
            database_url,
            jwt_secret,
            token_ttl_hours,
            cors_origins,
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let path = self.sqlite_path.trim();
        if path.starts_with("sqlite:") || path.starts_with("file:") {
            return path.to_string();
        }
        format!("sqlite://{}?mode=rwc", path)
    }

    /// In-memory database and a fixed secret.
    pub fn for_tests() -> Self {
        Self {
            server_port: 0,
            sqlite_path: String::new(),
            database_url: Some("sqlite::memory:".to_string()),
            jwt_secret: "ctc-test-secret".to_string(),
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            cors_origins: Vec::new(),
        }
    }
}

fn parse_ttl_hours(raw: Option<&str>) -> i64 {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return DEFAULT_TOKEN_TTL_HOURS;
    };
    match raw.parse::<i64>() {
        Ok(hours) if hours > MAX_TOKEN_TTL_HOURS => {
            warn!("TOKEN_TTL_HOURS={} too large, capped at {}", hours, MAX_TOKEN_TTL_HOURS);
            MAX_TOKEN_TTL_HOURS
        }
        Ok(hours) if hours > 0 => hours,
        _ => {
            warn!("TOKEN_TTL_HOURS={:?} ignored, using {}", raw, DEFAULT_TOKEN_TTL_HOURS);
            DEFAULT_TOKEN_TTL_HOURS
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect()
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_becomes_sqlite_url() {
        let mut cfg = AppConfig::for_tests();
        cfg.database_url = None;
        cfg.sqlite_path = "/tmp/ctc.sqlite".to_string();
        assert_eq!(cfg.database_url(), "sqlite:///tmp/ctc.sqlite?mode=rwc");

        cfg.sqlite_path = "sqlite::memory:".to_string();
        assert_eq!(cfg.database_url(), "sqlite::memory:");
    }

    #[test]
    fn token_ttl_is_bounded() {
        assert_eq!(parse_ttl_hours(None), 24);
        assert_eq!(parse_ttl_hours(Some(" 48 ")), 48);
        assert_eq!(parse_ttl_hours(Some("0")), 24);
        assert_eq!(parse_ttl_hours(Some("-5")), 24);
        assert_eq!(parse_ttl_hours(Some("soon")), 24);
        assert_eq!(parse_ttl_hours(Some("3000000000")), MAX_TOKEN_TTL_HOURS);
        assert_eq!(parse_ttl_hours(Some("99999999999999999999")), 24);
    }

    #[test]
    fn origins_are_comma_separated() {
        assert_eq!(
            parse_origins(" http://localhost:5173/, ,https://ctc.example.com"),
            vec!["http://localhost:5173", "https://ctc.example.com"]
        );
    }

    #[test]
    fn random_secrets_differ() {
        assert_ne!(random_secret(), random_secret());
        assert_eq!(STANDARD.decode(random_secret()).map(|b| b.len()).ok(), Some(32));
    }
}
