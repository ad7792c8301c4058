use log::{debug, info, warn};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use std::fs;
use std::io;
use std::path::Path;

use crate::config::AppConfig;

pub async fn connect_db(config: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    let url = config.database_url();
    if let Err(e) = ensure_sqlite_path(&url) {
        warn!("cannot create database directory for {}: {}", url, e);
    }
    let db = connect_url(&url).await?;
    init_schema(&db).await?;
    Ok(db)
}

pub async fn connect_url(url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(url.to_string());
    // every pooled connection to :memory: would open its own empty database
    if url.contains(":memory:") {
        opts.max_connections(1).min_connections(1);
    }
    opts.sqlx_logging(false);
    Database::connect(opts).await
}

fn ensure_sqlite_path(url: &str) -> io::Result<()> {
    if url.contains(":memory:") {
        return Ok(());
    }
    let Some(path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let exists_stmt = Statement::from_string(
        backend,
        "SELECT name FROM sqlite_master WHERE type='table' AND name='t_experience' LIMIT 1",
    );
    if db.query_one(exists_stmt).await?.is_some() {
        debug!("schema already present");
        return Ok(());
    }

    let sql = include_str!("../schema-sqlite.sql");
    for stmt in split_sql(sql) {
        db.execute(Statement::from_string(backend, stmt)).await?;
    }
    info!("schema created");
    Ok(())
}

fn split_sql(input: &str) -> Vec<String> {
    let mut buf = String::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }
        buf.push_str(line);
        buf.push('\n');
    }
    buf.split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sql_drops_comments_and_blanks() {
        let stmts = split_sql("-- header\nCREATE TABLE a (id INTEGER);\n\nCREATE INDEX i ON a (id);\n");
        assert_eq!(stmts, vec!["CREATE TABLE a (id INTEGER)", "CREATE INDEX i ON a (id)"]);
    }

    #[test]
    fn bundled_schema_has_every_table() {
        let stmts = split_sql(include_str!("../schema-sqlite.sql"));
        for table in [
            "t_user",
            "t_profile",
            "t_opportunity",
            "t_application",
            "t_education",
            "t_experience",
        ] {
            assert!(stmts.iter().any(|s| s.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table))));
        }
        assert!(stmts.iter().any(|s| s.contains("uk_application_pair")));
    }

    #[test]
    fn database_directory_failures_surface() {
        let base = std::env::temp_dir().join(format!("ctc-db-{}", std::process::id()));
        let nested = base.join("nested");
        ensure_sqlite_path(&format!("sqlite://{}/ctc.sqlite?mode=rwc", nested.display()))
            .expect("creates parent");
        assert!(nested.is_dir());

        let blocker = base.join("blocker");
        fs::write(&blocker, b"").expect("write file");
        let err = ensure_sqlite_path(&format!("sqlite://{}/sub/ctc.sqlite", blocker.display()));
        assert!(err.is_err());

        assert!(ensure_sqlite_path("sqlite::memory:").is_ok());
        let _ = fs::remove_dir_all(&base);
    }

    #[actix_rt::test]
    async fn init_schema_is_idempotent() {
        let db = connect_url("sqlite::memory:").await.expect("connect");
        init_schema(&db).await.expect("first init");
        init_schema(&db).await.expect("second init");
    }
}
