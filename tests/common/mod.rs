#![allow(dead_code)]

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use dealer_authz::authz::PrerequisiteMode;
use dealer_authz::jwt::JwtConfig;
use dealer_authz::{create_app_with_settings, Settings};

pub const SECRET: &str = "test-secret";

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    pub token: String,
    _dir: TempDir,
}

/// Fresh migrated database file; the directory lives as long as the returned guard.
pub async fn migrated_pool() -> Result<(SqlitePool, TempDir)> {
    let dir = tempfile::tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    Ok((pool, dir))
}

pub async fn spawn_app() -> Result<TestApp> {
    spawn_app_with_mode(PrerequisiteMode::Advisory).await
}

pub async fn spawn_app_with_mode(mode: PrerequisiteMode) -> Result<TestApp> {
    let (pool, dir) = migrated_pool().await?;
    let settings = Settings::with_secret(SECRET)?.with_prerequisite_mode(mode);
    let app = create_app_with_settings(pool.clone(), settings);
    let token = JwtConfig::new(SECRET, 1).encode(Uuid::new_v4(), Some(5))?;

    Ok(TestApp { app, pool, token, _dir: dir })
}

impl TestApp {
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", self.token));

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let resp = self.app.clone().oneshot(builder.body(body)?).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };

        Ok((status, value))
    }

    pub async fn create_role(&self, name: &str) -> Result<Uuid> {
        let (status, body) = self.send(Method::POST, "/roles", Some(serde_json::json!({ "name": name }))).await?;
        assert_eq!(status, StatusCode::CREATED, "create role failed: {body}");
        Ok(body["id"].as_str().unwrap_or_default().parse()?)
    }

    pub async fn set_dealer_module(&self, dealer_id: i64, module: &str, enabled: bool) -> Result<()> {
        set_dealer_module(&self.pool, dealer_id, module, enabled).await
    }
}

/// Dealership configuration is owned elsewhere; tests write it directly.
pub async fn set_dealer_module(pool: &SqlitePool, dealer_id: i64, module: &str, enabled: bool) -> Result<()> {
    sqlx::query(
        "INSERT INTO dealership_modules (dealer_id, module, is_enabled) VALUES (?, ?, ?)
         ON CONFLICT (dealer_id, module) DO UPDATE SET is_enabled = excluded.is_enabled",
    )
    .bind(dealer_id)
    .bind(module)
    .bind(enabled)
    .execute(pool)
    .await?;
    Ok(())
}
