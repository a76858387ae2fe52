//! Audit trail for authorization changes.
//!
//! Handlers publish events on a broadcast bus; a single listener task
//! projects them into `activity_log`, chaining each row to the previous one
//! with `SHA256(prev_hash || payload)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<String>,
    pub payload: ActivityPayload,
}

pub type EventBus = broadcast::Sender<DomainEvent>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<DomainEvent>) {
    broadcast::channel(1024)
}

/// Caller details attached to an audit entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()).map(String::from));

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    #[serde(rename = "new")]
    pub current: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    pub severity: Severity,
}

/// Publishes `<entity>.<action>` for `entity`. Delivery is best effort: a
/// bus without listeners drops the event.
pub fn log_activity<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
    context: Option<RequestContext>,
) {
    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.and_then(|e| serde_json::to_value(e).ok()),
        context,
        severity: entity.severity_for_action(action),
    };

    let event = DomainEvent {
        id: Uuid::new_v4(),
        name: format!("{}.{}", T::entity_type(), action),
        occurred_at: Utc::now(),
        actor_id,
        subject_id: Some(entity.subject_id()),
        payload,
    };

    if event_bus.send(event).is_err() {
        tracing::debug!(entity = T::entity_type(), action, "no activity listener; event dropped");
    }
}

fn describe(name: &str) -> &'static str {
    match name {
        "role.created" => "Role created",
        "role_permissions.saved" => "Role permissions replaced",
        "role_module_access.enabled" => "Module enabled for role",
        "role_module_access.disabled" => "Module disabled for role",
        "permission.created" => "Permission added to catalog",
        "permission.activated" => "Permission activated",
        "permission.deactivated" => "Permission deactivated",
        _ => "Authorization event",
    }
}

pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

async fn latest_hash(pool: &SqlitePool) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT hash FROM activity_log ORDER BY rowid DESC LIMIT 1")
        .fetch_optional(pool)
        .await
}

/// Appends one row chained to `prev_hash` and returns the new row's hash.
///
/// A single INSERT, so the listener never holds a read lock while waiting
/// for the write lock.
async fn store_event(pool: &SqlitePool, event: &DomainEvent, prev_hash: Option<&str>) -> Result<String, sqlx::Error> {
    let properties = serde_json::to_string(event).unwrap_or_default();
    let hash = chain_hash(prev_hash, &properties);

    sqlx::query(
        r#"
        INSERT INTO activity_log (id, event_name, description, actor_id, subject_id, occurred_at, properties, severity, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id.to_string())
    .bind(&event.name)
    .bind(describe(&event.name))
    .bind(event.actor_id.map(|id| id.to_string()))
    .bind(&event.subject_id)
    .bind(event.occurred_at.to_rfc3339())
    .bind(&properties)
    .bind(event.payload.severity.as_str())
    .bind(prev_hash)
    .bind(&hash)
    .execute(pool)
    .await?;

    Ok(hash)
}

/// Runs until every sender is dropped. This task is the only writer of
/// `activity_log`, so it keeps the chain head in memory.
pub async fn start_activity_listener(mut rx: broadcast::Receiver<DomainEvent>, pool: SqlitePool) {
    tracing::info!("activity listener started");

    let mut head = match latest_hash(&pool).await {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!(error = %e, "failed to read activity log head; chain restarts");
            None
        }
    };

    loop {
        match rx.recv().await {
            Ok(event) => match store_event(&pool, &event, head.as_deref()).await {
                Ok(hash) => head = Some(hash),
                Err(e) => tracing::error!(event = %event.name, error = %e, "failed to save activity log"),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener lagged; events lost");
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::info!("activity listener stopped");
}
