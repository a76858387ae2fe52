use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{AuthzResult, PermissionCatalog, PermissionRules, PrerequisiteMode, Resolver, SqliteStore};
use crate::config::Settings;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{dealers, health, permissions, resolve, roles};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub store: SqliteStore,
    pub resolver: Resolver,
    pub rules: Arc<PermissionRules>,
    pub prerequisite_mode: PrerequisiteMode,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, settings: Settings, event_bus: EventBus) -> Self {
        let store = SqliteStore::new(pool.clone());
        let resolver = Resolver::new(Arc::new(store.clone()));

        Self {
            pool,
            jwt: Arc::new(settings.jwt),
            store,
            resolver,
            rules: settings.rules,
            prerequisite_mode: settings.prerequisite_mode,
            event_bus,
        }
    }
}

impl AppState {
    /// Prerequisite rules carrying the danger flags and categories of the
    /// active catalog.
    pub async fn catalog_rules(&self) -> AuthzResult<PermissionRules> {
        let system = self.store.list_system_permissions().await?;
        let modules = self.store.list_module_permissions().await?;
        Ok(self.rules.with_catalog(system.iter().chain(modules.values().flatten())))
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let settings = Settings::from_env()?;
    Ok(create_app_with_settings(pool, settings))
}

/// Builds the router and spawns the audit listener. Must run inside a Tokio runtime.
pub fn create_app_with_settings(pool: SqlitePool, settings: Settings) -> Router {
    let (event_bus, rx) = init_event_bus();
    tokio::spawn(start_activity_listener(rx, pool.clone()));

    let state = AppState::new(pool, settings, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/permissions", permissions::routes())
        .nest("/roles", roles::routes())
        .nest("/dealers", dealers::routes())
        .nest("/authz", resolve::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
