//! Permission catalog endpoints and draft validation.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::{CatalogTable, NewPermission, PermissionCatalog, ValidationWarning};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::jwt::AuthUser;
use crate::models::permission::{ModuleId, Permission, PermissionActiveRequest, PermissionCreateRequest};
use crate::models::rbac::PermissionDraft;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_permissions).post(create_permission))
        .route("/validate", post(validate_draft))
        .route("/:scope/:id/active", put(set_permission_active))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CatalogResponse {
    pub system: Vec<Permission>,
    #[schema(value_type = Object)]
    pub modules: BTreeMap<ModuleId, Vec<Permission>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidationResponse {
    /// Submitted permissions in display order.
    #[schema(value_type = Vec<String>)]
    pub permissions: Vec<String>,
    #[schema(value_type = Vec<String>)]
    pub dangerous: Vec<String>,
    pub warnings: Vec<ValidationWarning>,
}

/// List active catalog entries
#[utoipa::path(
    get,
    path = "/permissions",
    tag = "Permissions",
    responses(
        (status = 200, description = "System permissions and module permissions by module", body = CatalogResponse),
        (status = 503, description = "Catalog unavailable"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<CatalogResponse>> {
    let system = state.store.list_system_permissions().await?;
    let modules = state.store.list_module_permissions().await?;

    Ok(Json(CatalogResponse { system, modules }))
}

/// Add a catalog entry
#[utoipa::path(
    post,
    path = "/permissions",
    tag = "Permissions",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<PermissionCreateRequest>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    if req.display_name.trim().is_empty() {
        return Err(AppError::bad_request("display_name must not be empty"));
    }

    let permission = state
        .store
        .create_permission(NewPermission {
            permission: req.permission,
            display_name: req.display_name,
            description: req.description,
            category: req.category,
            is_dangerous: req.is_dangerous,
        })
        .await?;

    log_activity(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &permission,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(permission)))
}

/// Activate or deactivate a catalog entry
#[utoipa::path(
    put,
    path = "/permissions/{scope}/{id}/active",
    tag = "Permissions",
    params(
        ("scope" = String, Path, description = "`system` or `module`"),
        ("id" = i64, Path, description = "Catalog entry id"),
    ),
    request_body = PermissionActiveRequest,
    responses(
        (status = 200, description = "Updated entry", body = Permission),
        (status = 404, description = "Permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn set_permission_active(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((scope, id)): Path<(String, i64)>,
    Json(req): Json<PermissionActiveRequest>,
) -> AppResult<Json<Permission>> {
    let table = match scope.as_str() {
        "system" => CatalogTable::System,
        "module" => CatalogTable::Module,
        other => return Err(AppError::bad_request(format!("unknown permission scope '{other}'"))),
    };

    let permission = state.store.set_permission_active(table, id, req.is_active).await?;

    log_activity(
        &state.event_bus,
        if req.is_active { "activated" } else { "deactivated" },
        Some(auth.user_id),
        &permission,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(permission))
}

/// Check a draft for missing prerequisites without saving it
#[utoipa::path(
    post,
    path = "/permissions/validate",
    tag = "Permissions",
    request_body = PermissionDraft,
    responses(
        (status = 200, description = "Warnings are advisory", body = ValidationResponse),
        (status = 503, description = "Catalog unavailable"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn validate_draft(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(draft): Json<PermissionDraft>,
) -> AppResult<Json<ValidationResponse>> {
    let rules = state.catalog_rules().await?;
    let sorted = rules.sort_permissions(draft.refs());
    let dangerous = sorted
        .iter()
        .filter(|p| rules.is_dangerous(p))
        .map(ToString::to_string)
        .collect();

    Ok(Json(ValidationResponse {
        permissions: sorted.iter().map(ToString::to_string).collect(),
        dangerous,
        warnings: rules.validate(&draft),
    }))
}
