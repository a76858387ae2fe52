//! Role administration: role records, permission assignments and module switches.
//!
//! Every change is published to the activity log with Critical severity.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{AssignmentStore, PrerequisiteMode, ValidationWarning};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::jwt::AuthUser;
use crate::models::permission::ModuleId;
use crate::models::rbac::{
    PermissionDraft, Role, RoleAssignments, RoleCreateRequest, RoleModuleAccess, ToggleModuleRequest,
};

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/:role_id", get(get_role))
        .route("/:role_id/permissions", get(get_role_permissions).put(save_role_permissions))
        .route("/:role_id/modules", get(list_role_modules))
        .route("/:role_id/modules/:module", put(toggle_role_module))
}

/// Assignments together with the advisory prerequisite warnings for them.
#[derive(Debug, Serialize, ToSchema)]
pub struct RolePermissionsResponse {
    pub assignments: RoleAssignments,
    pub warnings: Vec<ValidationWarning>,
}

// =============================================================================
// ROLES
// =============================================================================

/// List all roles
#[utoipa::path(
    get,
    path = "/roles",
    tag = "Roles",
    responses((status = 200, description = "List of roles", body = Vec<Role>)),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<Role>>> {
    Ok(Json(state.store.list_roles().await?))
}

/// Create a role
#[utoipa::path(
    post,
    path = "/roles",
    tag = "Roles",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("role name must not be empty"));
    }

    let role = state.store.create_role(name, req.description.as_deref()).await?;

    log_activity(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/roles/{role_id}",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Role>> {
    Ok(Json(state.store.get_role(role_id).await?))
}

// =============================================================================
// ASSIGNMENTS
// =============================================================================

/// Active permissions granted to a role
#[utoipa::path(
    get,
    path = "/roles/{role_id}/permissions",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Current assignments", body = RolePermissionsResponse),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role_permissions(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<RolePermissionsResponse>> {
    let assignments = state.store.load_assignments(role_id).await?;
    let warnings = state.catalog_rules().await?.validate(&assignments.to_draft());

    Ok(Json(RolePermissionsResponse { assignments, warnings }))
}

/// Replace a role's permission set
///
/// Missing prerequisites are reported as warnings and do not block the save.
/// With `PREREQUISITE_MODE=enforce` they are added before writing.
#[utoipa::path(
    put,
    path = "/roles/{role_id}/permissions",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    request_body = PermissionDraft,
    responses(
        (status = 200, description = "Saved assignments", body = RolePermissionsResponse),
        (status = 400, description = "Unknown or inactive permission"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Draft is based on an outdated version"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn save_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    Json(draft): Json<PermissionDraft>,
) -> AppResult<Json<RolePermissionsResponse>> {
    let old = state.store.load_assignments(role_id).await?;
    let rules = state.catalog_rules().await?;

    let draft = match state.prerequisite_mode {
        PrerequisiteMode::Advisory => draft,
        PrerequisiteMode::Enforce => rules.expand(&draft),
    };

    let assignments = state.store.save_assignments(role_id, &draft).await?;
    let warnings = rules.validate(&assignments.to_draft());

    if !warnings.is_empty() {
        tracing::info!(role_id = %role_id, warnings = warnings.len(), "saved with missing prerequisites");
    }

    log_activity(
        &state.event_bus,
        "saved",
        Some(auth.user_id),
        &assignments,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(RolePermissionsResponse { assignments, warnings }))
}

// =============================================================================
// MODULE ACCESS
// =============================================================================

/// Module switches recorded for a role. Modules without a row are disabled.
#[utoipa::path(
    get,
    path = "/roles/{role_id}/modules",
    tag = "Roles",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses((status = 200, description = "Module switches", body = Vec<RoleModuleAccess>)),
    security(("bearerAuth" = []))
)]
pub async fn list_role_modules(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Vec<RoleModuleAccess>>> {
    state.store.get_role(role_id).await?;
    Ok(Json(state.store.list_module_access(role_id).await?))
}

/// Enable or disable a module for a role
#[utoipa::path(
    put,
    path = "/roles/{role_id}/modules/{module}",
    tag = "Roles",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("module" = String, Path, description = "Module id, e.g. `service_orders`"),
    ),
    request_body = ToggleModuleRequest,
    responses(
        (status = 200, description = "Switch updated", body = RoleModuleAccess),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn toggle_role_module(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((role_id, module)): Path<(Uuid, String)>,
    Json(req): Json<ToggleModuleRequest>,
) -> AppResult<Json<RoleModuleAccess>> {
    let module = ModuleId::new(module).map_err(|err| AppError::bad_request(err.to_string()))?;

    let access = state.store.toggle_module_access(role_id, &module, req.enabled).await?;

    log_activity(
        &state.event_bus,
        if req.enabled { "enabled" } else { "disabled" },
        Some(auth.user_id),
        &access,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(access))
}
