use std::collections::BTreeSet;

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::Decision;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::permission::ModuleId;

pub fn routes() -> Router<AppState> {
    Router::new().route("/resolve", post(resolve_permission))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveRequest {
    /// Defaults to the dealership carried in the caller's token.
    #[schema(example = 5)]
    pub dealer_id: Option<i64>,
    #[serde(default)]
    pub role_ids: Vec<Uuid>,
    #[schema(value_type = String, example = "service_orders")]
    pub module: ModuleId,
    #[schema(example = "write")]
    pub permission: String,
}

/// Decide whether a set of roles may perform an action in a dealership module
#[utoipa::path(
    post,
    path = "/authz/resolve",
    tag = "Authorization",
    request_body = ResolveRequest,
    responses(
        (status = 200, description = "Allow, or Deny with the first failing check", body = Decision),
        (status = 400, description = "No dealership given"),
        (status = 503, description = "Assignment data could not be read"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn resolve_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<ResolveRequest>,
) -> AppResult<Json<Decision>> {
    let dealer_id = req
        .dealer_id
        .or(auth.dealer_id)
        .ok_or_else(|| AppError::bad_request("dealer_id is required when the token carries none"))?;

    let permission = req.permission.trim();
    if permission.is_empty() {
        return Err(AppError::bad_request("permission must not be empty"));
    }

    let role_ids: BTreeSet<Uuid> = req.role_ids.into_iter().collect();
    let decision = state.resolver.resolve(dealer_id, &role_ids, &req.module, permission).await?;

    Ok(Json(decision))
}
