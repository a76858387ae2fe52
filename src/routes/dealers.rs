use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::app::AppState;
use crate::authz::DealershipModules;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::rbac::DealershipModule;

pub fn routes() -> Router<AppState> {
    Router::new().route("/:dealer_id/modules", get(list_dealer_modules))
}

/// Module switches of a dealership. Modules without a row are disabled.
#[utoipa::path(
    get,
    path = "/dealers/{dealer_id}/modules",
    tag = "Dealers",
    params(("dealer_id" = i64, Path, description = "Dealership ID")),
    responses((status = 200, description = "Dealership module switches", body = Vec<DealershipModule>)),
    security(("bearerAuth" = []))
)]
pub async fn list_dealer_modules(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(dealer_id): Path<i64>,
) -> AppResult<Json<Vec<DealershipModule>>> {
    Ok(Json(state.store.list_modules(dealer_id).await?))
}
