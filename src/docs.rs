use axum::Router;
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::authz::{Decision, DenyReason, ValidationWarning};
use crate::models::{permission, rbac};
use crate::routes::{dealers, health, permissions, resolve, roles};

#[derive(OpenApi)]
#[openapi(
	paths(
		health::health,
		permissions::list_permissions,
		permissions::create_permission,
		permissions::set_permission_active,
		permissions::validate_draft,
		roles::list_roles,
		roles::create_role,
		roles::get_role,
		roles::get_role_permissions,
		roles::save_role_permissions,
		roles::list_role_modules,
		roles::toggle_role_module,
		dealers::list_dealer_modules,
		resolve::resolve_permission
	),
	components(
		schemas(
			health::HealthResponse,
			permission::ModuleId,
			permission::PermissionScope,
			permission::Permission,
			permission::PermissionCreateRequest,
			permission::PermissionActiveRequest,
			rbac::Role,
			rbac::RoleCreateRequest,
			rbac::PermissionDraft,
			rbac::RoleAssignments,
			rbac::RoleModuleAccess,
			rbac::ToggleModuleRequest,
			rbac::DealershipModule,
			permissions::CatalogResponse,
			permissions::ValidationResponse,
			roles::RolePermissionsResponse,
			resolve::ResolveRequest,
			ValidationWarning,
			Decision,
			DenyReason
		)
	),
	tags(
		(name = "Health", description = "Liveness and database reachability"),
		(name = "Permissions", description = "Permission catalog and draft validation"),
		(name = "Roles", description = "Role permission assignments and module access"),
		(name = "Dealers", description = "Dealership module configuration"),
		(name = "Authorization", description = "Permission resolution")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_global_security(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

/// Serves the document at `/api-docs/openapi.json` and the UI at `/docs`.
pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.persist_authorization(true);

	Router::new().merge(
		SwaggerUi::new("/docs")
			.url("/api-docs/openapi.json", doc)
			.config(swagger_config),
	)
}

fn object_entry<'a>(parent: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
	parent
		.as_object_mut()?
		.entry(key)
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
}

fn ensure_security_components(doc: &mut Value) {
	let Some(components) = object_entry(doc, "components") else {
		return;
	};

	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()));

	if let Some(schemes) = schemes.as_object_mut() {
		schemes.insert(
			"bearerAuth".to_string(),
			json!({
				"type": "http",
				"scheme": "bearer",
				"bearerFormat": "JWT"
			}),
		);
	}
}

fn ensure_global_security(doc: &mut Value) {
	if let Some(root) = doc.as_object_mut() {
		root.entry("security").or_insert_with(|| json!([{ "bearerAuth": [] }]));
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{port}");

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}
