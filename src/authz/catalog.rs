use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;

use super::error::{AuthzError, AuthzResult};
use super::store::SqliteStore;
use crate::db::row_parsers::{module_permission_from_row, system_permission_from_row};
use crate::models::permission::{ModuleId, Permission, PermissionRef, PermissionScope};

/// A catalog entry to create.
#[derive(Debug, Clone)]
pub struct NewPermission {
    pub permission: PermissionRef,
    pub display_name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub is_dangerous: bool,
}

/// Known permissions. Reads only ever return active entries.
#[async_trait]
pub trait PermissionCatalog: Send + Sync {
    /// Active system permissions ordered by category, then key.
    async fn list_system_permissions(&self) -> AuthzResult<Vec<Permission>>;

    /// Active module permissions grouped by module, ordered by key.
    async fn list_module_permissions(&self) -> AuthzResult<BTreeMap<ModuleId, Vec<Permission>>>;

    async fn create_permission(&self, input: NewPermission) -> AuthzResult<Permission>;

    /// Soft enable / disable. Entries are never deleted.
    async fn set_permission_active(&self, scope: CatalogTable, id: i64, is_active: bool) -> AuthzResult<Permission>;
}

/// Which catalog table an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogTable {
    System,
    Module,
}

impl CatalogTable {
    fn table(self) -> &'static str {
        match self {
            CatalogTable::System => "system_permissions",
            CatalogTable::Module => "module_permissions",
        }
    }
}

const SYSTEM_COLUMNS: &str =
    "id, permission_key, display_name, description, category, is_dangerous, is_active, created_at, updated_at";
const MODULE_COLUMNS: &str =
    "id, module, permission_key, display_name, description, is_dangerous, is_active, created_at, updated_at";

impl SqliteStore {
    async fn fetch_catalog_entry(&self, table: CatalogTable, id: i64) -> AuthzResult<Option<Permission>> {
        let sql = match table {
            CatalogTable::System => format!("SELECT {SYSTEM_COLUMNS} FROM system_permissions WHERE id = ?"),
            CatalogTable::Module => format!("SELECT {MODULE_COLUMNS} FROM module_permissions WHERE id = ?"),
        };
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(AuthzError::CatalogUnavailable)?;

        row.map(|row| match table {
            CatalogTable::System => system_permission_from_row(&row),
            CatalogTable::Module => module_permission_from_row(&row),
        })
        .transpose()
    }
}

#[async_trait]
impl PermissionCatalog for SqliteStore {
    async fn list_system_permissions(&self) -> AuthzResult<Vec<Permission>> {
        let rows = sqlx::query(&format!(
            "SELECT {SYSTEM_COLUMNS} FROM system_permissions WHERE is_active = 1 ORDER BY category, permission_key"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(AuthzError::CatalogUnavailable)?;

        rows.iter().map(system_permission_from_row).collect()
    }

    async fn list_module_permissions(&self) -> AuthzResult<BTreeMap<ModuleId, Vec<Permission>>> {
        let rows = sqlx::query(&format!(
            "SELECT {MODULE_COLUMNS} FROM module_permissions WHERE is_active = 1 ORDER BY module, permission_key"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(AuthzError::CatalogUnavailable)?;

        let mut grouped: BTreeMap<ModuleId, Vec<Permission>> = BTreeMap::new();
        for row in &rows {
            let permission = module_permission_from_row(row)?;
            if let PermissionScope::Module { module } = &permission.scope {
                grouped.entry(module.clone()).or_default().push(permission);
            }
        }
        Ok(grouped)
    }

    async fn create_permission(&self, input: NewPermission) -> AuthzResult<Permission> {
        let now = Utc::now().to_rfc3339();
        let what = format!("permission '{}'", input.permission);

        let result = match &input.permission {
            PermissionRef::System(key) => sqlx::query(
                "INSERT INTO system_permissions (permission_key, display_name, description, category, is_dangerous, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
            )
            .bind(key)
            .bind(&input.display_name)
            .bind(&input.description)
            .bind(input.category.as_deref().unwrap_or("general"))
            .bind(input.is_dangerous)
            .bind(&now)
            .bind(&now)
            .execute(self.pool())
            .await,
            PermissionRef::Module { module, key } => sqlx::query(
                "INSERT INTO module_permissions (module, permission_key, display_name, description, is_dangerous, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
            )
            .bind(module.as_str())
            .bind(key)
            .bind(&input.display_name)
            .bind(&input.description)
            .bind(input.is_dangerous)
            .bind(&now)
            .bind(&now)
            .execute(self.pool())
            .await,
        }
        .map_err(|err| AuthzError::from_write(err, &what))?;

        let table = if input.permission.is_system() { CatalogTable::System } else { CatalogTable::Module };
        let id = result.last_insert_rowid();

        tracing::info!(permission = %input.permission, id, "permission created");

        self.fetch_catalog_entry(table, id)
            .await?
            .ok_or_else(|| AuthzError::PermissionNotFound(input.permission.to_string()))
    }

    async fn set_permission_active(&self, scope: CatalogTable, id: i64, is_active: bool) -> AuthzResult<Permission> {
        let now = Utc::now().to_rfc3339();
        let sql = format!("UPDATE {} SET is_active = ?, updated_at = ? WHERE id = ?", scope.table());

        let result = sqlx::query(&sql)
            .bind(is_active)
            .bind(&now)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(AuthzError::Persistence)?;

        if result.rows_affected() == 0 {
            return Err(AuthzError::PermissionNotFound(format!("{}#{id}", scope.table())));
        }

        tracing::info!(table = scope.table(), id, is_active, "permission activation changed");

        self.fetch_catalog_entry(scope, id)
            .await?
            .ok_or_else(|| AuthzError::PermissionNotFound(format!("{}#{id}", scope.table())))
    }
}
