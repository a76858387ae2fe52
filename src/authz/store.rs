use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::error::{AuthzError, AuthzResult};
use super::resolver::{AccessSnapshot, RoleAccess, SnapshotSource};
use crate::db::row_parsers::{dealership_module_from_row, module_access_from_row, role_from_row};
use crate::models::permission::ModuleId;
use crate::models::rbac::{DealershipModule, PermissionDraft, Role, RoleAssignments, RoleModuleAccess};

/// Durable role -> permission mapping and per-role module switches.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Active granted permissions of a role; empty sets when nothing is assigned.
    async fn load_assignments(&self, role_id: Uuid) -> AuthzResult<RoleAssignments>;

    /// Replaces the role's whole permission set in one transaction.
    async fn save_assignments(&self, role_id: Uuid, draft: &PermissionDraft) -> AuthzResult<RoleAssignments>;

    /// Flips a module switch for a role. Never touches permission assignments.
    async fn toggle_module_access(&self, role_id: Uuid, module: &ModuleId, enabled: bool) -> AuthzResult<RoleModuleAccess>;

    async fn list_module_access(&self, role_id: Uuid) -> AuthzResult<Vec<RoleModuleAccess>>;
}

/// Read side of the dealership configuration.
#[async_trait]
pub trait DealershipModules: Send + Sync {
    /// A dealership without a row for `module` does not have it enabled.
    async fn is_module_enabled(&self, dealer_id: i64, module: &ModuleId) -> AuthzResult<bool>;

    async fn list_modules(&self, dealer_id: i64) -> AuthzResult<Vec<DealershipModule>>;
}

/// SQLite-backed catalog, assignment store and dealership reader.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_role(&self, name: &str, description: Option<&str>) -> AuthzResult<Role> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO roles (id, name, description, permissions_version, created_at, updated_at) VALUES (?, ?, ?, 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(description)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|err| AuthzError::from_write(err, &format!("role '{name}'")))?;

        tracing::info!(role_id = %id, role = %name, "role created");
        self.get_role(id).await
    }

    pub async fn get_role(&self, role_id: Uuid) -> AuthzResult<Role> {
        let row = sqlx::query(
            "SELECT id, name, description, permissions_version, created_at, updated_at FROM roles WHERE id = ?",
        )
        .bind(role_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(AuthzError::Persistence)?
        .ok_or(AuthzError::RoleNotFound(role_id))?;

        role_from_row(&row)
    }

    pub async fn list_roles(&self) -> AuthzResult<Vec<Role>> {
        let rows = sqlx::query(
            "SELECT id, name, description, permissions_version, created_at, updated_at FROM roles ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(AuthzError::Persistence)?;

        rows.iter().map(role_from_row).collect()
    }
}

async fn role_version(tx: &mut Transaction<'_, Sqlite>, role_id: Uuid) -> AuthzResult<i64> {
    sqlx::query_scalar::<_, i64>("SELECT permissions_version FROM roles WHERE id = ?")
        .bind(role_id.to_string())
        .fetch_optional(&mut **tx)
        .await
        .map_err(AuthzError::Persistence)?
        .ok_or(AuthzError::RoleNotFound(role_id))
}

/// Bumps the role's version and returns the new value. Run first in a write
/// transaction so the write lock is taken before anything is read.
async fn bump_version(tx: &mut Transaction<'_, Sqlite>, role_id: Uuid, now: &str) -> AuthzResult<i64> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE roles SET permissions_version = permissions_version + 1, updated_at = ? WHERE id = ? RETURNING permissions_version",
    )
    .bind(now)
    .bind(role_id.to_string())
    .fetch_optional(&mut **tx)
    .await
    .map_err(AuthzError::Persistence)?
    .ok_or(AuthzError::RoleNotFound(role_id))
}

/// Maps every submitted key to its catalog id. Unknown and inactive keys are
/// rejected before anything is written.
async fn catalog_ids(
    tx: &mut Transaction<'_, Sqlite>,
    draft: &PermissionDraft,
) -> AuthzResult<(Vec<i64>, Vec<i64>)> {
    let mut system_ids = Vec::with_capacity(draft.system.len());
    for key in &draft.system {
        let found = sqlx::query_as::<_, (i64, bool)>(
            "SELECT id, is_active FROM system_permissions WHERE permission_key = ?",
        )
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(AuthzError::Persistence)?;

        match found {
            Some((id, true)) => system_ids.push(id),
            Some((_, false)) => {
                return Err(AuthzError::invalid_permission(format!("system permission '{key}' is inactive")))
            }
            None => return Err(AuthzError::invalid_permission(format!("unknown system permission '{key}'"))),
        }
    }

    let mut module_ids = Vec::new();
    for (module, keys) in &draft.modules {
        for key in keys {
            let found = sqlx::query_as::<_, (i64, bool)>(
                "SELECT id, is_active FROM module_permissions WHERE module = ? AND permission_key = ?",
            )
            .bind(module.as_str())
            .bind(key)
            .fetch_optional(&mut **tx)
            .await
            .map_err(AuthzError::Persistence)?;

            match found {
                Some((id, true)) => module_ids.push(id),
                Some((_, false)) => {
                    return Err(AuthzError::invalid_permission(format!("module permission '{module}:{key}' is inactive")))
                }
                None => {
                    return Err(AuthzError::invalid_permission(format!("unknown module permission '{module}:{key}'")))
                }
            }
        }
    }

    Ok((system_ids, module_ids))
}

/// Active granted keys of a role, read inside the caller's transaction.
async fn granted_keys(
    tx: &mut Transaction<'_, Sqlite>,
    role_id: Uuid,
) -> AuthzResult<(BTreeSet<String>, BTreeMap<ModuleId, BTreeSet<String>>)> {
    let system: BTreeSet<String> = sqlx::query_scalar::<_, String>(
        r#"
        SELECT sp.permission_key
        FROM system_permissions sp
        INNER JOIN role_system_permissions rsp ON sp.id = rsp.permission_id
        WHERE rsp.role_id = ? AND sp.is_active = 1
        "#,
    )
    .bind(role_id.to_string())
    .fetch_all(&mut **tx)
    .await
    .map_err(AuthzError::Persistence)?
    .into_iter()
    .collect();

    let module_rows = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT mp.module, mp.permission_key
        FROM module_permissions mp
        INNER JOIN role_module_permissions rmp ON mp.id = rmp.permission_id
        WHERE rmp.role_id = ? AND mp.is_active = 1
        "#,
    )
    .bind(role_id.to_string())
    .fetch_all(&mut **tx)
    .await
    .map_err(AuthzError::Persistence)?;

    let mut modules: BTreeMap<ModuleId, BTreeSet<String>> = BTreeMap::new();
    for (module, key) in module_rows {
        let module = ModuleId::new(module).map_err(|e| AuthzError::corrupt(e.to_string()))?;
        modules.entry(module).or_default().insert(key);
    }

    Ok((system, modules))
}

#[async_trait]
impl AssignmentStore for SqliteStore {
    async fn load_assignments(&self, role_id: Uuid) -> AuthzResult<RoleAssignments> {
        // one transaction so both sets come from the same snapshot
        let mut tx = self.pool.begin().await.map_err(AuthzError::Persistence)?;
        let version = role_version(&mut tx, role_id).await?;

        let (system, modules) = granted_keys(&mut tx, role_id).await?;
        tx.commit().await.map_err(AuthzError::Persistence)?;

        Ok(RoleAssignments { role_id, version, system, modules })
    }

    async fn save_assignments(&self, role_id: Uuid, draft: &PermissionDraft) -> AuthzResult<RoleAssignments> {
        let draft = draft.clone().normalized();
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(AuthzError::Persistence)?;

        // rolled back with the transaction on any error below
        let version = bump_version(&mut tx, role_id, &now).await?;
        let current = version - 1;
        if let Some(expected) = draft.base_version {
            if expected != current {
                return Err(AuthzError::conflict(format!(
                    "role {role_id} permissions changed (expected version {expected}, found {current})"
                )));
            }
        }

        let (system_ids, module_ids) = catalog_ids(&mut tx, &draft).await?;

        sqlx::query("DELETE FROM role_system_permissions WHERE role_id = ?")
            .bind(role_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(AuthzError::Persistence)?;
        sqlx::query("DELETE FROM role_module_permissions WHERE role_id = ?")
            .bind(role_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(AuthzError::Persistence)?;

        for id in &system_ids {
            sqlx::query("INSERT INTO role_system_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)")
                .bind(role_id.to_string())
                .bind(id)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(AuthzError::Persistence)?;
        }
        for id in &module_ids {
            sqlx::query("INSERT INTO role_module_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)")
                .bind(role_id.to_string())
                .bind(id)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(AuthzError::Persistence)?;
        }

        tx.commit().await.map_err(AuthzError::Persistence)?;

        tracing::info!(
            role_id = %role_id,
            version,
            system = system_ids.len(),
            module = module_ids.len(),
            "role permissions replaced"
        );

        Ok(RoleAssignments { role_id, version, system: draft.system, modules: draft.modules })
    }

    async fn toggle_module_access(&self, role_id: Uuid, module: &ModuleId, enabled: bool) -> AuthzResult<RoleModuleAccess> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(AuthzError::Persistence)?;

        let touched = sqlx::query("UPDATE roles SET updated_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(role_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(AuthzError::Persistence)?;
        if touched.rows_affected() == 0 {
            return Err(AuthzError::RoleNotFound(role_id));
        }

        sqlx::query(
            r#"
            INSERT INTO role_module_access (role_id, module, is_enabled, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT (role_id, module) DO UPDATE SET is_enabled = excluded.is_enabled, updated_at = excluded.updated_at
            "#,
        )
        .bind(role_id.to_string())
        .bind(module.as_str())
        .bind(enabled)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(AuthzError::Persistence)?;

        tx.commit().await.map_err(AuthzError::Persistence)?;

        tracing::info!(role_id = %role_id, module = %module, enabled, "module access toggled");

        Ok(RoleModuleAccess { role_id, module: module.clone(), is_enabled: enabled, updated_at: now })
    }

    async fn list_module_access(&self, role_id: Uuid) -> AuthzResult<Vec<RoleModuleAccess>> {
        let rows = sqlx::query(
            "SELECT role_id, module, is_enabled, updated_at FROM role_module_access WHERE role_id = ? ORDER BY module",
        )
        .bind(role_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(AuthzError::Persistence)?;

        rows.iter().map(module_access_from_row).collect()
    }
}

#[async_trait]
impl DealershipModules for SqliteStore {
    async fn is_module_enabled(&self, dealer_id: i64, module: &ModuleId) -> AuthzResult<bool> {
        let enabled = sqlx::query_scalar::<_, bool>(
            "SELECT is_enabled FROM dealership_modules WHERE dealer_id = ? AND module = ?",
        )
        .bind(dealer_id)
        .bind(module.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(AuthzError::Persistence)?;

        Ok(enabled.unwrap_or(false))
    }

    async fn list_modules(&self, dealer_id: i64) -> AuthzResult<Vec<DealershipModule>> {
        let rows = sqlx::query(
            "SELECT dealer_id, module, is_enabled FROM dealership_modules WHERE dealer_id = ? ORDER BY module",
        )
        .bind(dealer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AuthzError::Persistence)?;

        rows.iter().map(dealership_module_from_row).collect()
    }
}

#[async_trait]
impl SnapshotSource for SqliteStore {
    async fn load_snapshot(&self, dealer_id: i64, role_ids: &BTreeSet<Uuid>, module: &ModuleId) -> AuthzResult<AccessSnapshot> {
        // every read below sees the same database state
        let mut tx = self.pool.begin().await.map_err(AuthzError::Persistence)?;

        let dealership_enabled = sqlx::query_scalar::<_, bool>(
            "SELECT is_enabled FROM dealership_modules WHERE dealer_id = ? AND module = ?",
        )
        .bind(dealer_id)
        .bind(module.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(AuthzError::Persistence)?
        .unwrap_or(false);

        let mut snapshot = AccessSnapshot::new().with_dealership_module(dealer_id, module.clone(), dealership_enabled);

        // roles are irrelevant once the dealership switch is off
        if dealership_enabled {
            for role_id in role_ids {
                let exists = sqlx::query_scalar::<_, i64>("SELECT 1 FROM roles WHERE id = ?")
                    .bind(role_id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(AuthzError::Persistence)?
                    .is_some();
                if !exists {
                    tracing::warn!(role_id = %role_id, "resolving with unknown role");
                    continue;
                }

                let access_on = sqlx::query_scalar::<_, bool>(
                    "SELECT is_enabled FROM role_module_access WHERE role_id = ? AND module = ?",
                )
                .bind(role_id.to_string())
                .bind(module.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(AuthzError::Persistence)?
                .unwrap_or(false);

                let (system, modules) = granted_keys(&mut tx, *role_id).await?;
                let mut access = RoleAccess { system, modules, ..RoleAccess::default() };
                if access_on {
                    access.enabled_modules.insert(module.clone());
                }
                snapshot = snapshot.with_role(*role_id, access);
            }
        }

        tx.commit().await.map_err(AuthzError::Persistence)?;
        Ok(snapshot)
    }
}
