use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::authz::AuthzError;
use crate::models::permission::{ModuleId, Permission, PermissionScope};
use crate::models::rbac::{DealershipModule, Role, RoleModuleAccess};

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AuthzError> {
    let s = s.trim();

    // RFC3339, as written by the store
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP: "YYYY-MM-DD HH:MM:SS" (optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AuthzError::corrupt("invalid datetime: date out of range"))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AuthzError::corrupt(format!("invalid datetime: {s}")))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, AuthzError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| AuthzError::corrupt(format!("missing {name}: {e}")))
}

fn uuid_column(row: &SqliteRow, name: &str) -> Result<Uuid, AuthzError> {
    let raw: String = column(row, name)?;
    Uuid::parse_str(&raw).map_err(|e| AuthzError::corrupt(format!("invalid uuid in {name}: {e}")))
}

fn module_column(row: &SqliteRow, name: &str) -> Result<ModuleId, AuthzError> {
    let raw: String = column(row, name)?;
    ModuleId::new(raw).map_err(|e| AuthzError::corrupt(e.to_string()))
}

fn datetime_column(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, AuthzError> {
    let raw: String = column(row, name)?;
    parse_datetime(&raw)
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, AuthzError> {
    Ok(Role {
        id: uuid_column(row, "id")?,
        name: column(row, "name")?,
        description: column(row, "description")?,
        permissions_version: column(row, "permissions_version")?,
        created_at: datetime_column(row, "created_at")?,
        updated_at: datetime_column(row, "updated_at")?,
    })
}

/// Row from `system_permissions`.
pub fn system_permission_from_row(row: &SqliteRow) -> Result<Permission, AuthzError> {
    Ok(Permission {
        id: column(row, "id")?,
        key: column(row, "permission_key")?,
        scope: PermissionScope::System,
        display_name: column(row, "display_name")?,
        description: column(row, "description")?,
        category: column(row, "category")?,
        is_active: column(row, "is_active")?,
        is_dangerous: column(row, "is_dangerous")?,
        created_at: datetime_column(row, "created_at")?,
        updated_at: datetime_column(row, "updated_at")?,
    })
}

/// Row from `module_permissions`; the category is the module itself.
pub fn module_permission_from_row(row: &SqliteRow) -> Result<Permission, AuthzError> {
    let module = module_column(row, "module")?;
    Ok(Permission {
        id: column(row, "id")?,
        key: column(row, "permission_key")?,
        category: module.to_string(),
        scope: PermissionScope::Module { module },
        display_name: column(row, "display_name")?,
        description: column(row, "description")?,
        is_active: column(row, "is_active")?,
        is_dangerous: column(row, "is_dangerous")?,
        created_at: datetime_column(row, "created_at")?,
        updated_at: datetime_column(row, "updated_at")?,
    })
}

pub fn module_access_from_row(row: &SqliteRow) -> Result<RoleModuleAccess, AuthzError> {
    Ok(RoleModuleAccess {
        role_id: uuid_column(row, "role_id")?,
        module: module_column(row, "module")?,
        is_enabled: column(row, "is_enabled")?,
        updated_at: datetime_column(row, "updated_at")?,
    })
}

pub fn dealership_module_from_row(row: &SqliteRow) -> Result<DealershipModule, AuthzError> {
    Ok(DealershipModule {
        dealer_id: column(row, "dealer_id")?,
        module: module_column(row, "module")?,
        is_enabled: column(row, "is_enabled")?,
    })
}
