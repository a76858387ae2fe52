//! Authorization core - catalog, assignment store, prerequisite rules and
//! the resolution function consumed by UI guards.
//!
//! - [`PermissionCatalog`]: known system and module permissions
//! - [`AssignmentStore`]: role -> granted permissions and module toggles
//! - [`PermissionRules`]: prerequisite table and advisory validation
//! - [`resolve`] / [`Resolver`]: Allow / Deny(reason) decisions

mod catalog;
mod error;
mod resolver;
mod rules;
mod store;

pub use catalog::{CatalogTable, NewPermission, PermissionCatalog};
pub use error::{AuthzError, AuthzResult};
pub use resolver::{resolve, AccessSnapshot, Decision, DenyReason, RoleAccess, Resolver, SnapshotSource};
pub use rules::{PermissionRules, ValidationWarning};
pub use store::{AssignmentStore, DealershipModules, SqliteStore};

/// How the save boundary treats missing prerequisites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerequisiteMode {
    /// Store exactly what was submitted and return warnings
    Advisory,
    /// Add every missing prerequisite before storing
    Enforce,
}

impl PrerequisiteMode {
    pub fn from_env() -> Self {
        match std::env::var("PREREQUISITE_MODE").unwrap_or_default().to_lowercase().as_str() {
            "enforce" => PrerequisiteMode::Enforce,
            _ => PrerequisiteMode::Advisory,
        }
    }
}

/// Well-known module ids
pub mod modules {
    pub const SALES_ORDERS: &str = "sales_orders";
    pub const SERVICE_ORDERS: &str = "service_orders";
    pub const RECON_ORDERS: &str = "recon_orders";
    pub const CAR_WASH: &str = "car_wash";
    pub const STOCK: &str = "stock";
    pub const NFC_TRACKING: &str = "nfc_tracking";
    pub const USERS: &str = "users";
    pub const DASHBOARD: &str = "dashboard";
}

/// Well-known system permission keys
pub mod system_permissions {
    pub const VIEW_ALL_DEALERSHIPS: &str = "view_all_dealerships";
    pub const MANAGE_DEALERSHIPS: &str = "manage_dealerships";
    pub const MANAGE_USERS: &str = "manage_users";
    pub const MANAGE_ROLES: &str = "manage_roles";
    pub const MANAGE_PERMISSIONS: &str = "manage_permissions";
    pub const VIEW_AUDIT_LOG: &str = "view_audit_log";
    pub const MANAGE_SETTINGS: &str = "manage_settings";
}
