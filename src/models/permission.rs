use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::authz::AuthzError;
use crate::events::{Loggable, Severity};

const MAX_IDENT_LEN: usize = 64;

fn valid_ident(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_IDENT_LEN
        && s.chars().all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_'))
}

// =============================================================================
// MODULE ID
// =============================================================================

/// A functional area of the application (orders, stock, NFC tracking, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(value: impl Into<String>) -> Result<Self, AuthzError> {
        let value = value.into();
        if !valid_ident(&value) {
            return Err(AuthzError::invalid_permission(format!(
                "module id '{value}' must be 1-{MAX_IDENT_LEN} chars of [a-z0-9_]"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModuleId {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ModuleId {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModuleId> for String {
    fn from(value: ModuleId) -> Self {
        value.0
    }
}

// =============================================================================
// PERMISSION REFERENCE
// =============================================================================

/// Fully qualified permission key.
///
/// Text form is `manage_roles` for a system permission and
/// `service_orders:write` for a module permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PermissionRef {
    System(String),
    Module { module: ModuleId, key: String },
}

impl PermissionRef {
    pub fn system(key: impl Into<String>) -> Result<Self, AuthzError> {
        let key = key.into();
        check_key(&key)?;
        Ok(Self::System(key))
    }

    pub fn module(module: ModuleId, key: impl Into<String>) -> Result<Self, AuthzError> {
        let key = key.into();
        check_key(&key)?;
        Ok(Self::Module { module, key })
    }

    pub fn key(&self) -> &str {
        match self {
            Self::System(key) => key,
            Self::Module { key, .. } => key,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

fn check_key(key: &str) -> Result<(), AuthzError> {
    if valid_ident(key) {
        Ok(())
    } else {
        Err(AuthzError::invalid_permission(format!(
            "permission key '{key}' must be 1-{MAX_IDENT_LEN} chars of [a-z0-9_]"
        )))
    }
}

impl fmt::Display for PermissionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System(key) => f.write_str(key),
            Self::Module { module, key } => write!(f, "{module}:{key}"),
        }
    }
}

impl FromStr for PermissionRef {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((module, key)) => Self::module(ModuleId::new(module)?, key),
            None => Self::system(s),
        }
    }
}

impl TryFrom<String> for PermissionRef {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PermissionRef> for String {
    fn from(value: PermissionRef) -> Self {
        value.to_string()
    }
}

// =============================================================================
// CATALOG ENTRY
// =============================================================================

/// Where a catalog entry applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PermissionScope {
    System,
    Module { module: ModuleId },
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: i64,
    #[schema(example = "write")]
    pub key: String,
    pub scope: PermissionScope,
    #[schema(example = "Create and edit service orders")]
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Grouping used for display; module permissions use their module id.
    pub category: String,
    pub is_active: bool,
    pub is_dangerous: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn permission_ref(&self) -> PermissionRef {
        match &self.scope {
            PermissionScope::System => PermissionRef::System(self.key.clone()),
            PermissionScope::Module { module } => PermissionRef::Module {
                module: module.clone(),
                key: self.key.clone(),
            },
        }
    }
}

impl Loggable for Permission {
    fn entity_type() -> &'static str { "permission" }
    fn subject_id(&self) -> String { self.permission_ref().to_string() }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    /// `manage_roles` or `service_orders:export`
    #[schema(value_type = String, example = "service_orders:export")]
    pub permission: PermissionRef,
    #[schema(example = "Export service orders")]
    pub display_name: String,
    pub description: Option<String>,
    /// Only meaningful for system permissions.
    pub category: Option<String>,
    #[serde(default)]
    pub is_dangerous: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionActiveRequest {
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_system_and_module_refs() {
        let sys: PermissionRef = "manage_roles".parse().unwrap();
        assert_eq!(sys, PermissionRef::System("manage_roles".into()));

        let module: PermissionRef = "service_orders:write".parse().unwrap();
        assert_eq!(
            module,
            PermissionRef::Module { module: ModuleId::new("service_orders").unwrap(), key: "write".into() }
        );
        assert_eq!(module.key(), "write");
        assert_eq!(module.to_string(), "service_orders:write");
    }

    #[test]
    fn rejects_malformed_identifiers() {
        assert!("".parse::<PermissionRef>().is_err());
        assert!("Service Orders:write".parse::<PermissionRef>().is_err());
        assert!("service_orders:".parse::<PermissionRef>().is_err());
        assert!(ModuleId::new("stock-units").is_err());
    }

    #[test]
    fn refs_serialize_as_strings() {
        let r: PermissionRef = "stock:import".parse().unwrap();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json, serde_json::json!("stock:import"));
        let back: PermissionRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn system_refs_order_before_module_refs() {
        let sys: PermissionRef = "view_audit_log".parse().unwrap();
        let module: PermissionRef = "car_wash:read".parse().unwrap();
        assert!(sys < module);
    }
}
