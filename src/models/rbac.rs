use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::PermissionRules;
use crate::events::{Loggable, Severity};
use crate::models::permission::{ModuleId, PermissionRef};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    #[schema(example = "service_advisor")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Bumped on every assignment save.
    pub permissions_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> String { self.id.to_string() }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "service_advisor")]
    pub name: String,
    #[schema(example = "Writes up service orders at the drive")]
    pub description: Option<String>,
}

// =============================================================================
// PERMISSION DRAFT
// =============================================================================

/// A caller-owned, not yet persisted permission set for one role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionDraft {
    #[serde(default)]
    #[schema(value_type = Vec<String>, example = json!(["view_audit_log"]))]
    pub system: BTreeSet<String>,
    #[serde(default)]
    #[schema(value_type = Object, example = json!({"service_orders": ["read", "write"]}))]
    pub modules: BTreeMap<ModuleId, BTreeSet<String>>,
    /// Version the draft was edited from; a mismatch on save is a conflict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<i64>,
}

impl PermissionDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_refs(refs: impl IntoIterator<Item = PermissionRef>) -> Self {
        let mut draft = Self::new();
        for r in refs {
            draft.insert(r);
        }
        draft
    }

    pub fn with_base_version(mut self, version: i64) -> Self {
        self.base_version = Some(version);
        self
    }

    pub fn refs(&self) -> BTreeSet<PermissionRef> {
        let system = self.system.iter().map(|k| PermissionRef::System(k.clone()));
        let modules = self.modules.iter().flat_map(|(module, keys)| {
            keys.iter().map(move |k| PermissionRef::Module {
                module: module.clone(),
                key: k.clone(),
            })
        });
        system.chain(modules).collect()
    }

    pub fn contains(&self, perm: &PermissionRef) -> bool {
        match perm {
            PermissionRef::System(key) => self.system.contains(key),
            PermissionRef::Module { module, key } => self
                .modules
                .get(module)
                .map(|keys| keys.contains(key))
                .unwrap_or(false),
        }
    }

    pub fn insert(&mut self, perm: PermissionRef) -> bool {
        match perm {
            PermissionRef::System(key) => self.system.insert(key),
            PermissionRef::Module { module, key } => self.modules.entry(module).or_default().insert(key),
        }
    }

    pub fn remove(&mut self, perm: &PermissionRef) -> bool {
        match perm {
            PermissionRef::System(key) => self.system.remove(key),
            PermissionRef::Module { module, key } => {
                let removed = self.modules.get_mut(module).map(|keys| keys.remove(key)).unwrap_or(false);
                if self.modules.get(module).is_some_and(BTreeSet::is_empty) {
                    self.modules.remove(module);
                }
                removed
            }
        }
    }

    /// Turns a permission on together with everything it transitively requires.
    pub fn grant(&mut self, rules: &PermissionRules, perm: PermissionRef) {
        for prerequisite in rules.prerequisite_closure(&perm) {
            self.insert(prerequisite);
        }
        self.insert(perm);
    }

    /// Turns a single permission off. Dependents are left alone and show up
    /// as validation warnings.
    pub fn revoke(&mut self, perm: &PermissionRef) -> bool {
        self.remove(perm)
    }

    /// Drops module entries with no keys so equal sets compare equal.
    pub fn normalized(mut self) -> Self {
        self.modules.retain(|_, keys| !keys.is_empty());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.modules.values().all(BTreeSet::is_empty)
    }
}

// =============================================================================
// ROLE ASSIGNMENTS
// =============================================================================

/// Persisted permission set of a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoleAssignments {
    pub role_id: Uuid,
    pub version: i64,
    #[schema(value_type = Vec<String>)]
    pub system: BTreeSet<String>,
    #[schema(value_type = Object)]
    pub modules: BTreeMap<ModuleId, BTreeSet<String>>,
}

impl RoleAssignments {
    /// Same sets as a draft, ready to edit and save back.
    pub fn to_draft(&self) -> PermissionDraft {
        PermissionDraft {
            system: self.system.clone(),
            modules: self.modules.clone(),
            base_version: Some(self.version),
        }
    }
}

impl Loggable for RoleAssignments {
    fn entity_type() -> &'static str { "role_permissions" }
    fn subject_id(&self) -> String { self.role_id.to_string() }
    fn severity(&self) -> Severity { Severity::Critical }
}

// =============================================================================
// MODULE ACCESS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoleModuleAccess {
    pub role_id: Uuid,
    pub module: ModuleId,
    pub is_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for RoleModuleAccess {
    fn entity_type() -> &'static str { "role_module_access" }
    fn subject_id(&self) -> String { self.role_id.to_string() }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ToggleModuleRequest {
    pub enabled: bool,
}

/// Dealership-level module switch. Owned by dealership configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DealershipModule {
    pub dealer_id: i64,
    pub module: ModuleId,
    pub is_enabled: bool,
}
