use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::{AuthzError, AuthzResult};
use crate::models::permission::ModuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    ModuleDisabledForDealership,
    ModuleDisabledForRole,
    PermissionNotGranted,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::ModuleDisabledForDealership => "module_disabled_for_dealership",
            DenyReason::ModuleDisabledForRole => "module_disabled_for_role",
            DenyReason::PermissionNotGranted => "permission_not_granted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny { reason: DenyReason },
}

impl Decision {
    pub fn deny(reason: DenyReason) -> Self {
        Decision::Deny { reason }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// What one role contributes to a decision.
#[derive(Debug, Clone, Default)]
pub struct RoleAccess {
    pub enabled_modules: BTreeSet<ModuleId>,
    pub system: BTreeSet<String>,
    pub modules: BTreeMap<ModuleId, BTreeSet<String>>,
}

impl RoleAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module_enabled(mut self, module: ModuleId) -> Self {
        self.enabled_modules.insert(module);
        self
    }

    pub fn with_module_permissions(mut self, module: ModuleId, keys: impl IntoIterator<Item = String>) -> Self {
        self.modules.entry(module).or_default().extend(keys);
        self
    }

    pub fn with_system_permissions(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.system.extend(keys);
        self
    }

    fn module_enabled(&self, module: &ModuleId) -> bool {
        self.enabled_modules.contains(module)
    }

    fn holds(&self, module: &ModuleId, key: &str) -> bool {
        self.system.contains(key) || self.modules.get(module).map(|keys| keys.contains(key)).unwrap_or(false)
    }
}

/// A consistent view of everything a decision reads.
#[derive(Debug, Clone, Default)]
pub struct AccessSnapshot {
    dealership_modules: BTreeMap<(i64, ModuleId), bool>,
    roles: BTreeMap<Uuid, RoleAccess>,
}

impl AccessSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dealership_module(mut self, dealer_id: i64, module: ModuleId, enabled: bool) -> Self {
        self.dealership_modules.insert((dealer_id, module), enabled);
        self
    }

    pub fn with_role(mut self, role_id: Uuid, access: RoleAccess) -> Self {
        self.roles.insert(role_id, access);
        self
    }

    fn dealership_enabled(&self, dealer_id: i64, module: &ModuleId) -> bool {
        self.dealership_modules
            .get(&(dealer_id, module.clone()))
            .copied()
            .unwrap_or(false)
    }
}

/// Decides Allow / Deny for one (dealer, roles, module, permission) tuple.
///
/// Checks run in a fixed order so the reason is the most general one:
/// 1. dealership has the module disabled (or no row for it)
/// 2. none of the roles has module access enabled
/// 3. none of the roles holds the key, either in its module set or its
///    system set
///
/// Roles are additive: any single role is enough at each step, and the two
/// role checks are independent of each other.
pub fn resolve(
    snapshot: &AccessSnapshot,
    dealer_id: i64,
    role_ids: &BTreeSet<Uuid>,
    module: &ModuleId,
    permission_key: &str,
) -> Decision {
    if !snapshot.dealership_enabled(dealer_id, module) {
        return Decision::deny(DenyReason::ModuleDisabledForDealership);
    }

    let held: Vec<&RoleAccess> = role_ids.iter().filter_map(|id| snapshot.roles.get(id)).collect();

    if !held.iter().any(|access| access.module_enabled(module)) {
        return Decision::deny(DenyReason::ModuleDisabledForRole);
    }

    if !held.iter().any(|access| access.holds(module, permission_key)) {
        return Decision::deny(DenyReason::PermissionNotGranted);
    }

    Decision::Allow
}

/// Reads everything one decision needs from a single consistent view of the
/// stores. Unknown role ids are left out of the snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn load_snapshot(&self, dealer_id: i64, role_ids: &BTreeSet<Uuid>, module: &ModuleId) -> AuthzResult<AccessSnapshot>;
}

/// Loads a fresh snapshot for every call and applies [`resolve`]. Store
/// failures surface as `ResolutionUnavailable`.
#[derive(Clone)]
pub struct Resolver {
    source: Arc<dyn SnapshotSource>,
}

impl Resolver {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self { source }
    }

    pub async fn resolve(
        &self,
        dealer_id: i64,
        role_ids: &BTreeSet<Uuid>,
        module: &ModuleId,
        permission_key: &str,
    ) -> AuthzResult<Decision> {
        let snapshot = self
            .source
            .load_snapshot(dealer_id, role_ids, module)
            .await
            .map_err(|err| {
                tracing::error!(dealer_id, module = %module, error = %err, "assignment data unavailable");
                AuthzError::ResolutionUnavailable(err.to_string())
            })?;

        let decision = resolve(&snapshot, dealer_id, role_ids, module, permission_key);

        tracing::debug!(
            dealer_id,
            roles = role_ids.len(),
            module = %module,
            permission = %permission_key,
            decision = ?decision,
            "permission resolved"
        );

        Ok(decision)
    }
}
