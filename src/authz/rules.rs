//! Prerequisite rules for permissions.
//!
//! The rules are a data table, not code: a JSON document shaped
//!
//! ```json
//! {
//!   "system":  { "manage_roles": { "requires": ["manage_users"] } },
//!   "modules": { "service_orders": { "write": { "requires": ["read"] } } }
//! }
//! ```
//!
//! Module `requires` entries name keys of the same module, system `requires`
//! entries name system keys. Danger flags and display categories belong to
//! the catalog and are attached with [`PermissionRules::with_catalog`].
//! Everything here is pure; validation reports and never mutates.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::AuthzError;
use crate::models::permission::{ModuleId, Permission, PermissionRef};
use crate::models::rbac::PermissionDraft;

const BUILTIN_RULES: &str = include_str!("../../config/permission_rules.json");
const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RulesFile {
    #[serde(default)]
    system: BTreeMap<String, RuleEntry>,
    #[serde(default)]
    modules: BTreeMap<String, BTreeMap<String, RuleEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleEntry {
    #[serde(default)]
    requires: Vec<String>,
}

#[derive(Debug, Clone)]
struct Rule {
    requires: BTreeSet<PermissionRef>,
}

/// Display metadata copied from a catalog entry.
#[derive(Debug, Clone)]
struct CatalogFlags {
    category: String,
    dangerous: bool,
}

/// A missing prerequisite in a permission set. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ValidationWarning {
    #[schema(value_type = String, example = "service_orders:delete")]
    pub permission: PermissionRef,
    #[schema(value_type = String, example = "service_orders:read")]
    pub missing: PermissionRef,
    #[schema(example = "service_orders:delete requires service_orders:read")]
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionRules {
    entries: BTreeMap<PermissionRef, Rule>,
    flags: BTreeMap<PermissionRef, CatalogFlags>,
}

impl PermissionRules {
    /// Rules shipped with the service.
    pub fn builtin() -> Result<Self, AuthzError> {
        Self::from_json(BUILTIN_RULES)
    }

    pub fn load(path: &Path) -> Result<Self, AuthzError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AuthzError::configuration(format!("failed to read rules from {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AuthzError> {
        let file: RulesFile = serde_json::from_str(raw)
            .map_err(|err| AuthzError::configuration(format!("invalid rules document: {err}")))?;

        let mut entries = BTreeMap::new();

        for (key, rule) in file.system {
            let perm = PermissionRef::system(key).map_err(config_err)?;
            let requires = rule
                .requires
                .into_iter()
                .map(|k| PermissionRef::system(k).map_err(config_err))
                .collect::<Result<BTreeSet<_>, _>>()?;
            entries.insert(perm, Rule { requires });
        }

        for (module, keys) in file.modules {
            let module = ModuleId::new(module).map_err(config_err)?;
            for (key, rule) in keys {
                let perm = PermissionRef::module(module.clone(), key).map_err(config_err)?;
                let requires = rule
                    .requires
                    .into_iter()
                    .map(|k| PermissionRef::module(module.clone(), k).map_err(config_err))
                    .collect::<Result<BTreeSet<_>, _>>()?;
                entries.insert(perm, Rule { requires });
            }
        }

        let rules = Self { entries, flags: BTreeMap::new() };
        rules.ensure_acyclic()?;
        Ok(rules)
    }

    fn ensure_acyclic(&self) -> Result<(), AuthzError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            rules: &'a PermissionRules,
            node: &'a PermissionRef,
            marks: &mut BTreeMap<&'a PermissionRef, Mark>,
            path: &mut Vec<&'a PermissionRef>,
        ) -> Result<(), AuthzError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let cycle: Vec<String> = path
                        .iter()
                        .skip_while(|p| **p != node)
                        .chain(std::iter::once(&node))
                        .map(|p| p.to_string())
                        .collect();
                    return Err(AuthzError::configuration(format!(
                        "prerequisite cycle: {}",
                        cycle.join(" -> ")
                    )));
                }
                None => {}
            }

            marks.insert(node, Mark::Visiting);
            path.push(node);
            if let Some(rule) = rules.entries.get(node) {
                for next in &rule.requires {
                    visit(rules, next, marks, path)?;
                }
            }
            path.pop();
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        let mut path = Vec::new();
        for node in self.entries.keys() {
            visit(self, node, &mut marks, &mut path)?;
        }
        Ok(())
    }

    /// Copy of these rules carrying the danger flag and category of every
    /// given catalog entry. Entries not passed in are neither dangerous nor
    /// categorised.
    pub fn with_catalog<'a>(&self, catalog: impl IntoIterator<Item = &'a Permission>) -> Self {
        let flags = catalog
            .into_iter()
            .map(|entry| {
                (entry.permission_ref(), CatalogFlags { category: entry.category.clone(), dangerous: entry.is_dangerous })
            })
            .collect();
        Self { entries: self.entries.clone(), flags }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every permission the table mentions, as a key or as a prerequisite.
    pub fn known_permissions(&self) -> BTreeSet<PermissionRef> {
        self.entries
            .iter()
            .flat_map(|(perm, rule)| std::iter::once(perm).chain(rule.requires.iter()))
            .cloned()
            .collect()
    }

    /// Direct prerequisites; empty when none are defined.
    pub fn get_prerequisites(&self, perm: &PermissionRef) -> BTreeSet<PermissionRef> {
        self.entries.get(perm).map(|rule| rule.requires.clone()).unwrap_or_default()
    }

    /// All transitive prerequisites, excluding `perm` itself.
    pub fn prerequisite_closure(&self, perm: &PermissionRef) -> BTreeSet<PermissionRef> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&PermissionRef> = vec![perm];
        while let Some(current) = stack.pop() {
            if let Some(rule) = self.entries.get(current) {
                for next in &rule.requires {
                    if seen.insert(next.clone()) {
                        stack.push(next);
                    }
                }
            }
        }
        seen
    }

    pub fn is_dangerous(&self, perm: &PermissionRef) -> bool {
        self.flags.get(perm).map(|flags| flags.dangerous).unwrap_or(false)
    }

    /// Display category: the catalog category for system permissions, the
    /// module id for module permissions.
    pub fn category<'a>(&'a self, perm: &'a PermissionRef) -> &'a str {
        match perm {
            PermissionRef::Module { module, .. } => module.as_str(),
            PermissionRef::System(_) => self
                .flags
                .get(perm)
                .map(|flags| flags.category.as_str())
                .unwrap_or(DEFAULT_CATEGORY),
        }
    }

    /// Stable display order: system first, then by category, then by key.
    pub fn sort_permissions(&self, keys: impl IntoIterator<Item = PermissionRef>) -> Vec<PermissionRef> {
        let mut sorted: Vec<PermissionRef> = keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        sorted.sort_by(|a, b| {
            (!a.is_system(), self.category(a), a.key()).cmp(&(!b.is_system(), self.category(b), b.key()))
        });
        sorted
    }

    /// One warning per granted permission and missing direct prerequisite.
    pub fn validate(&self, draft: &PermissionDraft) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        for perm in self.sort_permissions(draft.refs()) {
            for missing in self.get_prerequisites(&perm) {
                if !draft.contains(&missing) {
                    warnings.push(ValidationWarning {
                        message: format!("{perm} requires {missing}"),
                        permission: perm.clone(),
                        missing,
                    });
                }
            }
        }
        warnings
    }

    /// Copy of `draft` with every prerequisite closure added.
    pub fn expand(&self, draft: &PermissionDraft) -> PermissionDraft {
        let mut expanded = draft.clone();
        for perm in draft.refs() {
            expanded.grant(self, perm);
        }
        expanded
    }
}

fn config_err(err: AuthzError) -> AuthzError {
    AuthzError::configuration(err.to_string())
}
