pub mod permission;
pub mod rbac;

pub use permission::{ModuleId, Permission, PermissionRef, PermissionScope};
pub use rbac::{DealershipModule, PermissionDraft, Role, RoleAssignments, RoleModuleAccess};
