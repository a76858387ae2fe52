mod common;

use anyhow::Result;

use std::collections::BTreeSet;

use dealer_authz::authz::{
    resolve, AssignmentStore, AuthzError, CatalogTable, Decision, DealershipModules, DenyReason, PermissionCatalog,
    SnapshotSource, SqliteStore,
};
use dealer_authz::models::permission::{ModuleId, PermissionRef};
use dealer_authz::models::rbac::PermissionDraft;

fn draft(refs: &[&str]) -> PermissionDraft {
    PermissionDraft::from_refs(refs.iter().map(|s| s.parse::<PermissionRef>().unwrap()))
}

fn module(id: &str) -> ModuleId {
    ModuleId::new(id).unwrap()
}

#[tokio::test]
async fn saved_set_loads_back_equal() -> Result<()> {
    let (pool, _dir) = common::migrated_pool().await?;
    let store = SqliteStore::new(pool);
    let role = store.create_role("service_advisor", None).await?;

    let submitted = draft(&["view_audit_log", "service_orders:read", "service_orders:write", "stock:read"]);
    let saved = store.save_assignments(role.id, &submitted).await?;
    let loaded = store.load_assignments(role.id).await?;

    assert_eq!(loaded.system, submitted.system);
    assert_eq!(loaded.modules, submitted.modules);
    assert_eq!(loaded, saved);
    assert_eq!(loaded.version, 1);

    Ok(())
}

#[tokio::test]
async fn saving_twice_gives_the_same_state() -> Result<()> {
    let (pool, _dir) = common::migrated_pool().await?;
    let store = SqliteStore::new(pool);
    let role = store.create_role("sales_manager", None).await?;

    let submitted = draft(&["sales_orders:read", "sales_orders:write"]);
    store.save_assignments(role.id, &submitted).await?;
    let first = store.load_assignments(role.id).await?;
    store.save_assignments(role.id, &submitted).await?;
    let second = store.load_assignments(role.id).await?;

    assert_eq!(first.system, second.system);
    assert_eq!(first.modules, second.modules);

    Ok(())
}

#[tokio::test]
async fn save_replaces_instead_of_merging() -> Result<()> {
    let (pool, _dir) = common::migrated_pool().await?;
    let store = SqliteStore::new(pool);
    let role = store.create_role("detailer", None).await?;

    store.save_assignments(role.id, &draft(&["car_wash:read", "car_wash:write", "manage_users"])).await?;
    store.save_assignments(role.id, &draft(&["car_wash:read"])).await?;

    let loaded = store.load_assignments(role.id).await?;
    assert!(loaded.system.is_empty());
    assert_eq!(loaded.to_draft().refs(), draft(&["car_wash:read"]).refs());

    store.save_assignments(role.id, &PermissionDraft::new()).await?;
    let cleared = store.load_assignments(role.id).await?;
    assert!(cleared.system.is_empty() && cleared.modules.is_empty());

    Ok(())
}

#[tokio::test]
async fn unknown_key_rejects_whole_save() -> Result<()> {
    let (pool, _dir) = common::migrated_pool().await?;
    let store = SqliteStore::new(pool);
    let role = store.create_role("porter", None).await?;

    store.save_assignments(role.id, &draft(&["stock:read"])).await?;

    let err = store
        .save_assignments(role.id, &draft(&["stock:write", "stock:teleport"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::InvalidPermission(_)), "got {err:?}");

    // nothing from the failed save is visible
    let loaded = store.load_assignments(role.id).await?;
    assert_eq!(loaded.to_draft().refs(), draft(&["stock:read"]).refs());
    assert_eq!(loaded.version, 1);

    Ok(())
}

#[tokio::test]
async fn stale_base_version_is_a_conflict() -> Result<()> {
    let (pool, _dir) = common::migrated_pool().await?;
    let store = SqliteStore::new(pool);
    let role = store.create_role("recon_tech", None).await?;

    let v1 = store.save_assignments(role.id, &draft(&["recon_orders:read"])).await?;

    // a second editor saves on top of v1
    store
        .save_assignments(role.id, &draft(&["recon_orders:read", "recon_orders:write"]).with_base_version(v1.version))
        .await?;

    let err = store
        .save_assignments(role.id, &draft(&["recon_orders:delete"]).with_base_version(v1.version))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Conflict(_)), "got {err:?}");

    let loaded = store.load_assignments(role.id).await?;
    assert!(loaded.modules[&module("recon_orders")].contains("write"));

    Ok(())
}

#[tokio::test]
async fn toggling_module_access_keeps_assignments() -> Result<()> {
    let (pool, _dir) = common::migrated_pool().await?;
    let store = SqliteStore::new(pool);
    let role = store.create_role("service_advisor", None).await?;

    store.save_assignments(role.id, &draft(&["service_orders:read", "service_orders:write"])).await?;
    let before = store.load_assignments(role.id).await?;

    let access = store.toggle_module_access(role.id, &module("service_orders"), true).await?;
    assert!(access.is_enabled);
    store.toggle_module_access(role.id, &module("service_orders"), false).await?;

    let after = store.load_assignments(role.id).await?;
    assert_eq!(before, after);

    let switches = store.list_module_access(role.id).await?;
    assert_eq!(switches.len(), 1);
    assert!(!switches[0].is_enabled);

    Ok(())
}

#[tokio::test]
async fn deactivated_permission_is_hidden_and_not_assignable() -> Result<()> {
    let (pool, _dir) = common::migrated_pool().await?;
    let store = SqliteStore::new(pool);
    let role = store.create_role("stock_clerk", None).await?;

    store.save_assignments(role.id, &draft(&["stock:read", "stock:import"])).await?;

    let import_id = store.list_module_permissions().await?[&module("stock")]
        .iter()
        .find(|p| p.key == "import")
        .map(|p| p.id)
        .expect("seeded stock:import");
    store.set_permission_active(CatalogTable::Module, import_id, false).await?;

    let loaded = store.load_assignments(role.id).await?;
    assert_eq!(loaded.to_draft().refs(), draft(&["stock:read"]).refs());

    let err = store.save_assignments(role.id, &draft(&["stock:import"])).await.unwrap_err();
    assert!(matches!(err, AuthzError::InvalidPermission(_)), "got {err:?}");

    Ok(())
}

#[tokio::test]
async fn missing_role_is_reported() -> Result<()> {
    let (pool, _dir) = common::migrated_pool().await?;
    let store = SqliteStore::new(pool);
    let ghost = uuid::Uuid::new_v4();

    assert!(matches!(store.load_assignments(ghost).await, Err(AuthzError::RoleNotFound(id)) if id == ghost));
    assert!(matches!(
        store.save_assignments(ghost, &draft(&["dashboard:read"])).await,
        Err(AuthzError::RoleNotFound(_))
    ));
    assert!(matches!(
        store.toggle_module_access(ghost, &module("dashboard"), true).await,
        Err(AuthzError::RoleNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn closed_pool_surfaces_persistence_error() -> Result<()> {
    let (pool, _dir) = common::migrated_pool().await?;
    let store = SqliteStore::new(pool.clone());
    let role = store.create_role("closer", None).await?;
    pool.close().await;

    let err = store.save_assignments(role.id, &draft(&["dashboard:read"])).await.unwrap_err();
    assert!(matches!(err, AuthzError::Persistence(_)), "got {err:?}");

    Ok(())
}

#[tokio::test]
async fn snapshot_combines_switches_and_grants() -> Result<()> {
    let (pool, _dir) = common::migrated_pool().await?;
    common::set_dealer_module(&pool, 9, "car_wash", true).await?;
    let store = SqliteStore::new(pool);
    let car_wash = module("car_wash");

    let washer = store.create_role("washer", None).await?;
    store.save_assignments(washer.id, &draft(&["car_wash:read", "car_wash:write"])).await?;
    store.toggle_module_access(washer.id, &car_wash, true).await?;

    assert!(store.is_module_enabled(9, &car_wash).await?);
    assert!(!store.is_module_enabled(10, &car_wash).await?);

    let ghost = uuid::Uuid::new_v4();
    let roles = BTreeSet::from([washer.id, ghost]);
    let snapshot = store.load_snapshot(9, &roles, &car_wash).await?;

    assert_eq!(resolve(&snapshot, 9, &roles, &car_wash, "write"), Decision::Allow);
    assert_eq!(
        resolve(&snapshot, 9, &roles, &car_wash, "delete"),
        Decision::deny(DenyReason::PermissionNotGranted)
    );
    assert_eq!(
        resolve(&snapshot, 9, &BTreeSet::from([ghost]), &car_wash, "read"),
        Decision::deny(DenyReason::ModuleDisabledForRole)
    );

    // a disabled dealership short-circuits before any role is read
    let snapshot = store.load_snapshot(10, &roles, &car_wash).await?;
    assert_eq!(
        resolve(&snapshot, 10, &roles, &car_wash, "read"),
        Decision::deny(DenyReason::ModuleDisabledForDealership)
    );

    Ok(())
}
