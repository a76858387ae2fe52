mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use common::TestApp;

async fn grant(ctx: &TestApp, role: Uuid, draft: Value) -> Result<()> {
    let (status, body) = ctx.send(Method::PUT, &format!("/roles/{role}/permissions"), Some(draft)).await?;
    assert_eq!(status, StatusCode::OK, "save failed: {body}");
    Ok(())
}

async fn toggle(ctx: &TestApp, role: Uuid, module: &str, enabled: bool) -> Result<()> {
    let (status, body) = ctx
        .send(Method::PUT, &format!("/roles/{role}/modules/{module}"), Some(json!({ "enabled": enabled })))
        .await?;
    assert_eq!(status, StatusCode::OK, "toggle failed: {body}");
    Ok(())
}

async fn resolve(ctx: &TestApp, dealer: i64, roles: &[Uuid], module: &str, permission: &str) -> Result<Value> {
    let (status, body) = ctx
        .send(
            Method::POST,
            "/authz/resolve",
            Some(json!({ "dealer_id": dealer, "role_ids": roles, "module": module, "permission": permission })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "resolve failed: {body}");
    Ok(body)
}

fn denied(reason: &str) -> Value {
    json!({ "decision": "deny", "reason": reason })
}

/// Dealer 5 with service orders on and a service advisor holding read + write.
async fn service_advisor_setup(ctx: &TestApp) -> Result<Uuid> {
    ctx.set_dealer_module(5, "service_orders", true).await?;
    let role = ctx.create_role("service_advisor").await?;
    grant(ctx, role, json!({ "modules": { "service_orders": ["read", "write"] } })).await?;
    toggle(ctx, role, "service_orders", true).await?;
    Ok(role)
}

#[tokio::test]
async fn granted_permission_is_allowed_and_missing_one_denied() -> Result<()> {
    let ctx = common::spawn_app().await?;
    let role = service_advisor_setup(&ctx).await?;

    assert_eq!(resolve(&ctx, 5, &[role], "service_orders", "write").await?, json!({ "decision": "allow" }));
    assert_eq!(
        resolve(&ctx, 5, &[role], "service_orders", "delete").await?,
        denied("permission_not_granted")
    );

    Ok(())
}

#[tokio::test]
async fn role_module_switch_off_denies_even_when_granted() -> Result<()> {
    let ctx = common::spawn_app().await?;
    let role = service_advisor_setup(&ctx).await?;
    toggle(&ctx, role, "service_orders", false).await?;

    assert_eq!(
        resolve(&ctx, 5, &[role], "service_orders", "read").await?,
        denied("module_disabled_for_role")
    );

    // re-enabling restores the grant that was kept
    toggle(&ctx, role, "service_orders", true).await?;
    assert_eq!(resolve(&ctx, 5, &[role], "service_orders", "read").await?, json!({ "decision": "allow" }));

    Ok(())
}

#[tokio::test]
async fn dealership_switch_is_checked_first() -> Result<()> {
    let ctx = common::spawn_app().await?;
    let role = service_advisor_setup(&ctx).await?;
    ctx.set_dealer_module(5, "service_orders", false).await?;

    assert_eq!(
        resolve(&ctx, 5, &[role], "service_orders", "read").await?,
        denied("module_disabled_for_dealership")
    );

    // a dealership with no configuration row has nothing enabled
    assert_eq!(
        resolve(&ctx, 77, &[role], "service_orders", "read").await?,
        denied("module_disabled_for_dealership")
    );

    // with both switches off the dealership reason wins
    toggle(&ctx, role, "service_orders", false).await?;
    assert_eq!(
        resolve(&ctx, 5, &[role], "service_orders", "read").await?,
        denied("module_disabled_for_dealership")
    );

    Ok(())
}

#[tokio::test]
async fn permissions_from_several_roles_combine() -> Result<()> {
    let ctx = common::spawn_app().await?;
    ctx.set_dealer_module(5, "sales_orders", true).await?;

    let viewer = ctx.create_role("sales_viewer").await?;
    grant(&ctx, viewer, json!({ "modules": { "sales_orders": ["read"] } })).await?;
    toggle(&ctx, viewer, "sales_orders", true).await?;

    let exporter = ctx.create_role("sales_exporter").await?;
    grant(&ctx, exporter, json!({ "modules": { "sales_orders": ["export"] } })).await?;
    toggle(&ctx, exporter, "sales_orders", true).await?;

    assert_eq!(
        resolve(&ctx, 5, &[viewer], "sales_orders", "export").await?,
        denied("permission_not_granted")
    );
    assert_eq!(
        resolve(&ctx, 5, &[viewer, exporter], "sales_orders", "export").await?,
        json!({ "decision": "allow" })
    );
    assert_eq!(
        resolve(&ctx, 5, &[viewer, exporter], "sales_orders", "read").await?,
        json!({ "decision": "allow" })
    );

    Ok(())
}

#[tokio::test]
async fn role_without_module_access_does_not_block_another_role() -> Result<()> {
    let ctx = common::spawn_app().await?;
    ctx.set_dealer_module(5, "stock", true).await?;

    let trainee = ctx.create_role("trainee").await?;
    let clerk = ctx.create_role("stock_clerk").await?;
    grant(&ctx, clerk, json!({ "modules": { "stock": ["read"] } })).await?;
    toggle(&ctx, clerk, "stock", true).await?;

    assert_eq!(resolve(&ctx, 5, &[trainee, clerk], "stock", "read").await?, json!({ "decision": "allow" }));
    assert_eq!(resolve(&ctx, 5, &[trainee], "stock", "read").await?, denied("module_disabled_for_role"));

    Ok(())
}

#[tokio::test]
async fn module_access_and_grant_may_come_from_different_roles() -> Result<()> {
    let ctx = common::spawn_app().await?;
    ctx.set_dealer_module(5, "stock", true).await?;

    let gatekeeper = ctx.create_role("stock_gatekeeper").await?;
    toggle(&ctx, gatekeeper, "stock", true).await?;

    let writer = ctx.create_role("stock_writer").await?;
    grant(&ctx, writer, json!({ "modules": { "stock": ["write"] } })).await?;
    toggle(&ctx, writer, "stock", false).await?;

    assert_eq!(
        resolve(&ctx, 5, &[gatekeeper, writer], "stock", "write").await?,
        json!({ "decision": "allow" })
    );
    assert_eq!(resolve(&ctx, 5, &[writer], "stock", "write").await?, denied("module_disabled_for_role"));
    assert_eq!(resolve(&ctx, 5, &[gatekeeper], "stock", "write").await?, denied("permission_not_granted"));

    // an unknown role id is skipped, not an error
    assert_eq!(
        resolve(&ctx, 5, &[Uuid::new_v4(), gatekeeper, writer], "stock", "write").await?,
        json!({ "decision": "allow" })
    );

    Ok(())
}

#[tokio::test]
async fn no_roles_means_module_disabled_for_role() -> Result<()> {
    let ctx = common::spawn_app().await?;
    ctx.set_dealer_module(5, "dashboard", true).await?;

    assert_eq!(resolve(&ctx, 5, &[], "dashboard", "read").await?, denied("module_disabled_for_role"));

    Ok(())
}

#[tokio::test]
async fn dealer_defaults_to_token_dealer() -> Result<()> {
    let ctx = common::spawn_app().await?;
    let role = service_advisor_setup(&ctx).await?;

    // the test token carries dealer 5
    let (status, body) = ctx
        .send(
            Method::POST,
            "/authz/resolve",
            Some(json!({ "role_ids": [role], "module": "service_orders", "permission": "read" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["decision"], "allow");

    Ok(())
}

#[tokio::test]
async fn unreadable_store_is_unavailable_not_a_decision() -> Result<()> {
    let ctx = common::spawn_app().await?;
    let role = service_advisor_setup(&ctx).await?;
    ctx.pool.close().await;

    let (status, body) = ctx
        .send(
            Method::POST,
            "/authz/resolve",
            Some(json!({ "dealer_id": 5, "role_ids": [role], "module": "service_orders", "permission": "read" })),
        )
        .await?;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "resolution_unavailable");
    assert!(body.get("decision").is_none());

    Ok(())
}

#[tokio::test]
async fn invalid_module_id_is_rejected() -> Result<()> {
    let ctx = common::spawn_app().await?;
    let role = ctx.create_role("anyone").await?;

    let (status, _) = ctx
        .send(Method::PUT, &format!("/roles/{role}/modules/Service%20Orders"), Some(json!({ "enabled": true })))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = ctx
        .send(
            Method::POST,
            "/authz/resolve",
            Some(json!({ "dealer_id": 5, "role_ids": [role], "module": "Service Orders", "permission": "read" })),
        )
        .await?;
    assert!(status.is_client_error());

    Ok(())
}
