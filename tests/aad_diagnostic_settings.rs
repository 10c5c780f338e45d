mod common;

use std::time::Duration;

use azurerm_provider::testing::{
    assert_already_exists, assert_error_at, assert_error_contains, assert_plan_no_changes,
    assert_plan_replaces,
};
use common::{bearer, configured, wait_for_hits};
use httpmock::prelude::*;
use serde_json::{json, Value};

const TYPE: &str = "azurerm_aad_diagnostic_settings";
const API_VERSION: &str = "2017-04-01-preview";
const NAME: &str = "audit-to-storage";
const PATH: &str = "/providers/microsoft.aadiam/diagnosticSettings/audit-to-storage";
const STORAGE: &str = "/subscriptions/11111111-2222-3333-4444-555555555555/resourceGroups/acctest-rg/providers/Microsoft.Storage/storageAccounts/acctestsa";
const WORKSPACE: &str = "/subscriptions/11111111-2222-3333-4444-555555555555/resourceGroups/acctest-rg/providers/Microsoft.OperationalInsights/workspaces/acctest-law";
const EVENT_HUB_RULE: &str = "/subscriptions/11111111-2222-3333-4444-555555555555/resourceGroups/acctest-rg/providers/Microsoft.EventHub/namespaces/acctest-ehn/authorizationRules/RootManageSharedAccessKey";

fn logs_config() -> Value {
    json!([
        {
            "category": "AuditLogs",
            "enabled": true,
            "retention_policy": [{"retention_policy_days": 2, "retention_policy_enabled": true}]
        },
        {
            "category": "SignInLogs",
            "enabled": true,
            "retention_policy": [{"retention_policy_days": 3, "retention_policy_enabled": true}]
        }
    ])
}

fn logs_remote() -> Value {
    json!([
        {"category": "AuditLogs", "enabled": true, "retentionPolicy": {"days": 2, "enabled": true}},
        {"category": "SignInLogs", "enabled": true, "retentionPolicy": {"days": 3, "enabled": true}}
    ])
}

fn storage_only_config() -> Value {
    json!({"name": NAME, "storage_account_id": STORAGE, "logs": logs_config()})
}

fn remote(properties: Value) -> Value {
    let mut properties = properties;
    properties["logs"] = logs_remote();
    json!({
        "id": PATH,
        "name": NAME,
        "type": "microsoft.aadiam/diagnosticSettings",
        "properties": properties
    })
}

#[tokio::test]
async fn test_create_read_and_destroy() {
    let server = MockServer::start_async().await;
    let tester = configured(&server).await;

    let mut absent = server
        .mock_async(|when, then| {
            when.method(GET).path(PATH).query_param("api-version", API_VERSION);
            then.status(404).json_body(json!({
                "error": {"code": "ResourceNotFound", "message": "not found"}
            }));
        })
        .await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(PATH)
                .query_param("api-version", API_VERSION)
                .header("authorization", bearer())
                .body_contains("\"storageAccountId\"")
                .body_contains("\"AuditLogs\"")
                .body_contains("\"SignInLogs\"");
            then.status(200)
                .delay(Duration::from_millis(300))
                .json_body(remote(json!({"storageAccountId": STORAGE})));
        })
        .await;

    let plan = tester.plan(TYPE, None, storage_only_config()).await.unwrap();
    assert!(plan.planned_state["id"].is_null());

    // the setting exists from the moment the PUT lands
    let (created, mut present) = tokio::join!(tester.create(TYPE, plan.planned_state), async {
        wait_for_hits(&put, 1).await;
        let present = server
            .mock_async(|when, then| {
                when.method(GET).path(PATH).query_param("api-version", API_VERSION);
                then.status(200)
                    .json_body(remote(json!({"storageAccountId": STORAGE})));
            })
            .await;
        absent.delete_async().await;
        present
    });
    let created = created.unwrap();
    put.assert_hits_async(1).await;
    assert_eq!(created["id"], PATH);
    assert_eq!(created["name"], NAME);

    let state = tester.read(TYPE, created).await.unwrap();
    assert_eq!(state["storage_account_id"], STORAGE);
    assert_eq!(state["logs"].as_array().map(Vec::len), Some(2));
    assert_eq!(state["logs"][1]["retention_policy"]["retention_policy_days"], 3);

    let replan = tester
        .plan(TYPE, Some(state.clone()), storage_only_config())
        .await
        .unwrap();
    assert_plan_no_changes(&replan);

    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path(PATH).query_param("api-version", API_VERSION);
            then.status(200);
        })
        .await;
    present.delete_async().await;
    let _gone = server
        .mock_async(|when, then| {
            when.method(GET).path(PATH);
            then.status(404);
        })
        .await;

    tester.destroy(TYPE, state).await.unwrap();
    delete.assert_async().await;
}

#[tokio::test]
async fn test_sink_changes_update_in_place() {
    let server = MockServer::start_async().await;
    let tester = configured(&server).await;

    let prior = json!({
        "id": PATH,
        "name": NAME,
        "storage_account_id": STORAGE,
        "event_hub_name": null,
        "event_hub_auth_rule_id": null,
        "workspace_id": null,
        "logs": [
            {"category": "AuditLogs", "enabled": true, "retention_policy": {"retention_policy_days": 2, "retention_policy_enabled": true}},
            {"category": "SignInLogs", "enabled": true, "retention_policy": {"retention_policy_days": 3, "retention_policy_enabled": true}}
        ]
    });

    let mut combined_put = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(PATH)
                .body_contains("\"workspaceId\"")
                .body_contains("\"eventHubName\":\"acctest-eh\"")
                .body_contains("\"eventHubAuthorizationRuleId\"");
            then.status(200);
        })
        .await;
    let mut combined_get = server
        .mock_async(|when, then| {
            when.method(GET).path(PATH);
            then.status(200).json_body(remote(json!({
                "storageAccountId": STORAGE,
                "workspaceId": WORKSPACE,
                "eventHubName": "acctest-eh",
                "eventHubAuthorizationRuleId": EVENT_HUB_RULE
            })));
        })
        .await;

    let mut combined = storage_only_config();
    combined["workspace_id"] = json!(WORKSPACE);
    combined["event_hub_name"] = json!("acctest-eh");
    combined["event_hub_auth_rule_id"] = json!(EVENT_HUB_RULE);

    let widened = tester.apply(TYPE, Some(prior), combined).await.unwrap();
    combined_put.assert_hits_async(1).await;
    assert_eq!(widened["id"], PATH);
    assert_eq!(widened["workspace_id"], WORKSPACE);
    assert_eq!(widened["event_hub_name"], "acctest-eh");

    combined_put.delete_async().await;
    combined_get.delete_async().await;
    let storage_put = server
        .mock_async(|when, then| {
            when.method(PUT).path(PATH).body_contains("\"storageAccountId\"");
            then.status(200);
        })
        .await;
    let _storage_get = server
        .mock_async(|when, then| {
            when.method(GET).path(PATH);
            then.status(200)
                .json_body(remote(json!({"storageAccountId": STORAGE})));
        })
        .await;

    let narrowed = tester
        .apply(TYPE, Some(widened), storage_only_config())
        .await
        .unwrap();
    storage_put.assert_hits_async(1).await;
    assert!(narrowed["workspace_id"].is_null());
    assert!(narrowed["event_hub_auth_rule_id"].is_null());
}

#[tokio::test]
async fn test_create_over_existing_setting_is_refused() {
    let server = MockServer::start_async().await;
    let tester = configured(&server).await;

    server
        .mock_async(|when, then| {
            when.method(GET).path(PATH);
            then.status(200)
                .json_body(remote(json!({"storageAccountId": STORAGE})));
        })
        .await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path(PATH);
            then.status(200);
        })
        .await;

    let plan = tester.plan(TYPE, None, storage_only_config()).await.unwrap();
    let result = tester.create(TYPE, plan.planned_state).await;
    assert_already_exists(&result);
    let message = result.unwrap_err().to_string();
    assert!(message.contains(PATH), "{}", message);
    assert!(message.contains("needs to be imported into the State"), "{}", message);
    put.assert_hits_async(0).await;
}

#[tokio::test]
async fn test_import_by_id() {
    let server = MockServer::start_async().await;
    let tester = configured(&server).await;

    server
        .mock_async(|when, then| {
            when.method(GET).path(PATH);
            then.status(200).json_body(remote(json!({"workspaceId": WORKSPACE})));
        })
        .await;

    let imported = tester.import_resource(TYPE, PATH).await.unwrap();
    assert_eq!(imported.len(), 1);
    assert_eq!(imported[0].resource_type, TYPE);
    assert_eq!(imported[0].state["name"], NAME);
    assert_eq!(imported[0].state["workspace_id"], WORKSPACE);

    let err = tester
        .import_resource(TYPE, "/providers/microsoft.insights/diagnosticSettings/x")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Invalid resource ID"), "{}", err);
}

#[tokio::test]
async fn test_validation() {
    let server = MockServer::start_async().await;
    let tester = configured(&server).await;

    let diagnostics = tester
        .resource_diagnostics(
            TYPE,
            json!({
                "name": NAME,
                "logs": [{
                    "category": "ProvisioningLogs",
                    "retention_policy": [{"retention_policy_days": 1}]
                }]
            }),
        )
        .await
        .unwrap();
    assert_error_contains(&diagnostics, "At least one destination is required");
    assert_error_at(&diagnostics, "logs.0.category");

    let diagnostics = tester
        .resource_diagnostics(
            TYPE,
            json!({
                "name": NAME,
                "storage_account_id": STORAGE,
                "event_hub_name": "acctest-eh",
                "logs": logs_config()
            }),
        )
        .await
        .unwrap();
    assert_error_at(&diagnostics, "event_hub_name");

    tester
        .validate_resource_config(TYPE, storage_only_config())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rename_replaces() {
    let server = MockServer::start_async().await;
    let tester = configured(&server).await;

    let prior = json!({"id": PATH, "name": NAME, "storage_account_id": STORAGE, "logs": logs_config()});
    let mut renamed = storage_only_config();
    renamed["name"] = json!("audit-to-storage-2");

    let plan = tester.plan(TYPE, Some(prior), renamed).await.unwrap();
    assert_plan_replaces(&plan);
}
