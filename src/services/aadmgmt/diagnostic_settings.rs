//! `azurerm_aad_diagnostic_settings`: tenant-level Azure AD diagnostic settings.
//!
//! Routes the directory's audit and sign-in logs to a storage account, a Log
//! Analytics workspace and/or an Event Hub.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::id::AadDiagnosticSettingId;
use crate::client::ArmClient;
use crate::config::Timeouts;
use crate::error::{ProviderError, Result, ResultExt};
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema, Validator};
use crate::services::{decode_state, encode_state, has_string, single_block, state_id, Resource};

const RESOURCE_TYPE: &str = "azurerm_aad_diagnostic_settings";
const API_VERSION: &str = "2017-04-01-preview";

/// Log categories an Azure AD diagnostic setting can export.
pub const LOG_CATEGORIES: [&str; 2] = ["AuditLogs", "SignInLogs"];

/// Azure AD diagnostic settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticSettingsResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct DiagnosticSettingState {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    storage_account_id: Option<String>,
    #[serde(default)]
    event_hub_name: Option<String>,
    #[serde(default)]
    event_hub_auth_rule_id: Option<String>,
    #[serde(default)]
    workspace_id: Option<String>,
    #[serde(default)]
    logs: Vec<LogState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LogState {
    category: String,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default, deserialize_with = "single_block")]
    retention_policy: Option<RetentionPolicyState>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RetentionPolicyState {
    #[serde(default)]
    retention_policy_days: i64,
    #[serde(default)]
    retention_policy_enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DiagnosticSettingsModel {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default, skip_serializing)]
    name: Option<String>,
    #[serde(default)]
    properties: DiagnosticSettingsProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosticSettingsProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_hub_name: Option<String>,
    #[serde(
        default,
        rename = "eventHubAuthorizationRuleId",
        skip_serializing_if = "Option::is_none"
    )]
    event_hub_authorization_rule_id: Option<String>,
    #[serde(default)]
    logs: Vec<LogSettingsModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogSettingsModel {
    category: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retention_policy: Option<RetentionPolicyModel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RetentionPolicyModel {
    #[serde(default)]
    days: i64,
    #[serde(default)]
    enabled: bool,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|s| !s.is_empty())
}

impl From<&DiagnosticSettingState> for DiagnosticSettingsModel {
    fn from(state: &DiagnosticSettingState) -> Self {
        let logs = state
            .logs
            .iter()
            .map(|log| {
                let policy = log.retention_policy.clone().unwrap_or_default();
                LogSettingsModel {
                    category: log.category.clone(),
                    enabled: log.enabled,
                    retention_policy: Some(RetentionPolicyModel {
                        days: policy.retention_policy_days,
                        enabled: policy.retention_policy_enabled,
                    }),
                }
            })
            .collect();

        Self {
            id: None,
            name: None,
            properties: DiagnosticSettingsProperties {
                storage_account_id: non_empty(&state.storage_account_id),
                workspace_id: non_empty(&state.workspace_id),
                event_hub_name: non_empty(&state.event_hub_name),
                event_hub_authorization_rule_id: non_empty(&state.event_hub_auth_rule_id),
                logs,
            },
        }
    }
}

impl DiagnosticSettingState {
    fn from_model(id: String, name: String, model: DiagnosticSettingsModel) -> Self {
        let props = model.properties;
        Self {
            id: Some(id),
            name,
            storage_account_id: props.storage_account_id,
            event_hub_name: props.event_hub_name,
            event_hub_auth_rule_id: props.event_hub_authorization_rule_id,
            workspace_id: props.workspace_id,
            logs: props
                .logs
                .into_iter()
                .map(|log| {
                    let policy = log.retention_policy.unwrap_or_default();
                    LogState {
                        category: log.category,
                        enabled: log.enabled,
                        retention_policy: Some(RetentionPolicyState {
                            retention_policy_days: policy.days,
                            retention_policy_enabled: policy.enabled,
                        }),
                    }
                })
                .collect(),
        }
    }
}

fn setting_path(name: &str) -> String {
    AadDiagnosticSettingId::new(name).to_string()
}

impl DiagnosticSettingsResource {
    async fn fetch(&self, client: &ArmClient, name: &str) -> Result<Option<DiagnosticSettingsModel>> {
        client
            .get_optional(&setting_path(name), API_VERSION)
            .await
            .with_context(|| format!("retrieving Azure AD Diagnostic Setting {:?}", name))
    }
}

#[async_trait]
impl Resource for DiagnosticSettingsResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        let retention_policy = Block::new()
            .with_attribute(
                "retention_policy_days",
                Attribute::optional_int64()
                    .with_default(json!(0))
                    .with_validator(Validator::IntAtLeast { min: 0 }),
            )
            .with_attribute(
                "retention_policy_enabled",
                Attribute::optional_bool().with_default(json!(false)),
            );

        let logs = Block::new()
            .with_attribute(
                "category",
                Attribute::required_string().with_validator(Validator::OneOf {
                    values: LOG_CATEGORIES.iter().map(|c| c.to_string()).collect(),
                }),
            )
            .with_attribute("enabled", Attribute::optional_bool().with_default(json!(true)))
            .with_block(
                "retention_policy",
                NestedBlock::single(retention_policy).with_min_items(1),
            );

        Schema::v0()
            .with_description("Manages an Azure Active Directory diagnostic setting")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::NotEmpty),
            )
            .with_attribute(
                "storage_account_id",
                Attribute::optional_string().with_validator(Validator::ResourceId),
            )
            .with_attribute("event_hub_name", Attribute::optional_string())
            .with_attribute(
                "event_hub_auth_rule_id",
                Attribute::optional_string().with_validator(Validator::ResourceId),
            )
            .with_attribute(
                "workspace_id",
                Attribute::optional_string().with_validator(Validator::ResourceId),
            )
            .with_block("logs", NestedBlock::set(logs).with_min_items(1))
            .with_block("timeouts", Timeouts::schema_block())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        let has_sink = ["storage_account_id", "workspace_id", "event_hub_auth_rule_id"]
            .iter()
            .any(|field| has_string(config, field));
        if !has_sink {
            diagnostics.push(
                Diagnostic::error("At least one destination is required")
                    .with_detail(
                        "Set one of `storage_account_id`, `workspace_id` or `event_hub_auth_rule_id`",
                    ),
            );
        }

        if has_string(config, "event_hub_name") && !has_string(config, "event_hub_auth_rule_id") {
            diagnostics.push(
                Diagnostic::error("`event_hub_name` requires `event_hub_auth_rule_id`")
                    .with_attribute("event_hub_name"),
            );
        }

        diagnostics
    }

    async fn create_or_update(&self, client: &ArmClient, planned: Value, is_new: bool) -> Result<Value> {
        let state: DiagnosticSettingState = decode_state(RESOURCE_TYPE, planned)?;
        let name = state.name.clone();
        let id = AadDiagnosticSettingId::new(&name).to_string();

        if is_new {
            if let Some(existing) = self.fetch(client, &name).await? {
                return Err(ProviderError::import_as_exists(
                    RESOURCE_TYPE,
                    existing.id.unwrap_or(id),
                ));
            }
        }

        info!(name = %name, is_new, "Writing Azure AD diagnostic setting");
        let body = serde_json::to_value(DiagnosticSettingsModel::from(&state))?;
        client
            .put(&setting_path(&name), API_VERSION, &body)
            .await
            .with_context(|| format!("creating Azure AD Diagnostic Setting {:?}", name))?;

        let created = self.fetch(client, &name).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("Azure AD Diagnostic Setting {:?} after write", name))
        })?;
        let created_id = created.id.clone().filter(|id| !id.is_empty()).ok_or_else(|| {
            ProviderError::InvalidResourceId(format!(
                "empty ID returned for Azure AD Diagnostic Setting {:?}",
                name
            ))
        })?;

        encode_state(&DiagnosticSettingState::from_model(created_id, name, created))
    }

    async fn read(&self, client: &ArmClient, state: Value) -> Result<Option<Value>> {
        let id = AadDiagnosticSettingId::parse(&state_id(RESOURCE_TYPE, &state)?)?;

        let Some(model) = self.fetch(client, &id.name).await? else {
            debug!(name = %id.name, "Azure AD diagnostic setting is gone; removing from state");
            return Ok(None);
        };

        let read_id = model.id.clone().unwrap_or_else(|| id.to_string());
        let name = model.name.clone().unwrap_or_else(|| id.name.clone());
        encode_state(&DiagnosticSettingState::from_model(read_id, name, model)).map(Some)
    }

    async fn delete(&self, client: &ArmClient, state: Value) -> Result<()> {
        let id = AadDiagnosticSettingId::parse(&state_id(RESOURCE_TYPE, &state)?)?;

        match client.delete(&setting_path(&id.name), API_VERSION).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(name = %id.name, "Azure AD diagnostic setting already deleted");
                Ok(())
            },
            Err(e) => Err(e.context(format!("deleting Azure AD Diagnostic Setting {:?}", id.name))),
        }
    }

    async fn import_state(&self, client: &ArmClient, id: &str) -> Result<Value> {
        let parsed = AadDiagnosticSettingId::parse(id)?;
        self.read(client, json!({ "id": parsed.to_string() }))
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("Azure AD Diagnostic Setting {:?}", parsed.name))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;

    const STORAGE: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/sa";

    fn config(extra: Value) -> Value {
        let mut base = json!({
            "name": "audit",
            "logs": [
                {"category": "AuditLogs", "enabled": true,
                 "retention_policy": {"retention_policy_days": 2, "retention_policy_enabled": true}},
            ]
        });
        if let (Value::Object(b), Value::Object(e)) = (&mut base, extra) {
            b.extend(e);
        }
        base
    }

    #[test]
    fn test_validate_requires_sink() {
        let resource = DiagnosticSettingsResource;
        let diagnostics = resource.validate(&config(json!({})));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("destination"));

        assert!(resource
            .validate(&config(json!({"storage_account_id": STORAGE})))
            .is_empty());
    }

    #[test]
    fn test_validate_event_hub_name_needs_rule() {
        let diagnostics = DiagnosticSettingsResource.validate(&config(json!({
            "storage_account_id": STORAGE,
            "event_hub_name": "hub"
        })));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("event_hub_name"));
    }

    #[test]
    fn test_schema_rejects_unknown_category() {
        let schema = DiagnosticSettingsResource.schema();
        let diagnostics = validate(
            &schema,
            &json!({
                "name": "audit",
                "storage_account_id": STORAGE,
                "logs": [{"category": "ProvisioningLogs", "retention_policy": {}}]
            }),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("logs.0.category"));
    }

    #[test]
    fn test_request_body() {
        let state: DiagnosticSettingState = serde_json::from_value(config(json!({
            "storage_account_id": STORAGE,
            "workspace_id": ""
        })))
        .unwrap();
        let body = serde_json::to_value(DiagnosticSettingsModel::from(&state)).unwrap();
        assert_eq!(
            body,
            json!({
                "properties": {
                    "storageAccountId": STORAGE,
                    "logs": [{
                        "category": "AuditLogs",
                        "enabled": true,
                        "retentionPolicy": {"days": 2, "enabled": true}
                    }]
                }
            })
        );
    }

    #[test]
    fn test_state_from_remote() {
        let model: DiagnosticSettingsModel = serde_json::from_value(json!({
            "id": "/providers/microsoft.aadiam/diagnosticSettings/audit",
            "name": "audit",
            "properties": {
                "workspaceId": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/law",
                "logs": [{"category": "SignInLogs", "enabled": false}]
            }
        }))
        .unwrap();
        let id = model.id.clone().unwrap();
        let state = DiagnosticSettingState::from_model(id, "audit".to_string(), model);
        assert!(state.storage_account_id.is_none());
        assert_eq!(state.logs[0].category, "SignInLogs");
        assert!(!state.logs[0].enabled);
        assert_eq!(
            state.logs[0].retention_policy,
            Some(RetentionPolicyState::default())
        );
    }
}
