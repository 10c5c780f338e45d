//! `azurerm_log_analytics_datasource_linux_performance_collection`.
//!
//! Turns Linux performance counter collection on or off for a Log Analytics
//! workspace. The remote object is a workspace data source of kind
//! `LinuxPerformanceCollection` whose `properties.state` is `Enabled` or
//! `Disabled`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{RESOURCE_GROUP_NAME_PATTERN, WORKSPACE_NAME_PATTERN};
use crate::client::id::LogAnalyticsDataSourceId;
use crate::client::ArmClient;
use crate::config::Timeouts;
use crate::error::{ProviderError, Result, ResultExt};
use crate::schema::{Attribute, Schema, Validator};
use crate::services::{decode_state, encode_state, state_id, Resource};

const RESOURCE_TYPE: &str = "azurerm_log_analytics_datasource_linux_performance_collection";
const API_VERSION: &str = "2020-03-01-preview";
const KIND: &str = "LinuxPerformanceCollection";

/// Linux performance collection data source.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxPerformanceCollectionResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct DataSourceState {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    resource_group_name: String,
    #[serde(default)]
    workspace_name: String,
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DataSourceModel {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default)]
    kind: String,
    // opaque on the wire; decoded per kind
    #[serde(default)]
    properties: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LinuxPerformanceCollectionProperties {
    #[serde(default)]
    state: Option<String>,
}

/// Map the remote state string to `enabled`. Unknown values map to `None`.
fn decode_enabled(state: Option<&str>) -> Option<bool> {
    match state {
        Some(s) if s.eq_ignore_ascii_case("Enabled") => Some(true),
        Some(s) if s.eq_ignore_ascii_case("Disabled") => Some(false),
        _ => None,
    }
}

fn encode_enabled(enabled: bool) -> &'static str {
    if enabled {
        "Enabled"
    } else {
        "Disabled"
    }
}

impl LinuxPerformanceCollectionResource {
    async fn fetch(
        &self,
        client: &ArmClient,
        id: &LogAnalyticsDataSourceId,
    ) -> Result<Option<DataSourceModel>> {
        client
            .get_optional(&id.to_string(), API_VERSION)
            .await
            .with_context(|| {
                format!(
                    "retrieving Log Analytics DataSource {:?} (Resource Group {:?} / Workspace: {:?})",
                    id.name, id.resource_group, id.workspace
                )
            })
    }
}

#[async_trait]
impl Resource for LinuxPerformanceCollectionResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manages Linux performance counter collection for a Log Analytics workspace")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::NotEmpty),
            )
            .with_attribute(
                "resource_group_name",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::Pattern {
                        regex: RESOURCE_GROUP_NAME_PATTERN.to_string(),
                        message: "resource group names must be 1-90 letters, digits, underscores, hyphens, periods or parentheses and cannot end in a period".to_string(),
                    }),
            )
            .with_attribute(
                "workspace_name",
                Attribute::required_string()
                    .with_force_new()
                    .with_case_insensitive()
                    .with_validator(Validator::Pattern {
                        regex: WORKSPACE_NAME_PATTERN.to_string(),
                        message: "workspace names must be 4-63 letters, digits or hyphens and start and end with a letter or digit".to_string(),
                    }),
            )
            .with_attribute("enabled", Attribute::required_bool())
            .with_block("timeouts", Timeouts::schema_block())
    }

    async fn create_or_update(&self, client: &ArmClient, planned: Value, is_new: bool) -> Result<Value> {
        let state: DataSourceState = decode_state(RESOURCE_TYPE, planned)?;
        let enabled = state.enabled.ok_or_else(|| {
            ProviderError::Validation("`enabled` must be set".to_string())
        })?;
        let id = LogAnalyticsDataSourceId::new(
            client.subscription_id(),
            &state.resource_group_name,
            &state.workspace_name,
            &state.name,
        );

        if is_new {
            if let Some(existing) = self.fetch(client, &id).await? {
                let existing_id = existing.id.filter(|i| !i.is_empty()).unwrap_or_else(|| id.to_string());
                return Err(ProviderError::import_as_exists(RESOURCE_TYPE, existing_id));
            }
        }

        info!(name = %id.name, workspace = %id.workspace, enabled, "Writing Linux performance collection data source");
        let body = json!({
            "kind": KIND,
            "properties": { "state": encode_enabled(enabled) },
        });
        client.put(&id.to_string(), API_VERSION, &body).await.with_context(|| {
            format!(
                "creating/updating Log Analytics DataSource {:?} (Resource Group {:?} / Workspace: {:?})",
                id.name, id.resource_group, id.workspace
            )
        })?;

        let created = self.fetch(client, &id).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("Log Analytics DataSource {:?} after write", id.name))
        })?;
        let created_id = created.id.filter(|i| !i.is_empty()).ok_or_else(|| {
            ProviderError::InvalidResourceId(format!(
                "ID was nil or empty for Log Analytics DataSource {:?} (Resource Group {:?} / Workspace: {:?})",
                id.name, id.resource_group, id.workspace
            ))
        })?;

        encode_state(&DataSourceState {
            id: Some(created_id),
            enabled: Some(enabled),
            ..state
        })
    }

    async fn read(&self, client: &ArmClient, state: Value) -> Result<Option<Value>> {
        let raw_id = state_id(RESOURCE_TYPE, &state)?;
        let id = LogAnalyticsDataSourceId::parse(&raw_id)?;
        let prior: DataSourceState = decode_state(RESOURCE_TYPE, state)?;

        let Some(model) = self.fetch(client, &id).await? else {
            debug!(name = %id.name, "Log Analytics data source is gone; removing from state");
            return Ok(None);
        };

        let props = serde_json::from_value::<Option<LinuxPerformanceCollectionProperties>>(
            model.properties,
        )
        .map_err(|e| {
            ProviderError::from(e)
                .context(format!("decoding properties of Log Analytics DataSource {:?}", id.name))
        })?
        .unwrap_or_default();

        let enabled = match decode_enabled(props.state.as_deref()) {
            Some(enabled) => Some(enabled),
            None => {
                warn!(name = %id.name, state = ?props.state, "Unrecognised data source state; keeping `enabled` unchanged");
                prior.enabled
            },
        };

        encode_state(&DataSourceState {
            id: Some(raw_id),
            name: id.name,
            resource_group_name: id.resource_group,
            workspace_name: id.workspace,
            enabled,
        })
        .map(Some)
    }

    async fn delete(&self, client: &ArmClient, state: Value) -> Result<()> {
        let id = LogAnalyticsDataSourceId::parse(&state_id(RESOURCE_TYPE, &state)?)?;
        client.delete(&id.to_string(), API_VERSION).await.with_context(|| {
            format!(
                "deleting Log Analytics DataSource {:?} (Resource Group {:?} / Workspace: {:?})",
                id.name, id.resource_group, id.workspace
            )
        })
    }

    async fn import_state(&self, client: &ArmClient, id: &str) -> Result<Value> {
        let parsed = LogAnalyticsDataSourceId::parse(id)?;
        let model = self.fetch(client, &parsed).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("Log Analytics DataSource {:?}", parsed.name))
        })?;
        if !model.kind.eq_ignore_ascii_case(KIND) {
            return Err(ProviderError::Validation(format!(
                "Log Analytics DataSource {:?} has kind {:?}, expected {:?}",
                parsed.name, model.kind, KIND
            )));
        }

        self.read(client, json!({ "id": id }))
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("Log Analytics DataSource {:?}", parsed.name)))
    }
}
