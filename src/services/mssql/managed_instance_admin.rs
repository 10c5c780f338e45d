//! `azurerm_mssql_managed_instance_admin`: the Azure AD administrator of a SQL
//! managed instance.
//!
//! An instance has at most one AD administrator, stored at
//! `{managed_instance_id}/administrators/ActiveDirectory`. Writes and deletes
//! are long-running operations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::id::{sql_resource_parent_id, ManagedInstanceId};
use crate::client::ArmClient;
use crate::config::Timeouts;
use crate::error::{ProviderError, Result, ResultExt};
use crate::schema::{Attribute, Schema, Validator};
use crate::services::{decode_state, encode_state, state_id, Resource};

const RESOURCE_TYPE: &str = "azurerm_mssql_managed_instance_admin";
const ADMIN_API_VERSION: &str = "2017-03-01-preview";
const INSTANCE_API_VERSION: &str = "2018-06-01-preview";
const ADMINISTRATOR_TYPE: &str = "ActiveDirectory";

/// SQL managed instance Azure AD administrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagedInstanceAdminResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AdminState {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    managed_instance_id: String,
    #[serde(default)]
    object_id: String,
    #[serde(default)]
    login_username: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    admin_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AdministratorModel {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default, skip_serializing)]
    name: Option<String>,
    #[serde(default, rename = "type", skip_serializing)]
    kind: Option<String>,
    #[serde(default)]
    properties: AdministratorProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdministratorProperties {
    #[serde(default)]
    administrator_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    login: Option<String>,
    #[serde(default)]
    sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant_id: Option<String>,
}

fn admin_path(instance: &ManagedInstanceId) -> String {
    format!("{}/administrators/{}", instance, ADMINISTRATOR_TYPE)
}

fn parse_uuid(field: &str, value: &str) -> Result<String> {
    uuid::Uuid::parse_str(value)
        .map(|_| value.to_string())
        .map_err(|e| ProviderError::Validation(format!("`{}` must be a UUID, got {:?}: {}", field, value, e)))
}

impl ManagedInstanceAdminResource {
    async fn fetch(&self, client: &ArmClient, admin_id: &str) -> Result<Option<AdministratorModel>> {
        client
            .get_optional(admin_id, ADMIN_API_VERSION)
            .await
            .with_context(|| format!("retrieving Managed Instance Active Directory Administrator {:?}", admin_id))
    }
}

#[async_trait]
impl Resource for ManagedInstanceAdminResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manages the Azure AD administrator of a SQL managed instance")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "managed_instance_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::ResourceId),
            )
            .with_attribute(
                "object_id",
                Attribute::required_string()
                    .with_description("Object ID of the Azure AD user or group")
                    .with_validator(Validator::Uuid),
            )
            .with_attribute("login_username", Attribute::optional_string())
            .with_attribute(
                "tenant_id",
                Attribute::optional_computed_string().with_validator(Validator::Uuid),
            )
            .with_attribute("admin_type", Attribute::computed_string())
            .with_attribute("name", Attribute::computed_string())
            .with_attribute("type", Attribute::computed_string())
            .with_block("timeouts", Timeouts::schema_block())
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts {
            delete: Duration::from_secs(5 * 60),
            ..Timeouts::default()
        }
    }

    async fn create_or_update(&self, client: &ArmClient, planned: Value, is_new: bool) -> Result<Value> {
        let state: AdminState = decode_state(RESOURCE_TYPE, planned)?;
        let instance = ManagedInstanceId::parse(&state.managed_instance_id)?;

        let found: Option<Value> = client
            .get_optional(&instance.to_string(), INSTANCE_API_VERSION)
            .await
            .with_context(|| {
                format!(
                    "retrieving Managed Instance {:?} (Resource Group {:?})",
                    instance.name, instance.resource_group
                )
            })?;
        if found.is_none() {
            return Err(ProviderError::NotFound(format!(
                "Managed Instance {:?} (Resource Group {:?}) was not found",
                instance.name, instance.resource_group
            )));
        }

        let admin_id = admin_path(&instance);
        if is_new {
            if let Some(existing) = self.fetch(client, &admin_id).await? {
                return Err(ProviderError::import_as_exists(
                    RESOURCE_TYPE,
                    existing.id.unwrap_or_else(|| admin_id.clone()),
                ));
            }
        }

        let body = AdministratorModel {
            properties: AdministratorProperties {
                administrator_type: Some(ADMINISTRATOR_TYPE.to_string()),
                login: state.login_username.clone().filter(|l| !l.is_empty()),
                sid: Some(parse_uuid("object_id", &state.object_id)?),
                tenant_id: state
                    .tenant_id
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .map(|t| parse_uuid("tenant_id", t))
                    .transpose()?,
            },
            ..Default::default()
        };

        info!(managed_instance = %instance.name, is_new, "Writing managed instance administrator");
        client
            .put_long_running(&admin_id, ADMIN_API_VERSION, &serde_json::to_value(&body)?)
            .await
            .with_context(|| {
                format!(
                    "creating Managed Instance {:?} Active Directory Administrator (Resource Group {:?})",
                    instance.name, instance.resource_group
                )
            })?;

        let created = self.fetch(client, &admin_id).await?.ok_or_else(|| {
            ProviderError::NotFound(format!(
                "Managed Instance {:?} Active Directory Administrator after write",
                instance.name
            ))
        })?;
        let created_id = created.id.filter(|id| !id.is_empty()).ok_or_else(|| {
            ProviderError::InvalidResourceId(format!(
                "empty ID returned for Managed Instance {:?} Active Directory Administrator",
                instance.name
            ))
        })?;

        self.read(client, json!({ "id": created_id }))
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "Managed Instance {:?} Active Directory Administrator",
                    instance.name
                ))
            })
    }

    async fn read(&self, client: &ArmClient, state: Value) -> Result<Option<Value>> {
        let id = state_id(RESOURCE_TYPE, &state)?;
        let admin_id = admin_path(&ManagedInstanceId::parse_administrator(&id)?);
        let managed_instance_id = sql_resource_parent_id(&admin_id)?;

        let Some(admin) = self.fetch(client, &admin_id).await? else {
            debug!(id = %admin_id, "Managed instance administrator is gone; removing from state");
            return Ok(None);
        };

        let props = admin.properties;
        encode_state(&AdminState {
            id: Some(admin_id),
            managed_instance_id,
            object_id: props.sid.unwrap_or_default(),
            login_username: props.login,
            tenant_id: props.tenant_id,
            admin_type: props.administrator_type,
            name: admin.name,
            kind: admin.kind,
        })
        .map(Some)
    }

    async fn delete(&self, client: &ArmClient, state: Value) -> Result<()> {
        let id = state_id(RESOURCE_TYPE, &state)?;
        let instance = ManagedInstanceId::parse_administrator(&id)?;

        client
            .delete_long_running(&admin_path(&instance), ADMIN_API_VERSION)
            .await
            .with_context(|| {
                format!(
                    "deleting Managed Instance {:?} Active Directory Administrator (Resource Group {:?})",
                    instance.name, instance.resource_group
                )
            })
    }

    async fn import_state(&self, client: &ArmClient, id: &str) -> Result<Value> {
        ManagedInstanceId::parse_administrator(id)?;
        self.read(client, json!({ "id": id }))
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} {:?}", RESOURCE_TYPE, id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;

    const INSTANCE: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg/providers/Microsoft.Sql/managedInstances/mi1";

    #[test]
    fn test_admin_path() {
        let instance = ManagedInstanceId::parse(INSTANCE).unwrap();
        assert_eq!(
            admin_path(&instance),
            format!("{}/administrators/ActiveDirectory", INSTANCE)
        );
    }

    #[test]
    fn test_admin_path_round_trips() {
        let admin = format!("{}/administrators/ActiveDirectory", INSTANCE);
        let instance = ManagedInstanceId::parse_administrator(&admin).unwrap();
        assert_eq!(admin_path(&instance), admin);
        assert!(ManagedInstanceId::parse_administrator(INSTANCE).is_err());
    }

    #[test]
    fn test_request_body() {
        let body = AdministratorModel {
            properties: AdministratorProperties {
                administrator_type: Some(ADMINISTRATOR_TYPE.to_string()),
                login: Some("sqladmin".to_string()),
                sid: Some("11111111-1111-1111-1111-111111111111".to_string()),
                tenant_id: None,
            },
            id: Some("ignored".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "properties": {
                    "administratorType": "ActiveDirectory",
                    "login": "sqladmin",
                    "sid": "11111111-1111-1111-1111-111111111111"
                }
            })
        );
    }

    #[test]
    fn test_schema_rejects_bad_object_id() {
        let diagnostics = validate(
            &ManagedInstanceAdminResource.schema(),
            &json!({"managed_instance_id": INSTANCE, "object_id": "not-a-guid"}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("object_id"));
    }

    #[test]
    fn test_delete_timeout_is_shorter() {
        let timeouts = ManagedInstanceAdminResource.default_timeouts();
        assert_eq!(timeouts.delete, Duration::from_secs(300));
        assert_eq!(timeouts.create, Duration::from_secs(1800));
    }

    #[test]
    fn test_parse_uuid_keeps_spelling() {
        assert_eq!(
            parse_uuid("object_id", "AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE").unwrap(),
            "AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE"
        );
        assert!(parse_uuid("tenant_id", "x").is_err());
    }
}
