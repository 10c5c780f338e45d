//! The Azure Resource Manager provider.
//!
//! [`AzureRmProvider`] holds the configured [`ArmClient`] and the resource
//! registry, and implements [`ProviderService`] by dispatching on the
//! resource type name.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::ArmClient;
use crate::config::{Operation, ProviderConfig};
use crate::error::{ProviderError, Result};
use crate::plan;
use crate::schema::{self, Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::services::{self, Resource};
use crate::types::{ImportedResource, PlanResult};
use crate::validation;

type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Provider for Azure AD diagnostic settings, Log Analytics data sources and
/// SQL managed instance administrators.
pub struct AzureRmProvider {
    client: RwLock<Option<Arc<ArmClient>>>,
    resources: HashMap<&'static str, Arc<dyn Resource>>,
    env: Arc<EnvLookup>,
}

impl Default for AzureRmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AzureRmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.resources.keys().collect();
        names.sort();
        f.debug_struct("AzureRmProvider")
            .field("resources", &names)
            .finish_non_exhaustive()
    }
}

impl AzureRmProvider {
    /// Create an unconfigured provider that reads `ARM_*` fallbacks from the environment.
    pub fn new() -> Self {
        Self::with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Create an unconfigured provider with a custom environment lookup.
    pub fn with_env_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let resources = services::all()
            .into_iter()
            .map(|r| (r.type_name(), r))
            .collect();
        Self {
            client: RwLock::new(None),
            resources,
            env: Arc::new(lookup),
        }
    }

    fn resource(&self, resource_type: &str) -> Result<&Arc<dyn Resource>> {
        self.resources
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    async fn client(&self) -> Result<Arc<ArmClient>> {
        self.client.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("the provider has not been configured".to_string())
        })
    }

    fn load_config(&self, config: &Value) -> Result<ProviderConfig> {
        let env = Arc::clone(&self.env);
        Ok(ProviderConfig::from_value(config)?.with_env_fallbacks(move |key| env(key)))
    }

    /// Run `fut` under the resource's deadline for `op`, honouring a `timeouts` block in `state`.
    async fn with_deadline<T, F>(
        &self,
        resource: &dyn Resource,
        op: Operation,
        state: &Value,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = resource.default_timeouts().with_overrides(state)?.get(op);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::DeadlineExceeded(format!(
                "{} {} did not finish within {}",
                resource.type_name(),
                op.as_str(),
                humantime::format_duration(limit)
            ))),
        }
    }
}

/// Copy the `timeouts` block from the request state onto the result.
fn carry_timeouts(from: &Value, mut to: Value) -> Value {
    if let (Some(timeouts), Value::Object(obj)) = (from.get("timeouts"), &mut to) {
        obj.insert("timeouts".to_string(), timeouts.clone());
    }
    to
}

#[async_trait::async_trait]
impl ProviderService for AzureRmProvider {
    fn schema(&self) -> ProviderSchema {
        self.resources.values().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, resource| schema.with_resource(resource.type_name(), resource.schema()),
        )
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>> {
        let mut diagnostics = validation::validate(&ProviderConfig::schema(), &config);
        match self.load_config(&config) {
            Ok(parsed) => diagnostics.extend(parsed.validate()),
            Err(e) => diagnostics.push(Diagnostic::error(e.to_string())),
        }
        Ok(diagnostics)
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>> {
        let parsed = self.load_config(&config)?;
        let diagnostics = parsed.validate();
        if schema::has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let client = parsed.build_client()?;
        info!(
            subscription_id = %client.subscription_id(),
            endpoint = %client.endpoint(),
            "Provider configured"
        );
        *self.client.write().await = Some(Arc::new(client));
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<()> {
        debug!("Releasing management API client");
        self.client.write().await.take();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>> {
        let resource = self.resource(resource_type)?;
        let mut diagnostics = validation::validate(&resource.schema(), &config);
        diagnostics.extend(resource.validate(&config));
        Ok(diagnostics)
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value> {
        let resource = self.resource(resource_type)?;
        let current = resource.schema().version;
        if version == current {
            return Ok(state);
        }
        Err(ProviderError::InvalidRequest(format!(
            "{} state has schema version {}, this provider understands version {}",
            resource_type, version, current
        )))
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult> {
        let resource = self.resource(resource_type)?;
        let _ = config;
        Ok(plan::plan(&resource.schema(), prior_state.as_ref(), &proposed_state))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;

        let created = self
            .with_deadline(
                resource.as_ref(),
                Operation::Create,
                &planned_state,
                resource.create_or_update(&client, planned_state.clone(), true),
            )
            .await?;
        info!(resource_type, id = ?created.get("id"), "Created");
        Ok(carry_timeouts(&planned_state, created))
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value> {
        if current_state.is_null() {
            return Ok(Value::Null);
        }
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;

        let refreshed = self
            .with_deadline(
                resource.as_ref(),
                Operation::Read,
                &current_state,
                resource.read(&client, current_state.clone()),
            )
            .await?;
        match refreshed {
            Some(state) => Ok(carry_timeouts(&current_state, state)),
            None => {
                warn!(resource_type, id = ?current_state.get("id"), "Remote object no longer exists");
                Ok(Value::Null)
            },
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        debug!(resource_type, id = ?prior_state.get("id"), "Updating");

        let updated = self
            .with_deadline(
                resource.as_ref(),
                Operation::Update,
                &planned_state,
                resource.create_or_update(&client, planned_state.clone(), false),
            )
            .await?;
        Ok(carry_timeouts(&planned_state, updated))
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<()> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;

        self.with_deadline(
            resource.as_ref(),
            Operation::Delete,
            &current_state,
            resource.delete(&client, current_state.clone()),
        )
        .await?;
        info!(resource_type, id = ?current_state.get("id"), "Deleted");
        Ok(())
    }

    async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;

        let state = self
            .with_deadline(
                resource.as_ref(),
                Operation::Read,
                &Value::Null,
                resource.import_state(&client, id),
            )
            .await?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> AzureRmProvider {
        AzureRmProvider::with_env_lookup(|_| None)
    }

    #[test]
    fn test_schema_lists_all_resources() {
        let schema = provider().schema();
        assert_eq!(schema.resources.len(), 3);
        assert!(schema
            .provider
            .block
            .attributes
            .contains_key("subscription_id"));
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let err = provider()
            .validate_resource_config("azurerm_virtual_machine", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_operations_require_configure() {
        let err = provider()
            .create("azurerm_aad_diagnostic_settings", json!({"name": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_configure_reports_missing_credentials() {
        let p = provider();
        let diagnostics = p.configure(json!({})).await.unwrap();
        assert!(diagnostics.iter().any(|d| d.is_error()));
        assert!(p.client().await.is_err());
    }

    #[tokio::test]
    async fn test_configure_uses_env_fallbacks() {
        let p = AzureRmProvider::with_env_lookup(|key| match key {
            "ARM_SUBSCRIPTION_ID" => Some("11111111-1111-1111-1111-111111111111".to_string()),
            "ARM_ACCESS_TOKEN" => Some("tok".to_string()),
            _ => None,
        });
        let diagnostics = p.configure(Value::Null).await.unwrap();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(
            p.client().await.unwrap().subscription_id(),
            "11111111-1111-1111-1111-111111111111"
        );

        p.stop().await.unwrap();
        assert!(p.client().await.is_err());
    }

    #[tokio::test]
    async fn test_upgrade_rejects_unknown_version() {
        let p = provider();
        let state = json!({"id": "/x"});
        assert_eq!(
            p.upgrade_resource_state("azurerm_mssql_managed_instance_admin", 0, state.clone())
                .await
                .unwrap(),
            state
        );
        assert!(p
            .upgrade_resource_state("azurerm_mssql_managed_instance_admin", 3, state)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_read_of_null_state() {
        assert!(provider()
            .read("azurerm_aad_diagnostic_settings", Value::Null)
            .await
            .unwrap()
            .is_null());
    }

    #[test]
    fn test_carry_timeouts() {
        let out = carry_timeouts(&json!({"timeouts": {"create": "1h"}}), json!({"id": "/x"}));
        assert_eq!(out["timeouts"]["create"], "1h");
        assert_eq!(carry_timeouts(&json!({}), json!({"id": "/x"})), json!({"id": "/x"}));
    }
}
