//! Resource implementations, grouped by Azure service.
//!
//! Every resource implements [`Resource`]; the provider looks them up by type
//! name and dispatches lifecycle calls to them.

pub mod aadmgmt;
pub mod loganalytics;
pub mod mssql;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::client::ArmClient;
use crate::config::Timeouts;
use crate::error::{ProviderError, Result};
use crate::schema::{Diagnostic, Schema};

/// A managed resource type.
#[async_trait]
pub trait Resource: Send + Sync {
    /// The resource type name, e.g. `azurerm_aad_diagnostic_settings`.
    fn type_name(&self) -> &'static str;

    /// The resource schema, including its `timeouts` block.
    fn schema(&self) -> Schema;

    /// Deadlines used when the configuration has no `timeouts` block.
    fn default_timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Checks that span several attributes. Schema-level checks have already run.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Create (`is_new`) or update the remote object and return the new state.
    async fn create_or_update(&self, client: &ArmClient, planned: Value, is_new: bool) -> Result<Value>;

    /// Refresh state from the remote object. `None` means it no longer exists.
    async fn read(&self, client: &ArmClient, state: Value) -> Result<Option<Value>>;

    /// Delete the remote object.
    async fn delete(&self, client: &ArmClient, state: Value) -> Result<()>;

    /// Build state for an existing remote object from its ID.
    async fn import_state(&self, client: &ArmClient, id: &str) -> Result<Value> {
        self.read(client, json!({ "id": id }))
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} {:?}", self.type_name(), id)))
    }
}

/// All resources served by the provider.
pub fn all() -> Vec<Arc<dyn Resource>> {
    vec![
        Arc::new(aadmgmt::DiagnosticSettingsResource),
        Arc::new(loganalytics::LinuxPerformanceCollectionResource),
        Arc::new(mssql::ManagedInstanceAdminResource),
    ]
}

/// Decode a state bag into a typed state.
pub(crate) fn decode_state<T: DeserializeOwned>(resource_type: &str, state: Value) -> Result<T> {
    serde_json::from_value(state).map_err(|e| {
        ProviderError::InvalidRequest(format!("cannot decode {} state: {}", resource_type, e))
    })
}

/// Encode a typed state into a state bag.
pub(crate) fn encode_state<T: Serialize>(state: &T) -> Result<Value> {
    Ok(serde_json::to_value(state)?)
}

/// The `id` attribute of a state bag.
pub(crate) fn state_id(resource_type: &str, state: &Value) -> Result<String> {
    state
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidRequest(format!("{} state has no `id`", resource_type)))
}

/// Whether a configuration value is set to a non-empty string.
pub(crate) fn has_string(config: &Value, name: &str) -> bool {
    config
        .get(name)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

/// Deserialize a single nested block sent either as an object or as a
/// one-element list.
pub(crate) fn single_block<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrList<T> {
        List(Vec<T>),
        One(T),
    }

    Ok(match Option::<OneOrList<T>>::deserialize(deserializer)? {
        Some(OneOrList::List(items)) => items.into_iter().next(),
        Some(OneOrList::One(item)) => Some(item),
        None => None,
    })
}
