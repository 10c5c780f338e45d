//! Provider configuration and operation timeouts.
//!
//! The host sends the provider block as JSON. Any setting left unset falls back
//! to its `ARM_*` environment variable, so the same binary works with
//! credentials exported in the shell.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::client::auth::{ClientSecretCredential, StaticToken, TokenCredential};
use crate::client::{ArmClient, DEFAULT_POLL_INTERVAL, DEFAULT_RESOURCE_MANAGER_ENDPOINT};
use crate::error::{ProviderError, Result};
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema, Validator};

/// Public cloud authority host.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";

/// Settings from the provider block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Subscription to manage (`ARM_SUBSCRIPTION_ID`).
    pub subscription_id: Option<String>,
    /// Azure AD tenant (`ARM_TENANT_ID`).
    pub tenant_id: Option<String>,
    /// Service principal application ID (`ARM_CLIENT_ID`).
    pub client_id: Option<String>,
    /// Service principal secret (`ARM_CLIENT_SECRET`).
    pub client_secret: Option<String>,
    /// Pre-issued bearer token (`ARM_ACCESS_TOKEN`).
    pub access_token: Option<String>,
    /// Management endpoint (`ARM_RESOURCE_MANAGER_ENDPOINT`).
    pub resource_manager_endpoint: Option<String>,
    /// Token authority (`ARM_AUTHORITY_HOST`).
    pub authority_host: Option<String>,
    /// Wait between long-running operation polls, e.g. `10s`.
    pub operation_poll_interval: Option<String>,
}

impl ProviderConfig {
    /// Schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_description("Azure Resource Manager provider")
            .with_attribute(
                "subscription_id",
                Attribute::optional_string()
                    .with_description("Subscription ID. Defaults to ARM_SUBSCRIPTION_ID.")
                    .with_validator(Validator::Uuid),
            )
            .with_attribute(
                "tenant_id",
                Attribute::optional_string()
                    .with_description("Tenant ID. Defaults to ARM_TENANT_ID.")
                    .with_validator(Validator::Uuid),
            )
            .with_attribute(
                "client_id",
                Attribute::optional_string()
                    .with_description("Client ID of the service principal. Defaults to ARM_CLIENT_ID.")
                    .with_validator(Validator::Uuid),
            )
            .with_attribute(
                "client_secret",
                Attribute::optional_string()
                    .with_description("Client secret of the service principal. Defaults to ARM_CLIENT_SECRET.")
                    .with_sensitive(),
            )
            .with_attribute(
                "access_token",
                Attribute::optional_string()
                    .with_description("Bearer token to use instead of a service principal. Defaults to ARM_ACCESS_TOKEN.")
                    .with_sensitive(),
            )
            .with_attribute(
                "resource_manager_endpoint",
                Attribute::optional_string()
                    .with_description("Management API endpoint. Defaults to https://management.azure.com/."),
            )
            .with_attribute(
                "authority_host",
                Attribute::optional_string()
                    .with_description("Token authority. Defaults to https://login.microsoftonline.com/."),
            )
            .with_attribute(
                "operation_poll_interval",
                Attribute::optional_string()
                    .with_description("Wait between long-running operation polls when the API sends no Retry-After.")
                    .with_validator(Validator::Duration),
            )
    }

    /// Decode the provider block. `null` yields an empty configuration.
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| ProviderError::Configuration(format!("invalid provider configuration: {}", e)))
    }

    /// Fill unset fields from `lookup`, keyed by `ARM_*` variable name.
    pub fn with_env_fallbacks<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |field: &mut Option<String>, key: &str| {
            if field.is_none() {
                *field = lookup(key).filter(|v| !v.is_empty());
            }
        };
        fill(&mut self.subscription_id, "ARM_SUBSCRIPTION_ID");
        fill(&mut self.tenant_id, "ARM_TENANT_ID");
        fill(&mut self.client_id, "ARM_CLIENT_ID");
        fill(&mut self.client_secret, "ARM_CLIENT_SECRET");
        fill(&mut self.access_token, "ARM_ACCESS_TOKEN");
        fill(&mut self.resource_manager_endpoint, "ARM_RESOURCE_MANAGER_ENDPOINT");
        fill(&mut self.authority_host, "ARM_AUTHORITY_HOST");
        self
    }

    /// Check that the configuration is complete enough to build a client.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if self.subscription_id.as_deref().unwrap_or_default().is_empty() {
            diagnostics.push(
                Diagnostic::error("Missing subscription ID")
                    .with_detail("Set `subscription_id` or the ARM_SUBSCRIPTION_ID environment variable")
                    .with_attribute("subscription_id"),
            );
        }

        if self.access_token.is_none() {
            for (field, env) in [
                ("tenant_id", "ARM_TENANT_ID"),
                ("client_id", "ARM_CLIENT_ID"),
                ("client_secret", "ARM_CLIENT_SECRET"),
            ] {
                if self.field(field).is_none() {
                    diagnostics.push(
                        Diagnostic::error(format!("Missing `{}`", field))
                            .with_detail(format!(
                                "Authenticating with a service principal requires `{}` (or {}); alternatively set `access_token`",
                                field, env
                            ))
                            .with_attribute(field),
                    );
                }
            }
        }

        for (field, value) in [
            ("resource_manager_endpoint", &self.resource_manager_endpoint),
            ("authority_host", &self.authority_host),
        ] {
            if let Some(raw) = value {
                if let Err(e) = Url::parse(raw) {
                    diagnostics.push(
                        Diagnostic::error(format!("Invalid URL for `{}`", field))
                            .with_detail(e.to_string())
                            .with_attribute(field),
                    );
                }
            }
        }

        if let Some(raw) = &self.operation_poll_interval {
            if let Err(e) = humantime::parse_duration(raw) {
                diagnostics.push(
                    Diagnostic::error("Invalid `operation_poll_interval`")
                        .with_detail(e.to_string())
                        .with_attribute("operation_poll_interval"),
                );
            }
        }

        diagnostics
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "tenant_id" => self.tenant_id.as_deref(),
            "client_id" => self.client_id.as_deref(),
            "client_secret" => self.client_secret.as_deref(),
            _ => None,
        }
    }

    /// The management endpoint, always ending in `/`.
    pub fn endpoint(&self) -> Result<Url> {
        parse_base_url(
            "resource_manager_endpoint",
            self.resource_manager_endpoint
                .as_deref()
                .unwrap_or(DEFAULT_RESOURCE_MANAGER_ENDPOINT),
        )
    }

    /// The wait between long-running operation polls.
    pub fn poll_interval(&self) -> Result<Duration> {
        match &self.operation_poll_interval {
            Some(raw) => humantime::parse_duration(raw).map_err(|e| {
                ProviderError::Configuration(format!(
                    "invalid operation_poll_interval {:?}: {}",
                    raw, e
                ))
            }),
            None => Ok(DEFAULT_POLL_INTERVAL),
        }
    }

    /// Build the token credential: `access_token` wins over a service principal.
    pub fn credential(&self) -> Result<Arc<dyn TokenCredential>> {
        if let Some(token) = &self.access_token {
            debug!("Authenticating with a static access token");
            return Ok(Arc::new(StaticToken::new(token.clone())));
        }

        match (&self.tenant_id, &self.client_id, &self.client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => {
                debug!(client_id = %client_id, "Authenticating with a client secret");
                let authority = parse_base_url(
                    "authority_host",
                    self.authority_host.as_deref().unwrap_or(DEFAULT_AUTHORITY_HOST),
                )?;
                let credential = ClientSecretCredential::new(
                    &authority,
                    tenant_id,
                    client_id.clone(),
                    client_secret.clone(),
                    &self.endpoint()?,
                )?;
                Ok(Arc::new(credential))
            },
            _ => Err(ProviderError::Configuration(
                "no credentials: set `access_token`, or `tenant_id`, `client_id` and `client_secret`"
                    .to_string(),
            )),
        }
    }

    /// Build the management API client.
    pub fn build_client(&self) -> Result<ArmClient> {
        let subscription_id = self
            .subscription_id
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Configuration("subscription_id is required".to_string()))?;

        Ok(ArmClient::new(self.endpoint()?, subscription_id, self.credential()?)?
            .with_poll_interval(self.poll_interval()?))
    }
}

fn parse_base_url(field: &str, raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| ProviderError::Configuration(format!("invalid {} {:?}: {}", field, raw, e)))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// A resource lifecycle operation that has a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Creating the remote object.
    Create,
    /// Refreshing state from the remote object.
    Read,
    /// Updating the remote object in place.
    Update,
    /// Deleting the remote object.
    Delete,
}

impl Operation {
    /// Attribute name inside the `timeouts` block.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Per-operation deadlines for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Create deadline.
    pub create: Duration,
    /// Read deadline.
    pub read: Duration,
    /// Update deadline.
    pub update: Duration,
    /// Delete deadline.
    pub delete: Duration,
}

const fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new(minutes(30), minutes(5), minutes(30), minutes(30))
    }
}

impl Timeouts {
    /// Build a set of deadlines.
    pub const fn new(create: Duration, read: Duration, update: Duration, delete: Duration) -> Self {
        Self {
            create,
            read,
            update,
            delete,
        }
    }

    /// The deadline for `op`.
    pub fn get(&self, op: Operation) -> Duration {
        match op {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }

    /// Apply overrides from the `timeouts` block of a state, if present.
    ///
    /// The block may be an object or a one-element list.
    pub fn with_overrides(mut self, state: &Value) -> Result<Self> {
        let block = match state.get("timeouts") {
            Some(Value::Array(items)) => items.first(),
            Some(v @ Value::Object(_)) => Some(v),
            _ => None,
        };
        let Some(block) = block else {
            return Ok(self);
        };

        for op in [Operation::Create, Operation::Read, Operation::Update, Operation::Delete] {
            let Some(raw) = block.get(op.as_str()).and_then(Value::as_str) else {
                continue;
            };
            let parsed = humantime::parse_duration(raw).map_err(|e| {
                ProviderError::Validation(format!("invalid {} timeout {:?}: {}", op.as_str(), raw, e))
            })?;
            match op {
                Operation::Create => self.create = parsed,
                Operation::Read => self.read = parsed,
                Operation::Update => self.update = parsed,
                Operation::Delete => self.delete = parsed,
            }
        }
        Ok(self)
    }

    /// The optional `timeouts` block shared by every resource schema.
    pub fn schema_block() -> NestedBlock {
        let attr = || Attribute::optional_string().with_validator(Validator::Duration);
        NestedBlock::single(
            Block::new()
                .with_attribute("create", attr())
                .with_attribute("read", attr())
                .with_attribute("update", attr())
                .with_attribute("delete", attr()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;
    use serde_json::json;
    use std::collections::HashMap;

    const SUB: &str = "11111111-2222-3333-4444-555555555555";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_value_null_is_empty() {
        assert_eq!(ProviderConfig::from_value(&Value::Null).unwrap(), ProviderConfig::default());
    }

    #[test]
    fn test_from_value_rejects_unknown_fields() {
        let err = ProviderConfig::from_value(&json!({"features": {}})).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_env_fallbacks_do_not_override_config() {
        let config = ProviderConfig::from_value(&json!({"subscription_id": SUB}))
            .unwrap()
            .with_env_fallbacks(env(&[
                ("ARM_SUBSCRIPTION_ID", "ignored"),
                ("ARM_ACCESS_TOKEN", "tok"),
                ("ARM_TENANT_ID", ""),
            ]));
        assert_eq!(config.subscription_id.as_deref(), Some(SUB));
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert!(config.tenant_id.is_none());
    }

    #[test]
    fn test_validate_requires_credentials() {
        let diagnostics = ProviderConfig::default().validate();
        let attrs: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert!(attrs.contains(&"subscription_id"));
        assert!(attrs.contains(&"tenant_id"));
        assert!(attrs.contains(&"client_secret"));

        let config = ProviderConfig {
            subscription_id: Some(SUB.to_string()),
            access_token: Some("tok".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_build_client_with_access_token() {
        let config = ProviderConfig {
            subscription_id: Some(SUB.to_string()),
            access_token: Some("tok".to_string()),
            resource_manager_endpoint: Some("http://127.0.0.1:9999/arm".to_string()),
            operation_poll_interval: Some("250ms".to_string()),
            ..Default::default()
        };
        let client = config.build_client().unwrap();
        assert_eq!(client.subscription_id(), SUB);
        assert_eq!(client.endpoint().as_str(), "http://127.0.0.1:9999/arm/");
        assert_eq!(client.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_build_client_without_credentials() {
        let config = ProviderConfig {
            subscription_id: Some(SUB.to_string()),
            ..Default::default()
        };
        let err = config.build_client().unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_schema_validates_uuids() {
        let diagnostics = validate(&ProviderConfig::schema(), &json!({"subscription_id": "nope"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("subscription_id"));
    }

    #[test]
    fn test_timeouts_overrides() {
        let defaults = Timeouts::default();
        assert_eq!(defaults.get(Operation::Read), minutes(5));

        let state = json!({"timeouts": {"create": "45m", "delete": "1h 30m"}});
        let t = defaults.with_overrides(&state).unwrap();
        assert_eq!(t.create, minutes(45));
        assert_eq!(t.delete, minutes(90));
        assert_eq!(t.update, minutes(30));

        let listed = json!({"timeouts": [{"read": "10s"}]});
        assert_eq!(
            defaults.with_overrides(&listed).unwrap().read,
            Duration::from_secs(10)
        );

        assert!(defaults.with_overrides(&json!({"timeouts": {"read": "soon"}})).is_err());
        assert_eq!(defaults.with_overrides(&json!({"name": "x"})).unwrap(), defaults);
    }
}
