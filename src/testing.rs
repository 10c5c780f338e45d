//! Drive a [`ProviderService`] directly, without a gRPC server.
//!
//! The integration tests pair [`ProviderTester`] with an `httpmock` server
//! standing in for the management API:
//!
//! ```ignore
//! let tester = ProviderTester::new(AzureRmProvider::with_env_lookup(|_| None));
//! tester.configure(json!({
//!     "subscription_id": SUBSCRIPTION,
//!     "access_token": "token",
//!     "resource_manager_endpoint": server.base_url(),
//! })).await?;
//! let state = tester.apply("azurerm_aad_diagnostic_settings", None, config).await?;
//! ```

use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Failure of a tester call.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// The provider answered with error diagnostics.
    #[error("{}", render(.0))]
    Diagnostics(Vec<Diagnostic>),
    /// The provider call itself failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| {
            let mut line = d.summary.clone();
            if let Some(attribute) = &d.attribute {
                line = format!("{}: {}", attribute, line);
            }
            if let Some(detail) = &d.detail {
                line = format!("{} ({})", line, detail);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn errors_only(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Test harness around a provider.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Wrap `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The provider schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Sorted resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Configure the provider, failing on any error diagnostic.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        errors_only(self.provider.configure(config).await?)
    }

    /// Validate a provider configuration, failing on any error diagnostic.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        errors_only(self.provider.validate_provider_config(config).await?)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource configuration, failing on any error diagnostic.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        errors_only(self.resource_diagnostics(resource_type, config).await?)
    }

    /// All diagnostics for a resource configuration, warnings included.
    pub async fn resource_diagnostics(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        self.provider
            .validate_resource_config(resource_type, config)
            .await
    }

    /// Plan with `config` as both the proposed state and the configuration.
    pub async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, prior_state, config.clone(), config)
            .await
    }

    /// Plan the removal of `prior_state`.
    pub async fn plan_destroy(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create from a planned state.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Refresh a state. `Value::Null` means the remote object is gone.
    pub async fn read(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, state).await
    }

    /// Update from `prior_state` to `planned_state`.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete the object behind `state`.
    pub async fn delete(&self, resource_type: &str, state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, state).await
    }

    /// Import by id.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Migrate a state between schema versions.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    /// Validate, plan, then create (no prior state) or update, then read back.
    ///
    /// Returns the refreshed state, or the planned state unchanged when the
    /// plan has nothing to do.
    pub async fn apply(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        config: Value,
    ) -> Result<Value, TestError> {
        self.validate_resource_config(resource_type, config.clone())
            .await?;
        let plan = self
            .plan(resource_type, prior_state.clone(), config)
            .await?;

        let written = match prior_state {
            Some(prior) if !plan.has_changes() => return Ok(prior),
            Some(prior) if !plan.requires_replace => {
                self.update(resource_type, prior, plan.planned_state)
                    .await?
            },
            Some(prior) => {
                self.delete(resource_type, prior).await?;
                self.create(resource_type, plan.planned_state).await?
            },
            None => self.create(resource_type, plan.planned_state).await?,
        };
        Ok(self.read(resource_type, written).await?)
    }

    /// Plan a destroy, delete, and confirm a refresh drops the state.
    pub async fn destroy(&self, resource_type: &str, state: Value) -> Result<(), TestError> {
        let plan = self.plan_destroy(resource_type, state.clone()).await?;
        assert!(plan.is_destroy(), "destroy plan kept a planned state");
        self.delete(resource_type, state.clone()).await?;
        assert_state_removed(&self.read(resource_type, state).await?);
        Ok(())
    }
}

/// The plan replaces the resource.
///
/// # Panics
///
/// Panics if it does not.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "expected a replacement, changed paths: {:?}",
        changed_paths(plan)
    );
}

/// The plan has nothing to do.
///
/// # Panics
///
/// Panics on any change.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        !plan.has_changes(),
        "expected no changes, got {:?}",
        changed_paths(plan)
    );
}

/// The plan changes `path`.
///
/// # Panics
///
/// Panics if `path` is not among the changes.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "expected a change to {:?}, changed paths: {:?}",
        path,
        changed_paths(plan)
    );
}

/// The plan leaves `path` alone.
///
/// # Panics
///
/// Panics if `path` is among the changes.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !plan.changes.iter().any(|c| c.path == path),
        "expected {:?} to be unchanged",
        path
    );
}

/// Some error diagnostic mentions `needle`.
///
/// # Panics
///
/// Panics if none does.
pub fn assert_error_contains(diagnostics: &[Diagnostic], needle: &str) {
    assert!(
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .any(|d| d.summary.contains(needle)),
        "no error mentions {:?}: {}",
        needle,
        render(diagnostics)
    );
}

/// Some error diagnostic is attached to `attribute`.
///
/// # Panics
///
/// Panics if none is.
pub fn assert_error_at(diagnostics: &[Diagnostic], attribute: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.attribute.as_deref() == Some(attribute)),
        "no error at {:?}: {}",
        attribute,
        render(diagnostics)
    );
}

/// A read reported the remote object gone.
///
/// # Panics
///
/// Panics if `state` still identifies an object.
pub fn assert_state_removed(state: &Value) {
    assert!(state.is_null(), "expected the state to be dropped, got {}", state);
}

/// The create was refused because the object already exists.
///
/// # Panics
///
/// Panics on any other outcome.
pub fn assert_already_exists<T: std::fmt::Debug>(result: &Result<T, ProviderError>) {
    match result {
        Err(e) => assert!(
            matches!(e.root(), ProviderError::AlreadyExists { .. }),
            "expected an import collision, got {}",
            e
        ),
        Ok(value) => panic!("expected an import collision, got {:?}", value),
    }
}

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}
