//! Azure Resource Manager provider.
//!
//! Manages three kinds of Azure objects over the provider gRPC protocol:
//!
//! - `azurerm_aad_diagnostic_settings`: tenant-level Azure AD diagnostic
//!   settings that route `AuditLogs` and `SignInLogs` to a storage account,
//!   Log Analytics workspace or event hub
//! - `azurerm_log_analytics_datasource_linux_performance_collection`: the
//!   on/off switch for Linux performance counter collection in a workspace
//! - `azurerm_mssql_managed_instance_admin`: the Azure AD administrator of a
//!   SQL managed instance
//!
//! # Layout
//!
//! - [`client`]: the management REST client, credentials, resource ids and
//!   long-running operation polling
//! - [`services`]: one [`services::Resource`] per managed object
//! - [`provider`]: [`AzureRmProvider`], which dispatches protocol calls to
//!   the resources under per-operation deadlines
//! - [`schema`], [`validation`] and [`plan`]: schema description, config
//!   validation and diffing
//! - [`server`]: the gRPC service and [`serve`]
//!
//! # Handshake
//!
//! On startup the binary prints one line to stdout and then serves on that
//! address until SIGTERM or SIGINT:
//!
//! ```text
//! AZURERM_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! All logging goes to stderr.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod schema;
pub mod server;
pub mod services;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use config::{ProviderConfig, Timeouts};
pub use error::{ProviderError, Result};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::AzureRmProvider;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{validate, validate_result};
