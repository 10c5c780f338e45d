//! Log Analytics (`Microsoft.OperationalInsights`).

mod linux_performance_collection;

pub use linux_performance_collection::LinuxPerformanceCollectionResource;

/// Resource group names: 1-90 characters, not ending in a period.
pub(crate) const RESOURCE_GROUP_NAME_PATTERN: &str = r"^[-\w._()]{0,89}[-\w_()]$";

/// Workspace names: 4-63 alphanumerics or hyphens, alphanumeric at both ends.
pub(crate) const WORKSPACE_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9-]{2,61}[A-Za-z0-9]$";
