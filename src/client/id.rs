//! Azure Resource Manager resource IDs.
//!
//! A resource ID is a `/`-separated path of key/value pairs:
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{type}/{name}...]`.

use std::collections::HashMap;
use std::fmt;

use crate::error::{ProviderError, Result};

/// A parsed ARM resource ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    /// Subscription the resource lives in.
    pub subscription_id: String,
    /// Resource group, empty for subscription-scoped resources.
    pub resource_group: String,
    /// Resource provider namespace, e.g. `Microsoft.Sql`.
    pub provider: String,
    /// Remaining type/name pairs keyed by type, e.g. `managedInstances -> mi1`.
    pub path: HashMap<String, String>,
}

impl ResourceId {
    /// Parse an ARM resource ID.
    ///
    /// The ID must contain an even number of segments and a subscription.
    pub fn parse(id: &str) -> Result<Self> {
        let trimmed = id.trim_matches('/');
        if trimmed.is_empty() {
            return Err(ProviderError::InvalidResourceId(format!(
                "cannot parse an empty resource ID ({:?})",
                id
            )));
        }

        let components: Vec<&str> = trimmed.split('/').collect();
        if components.len() % 2 != 0 {
            return Err(ProviderError::InvalidResourceId(format!(
                "the number of path segments is not divisible by 2 in {:?}",
                id
            )));
        }

        let mut subscription_id = None;
        let mut resource_group = String::new();
        let mut provider = String::new();
        let mut path = HashMap::new();

        for pair in components.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if key.is_empty() || value.is_empty() {
                return Err(ProviderError::InvalidResourceId(format!(
                    "key/value cannot be empty strings in {:?}",
                    id
                )));
            }

            if key.eq_ignore_ascii_case("subscriptions") && subscription_id.is_none() {
                subscription_id = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("resourceGroups") && resource_group.is_empty() {
                resource_group = value.to_string();
            } else if key.eq_ignore_ascii_case("providers") && provider.is_empty() {
                provider = value.to_string();
            } else {
                path.insert(key.to_string(), value.to_string());
            }
        }

        let subscription_id = subscription_id.ok_or_else(|| {
            ProviderError::InvalidResourceId(format!("no subscription ID found in {:?}", id))
        })?;

        Ok(Self {
            subscription_id,
            resource_group,
            provider,
            path,
        })
    }

    /// Take the name for a path key, failing if it is missing.
    pub fn pop(&mut self, key: &str) -> Result<String> {
        self.path.remove(key).ok_or_else(|| {
            ProviderError::InvalidResourceId(format!("ID was missing the `{}` element", key))
        })
    }

    /// Fail if the ID has no resource group.
    pub fn require_resource_group(&self) -> Result<&str> {
        if self.resource_group.is_empty() {
            Err(ProviderError::InvalidResourceId(
                "ID was missing the `resourceGroups` element".to_string(),
            ))
        } else {
            Ok(&self.resource_group)
        }
    }
}

/// Drop the last type/name pair of a SQL child resource ID, yielding its parent.
pub fn sql_resource_parent_id(id: &str) -> Result<String> {
    let parts: Vec<&str> = id.split('/').collect();
    // A leading "/" yields an empty first part, so a well-formed ID has an odd count.
    if parts.len() % 2 != 1 || parts.len() < 3 {
        return Err(ProviderError::InvalidResourceId(format!(
            "sql resource id should have an even number of parts: {:?}",
            id
        )));
    }
    Ok(parts[..parts.len() - 2].join("/"))
}

/// ID of a Log Analytics workspace data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogAnalyticsDataSourceId {
    /// Subscription ID.
    pub subscription_id: String,
    /// Resource group name.
    pub resource_group: String,
    /// Workspace name.
    pub workspace: String,
    /// Data source name.
    pub name: String,
}

impl LogAnalyticsDataSourceId {
    /// Build an ID from its parts.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        workspace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            workspace: workspace.into(),
            name: name.into(),
        }
    }

    /// Parse a data source ID.
    pub fn parse(id: &str) -> Result<Self> {
        let mut parsed = ResourceId::parse(id)?;
        let resource_group = parsed.require_resource_group()?.to_string();
        let workspace = parsed.pop("workspaces")?;
        let name = parsed.pop("dataSources")?;
        Ok(Self {
            subscription_id: parsed.subscription_id,
            resource_group,
            workspace,
            name,
        })
    }
}

impl fmt::Display for LogAnalyticsDataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.OperationalInsights/workspaces/{}/dataSources/{}",
            self.subscription_id, self.resource_group, self.workspace, self.name
        )
    }
}

/// ID of a SQL managed instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedInstanceId {
    /// Subscription ID.
    pub subscription_id: String,
    /// Resource group name.
    pub resource_group: String,
    /// Managed instance name.
    pub name: String,
}

impl ManagedInstanceId {
    /// Parse a managed instance ID, or the ID of any of its children.
    pub fn parse(id: &str) -> Result<Self> {
        let mut parsed = ResourceId::parse(id)?;
        let resource_group = parsed.require_resource_group()?.to_string();
        let name = parsed.pop("managedInstances")?;
        Ok(Self {
            subscription_id: parsed.subscription_id,
            resource_group,
            name,
        })
    }
}

const ADMINISTRATOR_SUFFIX: &str = "/administrators/activedirectory";

impl ManagedInstanceId {
    /// Parse the ID of an instance's Azure AD administrator,
    /// `{managed_instance_id}/administrators/ActiveDirectory`, yielding the
    /// instance. The bare instance ID and other children are rejected.
    pub fn parse_administrator(id: &str) -> Result<Self> {
        let invalid = || {
            ProviderError::InvalidResourceId(format!(
                "expected a Managed Instance Active Directory Administrator ID ending in \"/administrators/ActiveDirectory\", got {:?}",
                id
            ))
        };
        if !id
            .trim_end_matches('/')
            .to_ascii_lowercase()
            .ends_with(ADMINISTRATOR_SUFFIX)
        {
            return Err(invalid());
        }

        let mut parsed = ResourceId::parse(id)?;
        if !parsed.provider.eq_ignore_ascii_case("Microsoft.Sql") {
            return Err(invalid());
        }
        let resource_group = parsed.require_resource_group()?.to_string();
        let name = parsed.pop("managedInstances")?;
        parsed.pop("administrators")?;
        if !parsed.path.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            subscription_id: parsed.subscription_id,
            resource_group,
            name,
        })
    }
}

impl fmt::Display for ManagedInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Sql/managedInstances/{}",
            self.subscription_id, self.resource_group, self.name
        )
    }
}

/// ID of a tenant-level Azure AD diagnostic setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AadDiagnosticSettingId {
    /// Diagnostic setting name.
    pub name: String,
}

const AAD_DIAGNOSTIC_SETTINGS_PREFIX: &str = "/providers/microsoft.aadiam/diagnosticSettings/";

impl AadDiagnosticSettingId {
    /// Build an ID from the setting name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Parse `/providers/microsoft.aadiam/diagnosticSettings/{name}` (prefix is case-insensitive).
    pub fn parse(id: &str) -> Result<Self> {
        let prefix_len = AAD_DIAGNOSTIC_SETTINGS_PREFIX.len();
        let matches_prefix = id.len() > prefix_len
            && id.is_char_boundary(prefix_len)
            && id[..prefix_len].eq_ignore_ascii_case(AAD_DIAGNOSTIC_SETTINGS_PREFIX);
        let name = if matches_prefix { &id[prefix_len..] } else { "" };

        if name.is_empty() || name.contains('/') {
            return Err(ProviderError::InvalidResourceId(format!(
                "expected an ID of the form \"{}{{name}}\", got {:?}",
                AAD_DIAGNOSTIC_SETTINGS_PREFIX, id
            )));
        }
        Ok(Self::new(name))
    }
}

impl fmt::Display for AadDiagnosticSettingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", AAD_DIAGNOSTIC_SETTINGS_PREFIX, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUB: &str = "00000000-0000-0000-0000-000000000000";

    #[test]
    fn test_parse_generic_id() {
        let id = format!(
            "/subscriptions/{}/resourceGroups/acctestRG-la-1/providers/Microsoft.EventHub/namespaces/ns1/authorizationRules/RootManageSharedAccessKey",
            SUB
        );
        let parsed = ResourceId::parse(&id).unwrap();
        assert_eq!(parsed.subscription_id, SUB);
        assert_eq!(parsed.resource_group, "acctestRG-la-1");
        assert_eq!(parsed.provider, "Microsoft.EventHub");
        assert_eq!(parsed.path["namespaces"], "ns1");
        assert_eq!(parsed.path["authorizationRules"], "RootManageSharedAccessKey");
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        assert!(ResourceId::parse("").is_err());
        assert!(ResourceId::parse("/subscriptions").is_err());
        assert!(ResourceId::parse("/resourceGroups/rg").is_err());
        assert!(ResourceId::parse("/subscriptions//resourceGroups/rg").is_err());

        let err = ResourceId::parse("/resourceGroups/rg/providers/Microsoft.Sql").unwrap_err();
        assert!(err.to_string().contains("no subscription ID"));
    }

    #[test]
    fn test_pop_missing_key() {
        let mut parsed = ResourceId::parse(&format!("/subscriptions/{}/resourceGroups/rg", SUB)).unwrap();
        let err = parsed.pop("workspaces").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResourceId(_)));
    }

    #[test]
    fn test_log_analytics_data_source_id_round_trip() {
        let id = LogAnalyticsDataSourceId::new(SUB, "rg", "law", "perf");
        let s = id.to_string();
        assert_eq!(
            s,
            format!(
                "/subscriptions/{}/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/law/dataSources/perf",
                SUB
            )
        );
        assert_eq!(LogAnalyticsDataSourceId::parse(&s).unwrap(), id);
    }

    #[test]
    fn test_log_analytics_data_source_id_requires_data_source() {
        let workspace = format!(
            "/subscriptions/{}/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/law",
            SUB
        );
        assert!(LogAnalyticsDataSourceId::parse(&workspace).is_err());
    }

    #[test]
    fn test_managed_instance_id_from_child() {
        let admin = format!(
            "/subscriptions/{}/resourceGroups/rg/providers/Microsoft.Sql/managedInstances/mi1/administrators/ActiveDirectory",
            SUB
        );
        let parsed = ManagedInstanceId::parse(&admin).unwrap();
        assert_eq!(parsed.name, "mi1");
        assert_eq!(parsed.resource_group, "rg");
        assert_eq!(sql_resource_parent_id(&admin).unwrap(), parsed.to_string());
    }

    #[test]
    fn test_parse_administrator_id() {
        let instance = format!(
            "/subscriptions/{}/resourceGroups/rg/providers/Microsoft.Sql/managedInstances/mi1",
            SUB
        );
        let parsed =
            ManagedInstanceId::parse_administrator(&format!("{}/administrators/activeDirectory", instance))
                .unwrap();
        assert_eq!(parsed.name, "mi1");
        assert_eq!(parsed.to_string(), instance);

        for bad in [
            instance.clone(),
            format!("{}/encryptionProtector/current", instance),
            format!("{}/administrators/Other", instance),
            format!("{}/databases/db1/administrators/ActiveDirectory", instance),
            format!(
                "/subscriptions/{}/resourceGroups/rg/providers/Microsoft.Web/managedInstances/mi1/administrators/ActiveDirectory",
                SUB
            ),
        ] {
            let err = ManagedInstanceId::parse_administrator(&bad).unwrap_err();
            assert!(matches!(err, ProviderError::InvalidResourceId(_)), "{}", bad);
        }
    }

    #[test]
    fn test_sql_resource_parent_id_rejects_odd_ids() {
        assert!(sql_resource_parent_id("subscriptions/x/resourceGroups/rg").is_err());
        assert!(sql_resource_parent_id("/").is_err());
    }

    #[test]
    fn test_aad_diagnostic_setting_id() {
        let id = AadDiagnosticSettingId::new("audit-to-storage");
        let s = id.to_string();
        assert_eq!(s, "/providers/microsoft.aadiam/diagnosticSettings/audit-to-storage");
        assert_eq!(AadDiagnosticSettingId::parse(&s).unwrap(), id);
        assert_eq!(
            AadDiagnosticSettingId::parse("/providers/Microsoft.AADIAM/diagnosticSettings/x")
                .unwrap()
                .name,
            "x"
        );
        assert!(AadDiagnosticSettingId::parse("/providers/microsoft.aadiam/diagnosticSettings/").is_err());
        assert!(AadDiagnosticSettingId::parse("/providers/microsoft.aadiam/diagnosticSettings/a/b").is_err());
        assert!(AadDiagnosticSettingId::parse("audit").is_err());
    }
}
