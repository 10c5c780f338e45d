//! Plan, import and metadata types exchanged with the host.
//!
//! These wrap the protocol messages in [`crate::generated`] with
//! `serde_json::Value` payloads instead of raw JSON bytes.

use serde_json::Value;

use crate::generated;

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    /// Dotted path of the attribute, e.g. `logs` or `enabled`.
    pub path: String,
    /// The value before the change, `None` when the attribute is new.
    pub before: Option<Value>,
    /// The value after the change, `None` when the attribute goes away.
    pub after: Option<Value>,
}

impl AttributeChange {
    /// A change at `path`; `None` on either side means absent.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// An attribute being set for the first time.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// An attribute being cleared.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// An attribute changing value.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// JSON bytes for the wire. An absent value is empty bytes, not `null`.
pub(crate) fn json_bytes(value: Option<Value>) -> Vec<u8> {
    value
        .and_then(|v| serde_json::to_vec(&v).ok())
        .unwrap_or_default()
}

impl From<AttributeChange> for generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: json_bytes(change.before),
            after: json_bytes(change.after),
        }
    }
}

/// The outcome of planning one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResult {
    /// The state expected after apply. `null` for a destroy plan.
    pub planned_state: Value,
    /// Attribute-level changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the remote object must be destroyed and recreated.
    pub requires_replace: bool,
}

impl PlanResult {
    /// A plan with nothing to do.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// A plan with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether applying this plan changes anything.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Whether this plan destroys the resource.
    pub fn is_destroy(&self) -> bool {
        self.planned_state.is_null()
    }
}

/// A resource produced by an import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedResource {
    /// The resource type name.
    pub resource_type: String,
    /// The state read from the remote object.
    pub state: Value,
}

impl ImportedResource {
    /// State for `resource_type` read back from the remote object.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

impl From<ImportedResource> for generated::ImportedResource {
    fn from(imported: ImportedResource) -> Self {
        Self {
            resource_type: imported.resource_type,
            state: json_bytes(Some(imported.state)),
        }
    }
}

/// Answer to `GetMetadata`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderMetadata {
    /// Resource type names, sorted.
    pub resources: Vec<String>,
    /// What the host may rely on.
    pub capabilities: ServerCapabilities,
}

/// Protocol features the provider implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerCapabilities {
    /// Whether the provider plans destroy operations itself.
    pub plan_destroy: bool,
}

impl From<ServerCapabilities> for generated::ServerCapabilities {
    fn from(caps: ServerCapabilities) -> Self {
        Self {
            plan_destroy: caps.plan_destroy,
        }
    }
}

/// Second field of the handshake line.
pub const PROTOCOL_VERSION: u32 = 1;

/// The handshake prefix printed on stdout at startup.
pub const HANDSHAKE_PREFIX: &str = "AZURERM_PROVIDER";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("name", json!("audit"));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(json!("audit")));

        let removed = AttributeChange::removed("workspace_id", json!("/subscriptions/x"));
        assert!(removed.after.is_none());

        let modified = AttributeChange::modified("enabled", json!(true), json!(false));
        assert_eq!(modified.before, Some(json!(true)));
        assert_eq!(modified.after, Some(json!(false)));
    }

    #[test]
    fn test_attribute_change_wire_form() {
        let proto: generated::AttributeChange =
            AttributeChange::modified("enabled", json!(true), json!(false)).into();
        assert_eq!(proto.path, "enabled");
        assert_eq!(proto.before, b"true");
        assert_eq!(proto.after, b"false");

        let added: generated::AttributeChange = AttributeChange::added("id", json!("x")).into();
        assert!(added.before.is_empty());
        assert_eq!(added.after, b"\"x\"");
    }

    #[test]
    fn test_plan_result() {
        let no_change = PlanResult::no_change(json!({"id": "123"}));
        assert!(!no_change.has_changes());
        assert!(!no_change.is_destroy());

        let destroy = PlanResult::with_changes(
            Value::Null,
            vec![AttributeChange::removed("name", json!("perf"))],
            false,
        );
        assert!(destroy.has_changes());
        assert!(destroy.is_destroy());
    }

    #[test]
    fn test_imported_resource_proto() {
        let imported = ImportedResource::new(
            "azurerm_aad_diagnostic_settings",
            json!({"id": "/providers/microsoft.aadiam/diagnosticSettings/audit"}),
        );
        let proto: generated::ImportedResource = imported.into();
        assert_eq!(proto.resource_type, "azurerm_aad_diagnostic_settings");
        let state: Value = serde_json::from_slice(&proto.state).unwrap();
        assert_eq!(state["id"], "/providers/microsoft.aadiam/diagnosticSettings/audit");
    }

    #[test]
    fn test_handshake_fields() {
        assert_eq!(
            format!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, "127.0.0.1:50051"),
            "AZURERM_PROVIDER|1|127.0.0.1:50051"
        );
    }
}
