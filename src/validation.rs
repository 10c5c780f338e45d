//! Configuration checks against a [`Schema`].
//!
//! [`validate`] walks the configuration alongside the schema and reports one
//! [`Diagnostic`] per problem, each pointing at a dotted attribute path such
//! as `logs.0.retention_policy.retention_policy_days`:
//!
//! ```
//! use azurerm_provider::schema::{Attribute, Schema, Validator};
//! use azurerm_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("object_id", Attribute::required_string().with_validator(Validator::Uuid));
//!
//! assert!(validate(&schema, &json!({"object_id": "00000000-0000-0000-0000-000000000000"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"object_id": "sqladmin"}));
//! assert_eq!(diagnostics[0].attribute.as_deref(), Some("object_id"));
//! ```
//!
//! Cross-attribute rules live with each resource, not here.

use regex::Regex;
use serde_json::{Map, Value};

use crate::client::id::ResourceId;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Nesting, Schema, Validator, ValueType};

/// Check `config` against `schema`. An empty result means it is valid.
///
/// Computed-only attributes are not checked; the provider owns them.
pub fn validate(schema: &Schema, config: &Value) -> Vec<Diagnostic> {
    let mut walker = Walker::default();
    walker.block(&schema.block, config, "");
    walker.diagnostics
}

/// [`validate`], as a `Result`.
pub fn validate_result(schema: &Schema, config: &Value) -> Result<(), Vec<Diagnostic>> {
    match validate(schema, config) {
        diagnostics if diagnostics.is_empty() => Ok(()),
        diagnostics => Err(diagnostics),
    }
}

impl Validator {
    /// Check a value whose type already matches. `Some` describes the failure.
    pub fn check(&self, value: &Value) -> Option<String> {
        match self {
            Validator::NotEmpty => value
                .as_str()
                .filter(|s| s.is_empty())
                .map(|_| "must not be empty".to_string()),
            Validator::OneOf { values } => {
                let s = value.as_str()?;
                (!values.iter().any(|v| v == s))
                    .then(|| format!("expected one of {}, got {:?}", values.join(", "), s))
            },
            Validator::Uuid => {
                let s = value.as_str()?;
                uuid::Uuid::parse_str(s)
                    .err()
                    .map(|e| format!("{:?} is not a UUID: {}", s, e))
            },
            Validator::ResourceId => {
                let s = value.as_str()?;
                ResourceId::parse(s).err().map(|e| e.to_string())
            },
            Validator::IntAtLeast { min } => {
                let n = as_int64(value)?;
                (n < *min).then(|| format!("must be at least {}, got {}", min, n))
            },
            Validator::Pattern { regex, message } => {
                let s = value.as_str()?;
                match Regex::new(regex) {
                    Ok(re) => (!re.is_match(s)).then(|| format!("{}, got {:?}", message, s)),
                    Err(e) => Some(format!("pattern {:?} does not compile: {}", regex, e)),
                }
            },
            Validator::Duration => {
                let s = value.as_str()?;
                humantime::parse_duration(s)
                    .err()
                    .map(|e| format!("{:?} is not a duration such as \"30m\": {}", s, e))
            },
        }
    }
}

#[derive(Default)]
struct Walker {
    diagnostics: Vec<Diagnostic>,
}

impl Walker {
    fn error(&mut self, path: &str, summary: String, detail: Option<String>) {
        let mut diagnostic = Diagnostic::error(summary);
        if let Some(detail) = detail {
            diagnostic = diagnostic.with_detail(detail);
        }
        if !path.is_empty() {
            diagnostic = diagnostic.with_attribute(path);
        }
        self.diagnostics.push(diagnostic);
    }

    fn block(&mut self, block: &Block, value: &Value, path: &str) {
        let fields = match value {
            Value::Null => return,
            Value::Object(fields) => fields,
            other => {
                let summary = match path {
                    "" => "Configuration must be an object".to_string(),
                    _ => format!("Block {:?} must be an object", path),
                };
                self.error(path, summary, Some(format!("got {}", kind_of(other))));
                return;
            },
        };

        for (name, attr) in &block.attributes {
            self.attribute(attr, fields.get(name), &child(path, name));
        }
        for (name, nested) in &block.blocks {
            self.nested(nested, fields, name, &child(path, name));
        }
    }

    fn attribute(&mut self, attr: &Attribute, value: Option<&Value>, path: &str) {
        if attr.is_computed_only() {
            return;
        }

        let value = match value {
            Some(v) if !v.is_null() => v,
            _ => {
                if attr.is_required() {
                    self.error(path, format!("Missing required argument {:?}", path), None);
                }
                return;
            },
        };

        if !has_type(attr.value_type, value) {
            self.error(
                path,
                format!("Incorrect type for {:?}", path),
                Some(format!("expected {}, got {}", attr.value_type.as_str(), kind_of(value))),
            );
            return;
        }

        for failure in attr.validators.iter().filter_map(|v| v.check(value)) {
            self.error(path, format!("Invalid value for {:?}", path), Some(failure));
        }
    }

    fn nested(&mut self, nested: &NestedBlock, fields: &Map<String, Value>, name: &str, path: &str) {
        let items: Vec<&Value> = match fields.get(name) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().collect(),
            // a single block is usually sent bare rather than as a one-element list
            Some(item @ Value::Object(_)) if nested.nesting == Nesting::Single => vec![item],
            Some(other) => {
                self.error(
                    path,
                    format!("Block {:?} must be a list", path),
                    Some(format!("got {}", kind_of(other))),
                );
                return;
            },
        };

        let count = items.len() as u32;
        if count < nested.min_items {
            self.error(
                path,
                format!("Block {:?} needs at least {} item(s), got {}", path, nested.min_items, count),
                None,
            );
        }
        if let Some(max) = nested.max_items.filter(|max| count > *max) {
            self.error(
                path,
                format!("Block {:?} takes at most {} item(s), got {}", path, max, count),
                None,
            );
        }

        match nested.nesting {
            Nesting::Single => {
                if let Some(item) = items.first() {
                    self.block(&nested.block, item, path);
                }
            },
            Nesting::List | Nesting::Set => {
                for (index, item) in items.iter().enumerate() {
                    self.block(&nested.block, item, &format!("{}.{}", path, index));
                }
            },
        }
    }
}

fn child(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn has_type(value_type: ValueType, value: &Value) -> bool {
    match value_type {
        ValueType::String => value.is_string(),
        ValueType::Bool => value.is_boolean(),
        ValueType::Int64 => as_int64(value).is_some(),
    }
}

/// Integers, including whole floats such as `3.0` that some hosts send.
fn as_int64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn logs_schema() -> Schema {
        let retention = Block::new()
            .with_attribute(
                "retention_policy_days",
                Attribute::optional_int64().with_validator(Validator::IntAtLeast { min: 0 }),
            )
            .with_attribute("retention_policy_enabled", Attribute::optional_bool());
        Schema::v0().with_block(
            "logs",
            NestedBlock::set(
                Block::new()
                    .with_attribute("category", Attribute::required_string())
                    .with_block("retention_policy", NestedBlock::single(retention).with_min_items(1)),
            )
            .with_min_items(1),
        )
    }

    #[test]
    fn test_required_and_types() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("enabled", Attribute::optional_bool());

        assert!(validate(&schema, &json!({"name": "perf"})).is_empty());

        for config in [json!({}), json!({"name": null})] {
            let diagnostics = validate(&schema, &config);
            assert_eq!(diagnostics.len(), 1);
            assert_eq!(diagnostics[0].attribute.as_deref(), Some("name"));
            assert!(diagnostics[0].summary.starts_with("Missing required"));
        }

        let diagnostics = validate(&schema, &json!({"name": 7, "enabled": "yes"}));
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("enabled"));
        assert_eq!(diagnostics[0].detail.as_deref(), Some("expected bool, got string"));
    }

    #[test]
    fn test_computed_only_is_ignored() {
        let schema = Schema::v0().with_attribute("id", Attribute::computed_string());
        assert!(validate(&schema, &json!({"id": 42})).is_empty());
    }

    #[test]
    fn test_int64_accepts_whole_floats() {
        let schema = Schema::v0().with_attribute(
            "days",
            Attribute::optional_int64().with_validator(Validator::IntAtLeast { min: 0 }),
        );

        assert!(validate(&schema, &json!({"days": 3})).is_empty());
        assert!(validate(&schema, &json!({"days": 3.0})).is_empty());
        assert!(validate(&schema, &json!({"days": 3.5}))[0].summary.starts_with("Incorrect type"));
        assert_eq!(
            validate(&schema, &json!({"days": -1}))[0].detail.as_deref(),
            Some("must be at least 0, got -1")
        );
    }

    #[test]
    fn test_validators() {
        let category = Validator::OneOf {
            values: vec!["AuditLogs".to_string(), "SignInLogs".to_string()],
        };
        assert!(category.check(&json!("AuditLogs")).is_none());
        assert!(category.check(&json!("auditlogs")).is_some());

        assert!(Validator::NotEmpty.check(&json!("")).is_some());
        assert!(Validator::NotEmpty.check(&json!("x")).is_none());

        assert!(Validator::Uuid.check(&json!("11111111-2222-3333-4444-555555555555")).is_none());
        assert!(Validator::Uuid.check(&json!("bob")).is_some());

        let workspace = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/law";
        assert!(Validator::ResourceId.check(&json!(workspace)).is_none());
        assert!(Validator::ResourceId.check(&json!("law")).is_some());

        assert!(Validator::Duration.check(&json!("1h 30m")).is_none());
        assert!(Validator::Duration.check(&json!("soon")).is_some());

        let name = Validator::Pattern {
            regex: "^[A-Za-z0-9][A-Za-z0-9-]{2,61}[A-Za-z0-9]$".to_string(),
            message: "workspace names must be 4-63 characters".to_string(),
        };
        assert!(name.check(&json!("acctestLAW-1")).is_none());
        assert_eq!(
            name.check(&json!("-la")).as_deref(),
            Some("workspace names must be 4-63 characters, got \"-la\"")
        );

        let broken = Validator::Pattern {
            regex: "(".to_string(),
            message: String::new(),
        };
        assert!(broken.check(&json!("x")).unwrap().contains("does not compile"));
    }

    #[test]
    fn test_nested_paths() {
        let schema = logs_schema();

        let ok = json!({"logs": [
            {"category": "AuditLogs", "retention_policy": {"retention_policy_days": 2}},
            {"category": "SignInLogs", "retention_policy": [{"retention_policy_days": 3}]}
        ]});
        assert!(validate(&schema, &ok).is_empty());

        let diagnostics = validate(
            &schema,
            &json!({"logs": [
                {"category": "AuditLogs", "retention_policy": {"retention_policy_days": 2}},
                {"category": "SignInLogs", "retention_policy": {"retention_policy_days": -5}}
            ]}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute.as_deref(),
            Some("logs.1.retention_policy.retention_policy_days")
        );

        let diagnostics = validate(&schema, &json!({"logs": [{"category": "AuditLogs"}]}));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("logs.0.retention_policy"));
    }

    #[test]
    fn test_block_counts_and_shapes() {
        let schema = logs_schema();

        assert!(validate(&schema, &json!({"logs": []}))[0].summary.contains("at least 1"));
        assert!(validate(&schema, &json!({}))[0].summary.contains("at least 1"));
        assert!(validate(&schema, &json!({"logs": "AuditLogs"}))[0]
            .summary
            .contains("must be a list"));

        let two_policies = json!({"logs": [{
            "category": "AuditLogs",
            "retention_policy": [{"retention_policy_days": 1}, {"retention_policy_days": 2}]
        }]});
        let diagnostics = validate(&schema, &two_policies);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at most 1"));
    }

    #[test]
    fn test_root_must_be_object() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());
        let diagnostics = validate(&schema, &json!("name"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].attribute.is_none());
        assert!(validate_result(&schema, &json!(["name"])).is_err());
        assert!(validate_result(&schema, &json!({"name": "n"})).is_ok());
    }
}
