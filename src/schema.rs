//! Schema types for the provider configuration and each resource.
//!
//! A [`Schema`] is a root [`Block`] plus a version. Blocks hold typed
//! [`Attribute`]s and [`NestedBlock`]s; both are keyed in a `BTreeMap` so the
//! schema, validation output and plan changes come out in name order.
//!
//! ```
//! use azurerm_provider::schema::{Attribute, Schema, Validator};
//!
//! let schema = Schema::v0()
//!     .with_attribute("id", Attribute::computed_string())
//!     .with_attribute(
//!         "object_id",
//!         Attribute::required_string().with_validator(Validator::Uuid),
//!     );
//! assert!(schema.block.attributes["object_id"].is_required());
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

/// Primitive type of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// UTF-8 string.
    String,
    /// Signed 64-bit integer.
    Int64,
    /// Boolean.
    Bool,
}

impl ValueType {
    /// Name used on the wire and in type errors.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Int64 => "int64",
            ValueType::Bool => "bool",
        }
    }
}

/// Who supplies an attribute's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Must be set in configuration.
    Required,
    /// May be set in configuration.
    Optional,
    /// Set by the provider only.
    Computed,
    /// May be set in configuration, otherwise the provider fills it in.
    OptionalComputed,
}

/// A value check run after the type check passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validator {
    /// Non-empty string.
    NotEmpty,
    /// One of a fixed, case-sensitive set of strings.
    OneOf {
        /// Accepted values.
        values: Vec<String>,
    },
    /// A UUID in any of the usual spellings.
    Uuid,
    /// An ARM resource ID (`/subscriptions/{id}/...` or a tenant-level `/providers/...`).
    ResourceId,
    /// Integer lower bound, inclusive.
    IntAtLeast {
        /// Smallest accepted value.
        min: i64,
    },
    /// A full match against a regular expression.
    Pattern {
        /// Anchored regular expression.
        regex: String,
        /// Shown when the value does not match.
        message: String,
    },
    /// A duration such as `30m` or `1h 30m`.
    Duration,
}

/// A typed attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Value type.
    pub value_type: ValueType,
    /// Who sets the value.
    pub presence: Presence,
    /// Hidden from plans and logs.
    pub sensitive: bool,
    /// Shown in generated documentation.
    pub description: Option<String>,
    /// A change replaces the resource.
    pub force_new: bool,
    /// Case-only differences are not a change.
    pub case_insensitive: bool,
    /// Planned value when configuration leaves the attribute unset.
    pub default: Option<Value>,
    /// Checks run by [`crate::validation::validate`].
    pub validators: Vec<Validator>,
}

impl Attribute {
    /// An attribute with no description, default or validators.
    pub fn new(value_type: ValueType, presence: Presence) -> Self {
        Self {
            value_type,
            presence,
            sensitive: false,
            description: None,
            force_new: false,
            case_insensitive: false,
            default: None,
            validators: Vec::new(),
        }
    }

    /// Required string.
    pub fn required_string() -> Self {
        Self::new(ValueType::String, Presence::Required)
    }

    /// Optional string.
    pub fn optional_string() -> Self {
        Self::new(ValueType::String, Presence::Optional)
    }

    /// Provider-set string.
    pub fn computed_string() -> Self {
        Self::new(ValueType::String, Presence::Computed)
    }

    /// Optional string the provider fills in when unset.
    pub fn optional_computed_string() -> Self {
        Self::new(ValueType::String, Presence::OptionalComputed)
    }

    /// Optional integer.
    pub fn optional_int64() -> Self {
        Self::new(ValueType::Int64, Presence::Optional)
    }

    /// Required boolean.
    pub fn required_bool() -> Self {
        Self::new(ValueType::Bool, Presence::Required)
    }

    /// Optional boolean.
    pub fn optional_bool() -> Self {
        Self::new(ValueType::Bool, Presence::Optional)
    }

    /// Attach documentation.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the resource when this attribute changes.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Compare values without regard to ASCII case when planning.
    pub fn with_case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Plan `default` when configuration leaves the attribute unset.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Add a value check.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Hide the value from plans and logs.
    pub fn with_sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Must be set in configuration.
    pub fn is_required(&self) -> bool {
        self.presence == Presence::Required
    }

    /// May be set in configuration.
    pub fn is_optional(&self) -> bool {
        matches!(self.presence, Presence::Optional | Presence::OptionalComputed)
    }

    /// The provider may set the value.
    pub fn is_computed(&self) -> bool {
        matches!(self.presence, Presence::Computed | Presence::OptionalComputed)
    }

    /// Only the provider sets the value; configuration must not.
    pub fn is_computed_only(&self) -> bool {
        self.presence == Presence::Computed
    }
}

/// How instances of a nested block are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nesting {
    /// At most one instance, stored as an object.
    Single,
    /// Ordered instances.
    List,
    /// Unordered instances; order never produces a diff.
    Set,
}

/// Attributes and nested blocks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    /// Attributes by name.
    pub attributes: BTreeMap<String, Attribute>,
    /// Nested blocks by name.
    pub blocks: BTreeMap<String, NestedBlock>,
    /// Shown in generated documentation.
    pub description: Option<String>,
}

impl Block {
    /// An empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block.
    pub fn with_block(mut self, name: impl Into<String>, nested: NestedBlock) -> Self {
        self.blocks.insert(name.into(), nested);
        self
    }

    /// Attach documentation.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A block embedded in another block.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedBlock {
    /// The embedded block.
    pub block: Block,
    /// Arrangement of instances.
    pub nesting: Nesting,
    /// Fewest instances accepted.
    pub min_items: u32,
    /// Most instances accepted; `None` is unbounded.
    pub max_items: Option<u32>,
}

impl NestedBlock {
    fn new(block: Block, nesting: Nesting, max_items: Option<u32>) -> Self {
        Self {
            block,
            nesting,
            min_items: 0,
            max_items,
        }
    }

    /// Zero or one instance.
    pub fn single(block: Block) -> Self {
        Self::new(block, Nesting::Single, Some(1))
    }

    /// Ordered instances.
    pub fn list(block: Block) -> Self {
        Self::new(block, Nesting::List, None)
    }

    /// Unordered instances.
    pub fn set(block: Block) -> Self {
        Self::new(block, Nesting::Set, None)
    }

    /// Require at least `min` instances.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    /// Accept at most `max` instances.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = Some(max);
        self
    }
}

/// A versioned root block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    /// Bumped whenever stored state needs an upgrade.
    pub version: i64,
    /// Root block.
    pub block: Block,
}

impl Schema {
    /// An empty schema at `version`.
    pub fn new(version: i64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// An empty schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add an attribute to the root block.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block = self.block.with_attribute(name, attr);
        self
    }

    /// Add a nested block to the root block.
    pub fn with_block(mut self, name: impl Into<String>, nested: NestedBlock) -> Self {
        self.block = self.block.with_block(name, nested);
        self
    }

    /// Document the root block.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.block = self.block.with_description(description);
        self
    }
}

/// The provider configuration schema and every resource schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderSchema {
    /// Provider configuration.
    pub provider: Schema,
    /// Resource schemas by type name.
    pub resources: BTreeMap<String, Schema>,
}

impl ProviderSchema {
    /// No provider attributes and no resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the provider configuration schema.
    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    /// Register a resource type.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }
}

/// How serious a [`Diagnostic`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks the operation.
    Error,
    /// Reported, but the operation goes ahead.
    Warning,
}

/// A problem reported against a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: Severity,
    /// One-line description.
    pub summary: String,
    /// Longer explanation or remedy.
    pub detail: Option<String>,
    /// Dotted path such as `logs.0.category`.
    pub attribute: Option<String>,
}

impl Diagnostic {
    fn new(severity: Severity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// An error.
    pub fn error(summary: impl Into<String>) -> Self {
        Self::new(Severity::Error, summary)
    }

    /// A warning.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::new(Severity::Warning, summary)
    }

    /// Attach an explanation.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the offending attribute path.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether this blocks the operation.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Whether any diagnostic blocks the operation.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
