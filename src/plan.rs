//! Schema-driven plan computation.
//!
//! [`plan`] compares a proposed state with the prior state using the resource
//! schema:
//!
//! - defaults fill unset optional attributes, recursively into nested blocks
//! - computed attributes the configuration leaves unset carry over from the
//!   prior state, or stay unknown (`null`) on create
//! - a change to a `force_new` attribute makes the plan a replacement
//! - `case_insensitive` attributes ignore case-only differences
//! - set blocks compare without regard to order
//! - a `null` proposed state plans a destroy

use serde_json::{Map, Value};

use crate::schema::{Block, NestedBlock, Nesting, Schema};
use crate::types::{AttributeChange, PlanResult};

/// Compute the plan for moving from `prior` to `proposed`.
pub fn plan(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let prior = prior.filter(|p| !p.is_null());

    if proposed.is_null() {
        return match prior {
            Some(prior) => plan_destroy(&schema.block, prior),
            None => PlanResult::no_change(Value::Null),
        };
    }

    let mut planned = proposed.clone();
    apply_defaults(&schema.block, &mut planned);

    match prior {
        None => plan_create(&schema.block, planned),
        Some(prior) => plan_update(&schema.block, prior, planned),
    }
}

fn plan_create(block: &Block, mut planned: Value) -> PlanResult {
    let mut changes = Vec::new();

    if let Value::Object(obj) = &mut planned {
        for (name, attr) in &block.attributes {
            if attr.is_computed_only() {
                // unknown until apply
                obj.insert(name.clone(), Value::Null);
                continue;
            }
            match obj.get(name.as_str()) {
                Some(v) if !v.is_null() => changes.push(AttributeChange::added(name, v.clone())),
                _ => {},
            }
        }
        for name in block.blocks.keys() {
            match obj.get(name.as_str()) {
                Some(v) if !is_empty_block(v) => changes.push(AttributeChange::added(name, v.clone())),
                _ => {},
            }
        }
    }

    PlanResult::with_changes(planned, changes, false)
}

fn plan_update(block: &Block, prior: &Value, mut planned: Value) -> PlanResult {
    let mut changes = Vec::new();
    let mut requires_replace = false;

    let Value::Object(obj) = &mut planned else {
        return PlanResult::with_changes(planned, changes, false);
    };

    for (name, attr) in &block.attributes {
        let before = prior.get(name.as_str()).cloned().unwrap_or(Value::Null);
        let after = obj.get(name.as_str()).cloned().unwrap_or(Value::Null);

        if attr.is_computed() && after.is_null() {
            obj.insert(name.clone(), before);
            continue;
        }

        if attr.case_insensitive && strings_equal_ignoring_case(&before, &after) {
            // keep the stored spelling so the next refresh does not flap
            obj.insert(name.clone(), before);
            continue;
        }

        if before == after {
            continue;
        }

        if attr.force_new {
            requires_replace = true;
        }
        changes.push(change(name, before, after));
    }

    for (name, nested) in &block.blocks {
        let before = prior.get(name.as_str()).cloned().unwrap_or(Value::Null);
        let after = obj.get(name.as_str()).cloned().unwrap_or(Value::Null);

        if blocks_equal(nested, &before, &after) {
            if !after.is_null() {
                // keep the prior ordering for sets
                obj.insert(name.clone(), before);
            }
            continue;
        }
        if block_forces_new(&nested.block, &before, &after) {
            requires_replace = true;
        }
        changes.push(change(name, before, after));
    }

    PlanResult::with_changes(planned, changes, requires_replace)
}

fn plan_destroy(block: &Block, prior: &Value) -> PlanResult {
    let mut changes = Vec::new();
    for name in block.attributes.keys() {
        if let Some(v) = prior.get(name.as_str()).filter(|v| !v.is_null()) {
            changes.push(AttributeChange::removed(name, v.clone()));
        }
    }
    for name in block.blocks.keys() {
        if let Some(v) = prior.get(name.as_str()).filter(|v| !is_empty_block(v)) {
            changes.push(AttributeChange::removed(name, v.clone()));
        }
    }
    PlanResult::with_changes(Value::Null, changes, false)
}

fn change(path: &str, before: Value, after: Value) -> AttributeChange {
    match (before.is_null(), after.is_null()) {
        (true, _) => AttributeChange::added(path, after),
        (_, true) => AttributeChange::removed(path, before),
        _ => AttributeChange::modified(path, before, after),
    }
}

fn strings_equal_ignoring_case(a: &Value, b: &Value) -> bool {
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

fn is_empty_block(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Normalize a block value to its list of items.
fn block_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn blocks_equal(nested: &NestedBlock, before: &Value, after: &Value) -> bool {
    let before = block_items(before);
    let after = block_items(after);
    if before.len() != after.len() {
        return false;
    }

    match nested.nesting {
        Nesting::Set => {
            let mut unmatched = after.clone();
            before.iter().all(|item| {
                match unmatched.iter().position(|candidate| candidate == item) {
                    Some(i) => {
                        unmatched.swap_remove(i);
                        true
                    },
                    None => false,
                }
            })
        },
        Nesting::Single | Nesting::List => before == after,
    }
}

/// Whether a single or positional block changed a `force_new` attribute.
fn block_forces_new(block: &Block, before: &Value, after: &Value) -> bool {
    let forced: Vec<&String> = block
        .attributes
        .iter()
        .filter(|(_, attr)| attr.force_new)
        .map(|(name, _)| name)
        .collect();
    if forced.is_empty() {
        return false;
    }

    let before = block_items(before);
    let after = block_items(after);
    before.len() != after.len()
        || before.iter().zip(after.iter()).any(|(b, a)| {
            forced
                .iter()
                .any(|name| b.get(name.as_str()) != a.get(name.as_str()))
        })
}

/// Fill defaults for unset attributes, recursing into nested blocks.
pub fn apply_defaults(block: &Block, value: &mut Value) {
    match value {
        Value::Object(obj) => apply_defaults_to_object(block, obj),
        Value::Array(items) => {
            for item in items {
                apply_defaults(block, item);
            }
        },
        _ => {},
    }
}

fn apply_defaults_to_object(block: &Block, obj: &mut Map<String, Value>) {
    for (name, attr) in &block.attributes {
        if let Some(default) = &attr.default {
            let unset = obj.get(name).map_or(true, Value::is_null);
            if unset {
                obj.insert(name.clone(), default.clone());
            }
        }
    }
    for (name, nested) in &block.blocks {
        if let Some(child) = obj.get_mut(name) {
            // single blocks are stored as an object, not a one-element list
            if nested.nesting == Nesting::Single {
                if let Value::Array(items) = child {
                    if items.len() <= 1 {
                        *child = items.pop().unwrap_or(Value::Null);
                    }
                }
            }
            apply_defaults(&nested.block, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Block, NestedBlock};
    use serde_json::json;

    fn data_source_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute(
                "workspace_name",
                Attribute::required_string()
                    .with_force_new()
                    .with_case_insensitive(),
            )
            .with_attribute("enabled", Attribute::required_bool())
    }

    fn diagnostic_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("storage_account_id", Attribute::optional_string())
            .with_block(
                "logs",
                NestedBlock::set(
                    Block::new()
                        .with_attribute("category", Attribute::required_string())
                        .with_attribute("enabled", Attribute::optional_bool().with_default(json!(true))),
                )
                .with_min_items(1),
            )
    }

    #[test]
    fn test_plan_create_marks_computed_unknown() {
        let result = plan(
            &data_source_schema(),
            None,
            &json!({"name": "perf", "workspace_name": "law", "enabled": true}),
        );
        assert!(!result.requires_replace);
        assert!(result.planned_state["id"].is_null());
        let paths: Vec<_> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["enabled", "name", "workspace_name"]);
    }

    #[test]
    fn test_plan_create_applies_nested_defaults() {
        let result = plan(
            &diagnostic_schema(),
            None,
            &json!({"name": "audit", "logs": [{"category": "AuditLogs"}]}),
        );
        assert_eq!(result.planned_state["logs"][0]["enabled"], true);
        assert!(result.changes.iter().any(|c| c.path == "logs"));
    }

    #[test]
    fn test_plan_update_carries_computed_and_flags_in_place() {
        let prior = json!({"id": "/x", "name": "perf", "workspace_name": "law", "enabled": true});
        let result = plan(
            &data_source_schema(),
            Some(&prior),
            &json!({"name": "perf", "workspace_name": "law", "enabled": false}),
        );
        assert_eq!(result.planned_state["id"], "/x");
        assert!(!result.requires_replace);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].path, "enabled");
    }

    #[test]
    fn test_plan_force_new_requires_replace() {
        let prior = json!({"id": "/x", "name": "perf", "workspace_name": "law", "enabled": true});
        let result = plan(
            &data_source_schema(),
            Some(&prior),
            &json!({"name": "perf2", "workspace_name": "law", "enabled": true}),
        );
        assert!(result.requires_replace);
        assert_eq!(
            result.changes,
            vec![AttributeChange::modified("name", json!("perf"), json!("perf2"))]
        );
    }

    #[test]
    fn test_plan_suppresses_case_only_workspace_change() {
        let prior = json!({"id": "/x", "name": "perf", "workspace_name": "acctest-LAW", "enabled": true});
        let result = plan(
            &data_source_schema(),
            Some(&prior),
            &json!({"name": "perf", "workspace_name": "ACCTEST-law", "enabled": true}),
        );
        assert!(result.changes.is_empty());
        assert!(!result.requires_replace);
        assert_eq!(result.planned_state["workspace_name"], "acctest-LAW");
    }

    #[test]
    fn test_plan_set_block_ignores_order() {
        let prior = json!({
            "id": "/x", "name": "audit",
            "logs": [
                {"category": "AuditLogs", "enabled": true},
                {"category": "SignInLogs", "enabled": true}
            ]
        });
        let proposed = json!({
            "name": "audit",
            "logs": [
                {"category": "SignInLogs"},
                {"category": "AuditLogs"}
            ]
        });
        let result = plan(&diagnostic_schema(), Some(&prior), &proposed);
        assert!(result.changes.is_empty(), "{:?}", result.changes);
        assert_eq!(result.planned_state["logs"][0]["category"], "AuditLogs");
    }

    #[test]
    fn test_plan_optional_attribute_added_and_removed() {
        let prior = json!({"id": "/x", "name": "audit", "logs": [{"category": "AuditLogs", "enabled": true}]});
        let proposed = json!({
            "name": "audit",
            "storage_account_id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/sa",
            "logs": [{"category": "AuditLogs", "enabled": false}]
        });
        let result = plan(&diagnostic_schema(), Some(&prior), &proposed);
        let paths: Vec<_> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["storage_account_id", "logs"]);
        assert!(result.changes[0].before.is_none());
        assert!(!result.requires_replace);

        let back = plan(&diagnostic_schema(), Some(&result.planned_state), &prior);
        assert!(back.changes[0].after.is_none());
    }

    #[test]
    fn test_plan_destroy() {
        let prior = json!({"id": "/x", "name": "perf", "workspace_name": "law", "enabled": true});
        let result = plan(&data_source_schema(), Some(&prior), &Value::Null);
        assert!(result.is_destroy());
        assert_eq!(result.changes.len(), 4);
        assert!(result.changes.iter().all(|c| c.after.is_none()));
    }

    #[test]
    fn test_force_new_inside_block() {
        let schema = Schema::v0().with_block(
            "target",
            NestedBlock::single(
                Block::new().with_attribute("region", Attribute::required_string().with_force_new()),
            ),
        );
        let result = plan(
            &schema,
            Some(&json!({"target": {"region": "westeurope"}})),
            &json!({"target": {"region": "northeurope"}}),
        );
        assert!(result.requires_replace);
    }
}
