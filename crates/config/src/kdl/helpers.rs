//! Small accessors over KDL nodes.
//!
//! Scalar settings are written as child nodes with a single positional
//! argument (`renew-before-days 30`).

use kdl::{KdlNode, KdlValue};

/// First positional argument of a node
pub fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    first_arg(node).and_then(|v| v.as_string()).map(str::to_string)
}

/// Every positional string argument of a node, in order
pub fn get_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(str::to_string)
        .collect()
}

/// Child node with the given name
pub fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|c| c.name().value() == name)
}

pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    child(node, name).and_then(get_first_arg_string)
}

pub fn get_int_entry(node: &KdlNode, name: &str) -> Option<i64> {
    child(node, name)
        .and_then(first_arg)
        .and_then(|v| v.as_integer())
        .map(|v| v as i64)
}

pub fn get_bool_entry(node: &KdlNode, name: &str) -> Option<bool> {
    child(node, name).and_then(first_arg).and_then(|v| v.as_bool())
}

/// Non-negative integer setting. Negative values are a configuration error.
pub fn get_u64_entry(node: &KdlNode, name: &str) -> anyhow::Result<Option<u64>> {
    match get_int_entry(node, name) {
        None => Ok(None),
        Some(v) if v >= 0 => Ok(Some(v as u64)),
        Some(v) => Err(anyhow::anyhow!(
            "'{}' must not be negative (got {})",
            name,
            v
        )),
    }
}

/// Non-negative integer setting no larger than `max`
pub fn get_bounded_entry(node: &KdlNode, name: &str, max: u64) -> anyhow::Result<Option<u64>> {
    match get_u64_entry(node, name)? {
        Some(v) if v > max => Err(anyhow::anyhow!(
            "'{}' must be at most {} (got {})",
            name,
            max,
            v
        )),
        other => Ok(other),
    }
}
