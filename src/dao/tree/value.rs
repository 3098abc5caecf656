//! Pure helpers reading and writing nested JSON nodes.
//!
//! The tree never stores `null` or empty objects: writing either removes the node, and parents
//! left empty by a removal disappear with it. Readers therefore treat "absent" and "null" alike.

use serde_json::{Map, Value};

use crate::dao::storage::{StorageError, StorageResult};

/// Borrow the node addressed by `segments`, if present.
pub fn value_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Null => None,
        other => Some(other),
    }
}

/// Drop nulls and empty containers. Returns `None` when nothing is left.
pub fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, child)| normalize(child).map(|child| (key, child)))
                .collect();
            (!pruned.is_empty()).then_some(Value::Object(pruned))
        }
        Value::Array(items) => {
            if items.is_empty() {
                return None;
            }
            Some(Value::Array(
                items
                    .into_iter()
                    .map(|item| normalize(item).unwrap_or(Value::Null))
                    .collect(),
            ))
        }
        scalar => Some(scalar),
    }
}

/// Write (`Some`) or remove (`None`) the node addressed by `segments` inside `root`.
///
/// Intermediate objects are created on demand. `root` is left as `Value::Null` when the write
/// removes everything.
pub fn write_at(root: &mut Value, segments: &[String], value: Option<Value>) -> StorageResult<()> {
    let value = value.and_then(normalize);
    write_normalized(root, segments, value, segments)?;
    if is_empty_node(root) {
        *root = Value::Null;
    }
    Ok(())
}

fn write_normalized(
    node: &mut Value,
    segments: &[String],
    value: Option<Value>,
    full: &[String],
) -> StorageResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        *node = value.unwrap_or(Value::Null);
        return Ok(());
    };

    if let Value::Array(items) = node {
        let index = head.parse::<usize>().ok().filter(|index| *index < items.len());
        let Some(index) = index else {
            return Err(StorageError::InvalidValue {
                path: full.join("/"),
                reason: format!("`{head}` does not address an existing list element"),
            });
        };
        let slot = &mut items[index];
        write_normalized(slot, rest, value, full)?;
        if is_empty_node(slot) {
            *slot = Value::Null;
        }
        return Ok(());
    }

    if !node.is_object() {
        if value.is_none() {
            return Ok(());
        }
        *node = Value::Object(Map::new());
    }

    let Value::Object(map) = node else {
        return Ok(());
    };

    if value.is_none() && !map.contains_key(head) {
        return Ok(());
    }

    let child = map.entry(head.clone()).or_insert(Value::Null);
    write_normalized(child, rest, value, full)?;
    if is_empty_node(child) {
        map.remove(head);
    }
    Ok(())
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
