// SPDX-License-Identifier: Apache-2.0

//! Path-addressed access into `serde_json::Value` trees.
//!
//! The expression engine resolves a dotted path one segment at a time; this module is the
//! shared walker both `get_data` and `set_data` build on. A numeric segment indexes a sequence;
//! any other segment indexes a mapping key, materializing an object along the way on write.

use serde_json::Value;

/// One step of a parsed expression path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Index into an array.
    Index(usize),
    /// Key into an object.
    Key(String),
}

/// Parses a dot-delimited path into segments. A segment that parses as a plain non-negative
/// integer is treated as a sequence index; everything else is a mapping key.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('.')
        .map(|segment| match segment.parse::<usize>() {
            Ok(index) => PathSegment::Index(index),
            Err(_) => PathSegment::Key(segment.to_owned()),
        })
        .collect()
}

/// Reads a value at `segments` under `root`.
///
/// Per the resolved open question on reading through a scalar mid-path, this never errors: any
/// missing key, out-of-range index, or attempt to index into a scalar quietly yields `None`.
pub fn get_path<'a>(root: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
            (PathSegment::Key(k), Value::Object(map)) => map.get(k)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes `value` at `segments` under `root`, materializing missing intermediate arrays/objects.
///
/// Returns `false` if a path segment would have to write through an already-present scalar
/// (string, number, bool, null) — callers translate that into `ExprError::ScalarInPath`.
pub fn set_path(root: &mut Value, segments: &[PathSegment], value: Value) -> bool {
    let Some((last, init)) = segments.split_last() else {
        *root = value;
        return true;
    };

    let mut current = root;
    for segment in init {
        if !matches!(current, Value::Object(_) | Value::Array(_)) {
            if matches!(current, Value::Null) {
                *current = container_for(segment);
            } else {
                return false;
            }
        }
        current = match (segment, current) {
            (PathSegment::Index(i), Value::Array(items)) => {
                while items.len() <= *i {
                    items.push(Value::Null);
                }
                &mut items[*i]
            }
            (PathSegment::Key(k), Value::Object(map)) => {
                map.entry(k.clone()).or_insert(Value::Null)
            }
            _ => return false,
        };
    }

    if !matches!(current, Value::Object(_) | Value::Array(_) | Value::Null) {
        return false;
    }
    if matches!(current, Value::Null) {
        *current = container_for(last);
    }
    match (last, current) {
        (PathSegment::Index(i), Value::Array(items)) => {
            while items.len() <= *i {
                items.push(Value::Null);
            }
            items[*i] = value;
            true
        }
        (PathSegment::Key(k), Value::Object(map)) => {
            let _ = map.insert(k.clone(), value);
            true
        }
        _ => false,
    }
}

fn container_for(segment: &PathSegment) -> Value {
    match segment {
        PathSegment::Index(_) => Value::Array(Vec::new()),
        PathSegment::Key(_) => Value::Object(serde_json::Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_nested_key_and_index() {
        let root = json!({"a": {"b": [1, 2, 3]}});
        let segments = parse_path("a.b.1");
        assert_eq!(get_path(&root, &segments), Some(&json!(2)));
    }

    #[test]
    fn read_through_scalar_yields_none() {
        let root = json!({"a": 5});
        let segments = parse_path("a.b");
        assert_eq!(get_path(&root, &segments), None);
    }

    #[test]
    fn write_materializes_missing_containers() {
        let mut root = Value::Null;
        let segments = parse_path("a.b.0");
        assert!(set_path(&mut root, &segments, json!("x")));
        assert_eq!(root, json!({"a": {"b": ["x"]}}));
    }

    #[test]
    fn write_through_scalar_fails() {
        let mut root = json!({"a": 5});
        let segments = parse_path("a.b");
        assert!(!set_path(&mut root, &segments, json!("x")));
    }

    #[test]
    fn write_with_empty_path_replaces_whole_value() {
        let mut root = json!({"a": 1});
        assert!(set_path(&mut root, &[], json!("replaced")));
        assert_eq!(root, json!("replaced"));
    }
}
