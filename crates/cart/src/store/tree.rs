//! JSON tree operations with realtime-database semantics.
//!
//! - `null` is never stored: writing `null` deletes, and objects left empty
//!   by a delete disappear as well.
//! - Writing below a non-object value replaces it with an object.

use serde_json::{Map, Value};

/// Read the value at `segments`, if any.
#[must_use]
pub fn get<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    if node.is_null() { None } else { Some(node) }
}

/// Replace the value at `segments` with `value`. `null` deletes.
pub fn set(root: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = normalize(value);
        return;
    };

    let value = normalize(value);
    if value.is_null() {
        delete(root, parents, last);
        return;
    }

    let mut node = root;
    for segment in parents {
        node = ensure_object(node)
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node).insert(last.clone(), value);
}

/// Merge `fields` into the object at `segments`; a `null` field deletes that
/// child only.
pub fn merge(root: &mut Value, segments: &[String], fields: Map<String, Value>) {
    for (key, value) in fields {
        let mut path = segments.to_vec();
        path.push(key);
        set(root, &path, value);
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

fn delete(root: &mut Value, parents: &[String], last: &str) {
    fn walk(node: &mut Value, parents: &[String], last: &str) {
        let Some(map) = node.as_object_mut() else {
            return;
        };
        match parents.split_first() {
            None => {
                map.remove(last);
            }
            Some((head, rest)) => {
                if let Some(child) = map.get_mut(head) {
                    walk(child, rest, last);
                    if child.as_object().is_some_and(Map::is_empty) {
                        map.remove(head);
                    }
                }
            }
        }
    }

    walk(root, parents, last);
    if root.as_object().is_some_and(Map::is_empty) {
        *root = Value::Null;
    }
}

/// Drop `null` members and empty objects recursively.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if map.is_empty() {
                Value::Null
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(p: &str) -> Vec<String> {
        p.split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut root = Value::Null;
        set(&mut root, &path("carts/u1/a"), json!({"quantity": 1}));
        assert_eq!(root, json!({"carts": {"u1": {"a": {"quantity": 1}}}}));
        assert_eq!(get(&root, &path("carts/u1/a/quantity")), Some(&json!(1)));
    }

    #[test]
    fn test_delete_prunes_empty_parents() {
        let mut root = json!({"carts": {"u1": {"a": {"quantity": 1}}, "u2": {"b": {"quantity": 2}}}});
        set(&mut root, &path("carts/u1/a"), Value::Null);
        assert_eq!(root, json!({"carts": {"u2": {"b": {"quantity": 2}}}}));

        set(&mut root, &path("carts/u2"), Value::Null);
        assert_eq!(root, Value::Null);
        assert_eq!(get(&root, &path("carts")), None);
    }

    #[test]
    fn test_delete_missing_path_is_noop() {
        let mut root = json!({"carts": {"u1": {"a": 1}}});
        set(&mut root, &path("carts/u9/zz"), Value::Null);
        assert_eq!(root, json!({"carts": {"u1": {"a": 1}}}));
    }

    #[test]
    fn test_merge_keeps_other_fields() {
        let mut root = json!({"a": {"title": "Shirt", "quantity": 1}});
        let fields = json!({"quantity": 4}).as_object().unwrap().clone();
        merge(&mut root, &path("a"), fields);
        assert_eq!(root, json!({"a": {"title": "Shirt", "quantity": 4}}));
    }

    #[test]
    fn test_set_root_with_empty_object_is_null() {
        let mut root = json!({"a": 1});
        set(&mut root, &[], json!({}));
        assert_eq!(root, Value::Null);
    }
}
