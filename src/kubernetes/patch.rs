// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! JSON merge patch (RFC 7386) computation

use crate::constants::OPERATOR_NAME;
use kube::api::PatchParams;
use serde_json::{Map, Value};

/// Patch parameters carrying the controller's field manager name
pub fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(OPERATOR_NAME.to_string()),
        ..Default::default()
    }
}

/// Smallest merge patch turning `original` into `modified`.
/// Removed object keys become `null`; arrays and scalars are replaced whole.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => {
            let mut patch = Map::new();
            for (key, orig_value) in orig {
                match modi.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(modi_value) if modi_value != orig_value => {
                        patch.insert(key.clone(), create_merge_patch(orig_value, modi_value));
                    }
                    Some(_) => {}
                }
            }
            for (key, modi_value) in modi {
                if !orig.contains_key(key) {
                    patch.insert(key.clone(), modi_value.clone());
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

pub fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_changes_only() {
        let original = json!({"metadata": {"name": "d", "labels": {"a": "1"}}, "spec": {"replicas": 1}});
        let modified = json!({"metadata": {"name": "d", "labels": {"a": "1", "b": "2"}}, "spec": {"replicas": 1}});

        assert_eq!(
            create_merge_patch(&original, &modified),
            json!({"metadata": {"labels": {"b": "2"}}})
        );
    }

    #[test]
    fn test_removed_keys_become_null() {
        let original = json!({"labels": {"a": "1", "b": "2"}, "annotations": {"x": "y"}});
        let modified = json!({"labels": {"a": "1"}});

        assert_eq!(
            create_merge_patch(&original, &modified),
            json!({"labels": {"b": null}, "annotations": null})
        );
    }

    #[test]
    fn test_arrays_are_replaced() {
        let original = json!({"finalizers": ["a", "b"]});
        let modified = json!({"finalizers": ["a"]});

        assert_eq!(
            create_merge_patch(&original, &modified),
            json!({"finalizers": ["a"]})
        );
    }

    #[test]
    fn test_identical_is_empty() {
        let obj = json!({"a": {"b": 1}});
        assert!(is_empty_patch(&create_merge_patch(&obj, &obj)));
    }
}
