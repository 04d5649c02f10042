// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Locates a string map inside an arbitrary object by dotted path.

use crate::error::{BindingUsageError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelManipulator {
    path: Vec<String>,
}

impl LabelManipulator {
    pub fn new(path: &str) -> Result<Self> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(BindingUsageError::FieldShape {
                path: path.to_string(),
                reason: "path must be a non-empty dotted field path".to_string(),
            });
        }
        Ok(Self { path: segments })
    }

    /// For paths known at compile time.
    pub(crate) fn from_segments(segments: &[&str]) -> Self {
        Self {
            path: segments.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn path(&self) -> String {
        self.path.join(".")
    }

    /// The map at the path, creating every missing node on the way.
    pub fn labels_mut<'a>(&self, root: &'a mut Value) -> Result<&'a mut Map<String, Value>> {
        let mut node = root;
        for (depth, segment) in self.path.iter().enumerate() {
            let map = node
                .as_object_mut()
                .ok_or_else(|| self.shape_error(depth, "expected an object"))?;
            let child = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            node = child;
        }
        node.as_object_mut()
            .ok_or_else(|| self.shape_error(self.path.len(), "expected an object"))
    }

    /// Read-only view of the labels; a missing node reads as empty.
    pub fn labels(&self, root: &Value) -> Result<BTreeMap<String, String>> {
        let mut node = root;
        for (depth, segment) in self.path.iter().enumerate() {
            let map = node
                .as_object()
                .ok_or_else(|| self.shape_error(depth, "expected an object"))?;
            match map.get(segment) {
                Some(Value::Null) | None => return Ok(BTreeMap::new()),
                Some(child) => node = child,
            }
        }
        let map = node
            .as_object()
            .ok_or_else(|| self.shape_error(self.path.len(), "expected an object"))?;
        map.iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.clone(), s.clone())),
                _ => Err(BindingUsageError::FieldShape {
                    path: format!("{}.{}", self.path(), k),
                    reason: "label value is not a string".to_string(),
                }),
            })
            .collect()
    }

    pub fn apply(&self, root: &mut Value, labels: &BTreeMap<String, String>) -> Result<()> {
        let map = self.labels_mut(root)?;
        for (k, v) in labels {
            map.insert(k.clone(), Value::String(v.clone()));
        }
        Ok(())
    }

    pub fn delete<'k>(&self, root: &mut Value, keys: impl IntoIterator<Item = &'k String>) -> Result<()> {
        let map = self.labels_mut(root)?;
        for k in keys {
            map.remove(k);
        }
        Ok(())
    }

    fn shape_error(&self, depth: usize, reason: &str) -> BindingUsageError {
        let upto = self.path.get(..depth).unwrap_or(&self.path[..]);
        BindingUsageError::FieldShape {
            path: if upto.is_empty() {
                "<root>".to_string()
            } else {
                upto.join(".")
            },
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_rejects_empty_segments() {
        assert!(LabelManipulator::new("").is_err());
        assert!(LabelManipulator::new("spec..labels").is_err());
        assert!(LabelManipulator::new("spec.labels.").is_err());
    }

    #[test]
    fn test_creates_missing_intermediate_nodes() {
        let manipulator = LabelManipulator::new("spec.template.metadata.labels").unwrap();
        let mut obj = json!({"spec": {}});

        manipulator.apply(&mut obj, &labels(&[("a", "1")])).unwrap();

        assert_eq!(obj["spec"]["template"]["metadata"]["labels"]["a"], "1");
    }

    #[test]
    fn test_null_node_is_replaced() {
        let manipulator = LabelManipulator::new("metadata.labels").unwrap();
        let mut obj = json!({"metadata": {"labels": null}});

        manipulator.apply(&mut obj, &labels(&[("a", "1")])).unwrap();

        assert_eq!(obj["metadata"]["labels"], json!({"a": "1"}));
    }

    #[test]
    fn test_shape_mismatch_on_intermediate() {
        let manipulator = LabelManipulator::new("spec.template.labels").unwrap();
        let mut obj = json!({"spec": {"template": "oops"}});

        let err = manipulator
            .apply(&mut obj, &labels(&[("a", "1")]))
            .unwrap_err();

        match err {
            BindingUsageError::FieldShape { path, .. } => assert_eq!(path, "spec.template"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(obj["spec"]["template"], "oops");
    }

    #[test]
    fn test_shape_mismatch_on_leaf() {
        let manipulator = LabelManipulator::new("spec.labels").unwrap();
        let mut obj = json!({"spec": {"labels": ["a"]}});

        assert!(manipulator.labels_mut(&mut obj).is_err());
        assert!(manipulator.labels(&obj).is_err());
    }

    #[test]
    fn test_read_missing_path_is_empty() {
        let manipulator = LabelManipulator::new("spec.template.metadata.labels").unwrap();
        assert!(manipulator.labels(&json!({"spec": {}})).unwrap().is_empty());
    }

    #[test]
    fn test_read_rejects_non_string_values() {
        let manipulator = LabelManipulator::new("labels").unwrap();
        assert!(manipulator.labels(&json!({"labels": {"a": 1}})).is_err());
    }

    #[test]
    fn test_delete_only_given_keys() {
        let manipulator = LabelManipulator::new("labels").unwrap();
        let mut obj = json!({"labels": {"a": "1", "b": "2", "c": "3"}});

        manipulator
            .delete(&mut obj, &["a".to_string(), "b".to_string(), "zz".to_string()])
            .unwrap();

        assert_eq!(obj["labels"], json!({"c": "3"}));
    }
}
