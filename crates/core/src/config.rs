//! Dev-container configuration documents and hierarchical merging
//!
//! The engine reads only a handful of top-level keys (`image`,
//! `dockerFile`, `features`, `remoteUser`, `updateRemoteUserUID`); every
//! other key passes through opaquely so callers can layer their own
//! schema on top.
//!
//! Merging combines a parent document with a child under per-key
//! [`ExtendBehavior`] policies. The behavior table is built once per merge
//! call; keys without a binding default to [`ExtendBehavior::Replace`].
//! Merging is a pure function over the two documents.

use crate::errors::{ConfigError, MergeTypeError, Result};
use crate::features::FeatureValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, instrument, trace};

/// User-authored dev-container configuration
///
/// Only the keys the engine reads are modeled; unknown keys round-trip
/// through `extra` unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevContainerConfig {
    /// Base container image to extend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Alternative Dockerfile entry; unused by the engine but preserved
    #[serde(rename = "dockerFile", skip_serializing_if = "Option::is_none")]
    pub docker_file: Option<String>,

    /// Mapping from feature identifier to its selected value
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub features: IndexMap<String, FeatureValue>,

    /// User the final image should run as
    #[serde(rename = "remoteUser", skip_serializing_if = "Option::is_none")]
    pub remote_user: Option<String>,

    #[serde(
        rename = "updateRemoteUserUID",
        skip_serializing_if = "Option::is_none"
    )]
    pub update_remote_user_uid: Option<bool>,

    /// All other keys, preserved in document order
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DevContainerConfig {
    /// Load a configuration document from a JSON file
    #[instrument]
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DevContainerConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parsing {
                message: format!("{}: {}", path.display(), e),
            })?;
        debug!(path = %path.display(), "Loaded dev-container configuration");
        Ok(config)
    }

    /// View the configuration as a raw JSON document for merging
    pub fn to_document(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => unreachable!("struct serializes to an object"),
        }
    }

    /// Rebuild a typed configuration from a merged document
    pub fn from_document(document: Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(document))?)
    }
}

/// Per-key merge behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendBehavior {
    /// Result key = child's value; an absent child value removes the key
    Replace,
    /// Result key = parent's value; the child's value is ignored
    Skip,
    /// Both values must be sequences; result is their deduplicated union,
    /// parent-first
    Merge,
}

/// Key → behavior table consulted during one merge call
#[derive(Debug, Clone, Default)]
pub struct ExtendPolicy {
    table: HashMap<String, ExtendBehavior>,
}

impl ExtendPolicy {
    pub fn new<I, K>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, ExtendBehavior)>,
        K: Into<String>,
    {
        Self {
            table: bindings
                .into_iter()
                .map(|(k, b)| (k.into(), b))
                .collect(),
        }
    }

    /// Behavior bound to `key`, defaulting to `Replace`
    pub fn behavior_for(&self, key: &str) -> ExtendBehavior {
        self.table
            .get(key)
            .copied()
            .unwrap_or(ExtendBehavior::Replace)
    }

    /// Policy used when extending user configs: list-valued extension keys
    /// union, everything else replaces.
    pub fn standard() -> Self {
        Self::new([
            ("extensions", ExtendBehavior::Merge),
            ("forwardPorts", ExtendBehavior::Merge),
        ])
    }
}

/// Merge a parent document into a child under per-key behaviors
///
/// Iterates the union of the two documents' top-level keys in stable
/// order (parent keys first, then child-only keys) and applies the
/// behavior the policy binds to each key. Every decision is logged at
/// trace level.
pub fn merge_documents(
    parent: &Map<String, Value>,
    child: &Map<String, Value>,
    policy: &ExtendPolicy,
) -> std::result::Result<Map<String, Value>, MergeTypeError> {
    let mut result = Map::new();

    let union: Vec<&String> = parent
        .keys()
        .chain(child.keys().filter(|k| !parent.contains_key(*k)))
        .collect();

    for key in union {
        let behavior = policy.behavior_for(key);
        trace!(key = %key, behavior = ?behavior, "merge decision");
        match behavior {
            ExtendBehavior::Replace => {
                if let Some(value) = child.get(key) {
                    result.insert(key.clone(), value.clone());
                }
            }
            ExtendBehavior::Skip => {
                if let Some(value) = parent.get(key) {
                    result.insert(key.clone(), value.clone());
                }
            }
            ExtendBehavior::Merge => {
                let merged = merge_sequences(key, parent.get(key), child.get(key))?;
                result.insert(key.clone(), Value::Array(merged));
            }
        }
    }

    Ok(result)
}

/// Merge two typed configurations (convenience over [`merge_documents`])
pub fn merge_configs(
    parent: &DevContainerConfig,
    child: &DevContainerConfig,
    policy: &ExtendPolicy,
) -> Result<DevContainerConfig> {
    let merged = merge_documents(&parent.to_document()?, &child.to_document()?, policy)?;
    DevContainerConfig::from_document(merged)
}

/// Deduplicated union of two sequences, parent-first
///
/// An absent side contributes nothing; a present non-array value is a
/// type error.
fn merge_sequences(
    key: &str,
    parent: Option<&Value>,
    child: Option<&Value>,
) -> std::result::Result<Vec<Value>, MergeTypeError> {
    fn as_array<'a>(
        key: &str,
        value: Option<&'a Value>,
    ) -> std::result::Result<&'a [Value], MergeTypeError> {
        match value {
            None => Ok(&[]),
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(MergeTypeError {
                key: key.to_string(),
            }),
        }
    }

    let mut merged: Vec<Value> = Vec::new();
    for item in as_array(key, parent)?.iter().chain(as_array(key, child)?.iter()) {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn list_merges() -> ExtendPolicy {
        ExtendPolicy::new([("list", ExtendBehavior::Merge)])
    }

    #[test]
    fn replace_takes_child_and_merge_unions() {
        let parent = doc(json!({"a": 1, "list": [1, 2]}));
        let child = doc(json!({"a": 2, "list": [2, 3]}));

        let merged = merge_documents(&parent, &child, &list_merges()).unwrap();
        assert_eq!(Value::Object(merged), json!({"a": 2, "list": [1, 2, 3]}));
    }

    #[test]
    fn replace_removes_keys_absent_from_child() {
        let parent = doc(json!({"a": 1, "b": 2}));
        let child = doc(json!({"b": 3}));

        let merged = merge_documents(&parent, &child, &ExtendPolicy::default()).unwrap();
        assert_eq!(Value::Object(merged), json!({"b": 3}));
    }

    #[test]
    fn skip_keeps_parent_and_ignores_child() {
        let policy = ExtendPolicy::new([("pinned", ExtendBehavior::Skip)]);
        let parent = doc(json!({"pinned": "v1"}));
        let child = doc(json!({"pinned": "v2", "other": true}));

        let merged = merge_documents(&parent, &child, &policy).unwrap();
        assert_eq!(Value::Object(merged), json!({"pinned": "v1", "other": true}));
    }

    #[test]
    fn skip_with_child_only_key_removes_it() {
        let policy = ExtendPolicy::new([("pinned", ExtendBehavior::Skip)]);
        let parent = doc(json!({}));
        let child = doc(json!({"pinned": "v2"}));

        let merged = merge_documents(&parent, &child, &policy).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn merge_on_non_sequences_is_a_type_error() {
        let parent = doc(json!({"list": [1]}));
        let child = doc(json!({"list": "oops"}));

        let err = merge_documents(&parent, &child, &list_merges()).unwrap_err();
        assert_eq!(err.key, "list");
    }

    #[test]
    fn merge_union_has_no_duplicates_and_keeps_parent_order() {
        let parent = doc(json!({"list": ["b", "a", "b"]}));
        let child = doc(json!({"list": ["c", "a", "d"]}));

        let merged = merge_documents(&parent, &child, &list_merges()).unwrap();
        assert_eq!(merged["list"], json!(["b", "a", "c", "d"]));
    }

    #[test]
    fn merge_is_idempotent_under_replace() {
        let a = doc(json!({"x": 1, "y": "keep"}));
        let b = doc(json!({"x": 2, "z": [1]}));
        let policy = ExtendPolicy::default();

        let once = merge_documents(&a, &b, &policy).unwrap();
        let twice = merge_documents(&a, &once, &policy).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn union_iteration_order_is_stable() {
        let parent = doc(json!({"one": 1, "two": 2}));
        let child = doc(json!({"three": 3, "two": 22}));

        let merged = merge_documents(&parent, &child, &ExtendPolicy::default()).unwrap();
        let keys: Vec<&String> = merged.keys().collect();
        assert_eq!(keys, ["one", "two", "three"]);
    }

    #[test]
    fn config_round_trips_unknown_keys() {
        let raw = json!({
            "image": "ubuntu:22.04",
            "features": {"helloworld": "latest"},
            "remoteUser": "vscode",
            "updateRemoteUserUID": true,
            "postCreateCommand": "make setup"
        });
        let config: DevContainerConfig = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(config.image.as_deref(), Some("ubuntu:22.04"));
        assert_eq!(config.remote_user.as_deref(), Some("vscode"));
        assert_eq!(config.update_remote_user_uid, Some(true));
        assert_eq!(
            config.extra.get("postCreateCommand"),
            Some(&json!("make setup"))
        );

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn merge_configs_replaces_image() {
        let parent: DevContainerConfig =
            serde_json::from_value(json!({"image": "base:1"})).unwrap();
        let child: DevContainerConfig =
            serde_json::from_value(json!({"image": "base:2"})).unwrap();

        let merged = merge_configs(&parent, &child, &ExtendPolicy::standard()).unwrap();
        assert_eq!(merged.image.as_deref(), Some("base:2"));
    }
}
