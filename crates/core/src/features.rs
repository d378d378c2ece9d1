//! Feature model and feature-set assembly
//!
//! A *feature* is a self-describing installable unit contributing tooling,
//! environment variables, and optionally an entrypoint to a container
//! image. Features sharing one origin are grouped into a [`FeatureSet`];
//! all sets of one build form a [`FeaturesConfig`] rooted at the build's
//! destination folder.
//!
//! The assembler is deterministic: given the same user mapping and the
//! same fetched payloads it produces an identical `FeaturesConfig`
//! (modulo the temp path it is rooted at).

use crate::errors::{PayloadError, Result};
use crate::feature_ref::{parse_feature_identifier, SourceInfoKey, SourceInformation};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Name of the per-source metadata document inside a payload
pub const METADATA_FILE: &str = "devcontainer-features.json";

/// Value selected for a feature in the user configuration
///
/// Either a scalar (`"latest"`, `true`) or a structured mapping of
/// option-name to value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Boolean(bool),
    String(String),
    Options(IndexMap<String, Value>),
}

impl FeatureValue {
    /// Scalar rendering of the main value
    ///
    /// For structured values this is the `version` entry when present,
    /// falling back to `"latest"`.
    pub fn main_value(&self) -> String {
        match self {
            FeatureValue::Boolean(b) => b.to_string(),
            FeatureValue::String(s) => s.clone(),
            FeatureValue::Options(options) => options
                .get("version")
                .map(render_scalar)
                .unwrap_or_else(|| "latest".to_string()),
        }
    }
}

/// Render a JSON scalar the way it appears in an env file
fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Declared schema of one feature option
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureOptionSchema {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub option_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Value>,
}

/// One record of a payload's `devcontainer-features.json`
///
/// Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureMetadata {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub options: IndexMap<String, FeatureOptionSchema>,

    /// Legacy single build-argument name
    #[serde(rename = "buildArg", default)]
    pub build_arg: Option<String>,

    /// Environment entries the feature contributes to the final image
    #[serde(rename = "containerEnv", default)]
    pub container_env: IndexMap<String, String>,

    #[serde(default)]
    pub entrypoint: Option<String>,
}

/// Metadata documents appear either as a bare array of records or wrapped
/// in a `features` key.
#[derive(Deserialize)]
#[serde(untagged)]
enum MetadataDocument {
    Wrapped { features: Vec<FeatureMetadata> },
    List(Vec<FeatureMetadata>),
}

/// Parse a payload's `devcontainer-features.json`
pub fn parse_features_metadata(path: &Path) -> Result<Vec<FeatureMetadata>> {
    let content = std::fs::read_to_string(path)?;
    let document: MetadataDocument =
        serde_json::from_str(&content).map_err(|e| PayloadError::Metadata {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(match document {
        MetadataDocument::Wrapped { features } => features,
        MetadataDocument::List(features) => features,
    })
}

/// A feature selected by the user, joined with its payload metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    /// The user-selected value (scalar or option mapping)
    pub value: FeatureValue,
    pub build_arg: Option<String>,
    pub container_env: IndexMap<String, String>,
    pub options: IndexMap<String, FeatureOptionSchema>,
    pub entrypoint: Option<String>,
    /// Whether the platform product policy admits this feature
    pub included: bool,
}

impl Feature {
    /// Scalar rendering of the feature's main value
    pub fn main_value(&self) -> String {
        self.value.main_value()
    }

    /// Evaluated option values, schema order first
    ///
    /// Starts from the schema defaults, overridden by the user's
    /// structured entries; user entries not in the schema append in user
    /// order. A scalar user value overrides the `version` option when the
    /// schema declares one.
    pub fn evaluated_options(&self) -> IndexMap<String, String> {
        let mut evaluated = IndexMap::new();
        for (name, schema) in &self.options {
            if let Some(default) = &schema.default {
                evaluated.insert(name.clone(), render_scalar(default));
            }
        }
        match &self.value {
            FeatureValue::Options(user) => {
                for (name, value) in user {
                    evaluated.insert(name.clone(), render_scalar(value));
                }
            }
            scalar => {
                if self.options.contains_key("version") {
                    evaluated.insert("version".to_string(), scalar.main_value());
                }
            }
        }
        evaluated
    }
}

/// All features sharing one source origin
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub source_information: SourceInformation,
    pub features: Vec<Feature>,
    /// Equals the containing [`FeaturesConfig::dst_folder`]
    pub dst_folder: PathBuf,
}

impl FeatureSet {
    pub fn key(&self) -> SourceInfoKey {
        self.source_information.key()
    }

    /// Root of this set's materialized payload
    pub fn set_folder(&self) -> PathBuf {
        self.dst_folder
            .join(self.source_information.source_info_string())
    }

    /// Payload directory of one feature within this set
    pub fn feature_folder(&self, feature_id: &str) -> PathBuf {
        self.set_folder().join("features").join(feature_id)
    }
}

/// The assembled feature configuration of one build
#[derive(Debug, Clone)]
pub struct FeaturesConfig {
    pub feature_sets: Vec<FeatureSet>,
    /// Build-owned folder under the system temp dir
    pub dst_folder: PathBuf,
}

impl FeaturesConfig {
    /// Total number of features across all sets
    pub fn feature_count(&self) -> usize {
        self.feature_sets.iter().map(|s| s.features.len()).sum()
    }
}

/// Product policy predicate deciding feature inclusion
///
/// External collaborator; the engine only consults it. Bare-id features
/// bundled in the local cache bypass the policy and are always included.
pub trait InclusionPolicy {
    fn is_included(&self, feature_id: &str, source: &SourceInformation) -> bool;
}

/// Default policy admitting every feature
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAll;

impl InclusionPolicy for IncludeAll {
    fn is_included(&self, _feature_id: &str, _source: &SourceInformation) -> bool {
        true
    }
}

/// Assemble the user's feature mapping into a populated [`FeaturesConfig`]
///
/// For each entry the identifier is resolved, its set is found or created
/// (grouped by source-info string in first-encounter order), and the
/// feature is joined with the metadata of its fetched payload under
/// `dst_folder`. Unrecognized identifiers are logged and skipped.
#[instrument(skip(user_features, policy), fields(count = user_features.len()))]
pub fn assemble_features_config(
    user_features: &IndexMap<String, FeatureValue>,
    dst_folder: &Path,
    policy: &dyn InclusionPolicy,
) -> Result<FeaturesConfig> {
    let mut sets: IndexMap<SourceInfoKey, FeatureSet> = IndexMap::new();
    let mut metadata_cache: HashMap<SourceInfoKey, Vec<FeatureMetadata>> = HashMap::new();

    for (identifier, value) in user_features {
        let Some((source, feature_id)) = parse_feature_identifier(identifier) else {
            warn!(identifier = %identifier, "Unrecognized feature identifier, skipping");
            continue;
        };

        let key = source.key();
        let set = sets.entry(key.clone()).or_insert_with(|| FeatureSet {
            source_information: source.clone(),
            features: Vec::new(),
            dst_folder: dst_folder.to_path_buf(),
        });

        let set_folder = set.set_folder();
        let metadata = metadata_cache
            .entry(key)
            .or_insert_with(|| load_set_metadata(&set_folder));
        let record = metadata.iter().find(|m| m.id == feature_id);

        let included = match &source {
            SourceInformation::LocalCache => true,
            other => policy.is_included(&feature_id, other),
        };

        set.features.push(Feature {
            id: feature_id.clone(),
            value: value.clone(),
            build_arg: record.and_then(|m| m.build_arg.clone()),
            container_env: record.map(|m| m.container_env.clone()).unwrap_or_default(),
            options: record.map(|m| m.options.clone()).unwrap_or_default(),
            entrypoint: record.and_then(|m| m.entrypoint.clone()),
            included,
        });
    }

    debug!(
        sets = sets.len(),
        "Assembled feature sets from user configuration"
    );

    Ok(FeaturesConfig {
        feature_sets: sets.into_values().collect(),
        dst_folder: dst_folder.to_path_buf(),
    })
}

/// Read a set's metadata document, tolerating its absence
fn load_set_metadata(set_folder: &Path) -> Vec<FeatureMetadata> {
    let path = set_folder.join(METADATA_FILE);
    if !path.is_file() {
        return Vec::new();
    }
    match parse_features_metadata(&path) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable feature metadata");
            Vec::new()
        }
    }
}
