//! Build pipeline orchestration
//!
//! Threads one build end to end: resolve identifiers, fetch payloads
//! (fanned out per source), assemble the feature configuration,
//! synthesize the recipe, and drive the selected builder backend. The
//! destination folder is created here, owned by the build, and left in
//! place afterwards so callers can inspect artifacts or apply their
//! temp-dir cleanup policy.

use crate::cancel::CancelToken;
use crate::config::DevContainerConfig;
use crate::docker::{
    content_image_name, BuildDriver, BuilderBackend, BuildxBackend, ClassicBackend,
};
use crate::dockerfile_generator::{RecipeOptions, RecipeSynthesizer};
use crate::errors::{ConfigError, Result};
use crate::feature_ref::parse_feature_identifier;
use crate::features::{assemble_features_config, FeatureValue, InclusionPolicy};
use crate::fetcher::{FeatureFetcher, FetchEntry, FetcherConfig};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, instrument, warn};

/// Builder backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Advanced backend with named build contexts
    #[default]
    Buildx,
    /// Classic backend staging content through a throwaway image
    Classic,
}

/// Options for one extension build
#[derive(Debug, Clone, Default)]
pub struct ExtendOptions {
    pub backend: BackendKind,
    /// Tag for the produced image; derived from the base image if unset
    pub image_name: Option<String>,
    pub fetcher: FetcherConfig,
    /// Container runtime binary; `docker` if unset
    pub runtime_path: Option<String>,
}

/// Outcome of a successful extension build
#[derive(Debug, Clone)]
pub struct ExtendedImage {
    pub image_name: String,
    /// The build's destination folder, left for caller cleanup
    pub dst_folder: PathBuf,
}

/// Extend the configured base image with every requested feature
///
/// Returns `Ok(None)` when the configuration requests no (recognizable)
/// features, in which case the base image is already the final image.
#[instrument(skip_all)]
pub async fn extend_image(
    config: &DevContainerConfig,
    options: &ExtendOptions,
    policy: &dyn InclusionPolicy,
    cancel: &CancelToken,
) -> Result<Option<ExtendedImage>> {
    if config.features.is_empty() {
        return Ok(None);
    }
    let base_image = config.image.as_deref().ok_or_else(|| ConfigError::Validation {
        message: "configuration has no 'image' to extend".to_string(),
    })?;

    let dst_folder = create_dst_folder()?;
    info!(dst = %dst_folder.display(), "Preparing feature build context");

    let entries = resolve_fetch_entries(&config.features);
    if entries.is_empty() {
        warn!("No recognizable features requested, skipping image extension");
        return Ok(None);
    }

    let fetcher = FeatureFetcher::new(options.fetcher.clone());
    fetcher.fetch_all(&entries, &dst_folder, cancel).await?;

    let features_config = assemble_features_config(&config.features, &dst_folder, policy)?;
    if features_config.feature_count() == 0 {
        warn!("No features survived assembly, skipping image extension");
        return Ok(None);
    }

    let build_stamp = dst_folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "0".to_string());
    let (supports_build_context, content_image) = match options.backend {
        BackendKind::Buildx => (true, None),
        BackendKind::Classic => (false, Some(content_image_name(&build_stamp))),
    };

    let synthesizer = RecipeSynthesizer::new(RecipeOptions {
        base_image: base_image.to_string(),
        image_user: config.remote_user.clone().unwrap_or_else(|| "root".to_string()),
        supports_build_context,
        content_image,
    });
    let recipe = synthesizer.synthesize(&features_config)?;
    recipe.write_env_files().await?;

    let image_name = options
        .image_name
        .clone()
        .unwrap_or_else(|| derive_image_name(base_image, &build_stamp));

    let driver = match &options.runtime_path {
        Some(path) => BuildDriver::with_runtime(path.clone()),
        None => BuildDriver::new(),
    };
    let backend: &dyn BuilderBackend = match options.backend {
        BackendKind::Buildx => &BuildxBackend,
        BackendKind::Classic => &ClassicBackend,
    };
    driver
        .build(backend, &recipe, &dst_folder, &image_name, cancel)
        .await?;

    Ok(Some(ExtendedImage {
        image_name,
        dst_folder,
    }))
}

/// Resolve the user mapping into fetch work, one entry per source
///
/// Unrecognized identifiers are logged and skipped; they never abort the
/// build.
pub fn resolve_fetch_entries(features: &IndexMap<String, FeatureValue>) -> Vec<FetchEntry> {
    let mut grouped: IndexMap<String, FetchEntry> = IndexMap::new();
    for identifier in features.keys() {
        let Some((source, feature_id)) = parse_feature_identifier(identifier) else {
            warn!(identifier = %identifier, "Unrecognized feature identifier, skipping");
            continue;
        };
        grouped
            .entry(source.source_info_string())
            .and_modify(|entry| {
                if !entry.feature_ids.contains(&feature_id) {
                    entry.feature_ids.push(feature_id.clone());
                }
            })
            .or_insert_with(|| FetchEntry {
                source,
                feature_ids: vec![feature_id.clone()],
            });
    }
    grouped.into_values().collect()
}

/// Create this build's exclusively-owned destination folder
fn create_dst_folder() -> Result<PathBuf> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let folder = std::env::temp_dir()
        .join("stevedore-build-features")
        .join(format!("{}-{}", stamp, std::process::id()));
    std::fs::create_dir_all(&folder)?;
    Ok(folder)
}

/// Image tag for the extended image, derived from the base image
fn derive_image_name(base_image: &str, build_stamp: &str) -> String {
    let slug: String = base_image
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("{}-features-{}", slug.trim_matches('-'), build_stamp)
}
