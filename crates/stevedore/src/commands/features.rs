//! Features test subcommand implementation
//!
//! Generates a throwaway dev-container project that installs the
//! requested features from a collection onto a base image, then drives
//! the ordinary build path against it. Prints the produced image name on
//! stdout.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use stevedore_core::build::{extend_image, BackendKind, ExtendOptions};
use stevedore_core::cancel::CancelToken;
use stevedore_core::config::DevContainerConfig;
use stevedore_core::features::IncludeAll;
use stevedore_core::workspace::generate_temp_project;
use tracing::info;

#[derive(Debug)]
pub struct FeaturesTestArgs {
    pub base_image: String,
    pub collection: PathBuf,
    pub features: String,
    pub backend: BackendKind,
}

pub async fn execute_features_test(args: FeaturesTestArgs) -> Result<()> {
    let feature_ids = parse_feature_csv(&args.features);
    if feature_ids.is_empty() {
        bail!("No features specified");
    }

    // Identifiers must be absolute so they resolve as filesystem paths.
    let collection = std::fs::canonicalize(&args.collection).with_context(|| {
        format!(
            "Feature collection not found: {}",
            args.collection.display()
        )
    })?;

    let project = generate_temp_project(&args.base_image, &collection, &feature_ids)?;
    info!(project = %project.display(), "Generated feature test project");

    let config =
        DevContainerConfig::from_file(&project.join(".devcontainer/devcontainer.json"))?;
    let options = ExtendOptions {
        backend: args.backend,
        ..Default::default()
    };

    match extend_image(&config, &options, &IncludeAll, &CancelToken::none()).await? {
        Some(extended) => {
            println!("{}", extended.image_name);
            Ok(())
        }
        None => bail!("No features were built"),
    }
}

fn parse_feature_csv(features: &str) -> Vec<String> {
    features
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}
