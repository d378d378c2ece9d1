//! Temp project generation
//!
//! Produces a minimal dev-container workspace from a base image and a
//! feature list. The `features test` command generates one of these and
//! then drives the ordinary build path against it.

use crate::errors::Result;
use serde_json::{json, Map};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

/// Create a throwaway `.devcontainer` workspace under the system temp dir
///
/// The generated `devcontainer.json` sets `image` to `base_image` and
/// maps `"<collection_path>/<feature_id>"` to `"latest"` for every
/// requested feature. Returns the project folder.
#[instrument(skip(feature_ids), fields(features = feature_ids.len()))]
pub fn generate_temp_project(
    base_image: &str,
    collection_path: &Path,
    feature_ids: &[String],
) -> Result<PathBuf> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let project = std::env::temp_dir()
        .join("vsch")
        .join("container-features-test")
        .join(timestamp.to_string());
    let devcontainer_dir = project.join(".devcontainer");
    std::fs::create_dir_all(&devcontainer_dir)?;

    let mut features = Map::new();
    for id in feature_ids {
        features.insert(
            format!("{}/{}", collection_path.display(), id),
            json!("latest"),
        );
    }
    let config = json!({
        "image": base_image,
        "features": features,
    });
    std::fs::write(
        devcontainer_dir.join("devcontainer.json"),
        serde_json::to_string_pretty(&config)?,
    )?;

    debug!(project = %project.display(), "Generated temp feature-test project");
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn generated_project_has_the_expected_shape() {
        let project = generate_temp_project(
            "ubuntu:22.04",
            Path::new("/collections/main"),
            &["helloworld".to_string(), "color".to_string()],
        )
        .unwrap();

        assert!(project.starts_with(std::env::temp_dir().join("vsch/container-features-test")));

        let config_path = project.join(".devcontainer/devcontainer.json");
        let raw = std::fs::read_to_string(&config_path).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(parsed["image"], json!("ubuntu:22.04"));
        assert_eq!(
            parsed["features"]["/collections/main/helloworld"],
            json!("latest")
        );
        assert_eq!(
            parsed["features"]["/collections/main/color"],
            json!("latest")
        );

        std::fs::remove_dir_all(&project).ok();
    }
}
