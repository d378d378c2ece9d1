//! End-to-end pipeline test against a local feature collection
//!
//! Exercises resolve → fetch (file-path copy) → assemble → synthesize
//! without a container runtime; the driver is covered separately.

use serde_json::json;
use std::fs;
use std::path::Path;
use stevedore_core::build::resolve_fetch_entries;
use stevedore_core::cancel::CancelToken;
use stevedore_core::dockerfile_generator::{RecipeOptions, RecipeSynthesizer, ENV_FILE};
use stevedore_core::features::{assemble_features_config, FeatureValue, IncludeAll};
use stevedore_core::fetcher::{FeatureFetcher, FetcherConfig};
use stevedore_core::IndexMap;
use tempfile::TempDir;

/// A collection with one install.sh feature and one acquire/configure
/// feature, plus a shared common directory.
fn write_collection(root: &Path) {
    let hello = root.join("features/hello");
    fs::create_dir_all(&hello).unwrap();
    fs::write(hello.join("install.sh"), "#!/bin/sh\necho hello\n").unwrap();

    let tool_bin = root.join("features/tool/bin");
    fs::create_dir_all(&tool_bin).unwrap();
    fs::write(tool_bin.join("acquire"), "#!/bin/sh\necho acquire\n").unwrap();
    fs::write(tool_bin.join("configure"), "#!/bin/sh\necho configure\n").unwrap();

    fs::create_dir_all(root.join("common")).unwrap();
    fs::write(root.join("common/shared.sh"), "#!/bin/sh\n").unwrap();

    fs::write(
        root.join("devcontainer-features.json"),
        json!({
            "features": [
                {
                    "id": "hello",
                    "buildArg": "HELLO_VERSION",
                    "containerEnv": {"HELLO_HOME": "/opt/hello"},
                    "options": {"version": {"type": "string", "default": "latest"}}
                },
                {"id": "tool"}
            ]
        })
        .to_string(),
    )
    .unwrap();
}

async fn run_pipeline(collection: &Path, dst: &Path) -> (String, Vec<(String, String)>) {
    let features: IndexMap<String, FeatureValue> = [
        (
            format!("{}/hello", collection.display()),
            FeatureValue::String("v3".to_string()),
        ),
        (
            format!("{}/tool", collection.display()),
            FeatureValue::String("latest".to_string()),
        ),
    ]
    .into_iter()
    .collect();

    let entries = resolve_fetch_entries(&features);
    let fetcher = FeatureFetcher::new(FetcherConfig {
        bundled_features_dir: None,
        fetch_timeout: std::time::Duration::from_secs(5),
    });
    fetcher
        .fetch_all(&entries, dst, &CancelToken::none())
        .await
        .unwrap();

    let config = assemble_features_config(&features, dst, &IncludeAll).unwrap();
    assert_eq!(config.feature_count(), 2);

    let recipe = RecipeSynthesizer::new(RecipeOptions {
        base_image: "ubuntu:22.04".to_string(),
        image_user: "vscode".to_string(),
        supports_build_context: true,
        content_image: None,
    })
    .synthesize(&config)
    .unwrap();
    recipe.write_env_files().await.unwrap();

    let env_files = recipe
        .env_files
        .iter()
        .map(|f| (f.path.display().to_string(), f.content.clone()))
        .collect();
    (recipe.dockerfile(), env_files)
}

#[tokio::test]
async fn local_collection_builds_a_complete_recipe() {
    let collection = TempDir::new().unwrap();
    write_collection(collection.path());
    let dst = TempDir::new().unwrap();

    let (dockerfile, env_files) = run_pipeline(collection.path(), dst.path()).await;

    // Base image threading and final user.
    assert!(dockerfile.contains("ARG _DEV_CONTAINERS_BASE_IMAGE=ubuntu:22.04"));
    assert!(dockerfile.contains("FROM $_DEV_CONTAINERS_BASE_IMAGE AS dev_containers_target_stage"));
    assert!(dockerfile.contains("ARG _DEV_CONTAINERS_IMAGE_USER=vscode"));

    // The install.sh feature lands in the shared install layer.
    assert!(dockerfile.contains("features/hello && chmod +x ./install.sh"));

    // The acquire feature gets exactly one stage and one artifact copy.
    assert_eq!(dockerfile.matches("./bin/acquire").count(), 1);
    assert_eq!(dockerfile.matches("./bin/configure").count(), 1);

    // Metadata-driven environment reaches the final layer once.
    assert_eq!(dockerfile.matches("ENV HELLO_HOME=\"/opt/hello\"").count(), 1);

    // Env files: the set-level file carries the hello options and legacy
    // build arg; the per-feature file carries the tool target path.
    let set_env = env_files
        .iter()
        .find(|(path, _)| path.ends_with(&format!("/{}", ENV_FILE)) && !path.contains("features"))
        .expect("set-level env file");
    assert!(set_env.1.contains("_BUILD_ARG_HELLO_VERSION=\"v3\""));
    assert!(set_env.1.contains("_BUILD_ARG_HELLO=true"));
    assert!(set_env.1.contains("HELLO_VERSION=\"v3\""));

    let tool_env = env_files
        .iter()
        .find(|(path, _)| path.contains("features/tool"))
        .expect("per-feature env file");
    assert!(tool_env.1.contains("_BUILD_ARG_TOOL_TARGETPATH="));

    // Env files were actually written where the recipe says they are.
    for (path, content) in &env_files {
        assert_eq!(&fs::read_to_string(path).unwrap(), content);
    }
}

#[tokio::test]
async fn pipeline_output_is_deterministic_across_dst_folders() {
    let collection = TempDir::new().unwrap();
    write_collection(collection.path());

    let dst_a = TempDir::new().unwrap();
    let dst_b = TempDir::new().unwrap();
    let (dockerfile_a, env_a) = run_pipeline(collection.path(), dst_a.path()).await;
    let (dockerfile_b, env_b) = run_pipeline(collection.path(), dst_b.path()).await;

    // The build file never embeds the destination folder, so two builds
    // of the same inputs are byte-identical.
    assert_eq!(dockerfile_a, dockerfile_b);

    // Env file contents match too; only their on-disk roots differ.
    let contents_a: Vec<&String> = env_a.iter().map(|(_, c)| c).collect();
    let contents_b: Vec<&String> = env_b.iter().map(|(_, c)| c).collect();
    assert_eq!(contents_a, contents_b);
}
