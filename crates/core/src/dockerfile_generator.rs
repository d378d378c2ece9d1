//! Build recipe synthesis
//!
//! Turns an assembled [`FeaturesConfig`] into a multi-stage container
//! build file plus per-feature environment files and build arguments.
//!
//! The recipe is held as a list of typed stanzas emitted in a fixed
//! order; string splicing is confined to the pretty-printer so the core
//! stays purely structural:
//!
//! 1. content fallback `FROM` (legacy backend only)
//! 2. one build stage per feature with an `acquire` script
//! 3. `FROM` of the base image as the target stage
//! 4. `COPY` of the feature content into the target
//! 5. a single install layer for `install.sh`-style features
//! 6. `ENV` lines contributed by included features
//! 7. artifact copies (and optional `configure` runs) from acquire stages
//!
//! Stage emission order within a set equals feature declaration order;
//! across sets it equals assembly order. This ordering is stable because
//! it determines layer hashes and thus build cache behavior.

use crate::errors::Result;
use crate::features::{Feature, FeatureSet, FeaturesConfig};
use futures::future::try_join_all;
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Build-context / stage name the feature content is injected under
pub const FEATURE_CONTENT_SOURCE: &str = "dev_containers_feature_content_source";

/// Name of the final stage holding the extended image
pub const TARGET_STAGE: &str = "dev_containers_target_stage";

/// Reserved build argument carrying the user's base image
pub const BASE_IMAGE_ARG: &str = "_DEV_CONTAINERS_BASE_IMAGE";

/// Reserved build argument carrying the final image user
pub const IMAGE_USER_ARG: &str = "_DEV_CONTAINERS_IMAGE_USER";

/// Reserved build argument naming the legacy content image
pub const CONTENT_SOURCE_ARG: &str = "_DEV_CONTAINERS_FEATURE_CONTENT_SOURCE";

/// In-image directory the feature content is staged under
pub const STAGE_CONTENT_DIR: &str = "/tmp/build-features";

/// In-image directory acquire-style features install into
pub const FEATURE_TARGET_ROOT: &str = "/usr/local/devcontainer-features";

/// File name of the per-feature environment files
pub const ENV_FILE: &str = "devcontainer-features.env";

/// File name of the legacy content-image Dockerfile
pub const CONTENT_DOCKERFILE: &str = "Dockerfile.buildContent";

/// Synthesis parameters
#[derive(Debug, Clone)]
pub struct RecipeOptions {
    /// Base image the recipe extends
    pub base_image: String,
    /// User the final image switches back to
    pub image_user: String,
    /// Capability declared by the selected builder strategy; selects the
    /// advanced (named build context) or legacy (content image) shape
    pub supports_build_context: bool,
    /// Legacy-only: name of the pre-built content image
    pub content_image: Option<String>,
}

/// One typed element of the synthesized build file
#[derive(Debug, Clone, PartialEq)]
pub enum RecipeStanza {
    /// Legacy fallback stage sourcing content from a pre-built image
    ContentFallback { content_image: String },
    /// Dedicated build stage for one `acquire`-style feature
    AcquireStage {
        stage_name: String,
        /// `(source, destination)` copy pairs into the stage
        copies: Vec<(String, String)>,
        /// Directory the env file is sourced and `./bin/acquire` run in
        run_dir: String,
    },
    /// `FROM` of the base image as the target stage
    TargetFrom,
    /// Copy of the whole content tree into the target stage
    ContentCopy { content_root: String },
    /// Single layer installing every `install.sh`-style feature
    InstallLayer { commands: Vec<String> },
    /// One environment entry contributed by a feature
    EnvLine { key: String, value: String },
    /// Artifact copy from an acquire stage, with optional configure run
    CopyStage {
        stage_name: String,
        feature_path: String,
        configure: bool,
    },
    /// Trailing switch back to the image user
    FinalUser { user: String },
}

/// A per-feature (or per-set) environment file awaiting write
#[derive(Debug, Clone, PartialEq)]
pub struct EnvFile {
    pub path: PathBuf,
    pub content: String,
}

/// The complete synthesized recipe
#[derive(Debug, Clone)]
pub struct FeatureRecipe {
    /// Syntax directive (advanced mode) and base-image build argument
    pub prefix: String,
    pub stanzas: Vec<RecipeStanza>,
    /// Build arguments the driver must attach
    pub build_args: Vec<(String, String)>,
    /// Legacy-only throwaway content-image Dockerfile
    pub content_dockerfile: Option<String>,
    /// Legacy-only name of the content image the driver must build first
    pub content_image: Option<String>,
    pub env_files: Vec<EnvFile>,
}

impl FeatureRecipe {
    /// Pretty-print the full build file
    pub fn dockerfile(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.prefix);
        out.push('\n');
        for stanza in &self.stanzas {
            out.push_str(&render_stanza(stanza));
            out.push('\n');
        }
        out
    }

    /// Write every env file; paths are distinct so writes proceed in
    /// parallel
    pub async fn write_env_files(&self) -> Result<()> {
        try_join_all(self.env_files.iter().map(|file| async move {
            if let Some(parent) = file.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&file.path, &file.content).await?;
            Ok::<(), crate::errors::EngineError>(())
        }))
        .await?;
        Ok(())
    }
}

/// Feature id made safe for env-var names: upper-cased with `/` and `-`
/// mapped to `_`
pub fn safe_id(feature_id: &str) -> String {
    feature_id
        .to_uppercase()
        .replace(['/', '-'], "_")
}

/// Quote a value for an env file or ENV line, escaping embedded quotes
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// How one feature is installed, derived from its payload
#[derive(Debug, Clone, Copy, PartialEq)]
enum InstallKind {
    /// `install.sh` run inside the shared install layer
    Script,
    /// `bin/acquire` run in a dedicated stage, optional `bin/configure`
    Acquire { configure: bool },
}

/// Synthesizes build recipes from assembled feature configurations
#[derive(Debug)]
pub struct RecipeSynthesizer {
    options: RecipeOptions,
}

impl RecipeSynthesizer {
    pub fn new(options: RecipeOptions) -> Self {
        Self { options }
    }

    /// Source path inside the content source for a set-relative path
    fn content_path(&self, relative: &str) -> String {
        if self.options.supports_build_context {
            format!("./{}", relative)
        } else {
            format!("{}/{}", STAGE_CONTENT_DIR, relative)
        }
    }

    /// Synthesize the recipe for an assembled configuration
    ///
    /// Deterministic: the same configuration and payloads produce a
    /// byte-identical build file and env files.
    #[instrument(skip(self, config), fields(features = config.feature_count()))]
    pub fn synthesize(&self, config: &FeaturesConfig) -> Result<FeatureRecipe> {
        let mut stanzas = Vec::new();
        let mut env_files = Vec::new();

        let content_image = (!self.options.supports_build_context).then(|| {
            self.options
                .content_image
                .clone()
                .unwrap_or_else(|| "dev_container_feature_content_temp".to_string())
        });
        if let Some(content_image) = &content_image {
            stanzas.push(RecipeStanza::ContentFallback {
                content_image: content_image.clone(),
            });
        }

        // Acquire stages, ordered by set then feature declaration order.
        for set in &config.feature_sets {
            let sis = set.source_information.source_info_string();
            let has_common = set.set_folder().join("common").is_dir();
            for feature in included(set) {
                let InstallKind::Acquire { .. } = install_kind(set, feature) else {
                    continue;
                };
                let rel = format!("{}/features/{}", sis, feature.id);
                let mut copies = vec![(
                    self.content_path(&rel),
                    format!("{}/{}", STAGE_CONTENT_DIR, rel),
                )];
                if has_common {
                    let common = format!("{}/common", sis);
                    copies.push((
                        self.content_path(&common),
                        format!("{}/{}", STAGE_CONTENT_DIR, common),
                    ));
                }
                stanzas.push(RecipeStanza::AcquireStage {
                    stage_name: stage_name(&sis, &feature.id),
                    copies,
                    run_dir: format!("{}/{}", STAGE_CONTENT_DIR, rel),
                });
            }
        }

        stanzas.push(RecipeStanza::TargetFrom);
        stanzas.push(RecipeStanza::ContentCopy {
            content_root: if self.options.supports_build_context {
                ".".to_string()
            } else {
                format!("{}/", STAGE_CONTENT_DIR)
            },
        });

        // Shared install layer for script-style features.
        let mut install_commands = Vec::new();
        for set in &config.feature_sets {
            let sis = set.source_information.source_info_string();
            for feature in included(set) {
                if install_kind(set, feature) != InstallKind::Script {
                    continue;
                }
                install_commands.push(format!(
                    "cd {}/{}/features/{} && chmod +x ./install.sh && set -a && . ../../{} && set +a && ./install.sh",
                    STAGE_CONTENT_DIR, sis, feature.id, ENV_FILE
                ));
            }
        }
        if !install_commands.is_empty() {
            stanzas.push(RecipeStanza::InstallLayer {
                commands: install_commands,
            });
        }

        // Environment contributed by included features. Duplicates are
        // allowed; last write wins at container runtime.
        for set in &config.feature_sets {
            for feature in included(set) {
                for (key, value) in &feature.container_env {
                    if value.is_empty() {
                        continue;
                    }
                    stanzas.push(RecipeStanza::EnvLine {
                        key: key.clone(),
                        value: value.clone(),
                    });
                }
            }
        }

        // Artifact copies from acquire stages.
        for set in &config.feature_sets {
            let sis = set.source_information.source_info_string();
            for feature in included(set) {
                let InstallKind::Acquire { configure } = install_kind(set, feature) else {
                    continue;
                };
                stanzas.push(RecipeStanza::CopyStage {
                    stage_name: stage_name(&sis, &feature.id),
                    feature_path: target_path(&sis, &feature.id),
                    configure,
                });
            }
        }

        stanzas.push(RecipeStanza::FinalUser {
            user: self.options.image_user.clone(),
        });

        // Env files: one per set for script features, one per acquire
        // feature inside its payload directory.
        for set in &config.feature_sets {
            let sis = set.source_information.source_info_string();
            let mut set_lines = Vec::new();
            for feature in included(set) {
                match install_kind(set, feature) {
                    InstallKind::Script => {
                        set_lines.extend(env_lines(feature, None));
                    }
                    InstallKind::Acquire { .. } => {
                        let lines = env_lines(feature, Some(&target_path(&sis, &feature.id)));
                        env_files.push(EnvFile {
                            path: set.feature_folder(&feature.id).join(ENV_FILE),
                            content: to_file(&lines),
                        });
                    }
                }
            }
            if !set_lines.is_empty() {
                env_files.push(EnvFile {
                    path: set.set_folder().join(ENV_FILE),
                    content: to_file(&set_lines),
                });
            }
        }

        let mut prefix = String::new();
        if self.options.supports_build_context {
            prefix.push_str("# syntax=docker/dockerfile:1.4\n");
        }
        prefix.push_str(&format!(
            "ARG {}={}\n",
            BASE_IMAGE_ARG, self.options.base_image
        ));

        let content_dockerfile = (!self.options.supports_build_context).then(|| {
            format!("FROM scratch\nCOPY . {}/\n", STAGE_CONTENT_DIR)
        });

        debug!(
            stanzas = stanzas.len(),
            env_files = env_files.len(),
            "Synthesized feature build recipe"
        );

        Ok(FeatureRecipe {
            prefix,
            stanzas,
            build_args: vec![(BASE_IMAGE_ARG.to_string(), self.options.base_image.clone())],
            content_dockerfile,
            content_image,
            env_files,
        })
    }
}

/// Included features of a set, in declaration order
fn included(set: &FeatureSet) -> impl Iterator<Item = &Feature> {
    set.features.iter().filter(|f| f.included)
}

/// Classify a feature by the scripts present in its materialized payload
fn install_kind(set: &FeatureSet, feature: &Feature) -> InstallKind {
    let bin = set.feature_folder(&feature.id).join("bin");
    if bin.join("acquire").is_file() {
        InstallKind::Acquire {
            configure: bin.join("configure").is_file(),
        }
    } else {
        InstallKind::Script
    }
}

fn stage_name(source_info: &str, feature_id: &str) -> String {
    format!("{}_{}", source_info, feature_id)
}

fn target_path(source_info: &str, feature_id: &str) -> String {
    format!("{}/{}/{}", FEATURE_TARGET_ROOT, source_info, feature_id)
}

/// Env-file lines for one feature
///
/// Option values are quoted; the presence flag is a bare `true`. An
/// acquire-style feature additionally records its artifact target path.
fn env_lines(feature: &Feature, acquire_target: Option<&str>) -> Vec<String> {
    let safe = safe_id(&feature.id);
    let mut lines = Vec::new();
    for (option, value) in feature.evaluated_options() {
        lines.push(format!(
            "_BUILD_ARG_{}_{}={}",
            safe,
            safe_id(&option),
            quote(&value)
        ));
    }
    lines.push(format!("_BUILD_ARG_{}=true", safe));
    if let Some(build_arg) = &feature.build_arg {
        lines.push(format!("{}={}", build_arg, quote(&feature.main_value())));
    }
    if let Some(target) = acquire_target {
        lines.push(format!("_BUILD_ARG_{}_TARGETPATH={}", safe, target));
    }
    lines
}

fn to_file(lines: &[String]) -> String {
    let mut content = lines.join("\n");
    content.push('\n');
    content
}

/// Pretty-printer: the only place recipe structure becomes text
fn render_stanza(stanza: &RecipeStanza) -> String {
    match stanza {
        RecipeStanza::ContentFallback { content_image } => format!(
            "ARG {}={}\nFROM ${} AS {}\n",
            CONTENT_SOURCE_ARG, content_image, CONTENT_SOURCE_ARG, FEATURE_CONTENT_SOURCE
        ),
        RecipeStanza::AcquireStage {
            stage_name,
            copies,
            run_dir,
        } => {
            let mut out = format!("FROM ${} AS {}\nUSER root\n", BASE_IMAGE_ARG, stage_name);
            for (src, dst) in copies {
                out.push_str(&format!(
                    "COPY --from={} {} {}\n",
                    FEATURE_CONTENT_SOURCE, src, dst
                ));
            }
            out.push_str(&format!(
                "RUN cd {} && chmod +x ./bin/acquire && set -a && . ./{} && set +a && ./bin/acquire\n",
                run_dir, ENV_FILE
            ));
            out
        }
        RecipeStanza::TargetFrom => format!(
            "FROM ${} AS {}\nUSER root\n",
            BASE_IMAGE_ARG, TARGET_STAGE
        ),
        RecipeStanza::ContentCopy { content_root } => format!(
            "COPY --from={} {} {}/\n",
            FEATURE_CONTENT_SOURCE, content_root, STAGE_CONTENT_DIR
        ),
        RecipeStanza::InstallLayer { commands } => {
            format!("RUN {}\n", commands.join(" \\\n && "))
        }
        RecipeStanza::EnvLine { key, value } => format!("ENV {}={}\n", key, quote(value)),
        RecipeStanza::CopyStage {
            stage_name,
            feature_path,
            configure,
        } => {
            let mut out = format!(
                "COPY --from={} {} {}\n",
                stage_name, feature_path, feature_path
            );
            if *configure {
                out.push_str(&format!(
                    "RUN cd {} && set -a && . ./{} && set +a && ./bin/configure\n",
                    feature_path, ENV_FILE
                ));
            }
            out
        }
        RecipeStanza::FinalUser { user } => format!(
            "ARG {}={}\nUSER ${}\n",
            IMAGE_USER_ARG, user, IMAGE_USER_ARG
        ),
    }
}
