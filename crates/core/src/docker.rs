//! Container builder invocation
//!
//! Drives the host's `docker` binary at the argv level through one of two
//! builder strategies: the advanced backend (`buildx build` with named
//! build contexts) and the legacy backend (classic `build`, staging the
//! feature content through a throwaway `FROM scratch` image). Both
//! backends produce identical image semantics; the synthesizer selects
//! its placeholders from the strategy's declared capability.

use crate::cancel::CancelToken;
use crate::dockerfile_generator::{FeatureRecipe, CONTENT_DOCKERFILE, FEATURE_CONTENT_SOURCE};
use crate::errors::{BuildError, EngineError, Result};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Name of the synthesized build file inside the destination folder
pub const EXTENDED_DOCKERFILE: &str = "Dockerfile.extended";

/// Base name of the legacy throwaway content image
///
/// Always suffixed per build so concurrent builds on one host cannot
/// clobber each other's content image.
pub fn content_image_name(suffix: &str) -> String {
    format!("dev_container_feature_content_temp-{}", suffix)
}

/// One builder invocation
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub dockerfile: PathBuf,
    pub image_name: String,
    /// Directory handed to the builder as the build context
    pub context_dir: PathBuf,
    pub build_args: Vec<(String, String)>,
    /// Additional named build contexts (advanced backend only)
    pub extra_contexts: Vec<(String, PathBuf)>,
}

/// Builder strategy interface
///
/// The two implementations share most of their argv; the capability flag
/// also steers recipe synthesis.
pub trait BuilderBackend {
    /// Whether the builder accepts `--build-context` injections
    fn supports_build_context(&self) -> bool;

    /// Argv (after the runtime binary) for one build
    fn build_argv(&self, request: &BuildRequest) -> Vec<String>;

    /// Extra argv enabling continuous (non-TTY) output
    fn continuous_output_argv(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Advanced backend: BuildKit via `docker buildx build`
#[derive(Debug, Default)]
pub struct BuildxBackend;

impl BuilderBackend for BuildxBackend {
    fn supports_build_context(&self) -> bool {
        true
    }

    fn build_argv(&self, request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "buildx".to_string(),
            "build".to_string(),
            "--load".to_string(),
        ];
        for (name, dir) in &request.extra_contexts {
            args.push("--build-context".to_string());
            args.push(format!("{}={}", name, dir.display()));
        }
        push_common_argv(&mut args, request);
        args
    }

    fn continuous_output_argv(&self) -> Vec<String> {
        vec!["--progress=plain".to_string()]
    }
}

/// Legacy backend: classic `docker build`, no named contexts
#[derive(Debug, Default)]
pub struct ClassicBackend;

impl BuilderBackend for ClassicBackend {
    fn supports_build_context(&self) -> bool {
        false
    }

    fn build_argv(&self, request: &BuildRequest) -> Vec<String> {
        let mut args = vec!["build".to_string()];
        push_common_argv(&mut args, request);
        args
    }
}

fn push_common_argv(args: &mut Vec<String>, request: &BuildRequest) {
    for (key, value) in &request.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push("-t".to_string());
    args.push(request.image_name.clone());
    args.push("-f".to_string());
    args.push(request.dockerfile.display().to_string());
    args.push(request.context_dir.display().to_string());
}

/// Invokes the container builder for a synthesized recipe
#[derive(Debug)]
pub struct BuildDriver {
    runtime_path: String,
}

impl BuildDriver {
    pub fn new() -> Self {
        Self::with_runtime("docker")
    }

    pub fn with_runtime(runtime_path: impl Into<String>) -> Self {
        Self {
            runtime_path: runtime_path.into(),
        }
    }

    /// Build the extended image for a recipe and return its name
    ///
    /// Writes the build file(s) into `dst_folder`; in legacy mode the
    /// throwaway content image is built first against the feature tree.
    /// The main build runs against a guaranteed-empty context so the
    /// feature content never transits the normal context channel.
    #[instrument(skip(self, backend, recipe, cancel), fields(image = %image_name))]
    pub async fn build(
        &self,
        backend: &dyn BuilderBackend,
        recipe: &FeatureRecipe,
        dst_folder: &Path,
        image_name: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        let dockerfile = dst_folder.join(EXTENDED_DOCKERFILE);
        tokio::fs::write(&dockerfile, recipe.dockerfile()).await?;

        let empty_context = dst_folder.join("empty-context");
        tokio::fs::create_dir_all(&empty_context).await?;

        if let Some(content) = &recipe.content_dockerfile {
            let content_image = recipe
                .content_image
                .clone()
                .unwrap_or_else(|| content_image_name("0"));
            let content_dockerfile = dst_folder.join(CONTENT_DOCKERFILE);
            tokio::fs::write(&content_dockerfile, content).await?;

            info!(image = %content_image, "Building feature content image");
            let request = BuildRequest {
                dockerfile: content_dockerfile,
                image_name: content_image,
                context_dir: dst_folder.to_path_buf(),
                build_args: Vec::new(),
                extra_contexts: Vec::new(),
            };
            self.run_builder(&backend.build_argv(&request), cancel).await?;
        }

        let mut extra_contexts = Vec::new();
        if backend.supports_build_context() {
            extra_contexts.push((
                FEATURE_CONTENT_SOURCE.to_string(),
                dst_folder.to_path_buf(),
            ));
        }

        let request = BuildRequest {
            dockerfile,
            image_name: image_name.to_string(),
            context_dir: empty_context,
            build_args: recipe.build_args.clone(),
            extra_contexts,
        };
        self.run_builder(&request_argv(backend, &request), cancel).await?;

        info!(image = %image_name, "Built extended image");
        Ok(image_name.to_string())
    }

    /// Run one builder invocation
    ///
    /// With a TTY on stdin the builder inherits the terminal; otherwise
    /// output is captured in continuous mode and the stderr tail rides
    /// along on failure.
    async fn run_builder(&self, args: &[String], cancel: &CancelToken) -> Result<()> {
        debug!(runtime = %self.runtime_path, ?args, "Invoking container builder");

        let mut command = Command::new(&self.runtime_path);
        command.args(args).kill_on_drop(true);

        if std::io::stdin().is_terminal() {
            let mut child = command.spawn().map_err(|e| BuildError::Spawn {
                message: format!("{}: {}", self.runtime_path, e),
            })?;
            tokio::select! {
                biased;
                // kill_on_drop terminates the in-flight builder
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
                status = child.wait() => {
                    let status = status?;
                    if status.success() {
                        Ok(())
                    } else {
                        Err(BuildError::Failed {
                            code: status.code().unwrap_or(-1),
                            stderr: "(builder output went to the terminal)".to_string(),
                        }
                        .into())
                    }
                }
            }
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
            let child = command.spawn().map_err(|e| BuildError::Spawn {
                message: format!("{}: {}", self.runtime_path, e),
            })?;
            tokio::select! {
                biased;
                // kill_on_drop terminates the in-flight builder
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
                output = child.wait_with_output() => {
                    let output = output?;
                    if output.status.success() {
                        debug!(
                            stdout = %String::from_utf8_lossy(&output.stdout),
                            "Builder finished"
                        );
                        Ok(())
                    } else {
                        Err(BuildError::Failed {
                            code: output.status.code().unwrap_or(-1),
                            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                        }
                        .into())
                    }
                }
            }
        }
    }
}

impl Default for BuildDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Main-build argv with the backend's continuous-output arguments when
/// stdin is not a terminal
fn request_argv(backend: &dyn BuilderBackend, request: &BuildRequest) -> Vec<String> {
    let mut args = backend.build_argv(request);
    if !std::io::stdin().is_terminal() {
        // Insert after the build verb so `--progress` lands before the context.
        let extra = backend.continuous_output_argv();
        if !extra.is_empty() {
            let verb_end = if args.first().map(String::as_str) == Some("buildx") { 2 } else { 1 };
            for (offset, arg) in extra.into_iter().enumerate() {
                args.insert(verb_end + offset, arg);
            }
        }
    }
    args
}
