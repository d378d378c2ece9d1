//! Command-line interface definition and dispatch

use crate::commands;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use stevedore_core::build::BackendKind;

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Builder backend options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BuilderOption {
    /// BuildKit via `docker buildx build` with named build contexts
    Buildx,
    /// Classic `docker build` staging content through a throwaway image
    Classic,
}

impl From<BuilderOption> for BackendKind {
    fn from(builder: BuilderOption) -> Self {
        match builder {
            BuilderOption::Buildx => BackendKind::Buildx,
            BuilderOption::Classic => BackendKind::Classic,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "stevedore",
    version,
    about = "Extend dev-container images with declaratively configured features"
)]
pub struct Cli {
    /// Log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Work with dev-container features
    Features {
        #[command(subcommand)]
        command: FeaturesCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum FeaturesCommands {
    /// Install features from a collection onto a base image in a
    /// throwaway project
    Test {
        /// Base image to extend
        #[arg(long)]
        base_image: String,

        /// Path to the feature collection on disk
        #[arg(long)]
        collection: PathBuf,

        /// Comma-separated feature ids to install
        #[arg(long)]
        features: String,

        /// Builder backend to drive
        #[arg(long, value_enum, default_value_t = BuilderOption::Buildx)]
        builder: BuilderOption,
    },
}

impl Cli {
    /// Initialize logging and run the selected command
    pub async fn dispatch(self) -> Result<()> {
        let format = self.log_format.as_ref().map(|f| match f {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        });
        stevedore_core::logging::init(format, Some(self.log_level.as_filter()))?;

        match self.command {
            Commands::Features { command } => match command {
                FeaturesCommands::Test {
                    base_image,
                    collection,
                    features,
                    builder,
                } => {
                    commands::features::execute_features_test(commands::features::FeaturesTestArgs {
                        base_image,
                        collection,
                        features,
                        backend: builder.into(),
                    })
                    .await
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_features_test_arguments() {
        let cli = Cli::parse_from([
            "stevedore",
            "features",
            "test",
            "--base-image",
            "ubuntu:22.04",
            "--collection",
            "/collections/main",
            "--features",
            "helloworld,color",
        ]);
        let Commands::Features {
            command:
                FeaturesCommands::Test {
                    base_image,
                    collection,
                    features,
                    ..
                },
        } = cli.command;
        assert_eq!(base_image, "ubuntu:22.04");
        assert_eq!(collection, PathBuf::from("/collections/main"));
        assert_eq!(features, "helloworld,color");
    }

    #[test]
    fn log_levels_map_to_filters() {
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
        assert_eq!(LogLevel::Error.as_filter(), "error");
    }
}
