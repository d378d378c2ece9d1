//! Logging and observability
//!
//! Structured logging via `tracing`, with text or JSON formatting chosen
//! at runtime. All log output goes to stderr; stdout is reserved for
//! command output.
//!
//! Environment variables:
//! - `STEVEDORE_LOG` — filter directives (falls back to `RUST_LOG`)
//! - `STEVEDORE_LOG_FORMAT` — `json` for JSON output, anything else for text

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system
///
/// `format` overrides `STEVEDORE_LOG_FORMAT`; `filter` overrides the
/// filter environment variables. Safe to call more than once; subsequent
/// calls are no-ops.
pub fn init(format: Option<&str>, filter: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter(filter);

        let env_format = std::env::var("STEVEDORE_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

fn create_env_filter(explicit: Option<&str>) -> EnvFilter {
    if let Some(directives) = explicit {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }
    for var in ["STEVEDORE_LOG", "RUST_LOG"] {
        if let Ok(value) = std::env::var(var) {
            if let Ok(filter) = EnvFilter::try_new(value) {
                return filter;
            }
        }
    }
    EnvFilter::new("info")
}
