//! Core library for the stevedore feature composition engine
//!
//! This crate turns a declarative dev-container configuration — a base
//! image plus a mapping of feature identifiers — into an extended
//! container image with every requested feature installed, configured,
//! and exposed at runtime. It contains identifier resolution, payload
//! fetching, configuration merging, feature-set assembly, build recipe
//! synthesis, and the container builder driver.

pub mod build;
pub mod cancel;
pub mod config;
pub mod docker;
pub mod dockerfile_generator;
pub mod errors;
pub mod feature_ref;
pub mod features;
pub mod fetcher;
pub mod logging;
pub mod workspace;

// Re-export IndexMap for dependent crates (preserves insertion order for
// ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
