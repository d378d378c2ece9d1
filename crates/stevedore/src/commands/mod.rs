//! Command implementations

pub mod features;
