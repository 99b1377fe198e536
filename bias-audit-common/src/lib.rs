//! # Bias Audit Common Library
//!
//! Shared code for the bias audit wizard and its tools:
//! - Error type shared across crates
//! - Configuration loading (TOML bootstrap, environment, defaults)
//! - Wizard event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
