//! Configuration loading from environment variables.
//!
//! Uses the `envy` crate for type-safe environment variable parsing;
//! command-line flags override whatever the environment provides.

mod app;

pub use app::{AppConfig, OutputFormat};
