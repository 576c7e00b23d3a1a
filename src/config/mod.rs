//! Configuration Management
//!
//! Hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/transroute/config.toml)
//! 3. Project config (./transroute.toml)
//! 4. Environment variables (TRANSROUTE_*, then vendor API key variables)
//! 5. CLI arguments (highest priority)

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::*;
