//! CLI Common Utilities
//!
//! Shared initialization for CLI commands.

use std::sync::Arc;

use crate::broker::Orchestrator;
use crate::config::{Config, ConfigLoader};
use crate::types::{Result, SystemClock};

/// Command execution context
///
/// Loads the merged configuration and wires the orchestrator against the
/// configured database. Building the gateway makes no network calls.
pub struct CommandContext {
    pub config: Config,
    pub orchestrator: Orchestrator,
}

impl CommandContext {
    pub fn load() -> Result<Self> {
        let config = ConfigLoader::load()?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let orchestrator = Orchestrator::from_config(&config, Arc::new(SystemClock))?;
        Ok(Self {
            config,
            orchestrator,
        })
    }
}

/// Parse an output format flag
pub fn is_json(format: &str) -> bool {
    format.eq_ignore_ascii_case("json")
}
