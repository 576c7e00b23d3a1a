//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/transroute/config.toml)
//! 3. Project config (./transroute.toml)
//! 4. Environment variables (TRANSROUTE_* prefix, `__` between sections)
//!
//! API keys missing after the merge fall back to the vendor variables
//! `DEEPL_API_KEY`, `OPENAI_API_KEY` and `GOOGLE_API_KEY`.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{BrokerError, ProviderKind, Result};

const ENV_PREFIX: &str = "TRANSROUTE_";
const PROJECT_CONFIG_FILE: &str = "transroute.toml";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // e.g. TRANSROUTE_PROVIDERS__GOOGLE__DAILY_BUDGET_USD -> providers.google.daily_budget_usd
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Config = figment
            .extract()
            .map_err(|e| BrokerError::Config(format!("Configuration error: {}", e)))?;

        apply_key_fallbacks(&mut config, |name| env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| BrokerError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/transroute/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("transroute"))
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_config_path() -> PathBuf {
        PathBuf::from(PROJECT_CONFIG_FILE)
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file and database paths
    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:   {} {}", exists, global.display());
        } else {
            println!("  Global:   (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project:  {} {}", exists, project.display());

        let database = Self::load()
            .map(|c| c.database.resolved_path())
            .unwrap_or_else(|_| crate::config::DatabaseConfig::default().resolved_path());
        let exists = if database.exists() { "✓" } else { "✗" };
        println!("  Database: {} {}", exists, database.display());
    }

    /// Show current effective configuration. API keys are never printed.
    pub fn show_config(as_json: bool) -> Result<()> {
        let config = Self::load()?;

        if as_json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| BrokerError::Config(e.to_string()))?
            );
        }

        for kind in ProviderKind::BACKENDS {
            let has_key = config.providers.get(kind).is_some_and(|b| b.has_api_key());
            eprintln!(
                "# {} api key: {}",
                kind,
                if has_key { "set" } else { "not set" }
            );
        }

        Ok(())
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write the default config template. Returns the written path.
    pub fn init(global: bool, force: bool) -> Result<PathBuf> {
        let path = if global {
            Self::global_config_path().ok_or_else(|| {
                BrokerError::Config("Cannot determine global config directory".to_string())
            })?
        } else {
            Self::project_config_path()
        };
        Self::write_template(&path, force)?;
        Ok(path)
    }

    fn write_template(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            info!("Config exists: {}", path.display());
            return Ok(());
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, Self::default_template())?;
        info!("Created config: {}", path.display());
        Ok(())
    }

    /// Default config content (TOML)
    fn default_template() -> String {
        r#"# transroute configuration
# Project settings in ./transroute.toml override ~/.config/transroute/config.toml.
# Any key can also be set as TRANSROUTE_<SECTION>__<KEY>, e.g.
#   TRANSROUTE_PROVIDERS__OPENAI__DAILY_BUDGET_USD=2.5
# API keys fall back to DEEPL_API_KEY, OPENAI_API_KEY and GOOGLE_API_KEY.

version = "1.0"

[database]
# path = "/var/lib/transroute/transroute.db"
busy_timeout_ms = 5000

[routing]
tier_order = ["deepl", "openai", "google"]
request_timeout_secs = 30

[refinement]
provider = "openai"
model = "gpt-4o-mini"
timeout_secs = 60

[cache]
# Entries not read for this many days are removed by `transroute sweep`
expire_after_days = 90
# ttl_days = 30

[providers.deepl]
enabled = true
# api_base = "https://api-free.deepl.com/v2"

[providers.deepl.pricing]
billing = "free"

[providers.openai]
enabled = true
model = "gpt-4o-mini"
daily_budget_usd = 5.0

[providers.openai.pricing]
billing = "per_token"
input_per_million = 0.15
output_per_million = 0.60

[providers.google]
enabled = true
daily_budget_usd = 10.0
# unlimited_budget = true

[providers.google.pricing]
billing = "per_char"
per_million_chars = 20.0
"#
        .to_string()
    }
}

/// Fill missing API keys from the vendor environment variables
fn apply_key_fallbacks<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for kind in ProviderKind::BACKENDS {
        let var = match kind {
            ProviderKind::DeepL => "DEEPL_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Google => "GOOGLE_API_KEY",
            ProviderKind::Cache => continue,
        };
        if let Some(backend) = config.providers.get_mut(kind)
            && !backend.has_api_key()
            && let Some(key) = lookup(var).filter(|k| !k.trim().is_empty())
        {
            debug!(provider = %kind, "Using API key from {}", var);
            backend.api_key = Some(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Pricing;
    use tempfile::TempDir;

    #[test]
    fn test_template_parses_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transroute.toml");
        ConfigLoader::write_template(&path, false).unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        let defaults = Config::default();
        assert_eq!(config.routing.tier_order, defaults.routing.tier_order);
        assert_eq!(config.providers.google.pricing, defaults.providers.google.pricing);
        assert_eq!(config.providers.openai.daily_budget_usd, Some(5.0));
        assert_eq!(config.refinement.timeout_secs, 60);
    }

    #[test]
    fn test_init_does_not_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        ConfigLoader::write_template(&path, false).unwrap();
        fs::write(&path, "version = \"custom\"").unwrap();

        ConfigLoader::write_template(&path, false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "version = \"custom\"");

        ConfigLoader::write_template(&path, true).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("[providers.deepl]"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transroute.toml");
        fs::write(
            &path,
            r#"
[routing]
tier_order = ["google", "deepl"]

[providers.google]
daily_budget_usd = 2.0

[providers.google.pricing]
billing = "per_char"
per_million_chars = 10.0
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(
            config.routing.tier_order,
            vec![ProviderKind::Google, ProviderKind::DeepL]
        );
        assert_eq!(config.providers.google.daily_budget_usd, Some(2.0));
        assert_eq!(
            config.providers.google.pricing,
            Pricing::PerChar {
                per_million_chars: 10.0
            }
        );
        // Untouched sections keep their defaults
        assert_eq!(config.providers.openai.daily_budget_usd, Some(5.0));
    }

    #[test]
    fn test_file_can_lift_default_budget() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transroute.toml");
        fs::write(&path, "[providers.openai]\nunlimited_budget = true\n").unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert!(config.providers.openai.daily_budget().is_none());
        assert_eq!(config.providers.google.daily_budget(), Some(10.0));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transroute.toml");
        fs::write(&path, "[routing]\ntier_order = []\n").unwrap();
        assert!(matches!(
            ConfigLoader::load_from_file(&path),
            Err(BrokerError::Config(_))
        ));
    }

    #[test]
    fn test_key_fallbacks_only_fill_missing_keys() {
        let mut config = Config::default();
        config.providers.deepl.api_key = Some("from-config".to_string());

        apply_key_fallbacks(&mut config, |name| match name {
            "DEEPL_API_KEY" => Some("from-env".to_string()),
            "OPENAI_API_KEY" => Some("sk-env".to_string()),
            "GOOGLE_API_KEY" => Some("   ".to_string()),
            _ => None,
        });

        assert_eq!(config.providers.deepl.api_key.as_deref(), Some("from-config"));
        assert_eq!(config.providers.openai.api_key.as_deref(), Some("sk-env"));
        assert!(config.providers.google.api_key.is_none());
    }
}
