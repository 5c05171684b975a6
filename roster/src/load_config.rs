/// `load_config` module: Loads the static YAML config and the secrets that live in the environment.
///
/// This module is the only place where untrusted YAML is parsed and mapped to strongly-typed structs.
///
/// # Responsibilities
/// - Parse the YAML file into [`CliConfig`]; every section is optional and falls back to defaults
/// - Read API secrets (`HARVEST_TOKEN`, `HARVEST_ID`, `FORECAST_ID`) from the environment, never from YAML
///
/// # Errors
/// All errors use `anyhow::Error` for context-rich diagnostics and are surfaced at the CLI boundary.
use anyhow::{Context, Result};
use roster_core::cache::DEFAULT_MIN_BYTES;
use roster_core::matcher::MatcherConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub cache: CacheSection,
    pub output: OutputSection,
    pub tracking: TrackingSection,
    pub planning: PlanningSection,
    pub user_agent: UserAgent,
    pub matcher: MatcherConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub dir: PathBuf,
    pub min_bytes: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            min_bytes: DEFAULT_MIN_BYTES,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub dir: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("out"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrackingSection {
    pub base_url: String,
}

impl Default for TrackingSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.harvestapp.com/v2".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlanningSection {
    pub base_url: String,
}

impl Default for PlanningSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.forecastapp.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct UserAgent(pub String);

impl Default for UserAgent {
    fn default() -> Self {
        Self(format!("roster/{}", env!("CARGO_PKG_VERSION")))
    }
}

/// API credentials, injected from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub harvest_token: String,
    pub harvest_account_id: String,
    pub forecast_account_id: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("harvest_token", &"<redacted>")
            .field("harvest_account_id", &self.harvest_account_id)
            .field("forecast_account_id", &self.forecast_account_id)
            .finish()
    }
}

fn required_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => {
            error!(variable = key, "Required environment variable missing");
            Err(anyhow::anyhow!(
                "Set {key} in the environment or .env (HARVEST_TOKEN, HARVEST_ID and FORECAST_ID are required)"
            ))
        }
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        let secrets = Self {
            harvest_token: required_env("HARVEST_TOKEN")?,
            harvest_account_id: required_env("HARVEST_ID")?,
            forecast_account_id: required_env("FORECAST_ID")?,
        };
        info!(
            harvest_account_id = %secrets.harvest_account_id,
            forecast_account_id = %secrets.forecast_account_id,
            "Loaded API credentials from environment"
        );
        Ok(secrets)
    }
}

/// Loads a static YAML config file (no secrets).
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        e
    })
    .with_context(|| format!("Failed to read config file {:?}", path_ref))?;

    let config: CliConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;

    info!(
        config_path = ?path_ref,
        cache_dir = %config.cache.dir.display(),
        output_dir = %config.output.dir.display(),
        "Parsed config YAML successfully"
    );
    Ok(config)
}

/// Loads `path` if given, otherwise all defaults.
pub fn load_config_or_default(path: Option<&Path>) -> Result<CliConfig> {
    match path {
        Some(path) => load_config(path),
        None => {
            info!("No config file given, using defaults");
            Ok(CliConfig::default())
        }
    }
}
