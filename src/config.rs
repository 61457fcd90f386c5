//! Configuration document (spec §6) plus indexer-wide tunables (§10.2).
//!
//! Loaded via the `config` crate the same way the teacher loads its flat
//! `config.toml` (`Config::builder().add_source(config::File::with_name(...))`),
//! generalized here to a nested `[[resources]]` / `[[resources.triggers]]`
//! document deserialized through `serde` instead of read key-by-key.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: config::ConfigError,
    },

    #[error("resource {resource:?} has no triggers")]
    NoTriggers { resource: String },

    #[error("resource {resource:?} trigger #{index} is missing a Definition")]
    MissingDefinition { resource: String, index: usize },

    #[error("resource {resource:?} trigger #{index} is missing a Handler")]
    MissingHandler { resource: String, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Event,
    Function,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    #[serde(rename = "Type")]
    pub trigger_type: TriggerType,
    #[serde(rename = "Definition")]
    pub definition: String,
    #[serde(rename = "Handler")]
    pub handler: String,
    #[serde(rename = "MethodName", default)]
    pub method_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Triggers")]
    pub triggers: Vec<TriggerConfig>,
}

fn default_reorg_window() -> u64 {
    900
}

fn default_min_retry_delay_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_proving_period() -> u64 {
    240
}

fn default_challenge_window_size() -> u64 {
    20
}

fn default_num_challenges() -> u32 {
    2
}

fn default_poll_interval_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingTxConfig {
    #[serde(default = "default_min_retry_delay_secs")]
    pub min_retry_delay_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PendingTxConfig {
    fn default() -> Self {
        Self {
            min_retry_delay_secs: default_min_retry_delay_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvingConfig {
    #[serde(default = "default_max_proving_period")]
    pub max_proving_period: u64,
    #[serde(default = "default_challenge_window_size")]
    pub challenge_window_size: u64,
}

impl Default for ProvingConfig {
    fn default() -> Self {
        Self {
            max_proving_period: default_max_proving_period(),
            challenge_window_size: default_challenge_window_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaultConfig {
    #[serde(default = "default_num_challenges")]
    pub num_challenges: u32,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            num_challenges: default_num_challenges(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinalityConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    #[serde(rename = "Resources")]
    pub resources: Vec<ResourceConfig>,

    #[serde(default = "default_reorg_window")]
    pub reorg_window: u64,
    #[serde(default)]
    pub pending_tx: PendingTxConfig,
    #[serde(default)]
    pub proving: ProvingConfig,
    #[serde(default)]
    pub fault: FaultConfig,
    #[serde(default)]
    pub finality: FinalityConfig,
}

impl IndexerConfig {
    /// Loads and validates the configuration document at `path` (TOML).
    /// `~` is expanded before the path reaches the `config` crate, so an
    /// operator can point at `~/pdp-indexer.toml` the way they would on the
    /// command line.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let expanded = shellexpand::tilde(&path.display().to_string());
        let expanded_path = Path::new(expanded.as_ref());
        let raw = config::Config::builder()
            .add_source(config::File::from(expanded_path))
            .build()
            .map_err(|source| ConfigError::Load {
                path: path.display().to_string(),
                source,
            })?;
        let parsed: IndexerConfig = raw.try_deserialize().map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source,
        })?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Startup validation (spec §6): every contract has at least one
    /// trigger; every trigger has a non-empty `Definition` and `Handler`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for resource in &self.resources {
            if resource.triggers.is_empty() {
                return Err(ConfigError::NoTriggers {
                    resource: resource.name.clone(),
                });
            }
            for (index, trigger) in resource.triggers.iter().enumerate() {
                if trigger.definition.trim().is_empty() {
                    return Err(ConfigError::MissingDefinition {
                        resource: resource.name.clone(),
                        index,
                    });
                }
                if trigger.handler.trim().is_empty() {
                    return Err(ConfigError::MissingHandler {
                        resource: resource.name.clone(),
                        index,
                    });
                }
            }
        }
        Ok(())
    }
}
