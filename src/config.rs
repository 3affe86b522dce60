use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::engine::ScanMode;
use crate::pattern::PatternError;

/// Registration-time failures. Raised before any scan starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("handler `{handler}`: {source}")]
    Pattern {
        handler: String,
        #[source]
        source: PatternError,
    },
    #[error("handler name is empty")]
    EmptyName,
    #[error("handler name `{name}` is {len} bytes, at most {max} are allowed")]
    NameTooLong { name: String, len: usize, max: usize },
    #[error("handler `{0}` registered twice")]
    DuplicateHandler(String),
    #[error("dissector `{0}` registered twice")]
    DuplicateDissector(String),
    #[error("unknown dissector `{0}`")]
    UnknownDissector(String),
    #[error("signature automaton: {0}")]
    Automaton(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatternConfig {
    #[serde(default)]
    pub offset: u64,
    pub signature: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HandlerConfig {
    pub name: String,
    /// Format plugin implementing the handler; defaults to the lowercase name.
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub priority: u16,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<PatternConfig>,
}

fn default_cache_size_kib() -> u64 {
    1024
}

fn default_window_size_mib() -> u64 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub run_id: String,
    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: u64,
    #[serde(default = "default_window_size_mib")]
    pub window_size_mib: u64,
    #[serde(default)]
    pub scan_mode: ScanMode,
    /// Enabled dissectors, in registration order.
    pub dissectors: Vec<String>,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

impl Config {
    pub fn cache_size(&self) -> usize {
        self.cache_size_kib.saturating_mul(1024) as usize
    }

    pub fn window_size(&self) -> u64 {
        self.window_size_mib.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes)?;
    if config.run_id.trim().is_empty() {
        config.run_id = generate_run_id();
    }

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!(
        "{}_{:08x}",
        now.format("%Y%m%dT%H%M%SZ"),
        now.timestamp_subsec_nanos()
    )
}
