//! Process configuration
//!
//! A small TOML file covers the knobs the binary exposes; command-line
//! flags override individual values. Everything has a default so running
//! with no config file at all works.

use crate::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub fetcher: FetcherConfig,
}

/// Storage location
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Root directory of the persistent store
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

/// Command endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen port for the JSON command endpoint
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Fetch loop tuning
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Worker pool capacity
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Admission slots for requests without a host component
    #[serde(default = "default_bare_host_slots")]
    pub bare_host_slots: usize,

    /// User agent sent with live requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./eridanus-store")
}

fn default_port() -> u16 {
    39485
}

fn default_workers() -> usize {
    10
}

fn default_bare_host_slots() -> usize {
    5
}

fn default_user_agent() -> String {
    format!("eridanus/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            root: default_store_root(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig {
            workers: default_workers(),
            bare_host_slots: default_bare_host_slots(),
            user_agent: default_user_agent(),
        }
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}
