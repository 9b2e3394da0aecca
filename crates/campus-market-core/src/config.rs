//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the last used email and the credential
//! storage backend.
//!
//! Configuration is stored at `~/.config/campus-market/config.json`.
//! `CAMPUS_MARKET_API_URL` overrides the configured API base.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialStorage, FileStorage, KeyringStorage};

/// Application name used for config/data directory paths
const APP_NAME: &str = "campus-market";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base`
pub const API_URL_ENV: &str = "CAMPUS_MARKET_API_URL";

/// Backend used when nothing is configured
pub const DEFAULT_API_BASE: &str = "http://localhost:5000";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file in the data directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base: Option<String>,
    pub last_email: Option<String>,
    #[serde(default)]
    pub storage: StorageBackend,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the credential file
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// API base URL: environment first, then config file, then the default
    pub fn api_base(&self) -> String {
        self.resolve_api_base(std::env::var(API_URL_ENV).ok())
    }

    fn resolve_api_base(&self, from_env: Option<String>) -> String {
        from_env
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_base.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Open the configured credential storage backend
    pub fn open_storage(&self) -> Result<Arc<dyn CredentialStorage>> {
        let storage: Arc<dyn CredentialStorage> = match self.storage {
            StorageBackend::File => Arc::new(FileStorage::open(self.data_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
        };
        Ok(storage)
    }
}
