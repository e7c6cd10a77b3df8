//! Environment configuration for the update service

use std::path::PathBuf;

use crate::error::{UpdateResult, UpdateServiceError};

pub const DEFAULT_HOSTNAME: &str = "http://localhost:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateServiceConfig {
    /// Base URL asset URLs are built on, without a trailing slash
    pub hostname: String,
    /// Directory containing `updates/`
    pub updates_root: PathBuf,
    /// PEM private key used when clients request code signing
    pub private_key_path: Option<PathBuf>,
}

impl Default for UpdateServiceConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            updates_root: PathBuf::from("."),
            private_key_path: None,
        }
    }
}

impl UpdateServiceConfig {
    /// Reads `EXPO_SERVER_HOST`, `UPDATES_ROOT` and `PRIVATE_KEY_PATH`.
    pub fn from_env() -> UpdateResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> UpdateResult<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let hostname = var("EXPO_SERVER_HOST")
            .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !hostname.starts_with("http://") && !hostname.starts_with("https://") {
            return Err(UpdateServiceError::config(format!(
                "EXPO_SERVER_HOST must be an http(s) URL, got '{}'",
                hostname
            )));
        }

        let updates_root = var("UPDATES_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let private_key_path = var("PRIVATE_KEY_PATH").map(PathBuf::from);

        Ok(Self {
            hostname,
            updates_root,
            private_key_path,
        })
    }
}
