// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Fixed paths under the state directory (`$SILO_STATE_DIR`, or the
//! platform state dir), optionally overridden by `silod.toml` inside it.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot determine a state directory")]
    NoStateDir,

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Unparsable {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional overrides from `silod.toml`.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    manager_id: Option<String>,
    capability_key: Option<String>,
    bash_dir: Option<PathBuf>,
    log_to_file: Option<bool>,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory.
    pub state_dir: PathBuf,
    /// Path to the lock/PID file.
    pub lock_path: PathBuf,
    /// Path to the daemon log file.
    pub log_path: PathBuf,
    /// Own identity as clients reach this MGM, `host:port`.
    pub manager_id: String,
    /// Shared symmetric key signing capabilities.
    pub capability_key: String,
    /// Directory holding workflow shell actions.
    pub bash_dir: PathBuf,
    /// Whether to tee tracing output into the log file.
    pub log_to_file: bool,
}

impl Config {
    /// Load configuration: env override, then `silod.toml`, then defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let state_dir = match std::env::var_os("SILO_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .ok_or(ConfigError::NoStateDir)?
                .join("silo"),
        };

        let file_path = state_dir.join("silod.toml");
        let file: FileConfig = if file_path.exists() {
            let raw = std::fs::read_to_string(&file_path)
                .map_err(|source| ConfigError::Unreadable { path: file_path.clone(), source })?;
            toml::from_str(&raw)
                .map_err(|source| ConfigError::Unparsable { path: file_path.clone(), source })?
        } else {
            FileConfig::default()
        };

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Ok(Self {
            lock_path: state_dir.join("silod.pid"),
            log_path: state_dir.join("silod.log"),
            manager_id: file.manager_id.unwrap_or_else(|| format!("{}:1094", hostname)),
            capability_key: file
                .capability_key
                .unwrap_or_else(|| "silo-shared-key".to_string()),
            bash_dir: file
                .bash_dir
                .unwrap_or_else(|| PathBuf::from(crate::wfe::DEFAULT_BASH_DIR)),
            log_to_file: file.log_to_file.unwrap_or(false),
            state_dir,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
