// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration for k8sinv
//!
//! Scan defaults are read from ~/.k8sinv/config.json; every key is optional.
//! All k8sinv data lives under ~/.k8sinv/:
//! - ~/.k8sinv/config.json - scan configuration
//! - ~/.k8sinv/log/ - log files

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the base k8sinv directory (~/.k8sinv/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".k8sinv"))
        .context("Could not determine home directory")
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    10
}

/// k8sinv configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Drop artifacts whose owner is in the same result set
    #[serde(default = "default_true")]
    pub exclude_owned: bool,
    /// Upper bound on concurrent API calls during a scan
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exclude_owned: true,
            max_concurrency: default_max_concurrency(),
            probe: ProbeConfig::default(),
        }
    }
}

/// Node probe workload settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Namespace for probe pods; the current namespace when unset
    pub namespace: Option<String>,
    pub image: String,
    /// Overrides the image entrypoint when non-empty
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Time allowed for deleting probes, independent of cancellation
    pub cleanup_grace_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            image: "ghcr.io/aquasecurity/node-collector:0.3.1".to_string(),
            command: Vec::new(),
            timeout_secs: 120,
            poll_interval_ms: 1000,
            cleanup_grace_secs: 30,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }
}

impl Config {
    /// Load config from disk, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from an explicit path, or return default if not found
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Get the config file path (~/.k8sinv/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.exclude_owned);
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.probe.timeout(), Duration::from_secs(120));
        assert!(config.probe.namespace.is_none());
    }

    #[test]
    fn test_config_deserialize_empty() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.exclude_owned);
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.probe, ProbeConfig::default());
    }

    #[test]
    fn test_config_deserialize_partial_probe() {
        let json = r#"{
            "exclude_owned": false,
            "probe": {"namespace": "scan-temp", "timeout_secs": 5}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(!config.exclude_owned);
        assert_eq!(config.probe.namespace.as_deref(), Some("scan-temp"));
        assert_eq!(config.probe.timeout_secs, 5);
        assert_eq!(config.probe.poll_interval_ms, 1000);
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let probe = ProbeConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(probe.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_load_from_missing_file_is_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("config.json")).unwrap();
        assert!(config.exclude_owned);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, r#"{"max_concurrency": 4}"#).unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.max_concurrency, 4);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, "not json").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
