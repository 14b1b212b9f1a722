use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CanopyError, Result};

/// Canopy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CanopyConfig {
    /// Component registry configuration
    pub registry: RegistryConfig,

    /// Log level used when no filter is set in the environment
    pub log_level: LogLevel,
}

impl CanopyConfig {
    /// Load a configuration file (YAML or JSON).
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            CanopyError::ConfigError(format!(
                "Failed to read configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&data).map_err(|e| {
            CanopyError::ConfigError(format!(
                "Failed to parse configuration {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: CanopyConfig = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(local) = &self.registry.local {
            if local.root_path.as_os_str().is_empty() {
                return Err(CanopyError::ConfigError(
                    "registry.local.rootPath must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    /// Local filesystem registry; disabled when absent
    pub local: Option<LocalRegistryConfig>,

    /// Remote OCI registry settings; a remote backend is always configured
    pub oci: Option<OciConfiguration>,
}

/// Local filesystem registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRegistryConfig {
    /// Directory holding `<name>/<version>/component-descriptor.yaml` trees
    pub root_path: PathBuf,
}

/// Remote OCI registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OciConfiguration {
    /// Docker config files to read registry credentials from
    pub config_files: Vec<PathBuf>,

    /// Talk plain HTTP instead of HTTPS (local test registries)
    pub allow_plain_http: bool,

    /// Artifact cache settings
    pub cache: Option<OciCacheConfig>,
}

impl OciConfiguration {
    /// Configured docker config files, or the user's default one if it exists.
    pub fn effective_config_files(&self) -> Vec<PathBuf> {
        if !self.config_files.is_empty() {
            return self.config_files.clone();
        }
        default_docker_config()
            .filter(|p| p.is_file())
            .into_iter()
            .collect()
    }
}

/// Artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciCacheConfig {
    /// Directory the artifact cache persists blobs to
    pub path: PathBuf,
}

/// `~/.docker/config.json`
pub fn default_docker_config() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Directive usable as a default `tracing` env filter.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
