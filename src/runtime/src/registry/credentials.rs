//! Registry credentials built from docker config documents.
//!
//! Credentials come from docker config files (`~/.docker/config.json` style)
//! and from pull secrets carrying the same document under
//! `.dockerconfigjson`. Later sources override earlier ones per registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use canopy_core::error::{CanopyError, Result};
use canopy_core::installation::{PullSecret, DOCKER_CONFIG_JSON_KEY};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use serde::Deserialize;

/// Authentication credentials for a component registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Convert to oci-distribution auth type.
    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Produces credentials for a registry host.
pub trait CredentialResolver: Send + Sync {
    /// Credentials for `registry`; anonymous when nothing is known.
    fn resolve(&self, registry: &str) -> RegistryAuth;
}

/// Resolver that never authenticates.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousResolver;

impl CredentialResolver for AnonymousResolver {
    fn resolve(&self, _registry: &str) -> RegistryAuth {
        RegistryAuth::anonymous()
    }
}

/// Docker config file format.
#[derive(Debug, Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl DockerAuthEntry {
    fn to_auth(&self, registry: &str, source: &str) -> Result<Option<RegistryAuth>> {
        if let (Some(u), Some(p)) = (&self.username, &self.password) {
            return Ok(Some(RegistryAuth::basic(u.clone(), p.clone())));
        }
        let Some(encoded) = self.auth.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| {
                CanopyError::ConfigError(format!(
                    "Invalid auth for registry {} in {}: {}",
                    registry, source, e
                ))
            })?;
        let decoded = String::from_utf8(decoded).map_err(|e| {
            CanopyError::ConfigError(format!(
                "Invalid auth for registry {} in {}: {}",
                registry, source, e
            ))
        })?;
        match decoded.split_once(':') {
            Some((u, p)) => Ok(Some(RegistryAuth::basic(u, p))),
            None => Err(CanopyError::ConfigError(format!(
                "Invalid auth for registry {} in {}: expected username:password",
                registry, source
            ))),
        }
    }
}

/// In-memory credential keyring keyed by normalized registry host.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    registries: HashMap<String, RegistryAuth>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> KeyringBuilder {
        KeyringBuilder::default()
    }

    /// Store credentials for a registry. Overwrites existing entry.
    pub fn insert(&mut self, registry: &str, auth: RegistryAuth) {
        self.registries.insert(normalize_registry(registry), auth);
    }

    /// Merge the `auths` section of a docker config document.
    pub fn add_docker_config(&mut self, data: &[u8], source: &str) -> Result<()> {
        let config: DockerConfig = serde_json::from_slice(data).map_err(|e| {
            CanopyError::ConfigError(format!("Failed to parse docker config {}: {}", source, e))
        })?;
        for (registry, entry) in &config.auths {
            if let Some(auth) = entry.to_auth(registry, source)? {
                self.insert(registry, auth);
            }
        }
        Ok(())
    }

    /// List all registries with stored credentials.
    pub fn list_registries(&self) -> Vec<String> {
        let mut registries: Vec<String> = self.registries.keys().cloned().collect();
        registries.sort();
        registries
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

impl CredentialResolver for Keyring {
    fn resolve(&self, registry: &str) -> RegistryAuth {
        self.registries
            .get(&normalize_registry(registry))
            .cloned()
            .unwrap_or_else(RegistryAuth::anonymous)
    }
}

/// Builds a keyring from config files followed by pull secrets.
#[derive(Debug, Default)]
pub struct KeyringBuilder {
    config_files: Vec<PathBuf>,
    pull_secrets: Vec<PullSecret>,
}

impl KeyringBuilder {
    pub fn with_config_files<P: AsRef<Path>>(mut self, paths: &[P]) -> Self {
        self.config_files
            .extend(paths.iter().map(|p| p.as_ref().to_path_buf()));
        self
    }

    pub fn with_pull_secrets(mut self, secrets: &[PullSecret]) -> Self {
        self.pull_secrets.extend_from_slice(secrets);
        self
    }

    pub fn build(self) -> Result<Keyring> {
        let mut keyring = Keyring::new();
        for path in &self.config_files {
            let data = std::fs::read(path).map_err(|e| {
                CanopyError::ConfigError(format!(
                    "Failed to read docker config {}: {}",
                    path.display(),
                    e
                ))
            })?;
            keyring.add_docker_config(&data, &path.display().to_string())?;
        }
        for secret in &self.pull_secrets {
            match secret.data.get(DOCKER_CONFIG_JSON_KEY) {
                Some(data) => keyring.add_docker_config(data, &format!("secret {}", secret.key()))?,
                None => tracing::warn!(
                    secret = %secret.key(),
                    "Pull secret has no {} entry, skipping",
                    DOCKER_CONFIG_JSON_KEY
                ),
            }
        }
        tracing::debug!(registries = ?keyring.list_registries(), "Built registry keyring");
        Ok(keyring)
    }
}

/// Normalize registry names.
///
/// Strips scheme and path (`https://index.docker.io/v1/` → `index.docker.io`)
/// and folds Docker Hub aliases into `index.docker.io`.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r);
    let host = r.split('/').next().unwrap_or(r);
    if host == "docker.io" || host == "registry-1.docker.io" {
        "index.docker.io".to_string()
    } else {
        host.to_string()
    }
}
