//! Read access to installations and pull secrets.
//!
//! The reconcile driver owns persistence; the runtime only ever looks up
//! committed objects by name through these traits.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use canopy_core::error::{CanopyError, Result};
use canopy_core::installation::{InstallationNode, ObjectReference, PullSecret};
use tokio::sync::RwLock;

/// Predicate selecting installations to leave out of a listing.
pub type InstallationFilter<'a> = dyn Fn(&InstallationNode) -> bool + Send + Sync + 'a;

/// Name-indexed installation lookups.
#[async_trait]
pub trait InstallationStore: Send + Sync {
    /// Get one installation. Missing installations yield `NotFound`.
    async fn get(&self, key: &ObjectReference) -> Result<InstallationNode>;

    /// List the root installations of `namespace`, skipping every
    /// installation `exclude` returns true for.
    async fn list_roots(
        &self,
        namespace: &str,
        exclude: &InstallationFilter<'_>,
    ) -> Result<Vec<InstallationNode>>;
}

/// Pull secret lookups.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get one secret. Missing secrets yield `NotFound`.
    async fn get(&self, key: &ObjectReference) -> Result<PullSecret>;
}

/// In-memory installation store. Listings are ordered by name.
#[derive(Default)]
pub struct InMemoryInstallationStore {
    installations: RwLock<BTreeMap<ObjectReference, InstallationNode>>,
    lookups: AtomicUsize,
}

impl InMemoryInstallationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `installations`.
    pub fn with_installations(installations: impl IntoIterator<Item = InstallationNode>) -> Self {
        let installations = installations
            .into_iter()
            .map(|node| (node.key(), node))
            .collect();
        Self {
            installations: RwLock::new(installations),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Insert or replace an installation.
    pub async fn put(&self, node: InstallationNode) {
        self.installations.write().await.insert(node.key(), node);
    }

    pub async fn remove(&self, key: &ObjectReference) -> Option<InstallationNode> {
        self.installations.write().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.installations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.installations.read().await.is_empty()
    }

    /// Number of `get` and `list_roots` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl InstallationStore for InMemoryInstallationStore {
    async fn get(&self, key: &ObjectReference) -> Result<InstallationNode> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.installations
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| CanopyError::not_found("installation", key.to_string()))
    }

    async fn list_roots(
        &self,
        namespace: &str,
        exclude: &InstallationFilter<'_>,
    ) -> Result<Vec<InstallationNode>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let installations = self.installations.read().await;
        let mut roots: Vec<InstallationNode> = installations
            .values()
            .filter(|node| node.namespace == namespace && node.is_root() && !exclude(node))
            .cloned()
            .collect();
        roots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roots)
    }
}

/// In-memory secret store.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<BTreeMap<ObjectReference, PullSecret>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secrets(secrets: impl IntoIterator<Item = PullSecret>) -> Self {
        let secrets = secrets
            .into_iter()
            .map(|secret| (secret.key(), secret))
            .collect();
        Self {
            secrets: RwLock::new(secrets),
        }
    }

    pub async fn put(&self, secret: PullSecret) {
        self.secrets.write().await.insert(secret.key(), secret);
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, key: &ObjectReference) -> Result<PullSecret> {
        self.secrets
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| CanopyError::not_found("secret", key.to_string()))
    }
}
