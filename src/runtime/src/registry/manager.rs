//! Registry manager: one resolve entry point over the active backends.

use std::sync::Arc;

use canopy_core::cancel::CancellationToken;
use canopy_core::descriptor::{ComponentDescriptor, ComponentReference, RepositoryContext, RepositoryKind};
use canopy_core::error::{CanopyError, Result};

use super::local::LocalFilesystemBackend;
use super::remote::RemoteManifestBackend;
use crate::cache::{ArtifactCache, Blob};

/// A configured registry backend.
pub enum RegistryBackend {
    Local(LocalFilesystemBackend),
    Remote(RemoteManifestBackend),
}

impl RegistryBackend {
    /// The repository kind this backend serves.
    pub fn kind(&self) -> RepositoryKind {
        match self {
            RegistryBackend::Local(_) => RepositoryKind::Local,
            RegistryBackend::Remote(_) => RepositoryKind::OciRegistry,
        }
    }

    async fn resolve(
        &self,
        location: &RepositoryContext,
        reference: &ComponentReference,
        cancel: &CancellationToken,
    ) -> Result<ComponentDescriptor> {
        match self {
            RegistryBackend::Local(backend) => backend.resolve(location, reference, cancel).await,
            RegistryBackend::Remote(backend) => backend.resolve(location, reference, cancel).await,
        }
    }
}

impl From<LocalFilesystemBackend> for RegistryBackend {
    fn from(backend: LocalFilesystemBackend) -> Self {
        RegistryBackend::Local(backend)
    }
}

impl From<RemoteManifestBackend> for RegistryBackend {
    fn from(backend: RemoteManifestBackend) -> Self {
        RegistryBackend::Remote(backend)
    }
}

/// Dispatches lookups to at most one backend per repository kind.
///
/// Reconfiguration (`set`) needs `&mut self` while lookups need `&self`, so
/// a lookup can never observe a half-configured manager.
pub struct RegistryManager {
    backends: Vec<RegistryBackend>,
    cache: Arc<ArtifactCache>,
}

impl RegistryManager {
    pub fn new(cache: Arc<ArtifactCache>) -> Self {
        Self {
            backends: Vec::new(),
            cache,
        }
    }

    /// Register `backend`, replacing the backend of the same kind in place.
    pub fn set(&mut self, backend: impl Into<RegistryBackend>) {
        let backend = backend.into();
        let kind = backend.kind();
        match self.backends.iter_mut().find(|b| b.kind() == kind) {
            Some(existing) => {
                tracing::debug!(kind = %kind, "Replacing registry backend");
                *existing = backend;
            }
            None => {
                tracing::debug!(kind = %kind, "Registering registry backend");
                self.backends.push(backend);
            }
        }
    }

    /// The cache shared by every backend of this manager.
    pub fn shared_cache(&self) -> Arc<ArtifactCache> {
        self.cache.clone()
    }

    /// Kinds of the registered backends, in registration order.
    pub fn kinds(&self) -> Vec<RepositoryKind> {
        self.backends.iter().map(RegistryBackend::kind).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    fn backend_for(&self, location: &RepositoryContext) -> Result<&RegistryBackend> {
        let kind = location.kind().ok_or_else(|| {
            CanopyError::UnsupportedBackend(format!(
                "Unknown repository type '{}'",
                location.repository_type
            ))
        })?;
        self.backends
            .iter()
            .find(|b| b.kind() == kind)
            .ok_or_else(|| {
                CanopyError::UnsupportedBackend(format!(
                    "No registry backend configured for repository type '{}'",
                    kind
                ))
            })
    }

    /// Resolve a component descriptor through the backend serving `location`.
    pub async fn resolve(
        &self,
        location: &RepositoryContext,
        reference: &ComponentReference,
        cancel: &CancellationToken,
    ) -> Result<ComponentDescriptor> {
        let backend = self.backend_for(location)?;
        tracing::debug!(
            location = %location,
            component = %reference,
            "Resolving component descriptor"
        );
        backend.resolve(location, reference, cancel).await
    }

    /// Fetch the content of a resource of `descriptor`.
    ///
    /// Local resources are only served by the backend of the descriptor's
    /// effective repository context.
    pub async fn fetch_resource(
        &self,
        descriptor: &ComponentDescriptor,
        resource_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Blob> {
        let resource = descriptor
            .resource(resource_name)
            .ok_or_else(|| CanopyError::not_found("resource", resource_name))?;
        let location = descriptor.effective_repository_context().ok_or_else(|| {
            CanopyError::Malformed {
                reference: descriptor.reference().to_string(),
                message: "component descriptor has no repository context".to_string(),
            }
        })?;

        match self.backend_for(location)? {
            RegistryBackend::Local(backend) => {
                let data = backend.fetch_blob(descriptor, resource, cancel).await?;
                Ok(Arc::new(data))
            }
            RegistryBackend::Remote(backend) => {
                backend.fetch_blob(descriptor, resource, cancel).await
            }
        }
    }
}

impl Default for RegistryManager {
    fn default() -> Self {
        Self::new(Arc::new(ArtifactCache::in_memory()))
    }
}
