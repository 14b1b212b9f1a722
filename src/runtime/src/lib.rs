//! Canopy Runtime - installation context and component registry resolution.
//!
//! This crate resolves which installations an installation may exchange data
//! with, and resolves component descriptors and their resources from local
//! filesystem snapshots and OCI registries through a shared artifact cache.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod installations;
pub mod registry;

// Re-export common types
pub use cache::{ArtifactCache, Blob, CacheStats};
pub use installations::{
    Context, ContextResolver, InMemoryInstallationStore, InMemorySecretStore, InstallationStore,
    ReconcileDecision, ReconcileOutcome, Reconciler, SecretStore,
};
pub use registry::{
    build_reference, CredentialResolver, Keyring, LocalFilesystemBackend, OciDistributionTransport,
    OciTransport, RegistryAuth, RegistryBackend, RegistryManager, RemoteManifestBackend,
};

/// Canopy Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
