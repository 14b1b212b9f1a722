//! Per-reconcile registry configuration and descriptor lookup.

use std::sync::Arc;

use canopy_core::cancel::{cancellable, CancellationToken};
use canopy_core::config::RegistryConfig;
use canopy_core::descriptor::ComponentDescriptor;
use canopy_core::error::{CanopyError, Result};
use canopy_core::installation::{InstallationNode, ObjectReference, PullSecret};
use futures::future::try_join_all;

use super::store::SecretStore;
use crate::registry::credentials::Keyring;
use crate::registry::local::LocalFilesystemBackend;
use crate::registry::manager::RegistryManager;
use crate::registry::remote::RemoteManifestBackend;
use crate::registry::transport::OciTransport;

/// Fetch every referenced pull secret, in order. Any failure is fatal.
pub async fn resolve_secrets(
    store: &dyn SecretStore,
    references: &[ObjectReference],
    cancel: &CancellationToken,
) -> Result<Vec<PullSecret>> {
    try_join_all(
        references
            .iter()
            .map(|key| cancellable(cancel, "get pull secret", store.get(key))),
    )
    .await
}

/// (Re)configure `manager` for one reconcile of `installation`.
///
/// Registers a local backend when one is configured and always registers
/// a remote backend, so unauthenticated registries keep working without
/// any credentials.
pub async fn setup_registries(
    manager: &mut RegistryManager,
    config: &RegistryConfig,
    installation: &InstallationNode,
    secrets: &dyn SecretStore,
    transport: Arc<dyn OciTransport>,
    cancel: &CancellationToken,
) -> Result<()> {
    let pull_secrets = resolve_secrets(secrets, &installation.registry_pull_secrets, cancel)
        .await
        .map_err(|e| e.within_installation(installation.key().to_string()))?;

    if let Some(local) = &config.local {
        manager.set(LocalFilesystemBackend::new(&local.root_path));
    }

    let config_files = config
        .oci
        .as_ref()
        .map(|oci| oci.config_files.clone())
        .unwrap_or_default();
    let keyring = Keyring::builder()
        .with_config_files(&config_files)
        .with_pull_secrets(&pull_secrets)
        .build()?;

    let remote = RemoteManifestBackend::new(transport, manager.shared_cache(), Arc::new(keyring))
        .with_inline_descriptor(installation.inline_descriptor().cloned());
    manager.set(remote);

    tracing::debug!(
        installation = %installation.key(),
        backends = ?manager.kinds(),
        pull_secrets = pull_secrets.len(),
        "Configured registries"
    );
    Ok(())
}

/// Resolve the component descriptor an installation points at.
///
/// A registry reference wins over an inline descriptor; the remote backend
/// still short-circuits to the inline descriptor when one is pinned.
pub async fn resolve_installation_descriptor(
    manager: &RegistryManager,
    installation: &InstallationNode,
    cancel: &CancellationToken,
) -> Result<ComponentDescriptor> {
    let wrap = |e: CanopyError| e.within_installation(installation.key().to_string());
    let definition = installation.component_descriptor.as_ref().ok_or_else(|| {
        wrap(CanopyError::InvalidReference(
            "no component descriptor defined".to_string(),
        ))
    })?;

    if let Some(reference) = &definition.reference {
        return manager
            .resolve(
                &reference.repository_context,
                &reference.component_reference(),
                cancel,
            )
            .await
            .map_err(wrap);
    }
    match &definition.inline {
        Some(inline) => Ok(inline.clone()),
        None => Err(wrap(CanopyError::InvalidReference(
            "component descriptor defines neither a reference nor an inline descriptor"
                .to_string(),
        ))),
    }
}
