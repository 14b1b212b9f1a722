//! Component descriptor resolution through the registry manager.

mod common;

use std::sync::Arc;
use std::time::Duration;

use canopy_core::descriptor::{ComponentDescriptor, ComponentReference, RepositoryContext};
use canopy_core::error::CanopyError;
use canopy_core::CancellationToken;
use canopy_runtime::registry::{AnonymousResolver, RegistryManager, RemoteManifestBackend};
use canopy_runtime::ArtifactCache;

use common::{CountingTransport, FOO_DESCRIPTOR, FOO_REFERENCE};

fn manager_with(transport: Arc<CountingTransport>) -> RegistryManager {
    let mut manager = RegistryManager::new(Arc::new(ArtifactCache::in_memory()));
    let remote = RemoteManifestBackend::new(
        transport,
        manager.shared_cache(),
        Arc::new(AnonymousResolver),
    );
    manager.set(remote);
    manager
}

fn remote_location() -> RepositoryContext {
    RepositoryContext::oci_registry("registry.example.com")
}

fn foo() -> ComponentReference {
    ComponentReference::new("example.com/foo", "v1.0.0")
}

#[tokio::test]
async fn one_fetch_then_zero() {
    let transport = Arc::new(CountingTransport::new().with_descriptor(FOO_REFERENCE, FOO_DESCRIPTOR));
    let manager = manager_with(transport.clone());
    let cancel = CancellationToken::new();

    let first = manager.resolve(&remote_location(), &foo(), &cancel).await.unwrap();
    assert_eq!(transport.fetches(), 1);

    let second = manager.resolve(&remote_location(), &foo(), &cancel).await.unwrap();
    assert_eq!(transport.fetches(), 1);
    assert_eq!(first.to_yaml().unwrap(), second.to_yaml().unwrap());
    assert_eq!(
        manager.shared_cache().get(FOO_REFERENCE).unwrap().as_slice(),
        FOO_DESCRIPTOR.as_bytes()
    );
}

#[tokio::test]
async fn concurrent_misses_share_one_fetch() {
    let transport = Arc::new(
        CountingTransport::new()
            .with_descriptor(FOO_REFERENCE, FOO_DESCRIPTOR)
            .with_delay(Duration::from_millis(50)),
    );
    let manager = Arc::new(manager_with(transport.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .resolve(&remote_location(), &foo(), &CancellationToken::new())
                .await
        }));
    }
    for handle in handles {
        let descriptor = handle.await.unwrap().unwrap();
        assert_eq!(descriptor.name(), "example.com/foo");
    }
    assert_eq!(transport.fetches(), 1);
}

#[tokio::test]
async fn cancelled_fetch_leaves_key_empty() {
    let transport = Arc::new(
        CountingTransport::new()
            .with_descriptor(FOO_REFERENCE, FOO_DESCRIPTOR)
            .with_delay(Duration::from_millis(200)),
    );
    let manager = manager_with(transport.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let err = manager
        .resolve(&remote_location(), &foo(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!manager.shared_cache().contains(FOO_REFERENCE));

    manager
        .resolve(&remote_location(), &foo(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(transport.fetches(), 2);
}

#[tokio::test]
async fn unregistered_kind_is_unsupported() {
    let transport = Arc::new(CountingTransport::new());
    let manager = manager_with(transport.clone());

    let err = manager
        .resolve(
            &RepositoryContext::local("/var/lib/components"),
            &foo(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CanopyError::UnsupportedBackend(_)));
    assert_eq!(transport.fetches(), 0);
}

#[tokio::test]
async fn inline_override_bypasses_backend() {
    let transport = Arc::new(CountingTransport::new().with_descriptor(FOO_REFERENCE, FOO_DESCRIPTOR));
    let inline = ComponentDescriptor::new("example.com/pinned", "v0.0.1");

    let mut manager = RegistryManager::new(Arc::new(ArtifactCache::in_memory()));
    let remote = RemoteManifestBackend::new(
        transport.clone(),
        manager.shared_cache(),
        Arc::new(AnonymousResolver),
    )
    .with_inline_descriptor(Some(inline.clone()));
    manager.set(remote);

    let descriptor = manager
        .resolve(&remote_location(), &foo(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(descriptor, inline);
    assert_eq!(transport.fetches(), 0);
    assert_eq!(manager.shared_cache().stats().entries, 0);
}

#[tokio::test]
async fn resolved_descriptor_round_trips() {
    let transport = Arc::new(CountingTransport::new().with_descriptor(FOO_REFERENCE, FOO_DESCRIPTOR));
    let manager = manager_with(transport);

    let descriptor = manager
        .resolve(&remote_location(), &foo(), &CancellationToken::new())
        .await
        .unwrap();
    let decoded =
        ComponentDescriptor::decode(descriptor.to_yaml().unwrap().as_bytes(), "round-trip").unwrap();

    assert_eq!(decoded.name(), descriptor.name());
    assert_eq!(decoded.version(), descriptor.version());
    assert_eq!(decoded.resources(), descriptor.resources());
    assert_eq!(
        decoded.effective_repository_context(),
        Some(&remote_location())
    );
}
