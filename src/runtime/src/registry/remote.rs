//! Remote OCI registry backend.
//!
//! Component descriptors are stored as OCI artifacts under
//! `<base>/component-descriptors/<name>:<version>`. The descriptor document
//! is one layer of the artifact, either plain JSON/YAML or a tar archive
//! holding `component-descriptor.yaml`.

use std::io::Read;
use std::sync::Arc;

use canopy_core::cancel::{cancellable, CancellationToken};
use canopy_core::descriptor::{
    ComponentDescriptor, ComponentReference, RepositoryContext, Resource, LOCAL_OCI_BLOB_TYPE,
};
use canopy_core::error::{CanopyError, Result};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};

use super::credentials::CredentialResolver;
use super::reference::{build_reference, DescriptorReference};
use super::transport::OciTransport;
use crate::cache::{digest_matches, ArtifactCache, Blob};

/// Layer holding the descriptor as JSON.
pub const DESCRIPTOR_JSON_MEDIA_TYPE: &str =
    "application/vnd.gardener.cloud.cnudie.component-descriptor.v2+json";

/// Layer holding the descriptor as YAML.
pub const DESCRIPTOR_YAML_MEDIA_TYPE: &str =
    "application/vnd.gardener.cloud.cnudie.component-descriptor.v2+yaml";

/// Layer holding a tar archive with `component-descriptor.yaml`.
pub const DESCRIPTOR_TAR_MEDIA_TYPE: &str =
    "application/vnd.gardener.cloud.cnudie.component-descriptor.v2+yaml+tar";

/// File name of the descriptor inside a tar layer.
const DESCRIPTOR_TAR_ENTRY: &str = "component-descriptor.yaml";

const DEFAULT_BLOB_MEDIA_TYPE: &str = "application/octet-stream";

/// Resolves component descriptors from an OCI-compatible registry.
pub struct RemoteManifestBackend {
    transport: Arc<dyn OciTransport>,
    cache: Arc<ArtifactCache>,
    credentials: Arc<dyn CredentialResolver>,
    inline: Option<ComponentDescriptor>,
}

impl RemoteManifestBackend {
    pub fn new(
        transport: Arc<dyn OciTransport>,
        cache: Arc<ArtifactCache>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            transport,
            cache,
            credentials,
            inline: None,
        }
    }

    /// Pin a descriptor that is returned for every lookup.
    pub fn with_inline_descriptor(mut self, inline: Option<ComponentDescriptor>) -> Self {
        self.inline = inline;
        self
    }

    pub fn inline_descriptor(&self) -> Option<&ComponentDescriptor> {
        self.inline.as_ref()
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Resolve the descriptor of `reference` stored under `location`.
    ///
    /// With an inline descriptor pinned, that descriptor is returned as is
    /// and neither the cache nor the registry is consulted.
    pub async fn resolve(
        &self,
        location: &RepositoryContext,
        reference: &ComponentReference,
        cancel: &CancellationToken,
    ) -> Result<ComponentDescriptor> {
        if let Some(inline) = &self.inline {
            tracing::debug!(component = %reference, "Using inline component descriptor");
            return Ok(inline.clone());
        }

        let oci_ref = build_reference(location, &reference.name, &reference.version)?;
        let key = oci_ref.full_reference();

        let data = cancellable(
            cancel,
            "fetch component descriptor",
            self.cache
                .get_or_fetch(&key, || self.fetch_descriptor(&oci_ref)),
        )
        .await?;

        let mut descriptor = ComponentDescriptor::decode(&data, &key)?;
        descriptor.inject_repository_context(location);
        Ok(descriptor)
    }

    /// Fetch the blob of a `localOciBlob` resource of `descriptor`.
    ///
    /// The blob is a layer of the descriptor's own artifact and is cached
    /// under its digest.
    pub async fn fetch_blob(
        &self,
        descriptor: &ComponentDescriptor,
        resource: &Resource,
        cancel: &CancellationToken,
    ) -> Result<Blob> {
        if resource.access.access_type != LOCAL_OCI_BLOB_TYPE {
            return Err(CanopyError::UnsupportedBackend(format!(
                "Resource '{}' has access type '{}', the OCI backend only serves '{}'",
                resource.name, resource.access.access_type, LOCAL_OCI_BLOB_TYPE
            )));
        }
        let digest = resource
            .access
            .attribute("digest")
            .ok_or_else(|| CanopyError::Malformed {
                reference: descriptor.reference().to_string(),
                message: format!("Resource '{}' has no digest", resource.name),
            })?;
        let location = descriptor.effective_repository_context().ok_or_else(|| {
            CanopyError::Malformed {
                reference: descriptor.reference().to_string(),
                message: "component descriptor has no repository context".to_string(),
            }
        })?;
        let oci_ref = build_reference(location, descriptor.name(), descriptor.version())?;

        let layer = OciDescriptor {
            media_type: resource
                .access
                .attribute("mediaType")
                .unwrap_or(DEFAULT_BLOB_MEDIA_TYPE)
                .to_string(),
            digest: digest.to_string(),
            size: resource
                .access
                .attributes
                .get("size")
                .and_then(|s| s.as_i64())
                .unwrap_or_default(),
            ..Default::default()
        };

        tracing::debug!(
            reference = %oci_ref,
            resource = %resource.name,
            digest = %digest,
            "Fetching resource blob"
        );
        cancellable(
            cancel,
            "fetch resource blob",
            self.cache.get_or_fetch(digest, || async {
                let auth = self.credentials.resolve(&oci_ref.registry);
                self.transport.pull_blob(&oci_ref, &layer, &auth).await
            }),
        )
        .await
    }

    async fn fetch_descriptor(&self, reference: &DescriptorReference) -> Result<Vec<u8>> {
        let auth = self.credentials.resolve(&reference.registry);
        tracing::info!(
            reference = %reference,
            anonymous = auth.is_anonymous(),
            "Fetching component descriptor"
        );

        let fetched = self.transport.resolve_manifest(reference, &auth).await?;
        let layer = select_descriptor_layer(&fetched.manifest).ok_or_else(|| {
            CanopyError::Malformed {
                reference: reference.full_reference(),
                message: format!(
                    "Manifest {} has no component descriptor layer",
                    fetched.digest
                ),
            }
        })?;

        let data = self.transport.pull_blob(reference, layer, &auth).await?;
        if !digest_matches(&layer.digest, &data) {
            return Err(CanopyError::Malformed {
                reference: reference.full_reference(),
                message: format!("Layer digest mismatch: expected {}", layer.digest),
            });
        }

        if layer.media_type == DESCRIPTOR_TAR_MEDIA_TYPE {
            extract_from_tar(&data, reference)
        } else {
            Ok(data)
        }
    }
}

/// First layer carrying a component descriptor.
fn select_descriptor_layer(manifest: &OciImageManifest) -> Option<&OciDescriptor> {
    manifest.layers.iter().find(|layer| {
        matches!(
            layer.media_type.as_str(),
            DESCRIPTOR_JSON_MEDIA_TYPE | DESCRIPTOR_YAML_MEDIA_TYPE | DESCRIPTOR_TAR_MEDIA_TYPE
        )
    })
}

fn extract_from_tar(data: &[u8], reference: &DescriptorReference) -> Result<Vec<u8>> {
    let malformed = |message: String| CanopyError::Malformed {
        reference: reference.full_reference(),
        message,
    };

    let mut archive = tar::Archive::new(data);
    let entries = archive
        .entries()
        .map_err(|e| malformed(format!("Failed to read descriptor archive: {}", e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| malformed(format!("Failed to read descriptor archive: {}", e)))?;
        let is_descriptor = entry
            .path()
            .ok()
            .and_then(|p| p.file_name().map(|n| n == DESCRIPTOR_TAR_ENTRY))
            .unwrap_or(false);
        if is_descriptor {
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|e| malformed(format!("Failed to read {}: {}", DESCRIPTOR_TAR_ENTRY, e)))?;
            return Ok(content);
        }
    }
    Err(malformed(format!(
        "Descriptor archive has no {}",
        DESCRIPTOR_TAR_ENTRY
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::sha256_digest;
    use crate::registry::credentials::{AnonymousResolver, RegistryAuth};
    use crate::registry::transport::FetchedManifest;
    use async_trait::async_trait;
    use canopy_core::descriptor::Access;
    use canopy_core::descriptor::ResourceRelation;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const DESCRIPTOR: &str = r#"
component:
  name: example.com/foo
  version: v1.0.0
  provider: internal
"#;

    /// Serves one manifest per reference and blobs by digest.
    #[derive(Default)]
    struct FakeTransport {
        manifests: HashMap<String, OciImageManifest>,
        blobs: HashMap<String, Vec<u8>>,
        manifest_calls: AtomicUsize,
        blob_calls: AtomicUsize,
        seen_auth: Mutex<Vec<RegistryAuth>>,
    }

    impl FakeTransport {
        fn with_descriptor(mut self, reference: &str, media_type: &str, data: &[u8]) -> Self {
            let layer = self.add_blob(media_type, data);
            self.manifests.insert(
                reference.to_string(),
                OciImageManifest {
                    layers: vec![layer],
                    ..Default::default()
                },
            );
            self
        }

        fn add_blob(&mut self, media_type: &str, data: &[u8]) -> OciDescriptor {
            let digest = sha256_digest(data);
            self.blobs.insert(digest.clone(), data.to_vec());
            OciDescriptor {
                media_type: media_type.to_string(),
                digest,
                size: data.len() as i64,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl OciTransport for FakeTransport {
        async fn resolve_manifest(
            &self,
            reference: &DescriptorReference,
            auth: &RegistryAuth,
        ) -> Result<FetchedManifest> {
            self.manifest_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_auth.lock().unwrap().push(auth.clone());
            let manifest = self
                .manifests
                .get(&reference.full_reference())
                .cloned()
                .ok_or_else(|| CanopyError::FetchFailed {
                    reference: reference.full_reference(),
                    kind: canopy_core::error::FetchFailureKind::Permanent,
                    status: Some(404),
                    message: "manifest unknown".to_string(),
                })?;
            Ok(FetchedManifest {
                digest: "sha256:manifest".to_string(),
                manifest,
            })
        }

        async fn pull_blob(
            &self,
            _reference: &DescriptorReference,
            layer: &OciDescriptor,
            _auth: &RegistryAuth,
        ) -> Result<Vec<u8>> {
            self.blob_calls.fetch_add(1, Ordering::SeqCst);
            self.blobs
                .get(&layer.digest)
                .cloned()
                .ok_or_else(|| CanopyError::not_found("blob", layer.digest.clone()))
        }
    }

    fn backend(transport: FakeTransport) -> (Arc<FakeTransport>, RemoteManifestBackend) {
        let transport = Arc::new(transport);
        let backend = RemoteManifestBackend::new(
            transport.clone(),
            Arc::new(ArtifactCache::in_memory()),
            Arc::new(AnonymousResolver),
        );
        (transport, backend)
    }

    fn location() -> RepositoryContext {
        RepositoryContext::oci_registry("registry.example.com")
    }

    fn foo() -> ComponentReference {
        ComponentReference::new("example.com/foo", "v1.0.0")
    }

    const FOO_REF: &str = "registry.example.com/component-descriptors/example.com/foo:v1.0.0";

    fn tar_of(name: &str, content: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content).unwrap();
        builder.into_inner().unwrap()
    }

    #[tokio::test]
    async fn test_resolve_yaml_layer() {
        let (transport, backend) = backend(FakeTransport::default().with_descriptor(
            FOO_REF,
            DESCRIPTOR_YAML_MEDIA_TYPE,
            DESCRIPTOR.as_bytes(),
        ));
        let descriptor = backend
            .resolve(&location(), &foo(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(descriptor.name(), "example.com/foo");
        assert_eq!(descriptor.effective_repository_context(), Some(&location()));
        assert_eq!(transport.manifest_calls.load(Ordering::SeqCst), 1);
        assert!(transport.seen_auth.lock().unwrap()[0].is_anonymous());
    }

    #[tokio::test]
    async fn test_resolve_tar_layer() {
        let (_transport, backend) = backend(FakeTransport::default().with_descriptor(
            FOO_REF,
            DESCRIPTOR_TAR_MEDIA_TYPE,
            &tar_of(DESCRIPTOR_TAR_ENTRY, DESCRIPTOR.as_bytes()),
        ));
        let descriptor = backend
            .resolve(&location(), &foo(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(descriptor.version(), "v1.0.0");
    }

    #[tokio::test]
    async fn test_uppercase_layer_digest_is_accepted() {
        let digest = sha256_digest(DESCRIPTOR.as_bytes());
        let upper = format!("sha256:{}", digest["sha256:".len()..].to_uppercase());
        let mut transport = FakeTransport::default();
        transport.blobs.insert(upper.clone(), DESCRIPTOR.as_bytes().to_vec());
        transport.manifests.insert(
            FOO_REF.to_string(),
            OciImageManifest {
                layers: vec![OciDescriptor {
                    media_type: DESCRIPTOR_YAML_MEDIA_TYPE.to_string(),
                    digest: upper,
                    size: DESCRIPTOR.len() as i64,
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        let (_transport, backend) = backend(transport);
        let descriptor = backend
            .resolve(&location(), &foo(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(descriptor.name(), "example.com/foo");
    }

    #[tokio::test]
    async fn test_tar_without_descriptor_is_malformed() {
        let (_transport, backend) = backend(FakeTransport::default().with_descriptor(
            FOO_REF,
            DESCRIPTOR_TAR_MEDIA_TYPE,
            &tar_of("README", b"nothing here"),
        ));
        let err = backend
            .resolve(&location(), &foo(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CanopyError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_second_resolve_is_served_from_cache() {
        let (transport, backend) = backend(FakeTransport::default().with_descriptor(
            FOO_REF,
            DESCRIPTOR_JSON_MEDIA_TYPE,
            br#"{"component":{"name":"example.com/foo","version":"v1.0.0"}}"#,
        ));
        let cancel = CancellationToken::new();
        let first = backend.resolve(&location(), &foo(), &cancel).await.unwrap();
        let second = backend.resolve(&location(), &foo(), &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.manifest_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.blob_calls.load(Ordering::SeqCst), 1);
        assert!(backend.cache().contains(FOO_REF));
    }

    #[tokio::test]
    async fn test_inline_descriptor_bypasses_lookup() {
        let inline = ComponentDescriptor::new("inline.example.com/bar", "v9");
        let (transport, backend) = backend(FakeTransport::default());
        let backend = backend.with_inline_descriptor(Some(inline.clone()));

        let descriptor = backend
            .resolve(&location(), &foo(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(descriptor, inline);
        assert_eq!(transport.manifest_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.cache().stats().entries, 0);
    }

    #[tokio::test]
    async fn test_invalid_reference_does_not_touch_transport() {
        let (transport, backend) = backend(FakeTransport::default());
        let err = backend
            .resolve(
                &location(),
                &ComponentReference::new("", "v1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CanopyError::InvalidReference(_)));
        assert_eq!(transport.manifest_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_descriptor_layer() {
        let mut transport = FakeTransport::default();
        let layer = transport.add_blob("application/octet-stream", b"data");
        transport.manifests.insert(
            FOO_REF.to_string(),
            OciImageManifest {
                layers: vec![layer],
                ..Default::default()
            },
        );
        let (_transport, backend) = backend(transport);
        let err = backend
            .resolve(&location(), &foo(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CanopyError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let (transport, backend) = backend(FakeTransport::default());
        let cancel = CancellationToken::new();
        for _ in 0..2 {
            let err = backend.resolve(&location(), &foo(), &cancel).await.unwrap_err();
            assert!(matches!(err, CanopyError::FetchFailed { .. }));
        }
        assert_eq!(transport.manifest_calls.load(Ordering::SeqCst), 2);
        assert!(!backend.cache().contains(FOO_REF));
    }

    #[tokio::test]
    async fn test_fetch_local_oci_blob() {
        let mut transport = FakeTransport::default();
        let blob = transport.add_blob("application/gzip", b"chart-bytes");
        let (transport, backend) = backend(transport);

        let mut descriptor = ComponentDescriptor::new("example.com/foo", "v1.0.0");
        descriptor.inject_repository_context(&location());
        descriptor.component.resources.push(Resource {
            name: "chart".to_string(),
            version: None,
            resource_type: "helm".to_string(),
            relation: ResourceRelation::Local,
            access: Access::local_oci_blob(&blob.digest),
        });
        let resource = descriptor.resource("chart").unwrap().clone();
        let cancel = CancellationToken::new();

        let data = backend.fetch_blob(&descriptor, &resource, &cancel).await.unwrap();
        assert_eq!(data.as_slice(), b"chart-bytes");
        backend.fetch_blob(&descriptor, &resource, &cancel).await.unwrap();
        assert_eq!(transport.blob_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_blob_requires_repository_context() {
        let (_transport, backend) = backend(FakeTransport::default());
        let descriptor = ComponentDescriptor::new("example.com/foo", "v1.0.0");
        let resource = Resource {
            name: "chart".to_string(),
            version: None,
            resource_type: "helm".to_string(),
            relation: ResourceRelation::Local,
            access: Access::local_oci_blob("sha256:abc"),
        };
        let err = backend
            .fetch_blob(&descriptor, &resource, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CanopyError::Malformed { .. }));
    }
}
