//! Shared fixtures for the runtime integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use canopy_core::error::{CanopyError, FetchFailureKind, Result};
use canopy_runtime::cache::sha256_digest;
use canopy_runtime::registry::remote::DESCRIPTOR_YAML_MEDIA_TYPE;
use canopy_runtime::registry::{DescriptorReference, FetchedManifest, OciTransport, RegistryAuth};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};

/// In-memory registry counting every network round trip.
#[derive(Default)]
pub struct CountingTransport {
    manifests: HashMap<String, OciImageManifest>,
    blobs: HashMap<String, Vec<u8>>,
    delay: Option<Duration>,
    pub manifest_fetches: AtomicUsize,
    pub blob_fetches: AtomicUsize,
}

impl CountingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `yaml` as the descriptor behind the canonical `reference`.
    pub fn with_descriptor(mut self, reference: &str, yaml: &str) -> Self {
        let digest = sha256_digest(yaml.as_bytes());
        self.blobs.insert(digest.clone(), yaml.as_bytes().to_vec());
        let layer = OciDescriptor {
            media_type: DESCRIPTOR_YAML_MEDIA_TYPE.to_string(),
            digest,
            size: yaml.len() as i64,
            ..Default::default()
        };
        self.manifests.insert(
            reference.to_string(),
            OciImageManifest {
                layers: vec![layer],
                ..Default::default()
            },
        );
        self
    }

    /// Delay every manifest fetch, widening race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetches(&self) -> usize {
        self.manifest_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OciTransport for CountingTransport {
    async fn resolve_manifest(
        &self,
        reference: &DescriptorReference,
        _auth: &RegistryAuth,
    ) -> Result<FetchedManifest> {
        self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let manifest = self
            .manifests
            .get(&reference.full_reference())
            .cloned()
            .ok_or_else(|| CanopyError::FetchFailed {
                reference: reference.full_reference(),
                kind: FetchFailureKind::Permanent,
                status: Some(404),
                message: "manifest unknown".to_string(),
            })?;
        Ok(FetchedManifest {
            digest: "sha256:0000".to_string(),
            manifest,
        })
    }

    async fn pull_blob(
        &self,
        _reference: &DescriptorReference,
        layer: &OciDescriptor,
        _auth: &RegistryAuth,
    ) -> Result<Vec<u8>> {
        self.blob_fetches.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .get(&layer.digest)
            .cloned()
            .ok_or_else(|| CanopyError::not_found("blob", layer.digest.clone()))
    }
}

pub const FOO_DESCRIPTOR: &str = r#"
meta:
  schemaVersion: v2
component:
  name: example.com/foo
  version: v1.0.0
  provider: internal
  repositoryContexts: []
  resources:
  - name: chart
    type: helm
    relation: external
    access:
      type: ociRegistry
      imageReference: registry.example.com/charts/foo:1.0.0
"#;

pub const FOO_REFERENCE: &str =
    "registry.example.com/component-descriptors/example.com/foo:v1.0.0";
