//! OCI registry transport.
//!
//! `OciTransport` is the seam between the remote backend and the network.
//! `OciDistributionTransport` implements it with the `oci-distribution`
//! crate; tests substitute in-memory fakes.

use async_trait::async_trait;
use canopy_core::error::{CanopyError, FetchFailureKind, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use oci_distribution::{Client, Reference, RegistryOperation};

use super::credentials::RegistryAuth;
use super::reference::DescriptorReference;

/// A manifest resolved from a registry.
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    /// Manifest digest (e.g., "sha256:abc123...")
    pub digest: String,
    pub manifest: OciImageManifest,
}

/// Minimal registry operations needed for artifact resolution.
#[async_trait]
pub trait OciTransport: Send + Sync {
    /// Resolve and pull the manifest behind `reference`.
    async fn resolve_manifest(
        &self,
        reference: &DescriptorReference,
        auth: &RegistryAuth,
    ) -> Result<FetchedManifest>;

    /// Pull one blob of the repository behind `reference`.
    async fn pull_blob(
        &self,
        reference: &DescriptorReference,
        layer: &OciDescriptor,
        auth: &RegistryAuth,
    ) -> Result<Vec<u8>>;
}

/// Transport backed by `oci-distribution`.
pub struct OciDistributionTransport {
    client: Client,
}

impl OciDistributionTransport {
    /// Create a transport that talks HTTPS.
    pub fn new() -> Self {
        Self::with_protocol(ClientProtocol::Https)
    }

    /// Create a transport that talks plain HTTP when `allow_plain_http` is set.
    pub fn with_plain_http(allow_plain_http: bool) -> Self {
        if allow_plain_http {
            Self::with_protocol(ClientProtocol::Http)
        } else {
            Self::new()
        }
    }

    fn with_protocol(protocol: ClientProtocol) -> Self {
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }

    /// Convert a descriptor reference to an oci-distribution Reference.
    fn to_oci_reference(&self, reference: &DescriptorReference) -> Result<Reference> {
        let ref_str = reference.full_reference();
        ref_str.parse::<Reference>().map_err(|e| {
            CanopyError::InvalidReference(format!("Invalid OCI reference '{}': {}", ref_str, e))
        })
    }
}

impl Default for OciDistributionTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OciTransport for OciDistributionTransport {
    async fn resolve_manifest(
        &self,
        reference: &DescriptorReference,
        auth: &RegistryAuth,
    ) -> Result<FetchedManifest> {
        let oci_ref = self.to_oci_reference(reference)?;

        tracing::debug!(reference = %reference, "Pulling manifest");
        let (manifest, digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth.to_oci_auth())
            .await
            .map_err(|e| fetch_failed(reference, "Failed to pull manifest", &e))?;

        Ok(FetchedManifest { digest, manifest })
    }

    async fn pull_blob(
        &self,
        reference: &DescriptorReference,
        layer: &OciDescriptor,
        auth: &RegistryAuth,
    ) -> Result<Vec<u8>> {
        let oci_ref = self.to_oci_reference(reference)?;

        // Blob requests reuse the token cached by an authentication round.
        self.client
            .auth(&oci_ref, &auth.to_oci_auth(), RegistryOperation::Pull)
            .await
            .map_err(|e| fetch_failed(reference, "Failed to authenticate", &e))?;

        tracing::debug!(
            reference = %reference,
            digest = %layer.digest,
            size = layer.size,
            "Pulling blob"
        );
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, layer, &mut data)
            .await
            .map_err(|e| {
                fetch_failed(
                    reference,
                    &format!("Failed to pull blob {}", layer.digest),
                    &e,
                )
            })?;

        Ok(data)
    }
}

/// Wrap a transport error, classifying it as transient or permanent.
fn fetch_failed(
    reference: &DescriptorReference,
    action: &str,
    err: &OciDistributionError,
) -> CanopyError {
    let (kind, status) = classify(err);
    CanopyError::FetchFailed {
        reference: reference.full_reference(),
        kind,
        status,
        message: format!("{}: {}", action, err),
    }
}

/// Decide whether a transport error is worth retrying.
pub(crate) fn classify(err: &OciDistributionError) -> (FetchFailureKind, Option<u16>) {
    match err {
        OciDistributionError::AuthenticationFailure(_) => (FetchFailureKind::Permanent, Some(401)),
        OciDistributionError::UnauthorizedError { .. } => (FetchFailureKind::Permanent, Some(401)),
        OciDistributionError::ImageManifestNotFoundError(_) => {
            (FetchFailureKind::Permanent, Some(404))
        }
        OciDistributionError::ServerError { code, .. } => (status_kind(*code), Some(*code)),
        OciDistributionError::RequestError(e) => {
            let status = e.status().map(|s| s.as_u16());
            if e.is_timeout() || e.is_connect() {
                (FetchFailureKind::Transient, status)
            } else {
                (status.map(status_kind).unwrap_or(FetchFailureKind::Transient), status)
            }
        }
        OciDistributionError::IoError(_) => (FetchFailureKind::Transient, None),
        _ => (FetchFailureKind::Permanent, None),
    }
}

/// 408, 429 and 5xx are worth retrying; everything else is not.
pub(crate) fn status_kind(status: u16) -> FetchFailureKind {
    match status {
        408 | 429 | 500..=599 => FetchFailureKind::Transient,
        _ => FetchFailureKind::Permanent,
    }
}
