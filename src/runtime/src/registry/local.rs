//! Local filesystem registry backend.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/
//!   <component name>/
//!     <version>/
//!       component-descriptor.yaml
//!       blobs/
//!         <filename>
//! ```

use std::path::{Component as PathComponent, Path, PathBuf};

use canopy_core::cancel::{cancellable, CancellationToken};
use canopy_core::descriptor::{
    ComponentDescriptor, ComponentReference, RepositoryContext, Resource,
    LOCAL_FILESYSTEM_BLOB_TYPE,
};
use canopy_core::error::{CanopyError, Result};

/// File name of the descriptor document inside a version directory.
pub const DESCRIPTOR_FILE_NAME: &str = "component-descriptor.yaml";

/// Directory holding local resource blobs inside a version directory.
pub const BLOBS_DIR_NAME: &str = "blobs";

/// Resolves component descriptors from a directory snapshot.
#[derive(Debug, Clone)]
pub struct LocalFilesystemBackend {
    root: PathBuf,
}

impl LocalFilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read and decode the descriptor of `reference`.
    ///
    /// `location` becomes the effective repository context of the result.
    pub async fn resolve(
        &self,
        location: &RepositoryContext,
        reference: &ComponentReference,
        cancel: &CancellationToken,
    ) -> Result<ComponentDescriptor> {
        let path = self.version_dir(reference)?.join(DESCRIPTOR_FILE_NAME);
        tracing::debug!(
            component = %reference,
            path = %path.display(),
            "Reading local component descriptor"
        );

        let data = cancellable(cancel, "read local component descriptor", async {
            read_file(&path, "component descriptor", &reference.to_string()).await
        })
        .await?;

        let mut descriptor = ComponentDescriptor::decode(&data, &path.display().to_string())?;
        descriptor.inject_repository_context(location);
        Ok(descriptor)
    }

    /// Read the blob of a `localFilesystemBlob` resource of `descriptor`.
    pub async fn fetch_blob(
        &self,
        descriptor: &ComponentDescriptor,
        resource: &Resource,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        if resource.access.access_type != LOCAL_FILESYSTEM_BLOB_TYPE {
            return Err(CanopyError::UnsupportedBackend(format!(
                "Resource '{}' has access type '{}', the local backend only serves '{}'",
                resource.name, resource.access.access_type, LOCAL_FILESYSTEM_BLOB_TYPE
            )));
        }
        let filename = resource.access.attribute("filename").ok_or_else(|| {
            CanopyError::Malformed {
                reference: descriptor.reference().to_string(),
                message: format!("Resource '{}' has no filename", resource.name),
            }
        })?;
        validate_relative(filename, "blob filename")?;

        let path = self
            .version_dir(&descriptor.reference())?
            .join(BLOBS_DIR_NAME)
            .join(filename);
        tracing::debug!(
            resource = %resource.name,
            path = %path.display(),
            "Reading local resource blob"
        );

        cancellable(cancel, "read local resource blob", async {
            read_file(&path, "resource blob", &resource.name).await
        })
        .await
    }

    /// `<root>/<name>/<version>`, refusing anything that would escape the root.
    fn version_dir(&self, reference: &ComponentReference) -> Result<PathBuf> {
        validate_relative(&reference.name, "component name")?;
        if reference.version.contains('/') || reference.version.contains('\\') {
            return Err(CanopyError::InvalidReference(format!(
                "Invalid component version '{}'",
                reference.version
            )));
        }
        validate_relative(&reference.version, "component version")?;
        Ok(self.root.join(&reference.name).join(&reference.version))
    }
}

fn validate_relative(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CanopyError::InvalidReference(format!("Empty {}", what)));
    }
    let escapes = Path::new(value)
        .components()
        .any(|c| !matches!(c, PathComponent::Normal(_)));
    if escapes || value.split('/').any(|s| s.is_empty()) {
        return Err(CanopyError::InvalidReference(format!(
            "Invalid {} '{}'",
            what, value
        )));
    }
    Ok(())
}

async fn read_file(path: &Path, kind: &'static str, name: &str) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(CanopyError::not_found(kind, name))
        }
        Err(e) => Err(CanopyError::IoError(e)),
    }
}
