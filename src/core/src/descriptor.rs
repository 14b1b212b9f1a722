//! Component descriptors and repository locations.
//!
//! A component descriptor is a versioned manifest that lists the resources of
//! a named artifact bundle and the repositories it was retrieved from:
//!
//! ```yaml
//! meta:
//!   schemaVersion: v2
//! component:
//!   name: example.com/ingress
//!   version: v0.1.0
//!   provider: internal
//!   repositoryContexts:
//!   - type: ociRegistry
//!     baseUrl: registry.example.com/components
//!   resources:
//!   - name: chart
//!     type: helm
//!     relation: local
//!     access:
//!       type: localFilesystemBlob
//!       filename: chart
//!       mediaType: application/gzip
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};

/// Repository type served by the local filesystem backend.
pub const LOCAL_REPOSITORY_TYPE: &str = "local";

/// Repository type served by the remote OCI backend.
pub const OCI_REGISTRY_TYPE: &str = "ociRegistry";

/// Schema version written when a descriptor omits one.
pub const SCHEMA_VERSION_V2: &str = "v2";

/// Access type of blobs stored next to a descriptor on the local filesystem.
pub const LOCAL_FILESYSTEM_BLOB_TYPE: &str = "localFilesystemBlob";

/// Access type of blobs stored as layers of the descriptor's OCI artifact.
pub const LOCAL_OCI_BLOB_TYPE: &str = "localOciBlob";

/// Access type of resources living in an OCI registry of their own.
pub const OCI_REGISTRY_ACCESS_TYPE: &str = "ociRegistry";

/// Access type of resources downloadable from a URL.
pub const WEB_ACCESS_TYPE: &str = "web";

/// Backend kinds a repository location can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryKind {
    Local,
    OciRegistry,
}

impl RepositoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryKind::Local => LOCAL_REPOSITORY_TYPE,
            RepositoryKind::OciRegistry => OCI_REGISTRY_TYPE,
        }
    }

    /// Parse a repository type string. Unknown types yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            LOCAL_REPOSITORY_TYPE => Some(RepositoryKind::Local),
            OCI_REGISTRY_TYPE => Some(RepositoryKind::OciRegistry),
            _ => None,
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where component descriptors of a given kind are stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryContext {
    /// Repository type, e.g. `ociRegistry` or `local`
    #[serde(rename = "type")]
    pub repository_type: String,
    /// Registry base URL or filesystem root
    pub base_url: String,
}

impl RepositoryContext {
    pub fn new(kind: RepositoryKind, base_url: impl Into<String>) -> Self {
        Self {
            repository_type: kind.as_str().to_string(),
            base_url: base_url.into(),
        }
    }

    pub fn oci_registry(base_url: impl Into<String>) -> Self {
        Self::new(RepositoryKind::OciRegistry, base_url)
    }

    pub fn local(root_path: impl Into<String>) -> Self {
        Self::new(RepositoryKind::Local, root_path)
    }

    /// The backend kind, or `None` for repository types Canopy cannot serve.
    pub fn kind(&self) -> Option<RepositoryKind> {
        RepositoryKind::parse(&self.repository_type)
    }
}

impl fmt::Display for RepositoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.repository_type, self.base_url)
    }
}

/// Name and version of a component inside a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentReference {
    pub name: String,
    pub version: String,
}

impl ComponentReference {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ComponentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Whether a resource is stored with its component or hosted elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceRelation {
    Local,
    External,
}

/// Typed, backend-specific locator of a resource.
///
/// Only `type` is interpreted generically; all other attributes are kept
/// verbatim so unknown access types survive a decode/encode cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Access {
    #[serde(rename = "type")]
    pub access_type: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Access {
    pub fn new(access_type: impl Into<String>) -> Self {
        Self {
            access_type: access_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes
            .insert(key.to_string(), serde_json::Value::String(value.into()));
        self
    }

    pub fn local_filesystem_blob(filename: &str, media_type: &str) -> Self {
        Self::new(LOCAL_FILESYSTEM_BLOB_TYPE)
            .with_attribute("filename", filename)
            .with_attribute("mediaType", media_type)
    }

    pub fn local_oci_blob(digest: &str) -> Self {
        Self::new(LOCAL_OCI_BLOB_TYPE).with_attribute("digest", digest)
    }

    pub fn oci_registry(image_reference: &str) -> Self {
        Self::new(OCI_REGISTRY_ACCESS_TYPE).with_attribute("imageReference", image_reference)
    }

    pub fn web(url: &str) -> Self {
        Self::new(WEB_ACCESS_TYPE).with_attribute("url", url)
    }

    /// String attribute lookup.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// One artifact attached to a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub relation: ResourceRelation,
    pub access: Access,
}

/// Descriptor metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub schema_version: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V2.to_string(),
        }
    }
}

/// The component section of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub repository_contexts: Vec<RepositoryContext>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Fields Canopy does not interpret (sources, component references, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A versioned component manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    #[serde(default)]
    pub meta: Meta,
    pub component: Component,
}

impl ComponentDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            meta: Meta::default(),
            component: Component {
                name: name.into(),
                version: version.into(),
                provider: "internal".to_string(),
                repository_contexts: Vec::new(),
                resources: Vec::new(),
                extra: BTreeMap::new(),
            },
        }
    }

    /// Decode a descriptor document (YAML or JSON).
    ///
    /// `source` names where the bytes came from and is only used for errors.
    pub fn decode(data: &[u8], source: &str) -> Result<Self> {
        let descriptor: ComponentDescriptor =
            serde_yaml::from_slice(data).map_err(|e| CanopyError::Malformed {
                reference: source.to_string(),
                message: format!("Failed to decode component descriptor: {}", e),
            })?;
        if descriptor.component.name.is_empty() || descriptor.component.version.is_empty() {
            return Err(CanopyError::Malformed {
                reference: source.to_string(),
                message: "component descriptor without name or version".to_string(),
            });
        }
        Ok(descriptor)
    }

    /// Encode as YAML, the canonical textual form.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn name(&self) -> &str {
        &self.component.name
    }

    pub fn version(&self) -> &str {
        &self.component.version
    }

    pub fn reference(&self) -> ComponentReference {
        ComponentReference::new(self.name(), self.version())
    }

    pub fn resources(&self) -> &[Resource] {
        &self.component.resources
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.component.resources.iter().find(|r| r.name == name)
    }

    /// The last registered repository context.
    pub fn effective_repository_context(&self) -> Option<&RepositoryContext> {
        self.component.repository_contexts.last()
    }

    /// Make `context` the effective repository context unless it already is.
    pub fn inject_repository_context(&mut self, context: &RepositoryContext) {
        if self.effective_repository_context() != Some(context) {
            self.component.repository_contexts.push(context.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR_YAML: &str = r#"
meta:
  schemaVersion: v2
component:
  name: example.com/ingress
  version: v0.1.0
  provider: internal
  repositoryContexts:
  - type: ociRegistry
    baseUrl: registry.example.com/components
  sources: []
  resources:
  - name: chart
    type: helm
    relation: local
    access:
      type: localFilesystemBlob
      filename: chart
      mediaType: application/gzip
  - name: blueprint
    version: v0.1.0
    type: blueprint
    relation: external
    access:
      type: web
      url: https://example.com/bp.tar.gz
"#;

    #[test]
    fn test_decode_yaml() {
        let cd = ComponentDescriptor::decode(DESCRIPTOR_YAML.as_bytes(), "test").unwrap();
        assert_eq!(cd.name(), "example.com/ingress");
        assert_eq!(cd.version(), "v0.1.0");
        assert_eq!(cd.resources().len(), 2);
        let chart = cd.resource("chart").unwrap();
        assert_eq!(chart.relation, ResourceRelation::Local);
        assert_eq!(chart.access.attribute("filename"), Some("chart"));
        assert!(cd.component.extra.contains_key("sources"));
    }

    #[test]
    fn test_decode_json() {
        let json = r#"{"component":{"name":"a","version":"v1"}}"#;
        let cd = ComponentDescriptor::decode(json.as_bytes(), "test").unwrap();
        assert_eq!(cd.meta.schema_version, "v2");
        assert!(cd.component.repository_contexts.is_empty());
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        let err = ComponentDescriptor::decode(b"::: not yaml", "ref").unwrap_err();
        assert!(matches!(err, CanopyError::Malformed { .. }));
    }

    #[test]
    fn test_decode_missing_name_is_malformed() {
        let json = r#"{"component":{"name":"","version":"v1"}}"#;
        let err = ComponentDescriptor::decode(json.as_bytes(), "ref").unwrap_err();
        assert!(matches!(err, CanopyError::Malformed { .. }));
    }

    #[test]
    fn test_round_trip_preserves_read_fields() {
        let cd = ComponentDescriptor::decode(DESCRIPTOR_YAML.as_bytes(), "test").unwrap();
        let yaml = cd.to_yaml().unwrap();
        let again = ComponentDescriptor::decode(yaml.as_bytes(), "test").unwrap();
        assert_eq!(again, cd);
        assert_eq!(
            again.effective_repository_context(),
            Some(&RepositoryContext::oci_registry("registry.example.com/components"))
        );
        let bp = again.resource("blueprint").unwrap();
        assert_eq!(bp.resource_type, "blueprint");
        assert_eq!(bp.relation, ResourceRelation::External);
        assert_eq!(bp.access.attribute("url"), Some("https://example.com/bp.tar.gz"));
    }

    #[test]
    fn test_inject_repository_context_only_when_not_effective() {
        let mut cd = ComponentDescriptor::new("a", "v1");
        let ctx = RepositoryContext::oci_registry("registry.example.com");
        cd.inject_repository_context(&ctx);
        cd.inject_repository_context(&ctx);
        assert_eq!(cd.component.repository_contexts.len(), 1);

        let other = RepositoryContext::local("/var/components");
        cd.inject_repository_context(&other);
        assert_eq!(cd.effective_repository_context(), Some(&other));
    }

    #[test]
    fn test_repository_kind_parse() {
        assert_eq!(RepositoryKind::parse("ociRegistry"), Some(RepositoryKind::OciRegistry));
        assert_eq!(RepositoryKind::parse("local"), Some(RepositoryKind::Local));
        assert_eq!(RepositoryKind::parse("s3"), None);
        assert_eq!(RepositoryContext::local("/tmp").kind(), Some(RepositoryKind::Local));
    }
}
