//! Canonical component descriptor references.
//!
//! Every reference string in Canopy is built here, so the same
//! `{location, name, version}` triple always maps to the same cache key:
//!
//! - `registry.example.com` + `example.com/foo` + `v1.0.0`
//!   → `registry.example.com/component-descriptors/example.com/foo:v1.0.0`
//! - `https://registry.example.com/base/` + `foo` + `1.2.3`
//!   → `registry.example.com/base/component-descriptors/foo:1.2.3`

use std::fmt;

use canopy_core::descriptor::RepositoryContext;
use canopy_core::error::{CanopyError, Result};

/// Repository namespace component descriptors are stored under.
pub const COMPONENT_DESCRIPTOR_NAMESPACE: &str = "component-descriptors";

/// Parsed canonical reference of a component descriptor artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorReference {
    /// Registry hostname, possibly with port (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path below the registry
    pub repository: String,
    /// Component version used as tag
    pub tag: String,
}

impl DescriptorReference {
    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl fmt::Display for DescriptorReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Build the canonical reference of a component descriptor.
///
/// Pure: no I/O, identical inputs yield identical output.
pub fn build_reference(
    location: &RepositoryContext,
    name: &str,
    version: &str,
) -> Result<DescriptorReference> {
    let base = normalize_base_url(&location.base_url)?;
    validate_name(name)?;
    validate_version(version)?;

    let (registry, prefix) = match base.split_once('/') {
        Some((registry, prefix)) => (registry, Some(prefix)),
        None => (base.as_str(), None),
    };
    if registry.is_empty() {
        return Err(CanopyError::InvalidReference(format!(
            "Missing registry host in base URL '{}'",
            location.base_url
        )));
    }

    let repository = match prefix {
        Some(prefix) => format!("{}/{}/{}", prefix, COMPONENT_DESCRIPTOR_NAMESPACE, name),
        None => format!("{}/{}", COMPONENT_DESCRIPTOR_NAMESPACE, name),
    };

    Ok(DescriptorReference {
        registry: registry.to_string(),
        repository,
        tag: version.to_string(),
    })
}

/// Shorthand for `build_reference(..)?.full_reference()`.
pub fn reference_string(location: &RepositoryContext, name: &str, version: &str) -> Result<String> {
    Ok(build_reference(location, name, version)?.full_reference())
}

/// Strip scheme, whitespace and trailing slashes from a base URL.
fn normalize_base_url(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let base = without_scheme.trim_end_matches('/');
    if base.is_empty() {
        return Err(CanopyError::InvalidReference(
            "Empty repository base URL".to_string(),
        ));
    }
    if base.split('/').any(|segment| segment.is_empty()) {
        return Err(CanopyError::InvalidReference(format!(
            "Empty path segment in base URL '{}'",
            base_url
        )));
    }
    if base.chars().any(char::is_whitespace) || base.contains('@') {
        return Err(CanopyError::InvalidReference(format!(
            "Invalid base URL '{}'",
            base_url
        )));
    }
    Ok(base.to_string())
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CanopyError::InvalidReference(
            "Empty component name".to_string(),
        ));
    }
    for segment in name.split('/') {
        if segment.is_empty() {
            return Err(CanopyError::InvalidReference(format!(
                "Empty path segment in component name '{}'",
                name
            )));
        }
        if segment == "." || segment == ".." || !is_valid_segment(segment) {
            return Err(CanopyError::InvalidReference(format!(
                "Invalid component name '{}'",
                name
            )));
        }
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() {
        return Err(CanopyError::InvalidReference(
            "Empty component version".to_string(),
        ));
    }
    if version.contains('/') || !is_valid_segment(version) {
        return Err(CanopyError::InvalidReference(format!(
            "Invalid component version '{}'",
            version
        )));
    }
    Ok(())
}

fn is_valid_segment(segment: &str) -> bool {
    !segment
        .chars()
        .any(|c| c.is_whitespace() || c == ':' || c == '@')
}
