//! Canopy Core - Installation and component descriptor model
//!
//! This crate provides the data model shared by the Canopy runtime and CLI:
//! installation nodes, component descriptors, repository locations,
//! status conditions, configuration and the error taxonomy.

pub mod cancel;
pub mod condition;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod installation;

// Re-export commonly used types
pub use cancel::{cancellable, with_deadline, CancellationToken, Deadline};
pub use condition::{Condition, ConditionStatus, ErrorCode};
pub use config::{CanopyConfig, LocalRegistryConfig, OciCacheConfig, OciConfiguration, RegistryConfig};
pub use descriptor::{
    Access, ComponentDescriptor, ComponentReference, RepositoryContext, RepositoryKind, Resource,
    ResourceRelation,
};
pub use error::{CanopyError, FetchFailureKind, Result};
pub use installation::{
    ComponentDescriptorDefinition, ComponentDescriptorReference, InstallationNode,
    NamedObjectReference, ObjectReference, PullSecret,
};

/// Canopy version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
