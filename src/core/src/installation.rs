//! Installation nodes as persisted by the reconciliation driver.
//!
//! Nodes never point at each other directly. A child names its parent
//! through `owner_reference`, a parent lists its children through
//! `child_references`, and every hop is resolved by name through a store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::descriptor::{ComponentDescriptor, ComponentReference, RepositoryContext};

/// Key of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectReference {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl ObjectReference {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// An object reference with a logical name, as recorded in status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedObjectReference {
    pub name: String,
    #[serde(rename = "ref")]
    pub reference: ObjectReference,
}

/// Registry coordinates of an installation's component descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescriptorReference {
    pub repository_context: RepositoryContext,
    pub component_name: String,
    pub version: String,
}

impl ComponentDescriptorReference {
    pub fn component_reference(&self) -> ComponentReference {
        ComponentReference::new(self.component_name.clone(), self.version.clone())
    }
}

/// How an installation obtains its component descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptorDefinition {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ComponentDescriptorReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<ComponentDescriptor>,
}

/// A hierarchical deployment unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationNode {
    pub name: String,
    pub namespace: String,
    /// Name of the owning installation; absent for root installations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_reference: Option<String>,
    /// Installations directly encompassed by this one, in recorded order
    #[serde(default)]
    pub child_references: Vec<NamedObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_descriptor: Option<ComponentDescriptorDefinition>,
    /// Secrets used to authenticate against component registries
    #[serde(default)]
    pub registry_pull_secrets: Vec<ObjectReference>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl InstallationNode {
    /// Create a root installation.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            owner_reference: None,
            child_references: Vec::new(),
            component_descriptor: None,
            registry_pull_secrets: Vec::new(),
            conditions: Vec::new(),
        }
    }

    /// Set the owning installation.
    pub fn owned_by(mut self, parent: impl Into<String>) -> Self {
        self.owner_reference = Some(parent.into());
        self
    }

    /// Append a child reference in this node's namespace.
    pub fn with_child(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.child_references.push(NamedObjectReference {
            name: name.clone(),
            reference: ObjectReference::new(self.namespace.clone(), name),
        });
        self
    }

    pub fn with_component_descriptor(mut self, definition: ComponentDescriptorDefinition) -> Self {
        self.component_descriptor = Some(definition);
        self
    }

    pub fn with_pull_secret(mut self, secret: ObjectReference) -> Self {
        self.registry_pull_secrets.push(secret);
        self
    }

    /// Root-ness depends on the owner reference alone.
    pub fn is_root(&self) -> bool {
        self.owner_reference.is_none()
    }

    pub fn key(&self) -> ObjectReference {
        ObjectReference::new(self.namespace.clone(), self.name.clone())
    }

    /// Key of the parent installation, if any.
    pub fn parent_key(&self) -> Option<ObjectReference> {
        self.owner_reference
            .as_ref()
            .map(|parent| ObjectReference::new(self.namespace.clone(), parent.clone()))
    }

    /// Inline descriptor pinned in the installation's definition.
    pub fn inline_descriptor(&self) -> Option<&ComponentDescriptor> {
        self.component_descriptor
            .as_ref()
            .and_then(|d| d.inline.as_ref())
    }
}

/// Key under which pull secrets carry a docker config document.
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// A secret holding registry credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSecret {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl PullSecret {
    pub fn docker_config(namespace: &str, name: &str, config_json: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            config_json.as_bytes().to_vec(),
        );
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            data,
        }
    }

    pub fn key(&self) -> ObjectReference {
        ObjectReference::new(self.namespace.clone(), self.name.clone())
    }
}
