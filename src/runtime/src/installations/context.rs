//! Visibility context of an installation.
//!
//! An installation may exchange data with its parent and its siblings. Both
//! are found from metadata on the nodes themselves:
//!
//! - root installations (no owner reference) see every other root
//!   installation of their namespace as siblings and have no parent
//! - other installations see their parent, found by owner reference, and
//!   the parent's other child references, in recorded order

use std::sync::Arc;

use canopy_core::cancel::{cancellable, CancellationToken};
use canopy_core::error::Result;
use canopy_core::installation::{InstallationNode, ObjectReference};
use futures::future::join_all;

use super::store::InstallationStore;

/// Predicate a root installation must satisfy to be listed as a sibling.
pub type RootFilter = Arc<dyn Fn(&InstallationNode) -> bool + Send + Sync>;

/// The installations visible to one installation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    /// The encompassing installation; `None` for root installations
    pub parent: Option<InstallationNode>,
    /// Installations sharing the same parent, never including the
    /// installation itself
    pub siblings: Vec<InstallationNode>,
}

impl Context {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn sibling_names(&self) -> Vec<&str> {
        self.siblings.iter().map(|s| s.name.as_str()).collect()
    }

    /// Look up a visible sibling by name.
    pub fn sibling(&self, name: &str) -> Option<&InstallationNode> {
        self.siblings.iter().find(|s| s.name == name)
    }
}

/// Computes visibility contexts from a name-indexed installation store.
pub struct ContextResolver {
    store: Arc<dyn InstallationStore>,
    tolerate_missing_siblings: bool,
    root_filter: Option<RootFilter>,
}

impl ContextResolver {
    pub fn new(store: Arc<dyn InstallationStore>) -> Self {
        Self {
            store,
            tolerate_missing_siblings: false,
            root_filter: None,
        }
    }

    /// Skip child references whose installation no longer exists instead
    /// of failing.
    pub fn tolerate_missing_siblings(mut self, tolerate: bool) -> Self {
        self.tolerate_missing_siblings = tolerate;
        self
    }

    /// Only list root installations accepted by `filter` as root siblings.
    pub fn with_root_filter(
        mut self,
        filter: impl Fn(&InstallationNode) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.root_filter = Some(Arc::new(filter));
        self
    }

    /// Determine the parent and siblings of `node`.
    pub async fn determine_context(
        &self,
        node: &InstallationNode,
        cancel: &CancellationToken,
    ) -> Result<Context> {
        let installation = node.key().to_string();

        if node.is_root() {
            let siblings = self
                .root_siblings(node, cancel)
                .await
                .map_err(|e| e.within_installation(installation.clone()))?;
            tracing::debug!(
                installation = %installation,
                siblings = siblings.len(),
                "Determined root context"
            );
            return Ok(Context {
                parent: None,
                siblings,
            });
        }

        let parent = get_parent(self.store.as_ref(), node, cancel).await?;
        let siblings = match &parent {
            Some(parent) => self
                .child_siblings(node, parent, cancel)
                .await
                .map_err(|e| e.within_installation(installation.clone()))?,
            None => Vec::new(),
        };
        tracing::debug!(
            installation = %installation,
            parent = ?node.owner_reference,
            siblings = siblings.len(),
            "Determined context"
        );
        Ok(Context { parent, siblings })
    }

    async fn root_siblings(
        &self,
        node: &InstallationNode,
        cancel: &CancellationToken,
    ) -> Result<Vec<InstallationNode>> {
        let filter = self.root_filter.clone();
        let exclude = move |candidate: &InstallationNode| {
            candidate.name == node.name || filter.as_ref().is_some_and(|accept| !accept(candidate))
        };
        cancellable(
            cancel,
            "list root installations",
            self.store.list_roots(&node.namespace, &exclude),
        )
        .await
    }

    async fn child_siblings(
        &self,
        node: &InstallationNode,
        parent: &InstallationNode,
        cancel: &CancellationToken,
    ) -> Result<Vec<InstallationNode>> {
        let lookups = parent
            .child_references
            .iter()
            .filter(|child| child.reference.name != node.name)
            .map(|child| async move {
                let result = cancellable(
                    cancel,
                    "get sibling installation",
                    self.store.get(&child.reference),
                )
                .await;
                (&child.reference, result)
            });

        let mut siblings = Vec::with_capacity(parent.child_references.len());
        for (key, result) in join_all(lookups).await {
            match result {
                Ok(sibling) => siblings.push(sibling),
                Err(e) if self.tolerate_missing_siblings && e.is_not_found() => {
                    tracing::warn!(
                        installation = %node.key(),
                        sibling = %key,
                        "Skipping missing sibling installation"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(siblings)
    }
}

/// Get the parent of `node`; `None` exactly when `node` is a root.
pub async fn get_parent(
    store: &dyn InstallationStore,
    node: &InstallationNode,
    cancel: &CancellationToken,
) -> Result<Option<InstallationNode>> {
    let Some(key) = node.parent_key() else {
        return Ok(None);
    };
    fetch_parent(store, &key, cancel)
        .await
        .map(Some)
        .map_err(|e| e.within_installation(node.key().to_string()))
}

async fn fetch_parent(
    store: &dyn InstallationStore,
    key: &ObjectReference,
    cancel: &CancellationToken,
) -> Result<InstallationNode> {
    cancellable(cancel, "get parent installation", store.get(key)).await
}
