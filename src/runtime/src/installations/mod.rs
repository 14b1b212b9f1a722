//! Installation reconciliation.
//!
//! - `store`: name-indexed installation and pull secret lookups
//! - `context`: parent/sibling visibility of an installation
//! - `setup`: per-reconcile registry configuration
//! - `reconcile`: one reconcile cycle and its outcome

pub mod context;
pub mod reconcile;
pub mod setup;
pub mod store;

pub use context::{get_parent, Context, ContextResolver, RootFilter};
pub use reconcile::{ReconcileDecision, ReconcileOutcome, Reconciler, RECONCILED_CONDITION};
pub use setup::{resolve_installation_descriptor, resolve_secrets, setup_registries};
pub use store::{
    InMemoryInstallationStore, InMemorySecretStore, InstallationFilter, InstallationStore,
    SecretStore,
};
