//! One reconcile cycle of an installation.
//!
//! A cycle configures the registries for the installation, determines its
//! visibility context and resolves its component descriptor. Failures are
//! turned into a decision for the driver: retry later, or record a terminal
//! condition on the installation.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::cancel::CancellationToken;
use canopy_core::condition::{update_condition, Condition, ConditionStatus};
use canopy_core::config::RegistryConfig;
use canopy_core::descriptor::ComponentDescriptor;
use canopy_core::error::{CanopyError, Result};
use canopy_core::installation::InstallationNode;

use super::context::{Context, ContextResolver};
use super::setup::{resolve_installation_descriptor, setup_registries};
use super::store::{InstallationStore, SecretStore};
use crate::cache::ArtifactCache;
use crate::registry::manager::RegistryManager;
use crate::registry::transport::OciTransport;

/// Condition type recording the outcome of the last reconcile.
pub const RECONCILED_CONDITION: &str = "Reconciled";

/// Delay before a transiently failed installation is reconciled again.
pub const DEFAULT_REQUEUE_BACKOFF: Duration = Duration::from_secs(30);

/// Result of a successful reconcile cycle.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub context: Context,
    pub descriptor: ComponentDescriptor,
}

/// What the driver should do after a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileDecision {
    /// The cycle succeeded.
    Done,
    /// Transient failure: reconcile again after the backoff.
    Requeue { after: Duration },
    /// Permanent failure, reported through the condition.
    Terminal(Condition),
}

impl ReconcileDecision {
    /// Classify a failed cycle.
    pub fn from_error(err: &CanopyError) -> Self {
        if err.is_transient() {
            return ReconcileDecision::Requeue {
                after: DEFAULT_REQUEUE_BACKOFF,
            };
        }
        let mut condition = Condition::new(RECONCILED_CONDITION);
        condition.update(
            ConditionStatus::False,
            failure_reason(err.root_cause()),
            err.to_string(),
            err.error_code().into_iter().collect(),
        );
        ReconcileDecision::Terminal(condition)
    }

    pub fn is_requeue(&self) -> bool {
        matches!(self, ReconcileDecision::Requeue { .. })
    }
}

fn failure_reason(err: &CanopyError) -> &'static str {
    match err {
        CanopyError::NotFound { .. } => "NotFound",
        CanopyError::InvalidReference(_) => "InvalidReference",
        CanopyError::UnsupportedBackend(_) => "UnsupportedBackend",
        CanopyError::FetchFailed { .. } => "FetchFailed",
        CanopyError::Malformed { .. } => "MalformedArtifact",
        CanopyError::ConfigError(_) => "ConfigurationProblem",
        _ => "ReconcileFailed",
    }
}

/// Drives reconcile cycles for installations of one store.
///
/// Each reconciler owns its registry manager; reconcilers running on
/// separate tasks share artifacts through a common cache.
pub struct Reconciler {
    registry_config: RegistryConfig,
    installations: Arc<dyn InstallationStore>,
    secrets: Arc<dyn SecretStore>,
    transport: Arc<dyn OciTransport>,
    registries: RegistryManager,
    tolerate_missing_siblings: bool,
}

impl Reconciler {
    pub fn new(
        registry_config: RegistryConfig,
        installations: Arc<dyn InstallationStore>,
        secrets: Arc<dyn SecretStore>,
        transport: Arc<dyn OciTransport>,
        cache: Arc<ArtifactCache>,
    ) -> Self {
        Self {
            registry_config,
            installations,
            secrets,
            transport,
            registries: RegistryManager::new(cache),
            tolerate_missing_siblings: false,
        }
    }

    pub fn tolerate_missing_siblings(mut self, tolerate: bool) -> Self {
        self.tolerate_missing_siblings = tolerate;
        self
    }

    pub fn registries(&self) -> &RegistryManager {
        &self.registries
    }

    /// Run one cycle for `node`.
    pub async fn reconcile(
        &mut self,
        node: &InstallationNode,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        tracing::info!(installation = %node.key(), "Reconciling installation");

        setup_registries(
            &mut self.registries,
            &self.registry_config,
            node,
            self.secrets.as_ref(),
            self.transport.clone(),
            cancel,
        )
        .await?;

        let context = ContextResolver::new(self.installations.clone())
            .tolerate_missing_siblings(self.tolerate_missing_siblings)
            .determine_context(node, cancel)
            .await?;

        let descriptor = resolve_installation_descriptor(&self.registries, node, cancel).await?;

        tracing::info!(
            installation = %node.key(),
            component = %descriptor.reference(),
            siblings = context.siblings.len(),
            "Reconciled installation"
        );
        Ok(ReconcileOutcome {
            context,
            descriptor,
        })
    }

    /// Run one cycle and record its outcome on `node`'s conditions.
    pub async fn reconcile_and_record(
        &mut self,
        node: &mut InstallationNode,
        cancel: &CancellationToken,
    ) -> ReconcileDecision {
        match self.reconcile(node, cancel).await {
            Ok(outcome) => {
                update_condition(
                    &mut node.conditions,
                    RECONCILED_CONDITION,
                    ConditionStatus::True,
                    "Reconciled",
                    format!(
                        "Resolved component descriptor {}",
                        outcome.descriptor.reference()
                    ),
                    Vec::new(),
                );
                ReconcileDecision::Done
            }
            Err(err) => {
                let decision = ReconcileDecision::from_error(&err);
                match &decision {
                    ReconcileDecision::Terminal(condition) => {
                        tracing::warn!(
                            installation = %node.key(),
                            error = %err,
                            "Reconcile failed permanently"
                        );
                        update_condition(
                            &mut node.conditions,
                            RECONCILED_CONDITION,
                            condition.status,
                            condition.reason.clone(),
                            condition.message.clone(),
                            condition.codes.clone(),
                        );
                    }
                    _ => tracing::debug!(
                        installation = %node.key(),
                        error = %err,
                        "Reconcile failed transiently, requeueing"
                    ),
                }
                decision
            }
        }
    }
}
