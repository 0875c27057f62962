//! NamespaceStore Reconciler
//!
//! Drives a NamespaceStore record toward Ready or Rejected:
//! - Verifying: parent system and credentials exist
//! - Connecting: read the storage system, resolve the desired connection
//! - Creating: register the connection and the namespace resource
//!
//! Every call re-executes from Verifying. Nothing is carried between calls
//! except what is persisted in the record and the storage system.
//!
//! A record whose status is already settled on its current generation goes
//! through the same phases without publishing the intermediate ones, and a
//! status identical to the stored one is never written.

pub mod connection;
mod deletion;
mod phases;
pub mod status;

use crate::config::OperatorConfig;
use crate::crd::{NamespaceStore, NamespaceStorePhase, NamespaceStoreStatus};
use crate::domain::ports::{
    ConnectionDescriptor, CreateNamespaceResourceParams, EventSeverity, EventSinkRef,
    ExternalConnectionInfo, NamespaceResourceInfo, ObjectKey, RecordStoreRef,
    RemoteStorageApiRef, SecretStoreRef, SystemInfo, SystemRecord,
};
use crate::error::{combine_errors, Error, ErrorAction, ErrorKind, Result};
use crate::metrics::ReconcileMetrics;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// =============================================================================
// Outcome
// =============================================================================

/// How a reconcile call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Converged to Ready, or to a mode-derived phase
    Converged,
    /// Persistent error, phase Rejected
    Rejected,
    /// Transient error, retried later
    Transient,
    /// Finalizer removed after remote cleanup
    Finalized,
    /// Record missing, nothing to do
    Skipped,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Converged => "converged",
            OutcomeKind::Rejected => "rejected",
            OutcomeKind::Transient => "transient",
            OutcomeKind::Finalized => "finalized",
            OutcomeKind::Skipped => "skipped",
        }
    }
}

/// Result of a reconcile call. Errors are never surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub kind: OutcomeKind,
    /// Requeue delay, `None` means wait for the next change
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    fn done(kind: OutcomeKind) -> Self {
        Self {
            kind,
            requeue_after: None,
        }
    }

    fn requeue(after: Duration) -> Self {
        Self {
            kind: OutcomeKind::Transient,
            requeue_after: Some(after),
        }
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Reconciliation engine for NamespaceStore records.
///
/// Holds only shared ports and immutable configuration, so one instance
/// serves all keys. The host serializes calls per key.
pub struct NamespaceStoreReconciler {
    records: RecordStoreRef,
    secrets: SecretStoreRef,
    events: EventSinkRef,
    remote: RemoteStorageApiRef,
    config: OperatorConfig,
    metrics: Arc<ReconcileMetrics>,
}

impl NamespaceStoreReconciler {
    pub fn new(
        records: RecordStoreRef,
        secrets: SecretStoreRef,
        events: EventSinkRef,
        remote: RemoteStorageApiRef,
        config: OperatorConfig,
        metrics: Arc<ReconcileMetrics>,
    ) -> Self {
        Self {
            records,
            secrets,
            events,
            remote,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<ReconcileMetrics> {
        &self.metrics
    }

    /// Reconcile one record
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome {
        let start = Instant::now();
        let outcome = self.reconcile_inner(key).await;
        self.metrics
            .observe_reconcile(outcome.kind.as_str(), start.elapsed());
        debug!(
            store = %key,
            outcome = outcome.kind.as_str(),
            requeue_after = ?outcome.requeue_after,
            "reconcile finished"
        );
        outcome
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> ReconcileOutcome {
        info!(store = %key, "Start reconciling namespacestore");

        let mut store = match self.records.get_store(key).await {
            Ok(Some(store)) => store,
            Ok(None) => {
                info!(store = %key, "NamespaceStore not found or already deleted, skip reconcile");
                return ReconcileOutcome::done(OutcomeKind::Skipped);
            }
            Err(e) => {
                warn!(store = %key, error = %e, "failed to read NamespaceStore");
                return ReconcileOutcome::requeue(self.config.requeue_after);
            }
        };

        let previous_mode = store
            .status
            .as_ref()
            .map(|s| s.mode.clone())
            .unwrap_or_default();

        if !store.is_being_deleted() && store.ensure_common_meta(&self.config.finalizer) {
            match self.records.update_store(&store).await {
                Ok(updated) => store = updated,
                Err(e) => {
                    error!(store = %key, error = %e, "failed to add mandatory meta fields");
                    return ReconcileOutcome::requeue(self.config.requeue_after);
                }
            }
        }

        let mut run = ReconcileRun::new(self, key.clone(), store);
        let result = match run.load_dependencies().await {
            Ok(()) if run.store.is_being_deleted() => run.reconcile_deletion().await,
            Ok(()) => run.reconcile_phases().await,
            Err(e) => Err(e),
        };

        let (kind, action) = match result {
            Ok(()) if run.finalized => {
                info!(store = %key, "NamespaceStore deleted, finalizer removed");
                return ReconcileOutcome::done(OutcomeKind::Finalized);
            }
            Ok(()) => {
                run.apply_mode(&previous_mode).await;
                run.mark_observed();
                (OutcomeKind::Converged, ErrorAction::NoRequeue)
            }
            Err(e) => {
                let action = e.action(self.config.requeue_after);
                match e.kind() {
                    ErrorKind::Persistent => {
                        let reason = e.reason().unwrap_or("Rejected").to_string();
                        let message = e.to_string();
                        error!(store = %key, reason = %reason, message = %message, "persistent error");
                        run.set_phase(Some(NamespaceStorePhase::Rejected), &reason, &message);
                        run.mark_observed();
                        if run.status_changed() {
                            self.events
                                .publish(&run.store, EventSeverity::Warning, &reason, &message)
                                .await;
                        }
                        (OutcomeKind::Rejected, action)
                    }
                    ErrorKind::Transient => {
                        warn!(store = %key, error = %e, "temporary error");
                        run.set_phase(None, "TemporaryError", &e.to_string());
                        (OutcomeKind::Transient, action)
                    }
                }
            }
        };

        if let Err(e) = run.publish_status().await {
            error!(store = %key, error = %e, "failed to update status");
            return ReconcileOutcome::requeue(self.config.requeue_after);
        }

        match action {
            ErrorAction::RequeueAfter(after) => ReconcileOutcome {
                kind,
                requeue_after: Some(after),
            },
            ErrorAction::NoRequeue => ReconcileOutcome::done(kind),
        }
    }
}

// =============================================================================
// Run Context
// =============================================================================

/// Per-call working state. Dropped at the end of every reconcile.
pub(crate) struct ReconcileRun<'a> {
    ctx: &'a NamespaceStoreReconciler,
    key: ObjectKey,
    store: NamespaceStore,
    system: Option<SystemRecord>,
    secret_ref: Option<ObjectKey>,
    secret: Option<BTreeMap<String, String>>,
    system_info: Option<SystemInfo>,
    resource: Option<NamespaceResourceInfo>,
    connection: Option<ExternalConnectionInfo>,
    desired_connection: Option<ConnectionDescriptor>,
    create_params: Option<CreateNamespaceResourceParams>,
    /// Mode of the namespace resource as read from the storage system
    mode: String,
    /// Status as last read or written
    persisted: Option<NamespaceStoreStatus>,
    /// Intermediate phases are not published
    settled: bool,
    finalized: bool,
}

impl<'a> ReconcileRun<'a> {
    fn new(ctx: &'a NamespaceStoreReconciler, key: ObjectKey, store: NamespaceStore) -> Self {
        let secret_ref = store.spec.backend.credential_ref().map(|r| {
            ObjectKey::new(
                r.namespace
                    .clone()
                    .filter(|ns| !ns.is_empty())
                    .unwrap_or_else(|| key.namespace.clone()),
                r.name.clone(),
            )
        });
        let persisted = store.status.clone();
        let settled = store.is_settled();
        Self {
            ctx,
            key,
            store,
            system: None,
            secret_ref,
            secret: None,
            system_info: None,
            resource: None,
            connection: None,
            desired_connection: None,
            create_params: None,
            mode: String::new(),
            persisted,
            settled,
            finalized: false,
        }
    }

    /// Load the parent system and the credentials secret.
    ///
    /// Absence is recorded, not reported; the phases decide what a missing
    /// dependency means.
    async fn load_dependencies(&mut self) -> Result<()> {
        let system_key = ObjectKey::new(
            self.key.namespace.clone(),
            self.ctx.config.system_name.clone(),
        );
        let system = self.ctx.records.get_system(&system_key).await;

        let secret = match &self.secret_ref {
            Some(secret_key) => self.ctx.secrets.get_secret(secret_key).await,
            None => Ok(None),
        };

        let (system, system_err) = split_result(system);
        let (secret, secret_err) = split_result(secret);
        self.system = system.flatten();
        self.secret = secret.flatten();

        match combine_errors([system_err, secret_err]) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn set_phase(&mut self, phase: Option<NamespaceStorePhase>, reason: &str, message: &str) {
        status::apply_phase(&mut self.store, phase, reason, message);
    }

    /// Enter a forward phase, publishing it unless the record is settled
    async fn enter_phase(
        &mut self,
        phase: NamespaceStorePhase,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        if self.settled {
            debug!(store = %self.key, phase = %phase, "record settled, phase not published");
            return Ok(());
        }
        self.set_phase(Some(phase), reason, message);
        self.publish_status().await
    }

    /// Whether the in-memory status differs from the stored one
    fn status_changed(&self) -> bool {
        self.store.status != self.persisted
    }

    /// Record that the final phase was computed from the current generation
    fn mark_observed(&mut self) {
        let generation = self.store.metadata.generation;
        self.store.status_or_default().observed_generation = generation;
    }

    async fn publish_status(&mut self) -> Result<()> {
        if !self.status_changed() {
            debug!(store = %self.key, "status unchanged, skipping update");
            return Ok(());
        }
        let attempts = self.ctx.config.status_update_attempts;
        let result =
            status::publish_status(self.ctx.records.as_ref(), &mut self.store, attempts).await;
        match &result {
            Ok(()) => self.persisted = self.store.status.clone(),
            Err(_) => self.ctx.metrics.inc_status_failure(),
        }
        result
    }

    /// Whether the record is still inside the credential grace window
    fn is_young(&self) -> bool {
        let Some(created) = self.store.created_at() else {
            return true;
        };
        let age = chrono::Utc::now().signed_duration_since(created);
        match chrono::Duration::from_std(self.ctx.config.grace_period) {
            Ok(grace) => age < grace,
            Err(_) => true,
        }
    }

    fn name(&self) -> String {
        self.store.name_any()
    }

    /// Map the reported mode to a final phase, emitting an event only when
    /// the mode differs from the one last stored.
    async fn apply_mode(&mut self, previous_mode: &str) {
        let mode = self.mode.clone();
        self.store.status_or_default().mode = mode.clone();

        match self.ctx.config.mode_table.lookup(&mode) {
            Some(info) => {
                let reason = format!("NamespaceStorePhase{}", info.phase);
                let message = format!("Namespace store mode: {mode}");
                self.set_phase(Some(info.phase), &reason, &message);
                if mode != previous_mode {
                    self.ctx
                        .events
                        .publish(&self.store, info.severity, &reason, &message)
                        .await;
                }
            }
            None => {
                self.set_phase(
                    Some(NamespaceStorePhase::Ready),
                    "NamespaceStorePhaseReady",
                    "operator completed reconcile - namespace store is ready",
                );
                info!(store = %self.key, "NamespaceStore is ready");
            }
        }
    }
}

fn split_result<T>(result: Result<T>) -> (Option<T>, Option<Error>) {
    match result {
        Ok(v) => (Some(v), None),
        Err(e) => (None, Some(e)),
    }
}
