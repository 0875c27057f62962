//! Controller wiring
//!
//! Runs the reconciler under a `kube::runtime::Controller`, which watches
//! NamespaceStore records and serializes reconciles per object.
//!
//! Watch events are filtered down to changes of the spec generation, the
//! deletion mark or the object identity. The operator's own status writes
//! change none of these and therefore do not trigger another reconcile.

use crate::crd::NamespaceStore;
use crate::domain::ports::ObjectKey;
use crate::error::{Error, Result};
use crate::reconciler::{NamespaceStoreReconciler, ReconcileOutcome};
use futures::StreamExt;
use kube::{
    runtime::{controller::Action, reflector, watcher, Controller, WatchStreamExt},
    Api, Client, ResourceExt,
};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name reported on events and logs
pub const CONTROLLER_NAME: &str = "namespacestore-controller";

/// Watch NamespaceStores and reconcile until a termination signal arrives
pub async fn run(
    client: Client,
    reconciler: Arc<NamespaceStoreReconciler>,
    watch_namespace: Option<String>,
) -> Result<()> {
    let api: Api<NamespaceStore> = match &watch_namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    info!(
        namespace = watch_namespace.as_deref().unwrap_or("<all>"),
        "Starting NamespaceStore controller"
    );

    let (reader, writer) = reflector::store();
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(change_key);

    Controller::for_stream(stream, reader)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(store = %obj, ?action, "reconciled"),
                Err(e) => warn!(error = %e, "controller error"),
            }
        })
        .await;

    info!("NamespaceStore controller stopped");
    Ok(())
}

async fn reconcile(
    store: Arc<NamespaceStore>,
    ctx: Arc<NamespaceStoreReconciler>,
) -> std::result::Result<Action, Error> {
    let key = ObjectKey::new(store.namespace().unwrap_or_default(), store.name_any());
    let outcome = ctx.reconcile(&key).await;
    Ok(to_action(outcome))
}

/// The reconciler never returns errors; this only covers failures of the
/// controller machinery itself.
fn error_policy(
    store: Arc<NamespaceStore>,
    error: &Error,
    ctx: Arc<NamespaceStoreReconciler>,
) -> Action {
    warn!(store = %store.name_any(), error = %error, "reconcile failed");
    Action::requeue(ctx.config().requeue_after)
}

/// Key of the fields whose change warrants a reconcile
fn change_key(store: &NamespaceStore) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    store.metadata.uid.hash(&mut hasher);
    store.metadata.generation.hash(&mut hasher);
    store.metadata.deletion_timestamp.is_some().hash(&mut hasher);
    Some(hasher.finish())
}

fn to_action(outcome: ReconcileOutcome) -> Action {
    match outcome.requeue_after {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}
