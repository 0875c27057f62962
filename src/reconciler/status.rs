//! Status Publisher
//!
//! Applies phases and condition sets to a NamespaceStore and writes the
//! status back to the record store, retrying optimistic-concurrency
//! conflicts against a freshly read copy.

use crate::crd::{NamespaceStore, NamespaceStorePhase};
use crate::domain::ports::{ObjectKey, RecordStore};
use crate::error::{Error, Result};
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Key of a NamespaceStore record
pub fn object_key(store: &NamespaceStore) -> ObjectKey {
    ObjectKey::new(store.namespace().unwrap_or_default(), store.name_any())
}

/// Set the phase and the matching condition set.
///
/// `None` keeps the current phase and only records progress, which is how
/// transient errors are reported.
pub fn apply_phase(
    store: &mut NamespaceStore,
    phase: Option<NamespaceStorePhase>,
    reason: &str,
    message: &str,
) {
    let name = store.name_any();
    let status = store.status_or_default();

    let Some(phase) = phase else {
        info!(store = %name, phase = %status.phase, "temporary error during phase");
        status.set_progressing(reason, message);
        return;
    };

    info!(store = %name, phase = %phase, "set phase");
    status.phase = phase;
    match phase {
        NamespaceStorePhase::Ready => status.set_available(reason, message),
        NamespaceStorePhase::Rejected => status.set_error(reason, message),
        _ => status.set_progressing(reason, message),
    }
}

/// Write the status of `store`, retrying conflicts.
///
/// On conflict the record is re-read, the computed status is re-applied on
/// top of it and the write is retried, up to `attempts` writes in total.
/// Exhausting the attempts is reported as a transient error. On success
/// `store` is replaced with the stored copy so later writes carry the new
/// resource version.
pub async fn publish_status(
    records: &dyn RecordStore,
    store: &mut NamespaceStore,
    attempts: u32,
) -> Result<()> {
    let key = object_key(store);
    let status = store.status.clone();
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        match records.update_status(store).await {
            Ok(updated) => {
                *store = updated;
                debug!(store = %key, attempt, "status updated");
                return Ok(());
            }
            Err(e) if e.is_conflict() => {
                warn!(store = %key, attempt, error = %e, "status update conflict");
                if attempt == attempts {
                    break;
                }
                let mut fresh = records.get_store(&key).await?.ok_or_else(|| {
                    Error::ResourceNotFound {
                        kind: "NamespaceStore".into(),
                        name: key.to_string(),
                    }
                })?;
                fresh.status = status.clone();
                *store = fresh;
            }
            Err(e) => {
                warn!(store = %key, error = %e, "status update failed");
                return Err(e);
            }
        }
    }

    Err(Error::transient(format!(
        "NamespaceStore {key} status update conflicted {attempts} times"
    )))
}
