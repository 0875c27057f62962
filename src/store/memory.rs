//! In-memory record store, secret store and event sink
//!
//! Mirror the optimistic-concurrency and finalizer semantics of the cluster
//! API closely enough to drive the reconciler without a cluster.

use crate::crd::{NamespaceStore, NamespaceStorePhase};
use crate::domain::ports::{EventSeverity, EventSink, ObjectKey, RecordStore, SecretStore, SystemRecord};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use tracing::debug;

const KIND: &str = "NamespaceStore";

fn key_of(store: &NamespaceStore) -> ObjectKey {
    ObjectKey::new(store.namespace().unwrap_or_default(), store.name_any())
}

// =============================================================================
// Record Store
// =============================================================================

#[derive(Default)]
struct RecordState {
    stores: BTreeMap<ObjectKey, NamespaceStore>,
    systems: BTreeMap<ObjectKey, SystemRecord>,
    next_version: u64,
    next_uid: u64,
    pending_status_conflicts: u32,
    status_history: Vec<(ObjectKey, NamespaceStorePhase)>,
}

impl RecordState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn check_version(&self, key: &ObjectKey, incoming: &NamespaceStore) -> Result<()> {
        let stored = self.stores.get(key).ok_or_else(|| Error::ResourceNotFound {
            kind: KIND.into(),
            name: key.to_string(),
        })?;
        if stored.metadata.resource_version != incoming.metadata.resource_version {
            return Err(Error::Conflict {
                kind: KIND.into(),
                name: key.to_string(),
                reason: format!(
                    "resource version {:?} is stale, current is {:?}",
                    incoming.metadata.resource_version, stored.metadata.resource_version
                ),
            });
        }
        Ok(())
    }
}

/// Record store held in process memory
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<RecordState>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parent storage system
    pub fn insert_system(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock();
        state.next_uid += 1;
        let uid = format!("system-{}", state.next_uid);
        state.systems.insert(
            ObjectKey::new(namespace, name),
            SystemRecord {
                name: name.to_string(),
                uid,
            },
        );
    }

    /// Remove a parent storage system
    pub fn remove_system(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .systems
            .remove(&ObjectKey::new(namespace, name));
    }

    /// Make the next `count` status writes fail with a conflict
    pub fn inject_status_conflicts(&self, count: u32) {
        self.state.lock().pending_status_conflicts = count;
    }

    /// Phases written through `update_status` for one record, in order
    pub fn status_history(&self, key: &ObjectKey) -> Vec<NamespaceStorePhase> {
        self.state
            .lock()
            .status_history
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, phase)| *phase)
            .collect()
    }

    /// Whether a record exists
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.state.lock().stores.contains_key(key)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_store(&self, key: &ObjectKey) -> Result<Option<NamespaceStore>> {
        Ok(self.state.lock().stores.get(key).cloned())
    }

    async fn create_store(&self, store: &NamespaceStore) -> Result<NamespaceStore> {
        let key = key_of(store);
        let mut state = self.state.lock();
        if state.stores.contains_key(&key) {
            return Err(Error::ResourceExists {
                kind: KIND.into(),
                name: key.to_string(),
            });
        }

        let mut created = store.clone();
        created.metadata.resource_version = Some(state.bump());
        created.metadata.generation = Some(1);
        state.next_uid += 1;
        created.metadata.uid = Some(format!("uid-{}", state.next_uid));
        if created.metadata.creation_timestamp.is_none() {
            created.metadata.creation_timestamp = Some(Time(Utc::now()));
        }
        state.stores.insert(key, created.clone());
        Ok(created)
    }

    async fn update_store(&self, store: &NamespaceStore) -> Result<NamespaceStore> {
        let key = key_of(store);
        let mut state = self.state.lock();
        state.check_version(&key, store)?;

        let version = state.bump();
        let Some(stored) = state.stores.get_mut(&key) else {
            return Err(Error::ResourceNotFound {
                kind: KIND.into(),
                name: key.to_string(),
            });
        };
        let deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        let mut generation = stored.metadata.generation.unwrap_or(1);
        if stored.spec != store.spec {
            generation += 1;
        }
        stored.metadata = store.metadata.clone();
        stored.metadata.deletion_timestamp = deletion_timestamp;
        stored.metadata.resource_version = Some(version);
        stored.metadata.generation = Some(generation);
        stored.spec = store.spec.clone();
        let updated = stored.clone();

        if updated.is_being_deleted() && updated.finalizers().is_empty() {
            debug!(store = %key, "last finalizer removed, record deleted");
            state.stores.remove(&key);
        }
        Ok(updated)
    }

    async fn update_status(&self, store: &NamespaceStore) -> Result<NamespaceStore> {
        let key = key_of(store);
        let mut state = self.state.lock();
        if state.pending_status_conflicts > 0 {
            state.pending_status_conflicts -= 1;
            return Err(Error::Conflict {
                kind: KIND.into(),
                name: key.to_string(),
                reason: "injected conflict".into(),
            });
        }
        state.check_version(&key, store)?;

        let version = state.bump();
        let phase = store.phase();
        let Some(stored) = state.stores.get_mut(&key) else {
            return Err(Error::ResourceNotFound {
                kind: KIND.into(),
                name: key.to_string(),
            });
        };
        stored.status = store.status.clone();
        stored.metadata.resource_version = Some(version);
        let updated = stored.clone();
        state.status_history.push((key, phase));
        Ok(updated)
    }

    async fn delete_store(&self, key: &ObjectKey) -> Result<()> {
        let mut state = self.state.lock();
        let version = state.bump();
        let Some(stored) = state.stores.get_mut(key) else {
            return Ok(());
        };
        if stored.finalizers().is_empty() {
            state.stores.remove(key);
            return Ok(());
        }
        if stored.metadata.deletion_timestamp.is_none() {
            stored.metadata.deletion_timestamp = Some(Time(Utc::now()));
            stored.metadata.resource_version = Some(version);
            stored.metadata.generation = Some(stored.metadata.generation.unwrap_or(1) + 1);
        }
        Ok(())
    }

    async fn get_system(&self, key: &ObjectKey) -> Result<Option<SystemRecord>> {
        Ok(self.state.lock().systems.get(key).cloned())
    }
}

// =============================================================================
// Secret Store
// =============================================================================

/// Secret store held in process memory
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<BTreeMap<ObjectKey, BTreeMap<String, String>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.secrets
            .write()
            .insert(ObjectKey::new(namespace, name), data);
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        self.secrets.write().remove(&ObjectKey::new(namespace, name));
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.secrets.read().get(key).cloned())
    }
}

// =============================================================================
// Event Sink
// =============================================================================

/// Event captured by [`RecordingEventSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub store: ObjectKey,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
}

/// Event sink keeping every event in memory
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Events with the given reason
    pub fn count_reason(&self, reason: &str) -> usize {
        self.events.lock().iter().filter(|e| e.reason == reason).count()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(
        &self,
        store: &NamespaceStore,
        severity: EventSeverity,
        reason: &str,
        message: &str,
    ) {
        self.events.lock().push(RecordedEvent {
            store: key_of(store),
            severity,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{NamespaceStoreSpec, NsfsSpec, StoreBackend};
    use assert_matches::assert_matches;

    fn store(name: &str) -> NamespaceStore {
        let mut store = NamespaceStore::new(
            name,
            NamespaceStoreSpec {
                backend: StoreBackend::Nsfs {
                    nsfs: NsfsSpec {
                        fs_root_path: "/data".into(),
                        fs_backend: None,
                    },
                },
            },
        );
        store.metadata.namespace = Some("noobaa".into());
        store
    }

    #[test]
    fn test_stale_update_conflicts() {
        tokio_test::block_on(async {
            let records = InMemoryRecordStore::new();
            let created = records.create_store(&store("a")).await.unwrap();

            let mut first = created.clone();
            first.add_finalizer("noobaa.io/finalizer");
            records.update_store(&first).await.unwrap();

            let err = records.update_store(&created).await.unwrap_err();
            assert!(err.is_conflict());
            assert_matches!(err, Error::Conflict { .. });
        });
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let records = InMemoryRecordStore::new();
        let mut created = records.create_store(&store("a")).await.unwrap();
        created.add_finalizer("noobaa.io/finalizer");
        records.update_store(&created).await.unwrap();

        let key = ObjectKey::new("noobaa", "a");
        records.delete_store(&key).await.unwrap();
        let pending = records.get_store(&key).await.unwrap().unwrap();
        assert!(pending.is_being_deleted());

        let mut pending = pending;
        pending.remove_finalizer("noobaa.io/finalizer");
        records.update_store(&pending).await.unwrap();
        assert!(!records.contains(&key));

        // Deleting a missing record succeeds
        records.delete_store(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_generation_moves_with_spec_and_deletion() {
        let records = InMemoryRecordStore::new();
        let created = records.create_store(&store("a")).await.unwrap();
        assert_eq!(created.metadata.generation, Some(1));

        let mut meta_only = created.clone();
        meta_only.add_finalizer("noobaa.io/finalizer");
        let updated = records.update_store(&meta_only).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(1));

        let mut status_only = updated.clone();
        status_only.status_or_default().phase = NamespaceStorePhase::Ready;
        let updated = records.update_status(&status_only).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(1));

        let mut edited = updated.clone();
        if let StoreBackend::Nsfs { nsfs } = &mut edited.spec.backend {
            nsfs.fs_root_path = "/other".into();
        }
        let updated = records.update_store(&edited).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(2));

        let key = ObjectKey::new("noobaa", "a");
        records.delete_store(&key).await.unwrap();
        let pending = records.get_store(&key).await.unwrap().unwrap();
        assert_eq!(pending.metadata.generation, Some(3));
    }

    #[tokio::test]
    async fn test_status_update_keeps_metadata() {
        let records = InMemoryRecordStore::new();
        let mut created = records.create_store(&store("a")).await.unwrap();
        created.status_or_default().phase = NamespaceStorePhase::Verifying;
        created.labels_mut().insert("ignored".into(), "yes".into());

        let updated = records.update_status(&created).await.unwrap();
        assert_eq!(updated.phase(), NamespaceStorePhase::Verifying);
        assert!(updated.labels().get("ignored").is_none());
        assert_eq!(
            records.status_history(&ObjectKey::new("noobaa", "a")),
            vec![NamespaceStorePhase::Verifying]
        );
    }
}
