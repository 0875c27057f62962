//! Kubernetes adapters for the record store, secret store and event sink

use crate::crd::NamespaceStore;
use crate::domain::ports::{EventSeverity, EventSink, ObjectKey, RecordStore, SecretStore, SystemRecord};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, DeleteParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Group, version and kind of the parent storage system
pub const SYSTEM_GROUP: &str = "noobaa.io";
pub const SYSTEM_VERSION: &str = "v1alpha1";
pub const SYSTEM_KIND: &str = "NooBaa";

/// Map API status codes onto the operator's conflict and not-found variants
fn map_kube_error(kind: &str, key: &ObjectKey, err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
            kind: kind.to_string(),
            name: key.to_string(),
            reason: resp.message.clone(),
        },
        kube::Error::Api(resp) if resp.code == 404 => Error::ResourceNotFound {
            kind: kind.to_string(),
            name: key.to_string(),
        },
        _ => Error::Kube(err),
    }
}

fn key_of(store: &NamespaceStore) -> ObjectKey {
    ObjectKey::new(store.namespace().unwrap_or_default(), store.name_any())
}

// =============================================================================
// Record Store
// =============================================================================

/// NamespaceStore records and NooBaa systems read through the API server
#[derive(Clone)]
pub struct KubeRecordStore {
    client: Client,
    system_resource: ApiResource,
}

impl KubeRecordStore {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(SYSTEM_GROUP, SYSTEM_VERSION, SYSTEM_KIND);
        Self {
            client,
            system_resource: ApiResource::from_gvk(&gvk),
        }
    }

    fn stores(&self, namespace: &str) -> Api<NamespaceStore> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl RecordStore for KubeRecordStore {
    async fn get_store(&self, key: &ObjectKey) -> Result<Option<NamespaceStore>> {
        self.stores(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error("NamespaceStore", key, e))
    }

    async fn create_store(&self, store: &NamespaceStore) -> Result<NamespaceStore> {
        let key = key_of(store);
        self.stores(&key.namespace)
            .create(&PostParams::default(), store)
            .await
            .map_err(|e| map_kube_error("NamespaceStore", &key, e))
    }

    async fn update_store(&self, store: &NamespaceStore) -> Result<NamespaceStore> {
        let key = key_of(store);
        self.stores(&key.namespace)
            .replace(&key.name, &PostParams::default(), store)
            .await
            .map_err(|e| map_kube_error("NamespaceStore", &key, e))
    }

    async fn update_status(&self, store: &NamespaceStore) -> Result<NamespaceStore> {
        let key = key_of(store);
        let body = serde_json::to_vec(store)?;
        self.stores(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| map_kube_error("NamespaceStore", &key, e))
    }

    async fn delete_store(&self, key: &ObjectKey) -> Result<()> {
        match self
            .stores(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error("NamespaceStore", key, e))
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_system(&self, key: &ObjectKey) -> Result<Option<SystemRecord>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &key.namespace, &self.system_resource);
        let system = api
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error(SYSTEM_KIND, key, e))?;

        Ok(system.as_ref().and_then(system_record))
    }
}

/// A system counts as present while it has a uid, including while its own
/// deletion is pending
fn system_record(system: &DynamicObject) -> Option<SystemRecord> {
    let uid = system.uid().filter(|uid| !uid.is_empty())?;
    Some(SystemRecord {
        name: system.name_any(),
        uid,
    })
}

// =============================================================================
// Secret Store
// =============================================================================

/// Credentials read from core Secrets
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Merge binary `data` and plain `stringData`; `stringData` wins
pub fn secret_string_data(secret: &Secret) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect();
    if let Some(string_data) = &secret.string_data {
        out.extend(string_data.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    out
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        let secret = api
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error("Secret", key, e))?;
        Ok(secret.as_ref().map(secret_string_data))
    }
}

// =============================================================================
// Event Sink
// =============================================================================

/// Kubernetes events attached to the NamespaceStore
#[derive(Clone)]
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    pub fn new(client: Client, controller: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(
        &self,
        store: &NamespaceStore,
        severity: EventSeverity,
        reason: &str,
        message: &str,
    ) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            store.object_ref(&()),
        );
        let type_ = match severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        };
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };

        match recorder.publish(event).await {
            Ok(()) => debug!(store = %key_of(store), reason, "published event"),
            Err(e) => warn!(store = %key_of(store), reason, error = %e, "failed to publish event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::ByteString;

    #[test]
    fn test_secret_string_data_merges() {
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("AWS_ACCESS_KEY_ID".to_string(), ByteString(b"from-data".to_vec())),
                ("AWS_SECRET_ACCESS_KEY".to_string(), ByteString(b"secret".to_vec())),
            ])),
            string_data: Some(BTreeMap::from([(
                "AWS_ACCESS_KEY_ID".to_string(),
                "from-string-data".to_string(),
            )])),
            ..Default::default()
        };

        let merged = secret_string_data(&secret);
        assert_eq!(merged["AWS_ACCESS_KEY_ID"], "from-string-data");
        assert_eq!(merged["AWS_SECRET_ACCESS_KEY"], "secret");
    }

    #[test]
    fn test_empty_secret() {
        assert!(secret_string_data(&Secret::default()).is_empty());
    }

    fn noobaa_system(uid: Option<&str>) -> DynamicObject {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            SYSTEM_GROUP,
            SYSTEM_VERSION,
            SYSTEM_KIND,
        ));
        let mut system = DynamicObject::new("noobaa", &resource).within("noobaa");
        system.metadata.uid = uid.map(String::from);
        system
    }

    #[test]
    fn test_system_being_deleted_is_still_present() {
        let mut system = noobaa_system(Some("system-uid"));
        system.metadata.deletion_timestamp = Some(Time(Utc::now()));

        let record = system_record(&system).unwrap();
        assert_eq!(record.name, "noobaa");
        assert_eq!(record.uid, "system-uid");
    }

    #[test]
    fn test_system_without_uid_is_missing() {
        assert!(system_record(&noobaa_system(None)).is_none());
        assert!(system_record(&noobaa_system(Some(""))).is_none());
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "the object has been modified".into(),
            reason: "Conflict".into(),
            code,
        })
    }

    #[test]
    fn test_map_kube_error() {
        let key = ObjectKey::new("noobaa", "ns1");
        assert!(map_kube_error("NamespaceStore", &key, api_error(409)).is_conflict());
        assert!(map_kube_error("NamespaceStore", &key, api_error(404)).is_not_found());
        assert!(matches!(
            map_kube_error("NamespaceStore", &key, api_error(500)),
            Error::Kube(_)
        ));
    }
}
