//! NamespaceStore CRD
//!
//! Declares an external storage target (cloud bucket, S3-compatible endpoint
//! or local filesystem) that the storage system should expose as a namespace
//! resource.

use super::condition::{Condition, ConditionStatus, ConditionType};
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer set on every NamespaceStore managed by the operator
pub const FINALIZER: &str = "noobaa.io/finalizer";

/// Label key/value stamped on every managed NamespaceStore
pub const APP_LABEL_KEY: &str = "app";
pub const APP_LABEL_VALUE: &str = "noobaa";

// =============================================================================
// NamespaceStore CRD
// =============================================================================

/// NamespaceStore describes an external storage target that is registered in
/// the storage system as a namespace resource.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "noobaa.io",
    version = "v1alpha1",
    kind = "NamespaceStore",
    plural = "namespacestores",
    shortname = "nsstore",
    status = "NamespaceStoreStatus",
    printcolumn = r#"{"name": "Type", "type": "string", "jsonPath": ".spec.type"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStoreSpec {
    /// Store type and its parameter block
    #[serde(flatten)]
    pub backend: StoreBackend,
}

// =============================================================================
// Store Types
// =============================================================================

/// Closed set of store types. Each variant carries only its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StoreBackend {
    AwsS3 {
        #[serde(rename = "awsS3")]
        aws_s3: AwsS3Spec,
    },
    S3Compatible {
        #[serde(rename = "s3Compatible")]
        s3_compatible: S3CompatibleSpec,
    },
    IbmCos {
        #[serde(rename = "ibmCos")]
        ibm_cos: S3CompatibleSpec,
    },
    AzureBlob {
        #[serde(rename = "azureBlob")]
        azure_blob: AzureBlobSpec,
    },
    Nsfs {
        nsfs: NsfsSpec,
    },
    /// Any discriminator the operator does not know
    #[serde(other)]
    Unsupported,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::AwsS3 { .. } => write!(f, "aws-s3"),
            StoreBackend::S3Compatible { .. } => write!(f, "s3-compatible"),
            StoreBackend::IbmCos { .. } => write!(f, "ibm-cos"),
            StoreBackend::AzureBlob { .. } => write!(f, "azure-blob"),
            StoreBackend::Nsfs { .. } => write!(f, "nsfs"),
            StoreBackend::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Reference to the secret holding the store credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRef {
    pub name: String,
    /// Defaults to the namespace of the NamespaceStore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// AWS S3 parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsS3Spec {
    /// Bucket to expose; defaults to the NamespaceStore name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<CredentialRef>,

    /// Region, e.g. us-east-2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Use plain http
    #[serde(default)]
    pub ssl_disabled: bool,
}

/// S3-compatible (and IBM COS) parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3CompatibleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<CredentialRef>,

    /// Endpoint URL; the scheme defaults to https
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// "v2" or "v4"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_version: Option<String>,
}

/// Azure blob parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureBlobSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_blob_container: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<CredentialRef>,
}

/// Local filesystem parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NsfsSpec {
    /// Root path of the export
    pub fs_root_path: String,

    /// Filesystem backend hint: CEPH_FS, GPFS, NFSv4
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_backend: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of the NamespaceStore
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStoreStatus {
    /// Current phase
    #[serde(default)]
    pub phase: NamespaceStorePhase,

    /// Conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Mode reported by the storage system for the namespace resource
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,

    /// Generation of the spec the last settled phase was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// NamespaceStore lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum NamespaceStorePhase {
    #[default]
    New,
    Verifying,
    Connecting,
    Creating,
    Ready,
    Rejected,
    Deleting,
}

impl std::fmt::Display for NamespaceStorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceStorePhase::New => write!(f, "New"),
            NamespaceStorePhase::Verifying => write!(f, "Verifying"),
            NamespaceStorePhase::Connecting => write!(f, "Connecting"),
            NamespaceStorePhase::Creating => write!(f, "Creating"),
            NamespaceStorePhase::Ready => write!(f, "Ready"),
            NamespaceStorePhase::Rejected => write!(f, "Rejected"),
            NamespaceStorePhase::Deleting => write!(f, "Deleting"),
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl StoreBackend {
    /// Credential reference declared by the parameter block, if any
    pub fn credential_ref(&self) -> Option<&CredentialRef> {
        match self {
            StoreBackend::AwsS3 { aws_s3 } => aws_s3.secret.as_ref(),
            StoreBackend::S3Compatible { s3_compatible } => s3_compatible.secret.as_ref(),
            StoreBackend::IbmCos { ibm_cos } => ibm_cos.secret.as_ref(),
            StoreBackend::AzureBlob { azure_blob } => azure_blob.secret.as_ref(),
            StoreBackend::Nsfs { .. } | StoreBackend::Unsupported => None,
        }
    }

    /// Target bucket or container declared by the parameter block
    pub fn target_bucket(&self) -> Option<&str> {
        match self {
            StoreBackend::AwsS3 { aws_s3 } => aws_s3.target_bucket.as_deref(),
            StoreBackend::S3Compatible { s3_compatible } => {
                s3_compatible.target_bucket.as_deref()
            }
            StoreBackend::IbmCos { ibm_cos } => ibm_cos.target_bucket.as_deref(),
            StoreBackend::AzureBlob { azure_blob } => azure_blob.target_blob_container.as_deref(),
            StoreBackend::Nsfs { .. } | StoreBackend::Unsupported => None,
        }
    }
}

impl NamespaceStore {
    /// Whether a deletion was requested for this record
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the operator finalizer is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Add the finalizer. Returns true if it was missing.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers_mut().push(finalizer.to_string());
        true
    }

    /// Remove the finalizer. Returns true if it was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let finalizers = self.finalizers_mut();
        let before = finalizers.len();
        finalizers.retain(|f| f != finalizer);
        finalizers.len() != before
    }

    /// Ensure the app label and finalizer are set. Returns true if the
    /// record was modified.
    pub fn ensure_common_meta(&mut self, finalizer: &str) -> bool {
        let mut updated = false;
        let labels = self.labels_mut();
        if labels.get(APP_LABEL_KEY).map(String::as_str) != Some(APP_LABEL_VALUE) {
            labels.insert(APP_LABEL_KEY.to_string(), APP_LABEL_VALUE.to_string());
            updated = true;
        }
        if self.add_finalizer(finalizer) {
            updated = true;
        }
        updated
    }

    /// Creation time of the record
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }

    /// Current phase, `New` when no status has been published yet
    pub fn phase(&self) -> NamespaceStorePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Whether the published status is a final phase computed from the
    /// current generation of the spec
    pub fn is_settled(&self) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        matches!(
            status.phase,
            NamespaceStorePhase::Ready | NamespaceStorePhase::Rejected
        ) && status.observed_generation.is_some()
            && status.observed_generation == self.metadata.generation
    }

    /// Mutable status, created on first access
    pub fn status_or_default(&mut self) -> &mut NamespaceStoreStatus {
        self.status.get_or_insert_with(NamespaceStoreStatus::default)
    }
}

impl NamespaceStoreStatus {
    /// Set a condition, replacing existing if same type.
    ///
    /// A condition with the same status, reason and message is left as is,
    /// timestamps included. The transition time only moves when the
    /// condition status changes.
    pub fn set_condition(&mut self, condition: Condition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status
                && existing.reason == condition.reason
                && existing.message == condition.message
            {
                return;
            }
            let last_transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                condition.last_transition_time
            };
            *existing = Condition {
                last_transition_time,
                ..condition
            };
        } else {
            self.conditions.push(condition);
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, r#type: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Available=True, Progressing=False, Degraded=False, Upgradeable=True
    pub fn set_available(&mut self, reason: &str, message: &str) {
        self.set_condition_set(
            [
                ConditionStatus::True,
                ConditionStatus::False,
                ConditionStatus::False,
                ConditionStatus::True,
            ],
            reason,
            message,
        );
    }

    /// Available=False, Progressing=True, Degraded=False, Upgradeable=False
    pub fn set_progressing(&mut self, reason: &str, message: &str) {
        self.set_condition_set(
            [
                ConditionStatus::False,
                ConditionStatus::True,
                ConditionStatus::False,
                ConditionStatus::False,
            ],
            reason,
            message,
        );
    }

    /// Available=Unknown, Progressing=False, Degraded=True, Upgradeable=Unknown
    pub fn set_error(&mut self, reason: &str, message: &str) {
        self.set_condition_set(
            [
                ConditionStatus::Unknown,
                ConditionStatus::False,
                ConditionStatus::True,
                ConditionStatus::Unknown,
            ],
            reason,
            message,
        );
    }

    fn set_condition_set(&mut self, statuses: [ConditionStatus; 4], reason: &str, message: &str) {
        let now = Utc::now();
        for (r#type, status) in ConditionType::ALL.into_iter().zip(statuses) {
            self.set_condition(Condition::new(r#type, status, reason, message, now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(spec: serde_json::Value) -> NamespaceStore {
        let mut s: NamespaceStore = serde_json::from_value(json!({
            "apiVersion": "noobaa.io/v1alpha1",
            "kind": "NamespaceStore",
            "metadata": { "name": "ns1", "namespace": "noobaa" },
            "spec": spec,
        }))
        .unwrap();
        s.metadata.uid = Some("uid-1".into());
        s
    }

    #[test]
    fn test_spec_deserializes_tagged_block() {
        let s = store(json!({
            "type": "s3-compatible",
            "s3Compatible": {
                "endpoint": "minio.local:9000",
                "signatureVersion": "v4",
                "targetBucket": "data",
                "secret": { "name": "creds" }
            }
        }));
        match &s.spec.backend {
            StoreBackend::S3Compatible { s3_compatible } => {
                assert_eq!(s3_compatible.endpoint.as_deref(), Some("minio.local:9000"));
                assert_eq!(s3_compatible.signature_version.as_deref(), Some("v4"));
            }
            other => panic!("unexpected backend {other}"),
        }
        assert_eq!(s.spec.backend.target_bucket(), Some("data"));
        assert_eq!(s.spec.backend.credential_ref().unwrap().name, "creds");
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let s = store(json!({ "type": "google-cloud-storage" }));
        assert_eq!(s.spec.backend, StoreBackend::Unsupported);
        assert!(s.spec.backend.credential_ref().is_none());
    }

    #[test]
    fn test_ensure_common_meta() {
        let mut s = store(json!({ "type": "nsfs", "nsfs": { "fsRootPath": "/exports" } }));
        assert!(s.ensure_common_meta(FINALIZER));
        assert!(s.has_finalizer(FINALIZER));
        assert_eq!(s.labels().get("app").map(String::as_str), Some("noobaa"));
        assert!(!s.ensure_common_meta(FINALIZER));

        assert!(s.remove_finalizer(FINALIZER));
        assert!(!s.remove_finalizer(FINALIZER));
    }

    #[test]
    fn test_condition_transition_time_kept_when_status_unchanged() {
        let mut status = NamespaceStoreStatus::default();
        status.set_progressing("NamespaceStorePhaseVerifying", "phase 1/3");
        let first = status
            .condition(ConditionType::Progressing)
            .and_then(|c| c.last_transition_time);

        status.set_progressing("NamespaceStorePhaseConnecting", "phase 2/3");
        let progressing = status.condition(ConditionType::Progressing).unwrap();
        assert_eq!(progressing.last_transition_time, first);
        assert_eq!(progressing.reason.as_deref(), Some("NamespaceStorePhaseConnecting"));

        status.set_available("NamespaceStorePhaseReady", "ready");
        assert_eq!(status.conditions.len(), 4);
        assert_eq!(
            status.condition(ConditionType::Available).unwrap().status,
            ConditionStatus::True
        );
    }

    #[test]
    fn test_unchanged_condition_keeps_heartbeat() {
        let mut status = NamespaceStoreStatus::default();
        status.set_available("NamespaceStorePhaseReady", "ready");
        let before = status.clone();

        status.set_available("NamespaceStorePhaseReady", "ready");
        assert_eq!(status, before);

        status.set_available("NamespaceStorePhaseReady", "ready again");
        assert_ne!(status, before);
    }

    #[test]
    fn test_settled_follows_generation() {
        let mut s = store(json!({ "type": "nsfs", "nsfs": { "fsRootPath": "/exports" } }));
        s.metadata.generation = Some(2);
        assert!(!s.is_settled());

        let status = s.status_or_default();
        status.phase = NamespaceStorePhase::Ready;
        status.observed_generation = Some(2);
        assert!(s.is_settled());

        s.metadata.generation = Some(3);
        assert!(!s.is_settled());

        s.metadata.generation = Some(2);
        s.status_or_default().phase = NamespaceStorePhase::Creating;
        assert!(!s.is_settled());
    }

    #[test]
    fn test_phase_defaults_to_new() {
        let s = store(json!({ "type": "nsfs", "nsfs": { "fsRootPath": "/exports" } }));
        assert_eq!(s.phase(), NamespaceStorePhase::New);
    }
}
