//! Domain Ports - Core trait definitions for the NamespaceStore operator
//!
//! These traits define the boundaries between the reconciliation engine and
//! the systems it coordinates: the record store holding NamespaceStore
//! resources, the secret store, the event sink and the remote
//! storage-management API. Adapters implement these traits.

use crate::crd::NamespaceStore;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Record Keys
// =============================================================================

/// Namespace + name of a record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Parent storage system as seen by the record store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemRecord {
    pub name: String,
    pub uid: String,
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Normal,
    Warning,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Normal => write!(f, "Normal"),
            EventSeverity::Warning => write!(f, "Warning"),
        }
    }
}

// =============================================================================
// Remote API Types
// =============================================================================

/// Endpoint type of an external connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointType {
    Aws,
    S3Compatible,
    IbmCos,
    Azure,
}

impl EndpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointType::Aws => "AWS",
            EndpointType::S3Compatible => "S3_COMPATIBLE",
            EndpointType::IbmCos => "IBM_COS",
            EndpointType::Azure => "AZURE",
        }
    }
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature scheme used to authenticate against the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    #[serde(rename = "AWS_V2")]
    AwsV2,
    #[serde(rename = "AWS_V4")]
    AwsV4,
}

/// Normalized description of a remote connection.
///
/// Two descriptors denote the same connection when their
/// (endpoint type, endpoint, identity) triples are equal, regardless of name.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub name: String,
    pub endpoint_type: EndpointType,
    pub endpoint: String,
    pub identity: String,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<AuthMethod>,
}

impl ConnectionDescriptor {
    /// Whether a registered connection has the same identity triple
    pub fn matches(&self, info: &ExternalConnectionInfo) -> bool {
        info.endpoint_type == self.endpoint_type.as_str()
            && info.endpoint == self.endpoint
            && info.identity == self.identity
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("name", &self.name)
            .field("endpoint_type", &self.endpoint_type)
            .field("endpoint", &self.endpoint)
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("auth_method", &self.auth_method)
            .finish()
    }
}

/// Connection registered under an account of the storage system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalConnectionInfo {
    pub name: String,
    #[serde(default)]
    pub endpoint_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub auth_method: Option<String>,
}

/// Connections container as returned by read_system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalConnections {
    #[serde(default)]
    pub connections: Vec<ExternalConnectionInfo>,
}

/// Bucket permissions of an account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedBuckets {
    #[serde(default)]
    pub full_permission: bool,
    #[serde(default)]
    pub permission_list: Vec<String>,
}

/// Account of the storage system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub email: String,
    #[serde(default)]
    pub has_s3_access: bool,
    #[serde(default)]
    pub default_resource: Option<String>,
    #[serde(default)]
    pub allowed_buckets: AllowedBuckets,
    #[serde(default)]
    pub external_connections: ExternalConnections,
}

/// Backing pool of the storage system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub name: String,
    #[serde(default)]
    pub resource_type: String,
}

/// Resource type of the pool that accounts fall back to
pub const INTERNAL_POOL_TYPE: &str = "INTERNAL";

/// Namespace resource registered in the storage system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceResourceInfo {
    pub name: String,
    #[serde(default)]
    pub endpoint_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub target_bucket: String,
    #[serde(default)]
    pub mode: String,
}

/// Snapshot of the storage system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(default)]
    pub accounts: Vec<AccountInfo>,
    #[serde(default)]
    pub pools: Vec<PoolInfo>,
    #[serde(default)]
    pub namespace_resources: Vec<NamespaceResourceInfo>,
}

impl SystemInfo {
    /// Namespace resource with the given name
    pub fn namespace_resource(&self, name: &str) -> Option<&NamespaceResourceInfo> {
        self.namespace_resources.iter().find(|r| r.name == name)
    }

    /// All connections registered under all accounts, in listing order
    pub fn connections(&self) -> impl Iterator<Item = &ExternalConnectionInfo> {
        self.accounts
            .iter()
            .flat_map(|a| a.external_connections.connections.iter())
    }

    /// Name of the first internal pool
    pub fn internal_pool(&self) -> Option<&str> {
        self.pools
            .iter()
            .find(|p| p.resource_type == INTERNAL_POOL_TYPE)
            .map(|p| p.name.as_str())
    }
}

/// Result of a connection check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConnectionCheckStatus {
    Success,
    InvalidCredentials,
    InvalidEndpoint,
    TimeSkew,
    NotSupported,
    Timeout,
    UnknownFailure,
    /// Status code the operator does not know
    Other(String),
}

impl ConnectionCheckStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionCheckStatus::Success => "SUCCESS",
            ConnectionCheckStatus::InvalidCredentials => "INVALID_CREDENTIALS",
            ConnectionCheckStatus::InvalidEndpoint => "INVALID_ENDPOINT",
            ConnectionCheckStatus::TimeSkew => "TIME_SKEW",
            ConnectionCheckStatus::NotSupported => "NOT_SUPPORTED",
            ConnectionCheckStatus::Timeout => "TIMEOUT",
            ConnectionCheckStatus::UnknownFailure => "UNKNOWN_FAILURE",
            ConnectionCheckStatus::Other(code) => code,
        }
    }
}

impl From<String> for ConnectionCheckStatus {
    fn from(code: String) -> Self {
        match code.as_str() {
            "SUCCESS" => ConnectionCheckStatus::Success,
            "INVALID_CREDENTIALS" => ConnectionCheckStatus::InvalidCredentials,
            "INVALID_ENDPOINT" => ConnectionCheckStatus::InvalidEndpoint,
            "TIME_SKEW" => ConnectionCheckStatus::TimeSkew,
            "NOT_SUPPORTED" => ConnectionCheckStatus::NotSupported,
            "TIMEOUT" => ConnectionCheckStatus::Timeout,
            "UNKNOWN_FAILURE" => ConnectionCheckStatus::UnknownFailure,
            _ => ConnectionCheckStatus::Other(code),
        }
    }
}

impl From<ConnectionCheckStatus> for String {
    fn from(status: ConnectionCheckStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for ConnectionCheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail attached to a failed connection check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Reply of check_external_connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConnectionReply {
    pub status: ConnectionCheckStatus,
    #[serde(default)]
    pub error: Option<CheckErrorDetail>,
}

/// Filesystem settings of an nsfs namespace resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsfsConfig {
    pub fs_root_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_backend: Option<String>,
}

/// Back-reference from the namespace resource to its NamespaceStore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceStoreRef {
    pub name: String,
    pub namespace: String,
}

/// Parameters of create_namespace_resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNamespaceResourceParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfs_config: Option<NsfsConfig>,
    pub namespace_store: NamespaceStoreRef,
}

/// Parameters of update_account_s3_access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAccountS3AccessParams {
    pub email: String,
    pub s3_access: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_buckets: Option<AllowedBuckets>,
}

// =============================================================================
// Remote Storage API Port
// =============================================================================

/// Port for the remote storage-management API
#[async_trait]
pub trait RemoteStorageApi: Send + Sync {
    /// Read accounts, pools, connections and namespace resources
    async fn read_system(&self) -> Result<SystemInfo>;

    /// Probe a connection without registering it
    async fn check_external_connection(
        &self,
        connection: &ConnectionDescriptor,
    ) -> Result<CheckConnectionReply>;

    /// Register a connection
    async fn add_external_connection(&self, connection: &ConnectionDescriptor) -> Result<()>;

    /// Remove a registered connection. Fails with `IN_USE` while a resource uses it.
    async fn delete_external_connection(&self, name: &str) -> Result<()>;

    /// Create a namespace resource
    async fn create_namespace_resource(&self, params: &CreateNamespaceResourceParams)
        -> Result<()>;

    /// Delete a namespace resource. Fails with `IN_USE` while buckets are attached.
    async fn delete_namespace_resource(&self, name: &str) -> Result<()>;

    /// Update an account's S3 access and default resource
    async fn update_account_s3_access(&self, params: &UpdateAccountS3AccessParams) -> Result<()>;
}

// =============================================================================
// Record Store Port
// =============================================================================

/// Port for the cluster-state store holding NamespaceStore records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record, `None` when it does not exist
    async fn get_store(&self, key: &ObjectKey) -> Result<Option<NamespaceStore>>;

    /// Create a record
    async fn create_store(&self, store: &NamespaceStore) -> Result<NamespaceStore>;

    /// Replace metadata and spec. Fails with a conflict on a stale resource version.
    async fn update_store(&self, store: &NamespaceStore) -> Result<NamespaceStore>;

    /// Replace status. Fails with a conflict on a stale resource version.
    async fn update_status(&self, store: &NamespaceStore) -> Result<NamespaceStore>;

    /// Delete a record. Deleting a missing record succeeds.
    async fn delete_store(&self, key: &ObjectKey) -> Result<()>;

    /// Fetch the parent storage system
    async fn get_system(&self, key: &ObjectKey) -> Result<Option<SystemRecord>>;
}

// =============================================================================
// Secret Store Port
// =============================================================================

/// Port for credential lookup
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret's string data, `None` when it does not exist
    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<BTreeMap<String, String>>>;
}

// =============================================================================
// Event Sink Port
// =============================================================================

/// Port for user-visible events attached to a record
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event. Failures are logged by the implementation.
    async fn publish(
        &self,
        store: &NamespaceStore,
        severity: EventSeverity,
        reason: &str,
        message: &str,
    );
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type RemoteStorageApiRef = Arc<dyn RemoteStorageApi>;
pub type RecordStoreRef = Arc<dyn RecordStore>;
pub type SecretStoreRef = Arc<dyn SecretStore>;
pub type EventSinkRef = Arc<dyn EventSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_type_display() {
        assert_eq!(format!("{}", EndpointType::Aws), "AWS");
        assert_eq!(format!("{}", EndpointType::S3Compatible), "S3_COMPATIBLE");
        assert_eq!(
            serde_json::to_value(EndpointType::IbmCos).unwrap(),
            serde_json::json!("IBM_COS")
        );
    }

    #[test]
    fn test_check_status_unknown_codes_preserved() {
        let reply: CheckConnectionReply =
            serde_json::from_value(serde_json::json!({ "status": "INVALID_CREDENTIALS" })).unwrap();
        assert_eq!(reply.status, ConnectionCheckStatus::InvalidCredentials);

        let reply: CheckConnectionReply =
            serde_json::from_value(serde_json::json!({ "status": "BUCKET_MISSING" })).unwrap();
        assert_eq!(reply.status.as_str(), "BUCKET_MISSING");
    }

    #[test]
    fn test_descriptor_debug_redacts_secret() {
        let conn = ConnectionDescriptor {
            name: "c".into(),
            endpoint_type: EndpointType::Aws,
            endpoint: "https://s3.amazonaws.com".into(),
            identity: "AKIA".into(),
            secret: "top-secret".into(),
            auth_method: None,
        };
        assert!(!format!("{:?}", conn).contains("top-secret"));
    }

    #[test]
    fn test_system_info_lookups() {
        let info = SystemInfo {
            pools: vec![
                PoolInfo {
                    name: "hosts".into(),
                    resource_type: "HOSTS".into(),
                },
                PoolInfo {
                    name: "internal-pool".into(),
                    resource_type: "INTERNAL".into(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(info.internal_pool(), Some("internal-pool"));
        assert!(info.namespace_resource("missing").is_none());
    }
}
