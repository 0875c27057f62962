//! In-process storage-management API
//!
//! Keeps accounts, pools, connections and namespace resources in memory and
//! answers with the same RPC codes as the real service. Failure modes can be
//! injected per test.

use crate::domain::ports::{
    AccountInfo, CheckConnectionReply, CheckErrorDetail, ConnectionCheckStatus,
    ConnectionDescriptor, CreateNamespaceResourceParams, ExternalConnectionInfo,
    NamespaceResourceInfo, PoolInfo, RemoteStorageApi, SystemInfo, UpdateAccountS3AccessParams,
    INTERNAL_POOL_TYPE,
};
use crate::error::{Error, Result, RPC_CODE_IN_USE};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// Mode given to newly created namespace resources
pub const DEFAULT_RESOURCE_MODE: &str = "OPTIMAL";

/// Email of the account owning registered connections
pub const ADMIN_ACCOUNT: &str = "admin@noobaa.io";

/// Methods that change remote state
pub const MUTATING_METHODS: [&str; 5] = [
    "add_external_connection",
    "delete_external_connection",
    "create_namespace_resource",
    "delete_namespace_resource",
    "update_account_s3_access",
];

struct RemoteState {
    system: SystemInfo,
    /// Resource name to connection name
    resource_connections: BTreeMap<String, String>,
    check_status: ConnectionCheckStatus,
    check_rpc_error: Option<(String, String)>,
    in_use: BTreeSet<String>,
    unavailable: bool,
    failures: BTreeMap<String, String>,
    new_resource_mode: String,
    calls: BTreeMap<&'static str, u32>,
}

/// [`RemoteStorageApi`] held in process memory
pub struct InMemoryStorageApi {
    state: Mutex<RemoteState>,
}

impl Default for InMemoryStorageApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorageApi {
    /// A system with one admin account and one internal pool
    pub fn new() -> Self {
        let system = SystemInfo {
            accounts: vec![AccountInfo {
                email: ADMIN_ACCOUNT.to_string(),
                has_s3_access: true,
                ..Default::default()
            }],
            pools: vec![PoolInfo {
                name: "noobaa-default-backing-store".to_string(),
                resource_type: INTERNAL_POOL_TYPE.to_string(),
            }],
            namespace_resources: Vec::new(),
        };
        Self {
            state: Mutex::new(RemoteState {
                system,
                resource_connections: BTreeMap::new(),
                check_status: ConnectionCheckStatus::Success,
                check_rpc_error: None,
                in_use: BTreeSet::new(),
                unavailable: false,
                failures: BTreeMap::new(),
                new_resource_mode: DEFAULT_RESOURCE_MODE.to_string(),
                calls: BTreeMap::new(),
            }),
        }
    }

    /// Status returned by the next connection checks
    pub fn set_check_status(&self, status: ConnectionCheckStatus) {
        self.state.lock().check_status = status;
    }

    /// Make connection checks fail with an RPC error
    pub fn set_check_rpc_error(&self, code: &str, message: &str) {
        self.state.lock().check_rpc_error = Some((code.to_string(), message.to_string()));
    }

    /// Mark a resource or connection as in use
    pub fn set_in_use(&self, name: &str, in_use: bool) {
        let mut state = self.state.lock();
        if in_use {
            state.in_use.insert(name.to_string());
        } else {
            state.in_use.remove(name);
        }
    }

    /// Fail every call as if the endpoint were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Make every call to `method` fail with `code`, or clear the failure
    pub fn set_failure(&self, method: &str, code: Option<&str>) {
        let mut state = self.state.lock();
        match code {
            Some(code) => state.failures.insert(method.to_string(), code.to_string()),
            None => state.failures.remove(method),
        };
    }

    /// Register a namespace resource directly, bypassing connection lookup
    pub fn seed_namespace_resource(&self, resource: NamespaceResourceInfo) {
        self.state.lock().system.namespace_resources.push(resource);
    }

    /// Change the mode reported for an existing resource
    pub fn set_resource_mode(&self, name: &str, mode: &str) {
        let mut state = self.state.lock();
        if let Some(resource) = state
            .system
            .namespace_resources
            .iter_mut()
            .find(|r| r.name == name)
        {
            resource.mode = mode.to_string();
        }
    }

    /// Add an account, e.g. one defaulting to a namespace resource
    pub fn add_account(&self, account: AccountInfo) {
        self.state.lock().system.accounts.push(account);
    }

    /// Register a connection directly under the admin account
    pub fn seed_connection(&self, connection: ExternalConnectionInfo) {
        let mut state = self.state.lock();
        if let Some(admin) = state.system.accounts.first_mut() {
            admin.external_connections.connections.push(connection);
        }
    }

    /// Snapshot of the current system
    pub fn snapshot(&self) -> SystemInfo {
        self.state.lock().system.clone()
    }

    /// Account by email
    pub fn account(&self, email: &str) -> Option<AccountInfo> {
        self.state
            .lock()
            .system
            .accounts
            .iter()
            .find(|a| a.email == email)
            .cloned()
    }

    /// Calls made to one method
    pub fn call_count(&self, method: &str) -> u32 {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    /// Calls made to methods that change remote state
    pub fn mutating_calls(&self) -> u32 {
        let state = self.state.lock();
        MUTATING_METHODS
            .iter()
            .map(|m| state.calls.get(m).copied().unwrap_or(0))
            .sum()
    }

    fn enter(&self, method: &'static str) -> Result<parking_lot::MutexGuard<'_, RemoteState>> {
        let mut state = self.state.lock();
        *state.calls.entry(method).or_insert(0) += 1;
        if state.unavailable {
            return Err(Error::Remote(format!("{method}: connection refused")));
        }
        if let Some(code) = state.failures.get(method) {
            return Err(rpc_error(method, code, "injected failure"));
        }
        Ok(state)
    }
}

fn rpc_error(method: &str, code: &str, message: impl Into<String>) -> Error {
    Error::Rpc {
        method: method.to_string(),
        code: code.to_string(),
        message: message.into(),
    }
}

fn all_connections(system: &SystemInfo) -> impl Iterator<Item = &ExternalConnectionInfo> {
    system
        .accounts
        .iter()
        .flat_map(|a| a.external_connections.connections.iter())
}

#[async_trait]
impl RemoteStorageApi for InMemoryStorageApi {
    async fn read_system(&self) -> Result<SystemInfo> {
        let state = self.enter("read_system")?;
        Ok(state.system.clone())
    }

    async fn check_external_connection(
        &self,
        _connection: &ConnectionDescriptor,
    ) -> Result<CheckConnectionReply> {
        let method = "check_external_connection";
        let state = self.enter(method)?;
        if let Some((code, message)) = &state.check_rpc_error {
            return Err(rpc_error(method, code, message.clone()));
        }
        let error = match state.check_status {
            ConnectionCheckStatus::Success => None,
            ref status => Some(CheckErrorDetail {
                code: status.as_str().to_string(),
                message: format!("connection check failed with {status}"),
            }),
        };
        Ok(CheckConnectionReply {
            status: state.check_status.clone(),
            error,
        })
    }

    async fn add_external_connection(&self, connection: &ConnectionDescriptor) -> Result<()> {
        let method = "add_external_connection";
        let mut state = self.enter(method)?;
        if all_connections(&state.system).any(|c| c.name == connection.name) {
            return Err(rpc_error(
                method,
                "CONNECTION_ALREADY_EXIST",
                format!("connection {} already exists", connection.name),
            ));
        }
        let info = ExternalConnectionInfo {
            name: connection.name.clone(),
            endpoint_type: connection.endpoint_type.as_str().to_string(),
            endpoint: connection.endpoint.clone(),
            identity: connection.identity.clone(),
            auth_method: connection
                .auth_method
                .and_then(|m| serde_json::to_value(m).ok())
                .and_then(|v| v.as_str().map(String::from)),
        };
        match state.system.accounts.first_mut() {
            Some(admin) => {
                admin.external_connections.connections.push(info);
                Ok(())
            }
            None => Err(rpc_error(method, "NO_SUCH_ACCOUNT", "no account to own the connection")),
        }
    }

    async fn delete_external_connection(&self, name: &str) -> Result<()> {
        let method = "delete_external_connection";
        let mut state = self.enter(method)?;
        let used_by_resource = state.resource_connections.values().any(|c| c == name);
        if used_by_resource || state.in_use.contains(name) {
            return Err(rpc_error(method, RPC_CODE_IN_USE, format!("connection {name} in use")));
        }
        for account in &mut state.system.accounts {
            account
                .external_connections
                .connections
                .retain(|c| c.name != name);
        }
        Ok(())
    }

    async fn create_namespace_resource(
        &self,
        params: &CreateNamespaceResourceParams,
    ) -> Result<()> {
        let method = "create_namespace_resource";
        let mut state = self.enter(method)?;
        if state.system.namespace_resource(&params.name).is_some() {
            return Err(rpc_error(
                method,
                "NAMESPACE_RESOURCE_ALREADY_EXISTS",
                format!("namespace resource {} already exists", params.name),
            ));
        }

        let mut resource = NamespaceResourceInfo {
            name: params.name.clone(),
            target_bucket: params.target_bucket.clone().unwrap_or_default(),
            mode: state.new_resource_mode.clone(),
            ..Default::default()
        };
        if let Some(connection_name) = &params.connection {
            let connection = all_connections(&state.system)
                .find(|c| &c.name == connection_name)
                .cloned()
                .ok_or_else(|| {
                    rpc_error(
                        method,
                        "INVALID_CONNECTION",
                        format!("connection {connection_name} not found"),
                    )
                })?;
            resource.endpoint_type = connection.endpoint_type;
            resource.endpoint = connection.endpoint;
            resource.identity = connection.identity;
            state
                .resource_connections
                .insert(params.name.clone(), connection_name.clone());
        } else if params.nsfs_config.is_none() {
            return Err(rpc_error(
                method,
                "INVALID_SCHEMA_PARAMS",
                "either a connection or an nsfs config is required",
            ));
        }

        state.system.namespace_resources.push(resource);
        Ok(())
    }

    async fn delete_namespace_resource(&self, name: &str) -> Result<()> {
        let method = "delete_namespace_resource";
        let mut state = self.enter(method)?;
        if state.in_use.contains(name) {
            return Err(rpc_error(method, RPC_CODE_IN_USE, format!("resource {name} has buckets")));
        }
        if state.system.namespace_resource(name).is_none() {
            return Err(rpc_error(method, "NO_SUCH_RESOURCE", format!("resource {name} not found")));
        }
        state.system.namespace_resources.retain(|r| r.name != name);
        state.resource_connections.remove(name);
        Ok(())
    }

    async fn update_account_s3_access(&self, params: &UpdateAccountS3AccessParams) -> Result<()> {
        let method = "update_account_s3_access";
        let mut state = self.enter(method)?;
        let account = state
            .system
            .accounts
            .iter_mut()
            .find(|a| a.email == params.email)
            .ok_or_else(|| {
                rpc_error(method, "NO_SUCH_ACCOUNT", format!("account {} not found", params.email))
            })?;
        account.has_s3_access = params.s3_access;
        account.default_resource = params.default_resource.clone();
        if let Some(allowed) = &params.allow_buckets {
            account.allowed_buckets = allowed.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{EndpointType, NamespaceStoreRef};
    use assert_matches::assert_matches;

    fn descriptor(name: &str) -> ConnectionDescriptor {
        ConnectionDescriptor {
            name: name.into(),
            endpoint_type: EndpointType::S3Compatible,
            endpoint: "https://minio:9000".into(),
            identity: "AKIA".into(),
            secret: "s".into(),
            auth_method: None,
        }
    }

    fn params(name: &str, connection: &str) -> CreateNamespaceResourceParams {
        CreateNamespaceResourceParams {
            name: name.into(),
            connection: Some(connection.into()),
            target_bucket: Some("bucket".into()),
            nsfs_config: None,
            namespace_store: NamespaceStoreRef {
                name: name.into(),
                namespace: "noobaa".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_connection_in_use_by_resource() {
        let api = InMemoryStorageApi::new();
        api.add_external_connection(&descriptor("c1")).await.unwrap();
        api.create_namespace_resource(&params("ns1", "c1")).await.unwrap();

        let err = api.delete_external_connection("c1").await.unwrap_err();
        assert_eq!(err.rpc_code(), Some(RPC_CODE_IN_USE));

        api.delete_namespace_resource("ns1").await.unwrap();
        api.delete_external_connection("c1").await.unwrap();
        assert_eq!(api.snapshot().connections().count(), 0);
        assert_eq!(api.mutating_calls(), 5);
    }

    #[tokio::test]
    async fn test_resource_inherits_connection_identity() {
        let api = InMemoryStorageApi::new();
        api.add_external_connection(&descriptor("c1")).await.unwrap();
        api.create_namespace_resource(&params("ns1", "c1")).await.unwrap();

        let system = api.read_system().await.unwrap();
        let resource = system.namespace_resource("ns1").unwrap();
        assert_eq!(resource.endpoint, "https://minio:9000");
        assert_eq!(resource.mode, DEFAULT_RESOURCE_MODE);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let api = InMemoryStorageApi::new();
        api.set_failure("delete_external_connection", Some("INTERNAL"));
        let err = api.delete_external_connection("c1").await.unwrap_err();
        assert_eq!(err.rpc_code(), Some("INTERNAL"));

        api.set_failure("delete_external_connection", None);
        api.delete_external_connection("c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable() {
        let api = InMemoryStorageApi::new();
        api.set_unavailable(true);
        assert_matches!(api.read_system().await, Err(Error::Remote(_)));
        assert_eq!(api.call_count("read_system"), 1);
    }
}
