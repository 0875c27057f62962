//! JSON-RPC client for the storage-management API
//!
//! Every call is a POST of `{api, method, params, auth_token}` to
//! `<endpoint>/rpc/`. The reply carries either `reply` or
//! `error: {rpc_code, message}`.

use crate::domain::ports::{
    CheckConnectionReply, ConnectionDescriptor, CreateNamespaceResourceParams, RemoteStorageApi,
    SystemInfo, UpdateAccountS3AccessParams,
};
use crate::error::{Error, Result};
use crate::metrics::ReconcileMetrics;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Base URL of the management endpoint, e.g. `https://noobaa-mgmt:443`
    pub endpoint: String,
    /// Token sent with every request
    pub auth_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://noobaa-mgmt:443".to_string(),
            auth_token: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    api: &'a str,
    method: &'a str,
    params: &'a P,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<R> {
    reply: Option<R>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    rpc_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Serialize)]
struct ConnectionNameParams<'a> {
    connection_name: &'a str,
}

#[derive(Debug, Serialize)]
struct NameParams<'a> {
    name: &'a str,
}

// =============================================================================
// Client
// =============================================================================

/// [`RemoteStorageApi`] over HTTP JSON-RPC
pub struct RpcStorageApi {
    client: Client,
    rpc_url: Url,
    auth_token: Option<String>,
    metrics: Option<Arc<ReconcileMetrics>>,
}

impl RpcStorageApi {
    pub fn new(config: RpcClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url(&config.endpoint)?,
            auth_token: config.auth_token,
            metrics: None,
        })
    }

    /// Count calls per method in the given metrics
    pub fn with_metrics(mut self, metrics: Arc<ReconcileMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn call<P, R>(&self, api: &str, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        if let Some(metrics) = &self.metrics {
            metrics.inc_remote_call(method);
        }
        debug!(api, method, "rpc call");

        let body = RpcRequest {
            api,
            method,
            params,
            auth_token: self.auth_token.as_deref(),
        };
        let response = self
            .client
            .post(self.rpc_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let parsed: RpcResponse<R> = serde_json::from_str(&text).map_err(|e| {
            Error::Remote(format!("{api}.{method}: invalid reply (http {status}): {e}"))
        })?;
        decode_reply(method, parsed)
    }

    /// Call a method whose reply is ignored
    async fn call_unit<P>(&self, api: &str, method: &str, params: &P) -> Result<()>
    where
        P: Serialize + Sync,
    {
        let _: Option<serde_json::Value> = self.call(api, method, params).await?;
        Ok(())
    }
}

/// `<endpoint>/rpc/`
fn rpc_url(endpoint: &str) -> Result<Url> {
    let base = format!("{}/", endpoint.trim_end_matches('/'));
    Url::parse(&base)
        .and_then(|u| u.join("rpc/"))
        .map_err(|e| Error::Configuration(format!("invalid remote endpoint {endpoint:?}: {e}")))
}

fn decode_reply<R>(method: &str, response: RpcResponse<R>) -> Result<R>
where
    R: DeserializeOwned,
{
    if let Some(err) = response.error {
        return Err(Error::Rpc {
            method: method.to_string(),
            code: err.rpc_code,
            message: err.message,
        });
    }
    match response.reply {
        Some(reply) => Ok(reply),
        // A missing reply is a null reply
        None => serde_json::from_value(serde_json::Value::Null)
            .map_err(|e| Error::Remote(format!("{method}: missing reply: {e}"))),
    }
}

#[async_trait]
impl RemoteStorageApi for RpcStorageApi {
    async fn read_system(&self) -> Result<SystemInfo> {
        self.call("system_api", "read_system", &Empty {}).await
    }

    async fn check_external_connection(
        &self,
        connection: &ConnectionDescriptor,
    ) -> Result<CheckConnectionReply> {
        self.call("account_api", "check_external_connection", connection)
            .await
    }

    async fn add_external_connection(&self, connection: &ConnectionDescriptor) -> Result<()> {
        self.call_unit("account_api", "add_external_connection", connection)
            .await
    }

    async fn delete_external_connection(&self, name: &str) -> Result<()> {
        self.call_unit(
            "account_api",
            "delete_external_connection",
            &ConnectionNameParams {
                connection_name: name,
            },
        )
        .await
    }

    async fn create_namespace_resource(
        &self,
        params: &CreateNamespaceResourceParams,
    ) -> Result<()> {
        self.call_unit("pool_api", "create_namespace_resource", params)
            .await
    }

    async fn delete_namespace_resource(&self, name: &str) -> Result<()> {
        self.call_unit("pool_api", "delete_namespace_resource", &NameParams { name })
            .await
    }

    async fn update_account_s3_access(&self, params: &UpdateAccountS3AccessParams) -> Result<()> {
        self.call_unit("account_api", "update_account_s3_access", params)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ConnectionCheckStatus;
    use assert_matches::assert_matches;

    #[test]
    fn test_rpc_url() {
        assert_eq!(
            rpc_url("https://noobaa-mgmt:443").unwrap().as_str(),
            "https://noobaa-mgmt/rpc/"
        );
        assert_eq!(
            rpc_url("http://10.0.0.1:8080/").unwrap().as_str(),
            "http://10.0.0.1:8080/rpc/"
        );
        assert_matches!(rpc_url("not a url"), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_decode_error_reply() {
        let response: RpcResponse<serde_json::Value> = serde_json::from_value(serde_json::json!({
            "op": "res",
            "error": { "rpc_code": "IN_USE", "message": "resource has buckets" }
        }))
        .unwrap();
        let err = decode_reply("delete_namespace_resource", response).unwrap_err();
        assert_eq!(err.rpc_code(), Some("IN_USE"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_decode_check_reply() {
        let response: RpcResponse<CheckConnectionReply> =
            serde_json::from_value(serde_json::json!({
                "op": "res",
                "reply": { "status": "TIME_SKEW", "error": { "code": "RequestTimeTooSkewed", "message": "skew" } }
            }))
            .unwrap();
        let reply = decode_reply("check_external_connection", response).unwrap();
        assert_eq!(reply.status, ConnectionCheckStatus::TimeSkew);
        assert_eq!(reply.error.unwrap().code, "RequestTimeTooSkewed");
    }

    #[test]
    fn test_unit_reply_may_be_missing() {
        let response: RpcResponse<Option<serde_json::Value>> =
            serde_json::from_value(serde_json::json!({ "op": "res" })).unwrap();
        assert_eq!(decode_reply("add_external_connection", response).unwrap(), None);
    }

    #[test]
    fn test_missing_struct_reply_is_remote_error() {
        let response: RpcResponse<CheckConnectionReply> =
            serde_json::from_value(serde_json::json!({ "op": "res" })).unwrap();
        assert!(response.reply.is_none());
        assert_matches!(
            decode_reply("check_external_connection", response),
            Err(Error::Remote(_))
        );
    }

    #[test]
    fn test_request_body_shape() {
        let body = RpcRequest {
            api: "pool_api",
            method: "delete_namespace_resource",
            params: &NameParams { name: "ns1" },
            auth_token: Some("token"),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "api": "pool_api",
                "method": "delete_namespace_resource",
                "params": { "name": "ns1" },
                "auth_token": "token"
            })
        );
    }
}
