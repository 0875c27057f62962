//! Forward phases: Verifying, Connecting, Creating

use super::connection::{build_descriptor, find_matching_connection, has_connection_drift};
use super::ReconcileRun;
use crate::crd::{NamespaceStorePhase, StoreBackend};
use crate::domain::ports::{
    ConnectionCheckStatus, CreateNamespaceResourceParams, NamespaceStoreRef, NsfsConfig,
};
use crate::error::{Error, Result, RPC_CODE_INVALID_SCHEMA_PARAMS};
use tracing::{debug, info, warn};

impl ReconcileRun<'_> {
    pub(super) async fn reconcile_phases(&mut self) -> Result<()> {
        self.reconcile_phase_verifying().await?;
        self.reconcile_phase_connecting().await?;
        self.reconcile_phase_creating().await
    }

    // =========================================================================
    // Verifying
    // =========================================================================

    async fn reconcile_phase_verifying(&mut self) -> Result<()> {
        self.enter_phase(
            NamespaceStorePhase::Verifying,
            "NamespaceStorePhaseVerifying",
            "operator started phase 1/3 - \"Verifying\"",
        )
        .await?;

        if self.system.is_none() {
            return Err(Error::persistent(
                "MissingSystem",
                format!(
                    "NamespaceStore {:?} is missing its storage system {:?}",
                    self.name(),
                    self.ctx.config.system_name
                ),
            ));
        }

        if let Some(secret_key) = &self.secret_ref {
            if self.secret.is_none() {
                let message = format!(
                    "NamespaceStore {:?} cannot find credentials secret {}",
                    self.name(),
                    secret_key
                );
                if self.is_young() {
                    info!(store = %self.key, secret = %secret_key, "secret not found yet, waiting");
                    return Err(Error::transient(message));
                }
                return Err(Error::persistent("MissingSecret", message));
            }
        }

        Ok(())
    }

    // =========================================================================
    // Connecting
    // =========================================================================

    async fn reconcile_phase_connecting(&mut self) -> Result<()> {
        self.enter_phase(
            NamespaceStorePhase::Connecting,
            "NamespaceStorePhaseConnecting",
            "operator started phase 2/3 - \"Connecting\"",
        )
        .await?;

        self.read_system_info().await?;
        self.resolve_connection()?;
        Ok(())
    }

    /// Read the storage system and the handle of this store's resource.
    /// The handle's mode is kept for the final mode mapping.
    pub(super) async fn read_system_info(&mut self) -> Result<()> {
        let info = self.ctx.remote.read_system().await?;
        let name = self.name();

        self.resource = info.namespace_resource(&name).cloned();
        self.mode = self
            .resource
            .as_ref()
            .map(|r| r.mode.clone())
            .unwrap_or_default();

        debug!(
            store = %self.key,
            resource_exists = self.resource.is_some(),
            connections = info.connections().count(),
            "read storage system"
        );
        self.system_info = Some(info);
        Ok(())
    }

    /// Build the desired connection, find a registered one to reuse and
    /// compute the create-resource parameters.
    pub(super) fn resolve_connection(&mut self) -> Result<()> {
        let name = self.name();
        let back_ref = NamespaceStoreRef {
            name: name.clone(),
            namespace: self.ctx.config.operator_namespace.clone(),
        };

        if let StoreBackend::Nsfs { nsfs } = &self.store.spec.backend {
            self.create_params = Some(CreateNamespaceResourceParams {
                name,
                connection: None,
                target_bucket: None,
                nsfs_config: Some(NsfsConfig {
                    fs_root_path: nsfs.fs_root_path.clone(),
                    fs_backend: nsfs.fs_backend.clone(),
                }),
                namespace_store: back_ref,
            });
            return Ok(());
        }

        let secret_name = self
            .secret_ref
            .as_ref()
            .map(|k| k.name.clone())
            .unwrap_or_default();
        let secret_data = self.secret.clone().unwrap_or_default();
        let Some(mut desired) =
            build_descriptor(&name, &self.store.spec.backend, &secret_name, &secret_data)?
        else {
            return Ok(());
        };

        if let Some(resource) = &self.resource {
            if has_connection_drift(resource, &desired) {
                warn!(
                    store = %self.key,
                    resource_endpoint = %resource.endpoint,
                    desired_endpoint = %desired.endpoint,
                    "namespace resource was registered against a different connection"
                );
            }
        }

        self.connection = self
            .system_info
            .as_ref()
            .and_then(|info| find_matching_connection(info, &desired))
            .cloned();
        if let Some(existing) = &self.connection {
            debug!(store = %self.key, connection = %existing.name, "reusing registered connection");
            desired.name = existing.name.clone();
        }

        let target_bucket = self
            .store
            .spec
            .backend
            .target_bucket()
            .filter(|b| !b.is_empty())
            .map(String::from)
            .unwrap_or_else(|| name.clone());

        self.create_params = Some(CreateNamespaceResourceParams {
            name,
            connection: Some(desired.name.clone()),
            target_bucket: Some(target_bucket),
            nsfs_config: None,
            namespace_store: back_ref,
        });
        self.desired_connection = Some(desired);
        Ok(())
    }

    // =========================================================================
    // Creating
    // =========================================================================

    async fn reconcile_phase_creating(&mut self) -> Result<()> {
        self.enter_phase(
            NamespaceStorePhase::Creating,
            "NamespaceStorePhaseCreating",
            "operator started phase 3/3 - \"Creating\"",
        )
        .await?;

        self.reconcile_external_connection().await?;
        self.reconcile_namespace_resource().await
    }

    async fn reconcile_external_connection(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        let Some(desired) = &self.desired_connection else {
            return Ok(());
        };

        let reply = match self.ctx.remote.check_external_connection(desired).await {
            Ok(reply) => reply,
            Err(e) if e.rpc_code() == Some(RPC_CODE_INVALID_SCHEMA_PARAMS) => {
                return Err(Error::persistent(
                    "InvalidConnectionParams",
                    format!("NamespaceStore {:?} has invalid connection parameters: {e}", self.name()),
                ));
            }
            Err(e) => return Err(e),
        };

        let detail = reply
            .error
            .as_ref()
            .map(|d| format!(" Error={} Message={}", d.code, d.message))
            .unwrap_or_default();
        let message = format!(
            "NamespaceStore {:?} external connection check returned {}{detail}",
            self.name(),
            reply.status
        );

        match reply.status {
            ConnectionCheckStatus::Success => {}
            ConnectionCheckStatus::InvalidCredentials | ConnectionCheckStatus::InvalidEndpoint
                if self.is_young() =>
            {
                info!(store = %self.key, status = %reply.status, "connection rejected, waiting for credentials to settle");
                return Err(Error::transient(message));
            }
            ConnectionCheckStatus::InvalidCredentials
            | ConnectionCheckStatus::InvalidEndpoint
            | ConnectionCheckStatus::TimeSkew
            | ConnectionCheckStatus::NotSupported => {
                return Err(Error::persistent(reply.status.as_str(), message));
            }
            ConnectionCheckStatus::Timeout
            | ConnectionCheckStatus::UnknownFailure
            | ConnectionCheckStatus::Other(_) => {
                return Err(Error::transient(message));
            }
        }

        self.ctx.remote.add_external_connection(desired).await?;
        info!(store = %self.key, connection = %desired.name, endpoint = %desired.endpoint, "registered external connection");
        Ok(())
    }

    async fn reconcile_namespace_resource(&mut self) -> Result<()> {
        if self.resource.is_some() {
            return Ok(());
        }
        let Some(params) = &self.create_params else {
            return Ok(());
        };
        self.ctx.remote.create_namespace_resource(params).await?;
        info!(store = %self.key, resource = %params.name, "created namespace resource");
        Ok(())
    }
}
