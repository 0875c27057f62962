//! Finalizer-gated deletion
//!
//! Remote cleanup runs only while the finalizer is held. The finalizer is
//! removed after the namespace resource and its connection are gone, or
//! right away when the storage system itself no longer exists.

use super::ReconcileRun;
use crate::crd::NamespaceStorePhase;
use crate::domain::ports::UpdateAccountS3AccessParams;
use crate::error::{Error, Result, RPC_CODE_IN_USE};
use kube::ResourceExt;
use tracing::{info, warn};

impl ReconcileRun<'_> {
    pub(super) async fn reconcile_deletion(&mut self) -> Result<()> {
        if self.store.phase() != NamespaceStorePhase::Deleting {
            self.set_phase(
                Some(NamespaceStorePhase::Deleting),
                "NamespaceStorePhaseDeleting",
                "operator started deletion",
            );
            self.publish_status().await?;
        }

        if !self.store.has_finalizer(&self.ctx.config.finalizer) {
            info!(store = %self.key, "finalizer already removed");
            self.finalized = true;
            return Ok(());
        }

        if self.system.is_none() {
            info!(store = %self.key, "storage system not found, removing finalizer without cleanup");
            return self.finalize_deletion().await;
        }

        self.read_system_info().await?;
        if let Err(e) = self.resolve_connection() {
            warn!(store = %self.key, error = %e, "cannot resolve connection, skipping connection cleanup");
        }

        if let Some(resource) = self.resource.clone() {
            self.detach_accounts(&resource.name).await?;
            match self.ctx.remote.delete_namespace_resource(&resource.name).await {
                Ok(()) => info!(store = %self.key, resource = %resource.name, "deleted namespace resource"),
                Err(e) if e.rpc_code() == Some(RPC_CODE_IN_USE) => {
                    return Err(Error::ResourceInUse {
                        name: resource.name,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(connection) = self.connection.clone() {
            match self
                .ctx
                .remote
                .delete_external_connection(&connection.name)
                .await
            {
                Ok(()) => info!(store = %self.key, connection = %connection.name, "deleted external connection"),
                Err(e) if e.rpc_code() == Some(RPC_CODE_IN_USE) => {
                    warn!(store = %self.key, connection = %connection.name, "external connection still in use by other resources");
                }
                Err(e) => return Err(e),
            }
        }

        self.finalize_deletion().await
    }

    /// Point every account defaulting to `resource` back at the internal pool
    async fn detach_accounts(&self, resource: &str) -> Result<()> {
        let Some(info) = &self.system_info else {
            return Ok(());
        };
        let internal_pool = info.internal_pool().map(String::from);
        if internal_pool.is_none() {
            warn!(store = %self.key, "storage system has no internal pool");
        }

        for account in info
            .accounts
            .iter()
            .filter(|a| a.default_resource.as_deref() == Some(resource))
        {
            let params = UpdateAccountS3AccessParams {
                email: account.email.clone(),
                s3_access: account.has_s3_access,
                default_resource: Some(internal_pool.clone().unwrap_or_default()),
                allow_buckets: Some(account.allowed_buckets.clone()),
            };
            self.ctx.remote.update_account_s3_access(&params).await?;
            info!(store = %self.key, account = %account.email, "moved account default resource to internal pool");
        }
        Ok(())
    }

    async fn finalize_deletion(&mut self) -> Result<()> {
        let finalizer = self.ctx.config.finalizer.clone();
        if !self.store.remove_finalizer(&finalizer) {
            self.finalized = true;
            return Ok(());
        }

        match self.ctx.records.update_store(&self.store).await {
            Ok(updated) => {
                self.store = updated;
                self.finalized = true;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                self.finalized = true;
                Ok(())
            }
            Err(e) => Err(Error::transient(format!(
                "NamespaceStore {:?} failed to remove finalizer {finalizer:?}: {e}",
                self.store.name_any()
            ))),
        }
    }
}
