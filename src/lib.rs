//! NamespaceStore Operator
//!
//! A Kubernetes operator that registers NamespaceStore records (cloud
//! buckets, S3-compatible endpoints, local filesystems) with a storage
//! system as namespace resources, and removes them again behind a
//! finalizer.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                    kube::runtime::Controller                          │
//! │                  (watch + per-object serialization)                   │
//! └──────────────────────────────────┬────────────────────────────────────┘
//!                                    │ reconcile(key)
//! ┌──────────────────────────────────┴────────────────────────────────────┐
//! │                     NamespaceStoreReconciler                          │
//! │   Verifying ──▶ Connecting ──▶ Creating ──▶ Ready | Rejected          │
//! │   Deleting (finalizer gate)        Connection Resolver / Dedup        │
//! ├───────────────┬──────────────┬──────────────┬─────────────────────────┤
//! │  RecordStore  │ SecretStore  │  EventSink   │   RemoteStorageApi      │
//! │  (kube / mem) │ (kube / mem) │ (kube / mem) │   (JSON-RPC / mem)      │
//! └───────────────┴──────────────┴──────────────┴─────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`crd`]: NamespaceStore resource and status types
//! - [`domain`]: Port traits and remote API types
//! - [`reconciler`]: Phase machine, connection resolver, deletion gate
//! - [`store`]: Record, secret and event adapters
//! - [`remote`]: Storage-management API adapters
//! - [`controller`]: Controller runtime wiring
//! - [`server`]: Probe and metrics HTTP server
//! - [`error`]: Error types and classification

pub mod config;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod remote;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use config::{ModeInfo, ModeTable, OperatorConfig};

pub use crd::{
    NamespaceStore, NamespaceStorePhase, NamespaceStoreSpec, NamespaceStoreStatus, StoreBackend,
};

pub use domain::ports::{
    ConnectionDescriptor, EventSeverity, EventSink, ObjectKey, RecordStore, RemoteStorageApi,
    SecretStore,
};

pub use error::{Error, ErrorAction, ErrorKind, Result};

pub use metrics::ReconcileMetrics;

pub use reconciler::{NamespaceStoreReconciler, OutcomeKind, ReconcileOutcome};

pub use remote::{InMemoryStorageApi, RpcClientConfig, RpcStorageApi};

pub use server::{ProbeServer, ProbeServerConfig, ProbeState};

pub use store::{
    InMemoryRecordStore, InMemorySecretStore, KubeEventSink, KubeRecordStore, KubeSecretStore,
    RecordingEventSink,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
