//! Record, secret and event adapters
//!
//! - `k8s`: backed by the Kubernetes API server
//! - `memory`: in-process, used by tests and local runs

pub mod k8s;
pub mod memory;

pub use k8s::{KubeEventSink, KubeRecordStore, KubeSecretStore};
pub use memory::{InMemoryRecordStore, InMemorySecretStore, RecordingEventSink};
