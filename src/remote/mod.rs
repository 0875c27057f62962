//! Remote storage-management API adapters
//!
//! - `rpc`: HTTP JSON-RPC client for a live storage system
//! - `memory`: in-process implementation for tests and benchmarks

pub mod memory;
pub mod rpc;

pub use memory::InMemoryStorageApi;
pub use rpc::{RpcClientConfig, RpcStorageApi};
