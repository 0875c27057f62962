//! Custom Resource Definitions for the NamespaceStore Operator
//!
//! This module contains:
//! - NamespaceStore: external storage target exposed as a namespace resource
//! - Condition: status facets shared by the status types

pub mod condition;
pub mod namespace_store;

pub use condition::*;
pub use namespace_store::*;

// Re-export common types for convenience
pub use chrono::{DateTime, Utc};
pub use std::collections::BTreeMap;
