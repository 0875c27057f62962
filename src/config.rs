//! Operator configuration
//!
//! Built once at startup and passed by reference into the reconciler.

use crate::crd::{NamespaceStorePhase, FINALIZER};
use crate::domain::ports::EventSeverity;
use std::collections::BTreeMap;
use std::time::Duration;

// =============================================================================
// Mode Table
// =============================================================================

/// Phase and event severity derived from a remote mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeInfo {
    pub phase: NamespaceStorePhase,
    pub severity: EventSeverity,
}

/// Maps modes reported by the storage system to a phase and event severity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeTable {
    entries: BTreeMap<String, ModeInfo>,
}

impl ModeTable {
    /// Create an empty table
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add or replace an entry
    pub fn with_mode(
        mut self,
        mode: impl Into<String>,
        phase: NamespaceStorePhase,
        severity: EventSeverity,
    ) -> Self {
        self.entries.insert(mode.into(), ModeInfo { phase, severity });
        self
    }

    /// Look up a mode
    pub fn lookup(&self, mode: &str) -> Option<ModeInfo> {
        self.entries.get(mode).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self::empty()
            .with_mode("OPTIMAL", NamespaceStorePhase::Ready, EventSeverity::Normal)
            .with_mode("IO_ERRORS", NamespaceStorePhase::Rejected, EventSeverity::Warning)
            .with_mode(
                "STORAGE_NOT_EXIST",
                NamespaceStorePhase::Rejected,
                EventSeverity::Warning,
            )
            .with_mode("AUTH_FAILED", NamespaceStorePhase::Rejected, EventSeverity::Warning)
    }
}

// =============================================================================
// Operator Configuration
// =============================================================================

/// Configuration for the reconciler
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Name of the parent storage system record
    pub system_name: String,
    /// Namespace the operator runs in, reported to the storage system
    pub operator_namespace: String,
    /// Finalizer guarding remote cleanup
    pub finalizer: String,
    /// Backoff for transient errors
    pub requeue_after: Duration,
    /// Age below which missing credentials and rejected connections are retried
    pub grace_period: Duration,
    /// Attempts per status publication
    pub status_update_attempts: u32,
    /// Mode to phase mapping
    pub mode_table: ModeTable,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            system_name: "noobaa".to_string(),
            operator_namespace: "noobaa".to_string(),
            finalizer: FINALIZER.to_string(),
            requeue_after: Duration::from_secs(3),
            grace_period: Duration::from_secs(5 * 60),
            status_update_attempts: 2,
            mode_table: ModeTable::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_table() {
        let table = ModeTable::default();
        assert_eq!(table.len(), 4);
        assert_eq!(
            table.lookup("OPTIMAL"),
            Some(ModeInfo {
                phase: NamespaceStorePhase::Ready,
                severity: EventSeverity::Normal
            })
        );
        assert_eq!(
            table.lookup("AUTH_FAILED").map(|m| m.phase),
            Some(NamespaceStorePhase::Rejected)
        );
        assert!(table.lookup("INITIALIZING").is_none());
    }

    #[test]
    fn test_default_config() {
        let config = OperatorConfig::default();
        assert_eq!(config.requeue_after, Duration::from_secs(3));
        assert_eq!(config.grace_period, Duration::from_secs(300));
        assert_eq!(config.finalizer, "noobaa.io/finalizer");
        assert_eq!(config.status_update_attempts, 2);
    }
}
