//! Audit trail
//!
//! Every permission evaluation emits an audit record, whether the action was
//! allowed or not. The trail is mandatory: the policy calls `record` for
//! each verdict, and a sink that cannot persist a record logs the failure
//! rather than blocking the session.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use uuid::Uuid;

use crate::policy::PermissionDecision;

/// One audit entry for a permission evaluation
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Unique record id
    pub id: Uuid,

    /// When the evaluation happened
    pub timestamp: DateTime<Utc>,

    /// Id of the evaluated action request
    pub request_id: Uuid,

    /// Name of the evaluated action
    pub action: String,

    /// Compact rendering of the action arguments
    pub arguments: String,

    /// The decision reached
    pub decision: PermissionDecision,

    /// Human-readable reason for the decision
    pub reason: String,
}

/// Append-only consumer of permission decisions
///
/// `record` must never block indefinitely and must not fail from the
/// caller's point of view.
pub trait AuditSink: Send + Sync {
    /// Record one audit entry
    fn record(&self, record: AuditRecord);
}

/// Sink that emits audit records as structured log events
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        tracing::info!(
            target: "audit",
            record_id = %record.id,
            request_id = %record.request_id,
            action = %record.action,
            arguments = %record.arguments,
            decision = ?record.decision,
            reason = %record.reason,
            "permission evaluated"
        );
    }
}

/// In-memory sink, used by tests and the `chat` session inspector
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all records seen so far
    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(e) => tracing::warn!("audit sink poisoned, record dropped: {}", e),
        }
    }
}
