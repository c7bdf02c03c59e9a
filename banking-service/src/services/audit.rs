use std::sync::Arc;

use super::error::StoreError;
use super::metrics;
use super::store::Store;
use crate::models::{AuditEntry, SubjectType};

/// Append-only audit trail. Entries are written after the state change they
/// describe has committed.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn Store>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append one entry. The change it describes is already durable, so a
    /// failed write is logged with the full entry instead of failing the caller.
    pub async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "audit",
            action = %entry.action,
            subject_type = %entry.subject_type,
            subject_id = entry.subject_id.as_deref().unwrap_or("-"),
            outcome = %entry.outcome,
            actor_id = ?entry.actor_id,
            "Audit event"
        );

        if let Err(e) = self.store.append_audit(&entry).await {
            metrics::audit_write_failed();
            tracing::error!(
                error = %e,
                entry_id = %entry.entry_id,
                action = %entry.action,
                subject_id = entry.subject_id.as_deref().unwrap_or("-"),
                metadata = ?entry.metadata,
                "Failed to persist audit entry"
            );
        }
    }

    pub async fn trail(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        self.store
            .list_audit_for_subject(subject_type.as_str(), subject_id)
            .await
    }
}
