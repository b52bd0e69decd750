use crate::ports::auditor::{AuditOutcome, AuditRecord, Auditor};

/// Emits audit records as `tracing` events on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditor;

impl Auditor for TracingAuditor {
    fn audit(&self, record: &AuditRecord) {
        let detail = record.detail.as_deref().unwrap_or_default();
        match record.outcome {
            AuditOutcome::Failure => tracing::warn!(
                target: "audit",
                action = %record.action,
                resource = %record.resource,
                resource_type = %record.resource_type,
                outcome = %record.outcome,
                detail,
                "audit"
            ),
            _ => tracing::info!(
                target: "audit",
                action = %record.action,
                resource = %record.resource,
                resource_type = %record.resource_type,
                outcome = %record.outcome,
                detail,
                "audit"
            ),
        }
    }
}
