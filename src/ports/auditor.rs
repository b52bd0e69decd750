use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Load,
    Deploy,
    Redeploy,
    Undeploy,
    Notify,
    Validate,
    Access,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Topology,
    Listener,
    Uri,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure,
    Unavailable,
}

macro_rules! lowercase_display {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&format!("{self:?}").to_lowercase())
            }
        }
    )*};
}

lowercase_display!(AuditAction, ResourceType, AuditOutcome);

/// One audited action on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub resource: String,
    pub resource_type: ResourceType,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(
        action: AuditAction,
        resource: impl Into<String>,
        resource_type: ResourceType,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            action,
            resource: resource.into(),
            resource_type,
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// Sink for audit records. Implementations must not block for long; they
/// are called from reconciliation and request paths.
pub trait Auditor: Send + Sync + 'static {
    fn audit(&self, record: &AuditRecord);
}
