pub mod auditor;
pub mod http_client;
pub mod topology_listener;
pub mod topology_parser;
pub mod topology_service;

pub use auditor::{AuditAction, AuditOutcome, AuditRecord, Auditor, ResourceType};
pub use topology_listener::{ListenerError, TopologyListener};
pub use topology_parser::{ParseError, TopologyParser, TopologyWriter, WriteError};
pub use topology_service::{TopologyError, TopologyService};
