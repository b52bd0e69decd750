pub mod deployer;
pub mod http_client;
pub mod http_handler;
pub mod json_codec;
pub mod steps;
pub mod topology_service;
pub mod tracing_auditor;

/// Re-export commonly used types from adapters
pub use deployer::GatewayDeployer;
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use json_codec::JsonTopologyCodec;
pub use steps::builtin_registry;
pub use topology_service::DirectoryTopologyService;
pub use tracing_auditor::TracingAuditor;
