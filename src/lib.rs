//! topogate - a topology-driven API gateway.
//!
//! A directory of topology descriptors defines what the gateway serves. Each
//! topology names its providers (cross-cutting policy such as response
//! hardening), its services (role-scoped backend endpoints), and its
//! applications. The lifecycle manager keeps the directory and the running
//! gateway in step: it watches the directory, reparses changed descriptors,
//! diffs the result against what is published, swaps a new snapshot in
//! atomically, and tells its listeners what was created, updated, or
//! deleted. The gateway deployer is one such listener; it turns every
//! topology into an immutable dispatch engine whose path-pattern table maps
//! request paths onto ordered chains of steps.
//!
//! # Architecture
//! Like a hexagonal service: **ports** are traits, **adapters** implement
//! them, and the pure logic (path matching, dispatch, topology model,
//! snapshot diffing) lives in `core`.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use topogate::{
//!     DirectoryTopologyService, GatewayDeployer, HttpClientAdapter, builtin_registry,
//!     config::GatewayConfig, ports::TopologyService,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = GatewayConfig::default();
//! let client = Arc::new(HttpClientAdapter::new(config.backend_timeout())?);
//! let deployer = Arc::new(GatewayDeployer::new(Arc::new(builtin_registry(client))));
//!
//! let topologies = DirectoryTopologyService::builder(config.topology.clone()).build();
//! topologies.add_listener(deployer.clone());
//! topologies.start().await?;
//! // Serve `topogate::HttpHandler::router()` with axum.
//! # Ok(()) }
//! ```
//!
//! # Concurrency
//! Published snapshots, listener lists, and the deployer's engine table are
//! `arc_swap::ArcSwap` values: readers never block, and every reader sees
//! either the previous or the next state in full. Reconciliation passes are
//! serialized by an async mutex.
//!
//! # Error Handling
//! Ports expose `thiserror` enums; configuration and the binary use
//! `eyre::Result` with context attached through `WrapErr`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{
        DirectoryTopologyService, GatewayDeployer, HttpClientAdapter, HttpHandler,
        JsonTopologyCodec, TracingAuditor, builtin_registry,
    },
    core::{DispatchEngine, PathMap, Topology},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
