use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use super::{topology_listener::TopologyListener, topology_parser::WriteError};
use crate::core::{
    reconcile::{Snapshot, TopologyEvent},
    topology::{Topology, Version},
};

/// Errors returned by topology management operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TopologyError {
    #[error("topology '{0}' is not deployed")]
    NotFound(String),

    #[error("topology '{name}' failed validation: {reason}")]
    Invalid { name: String, reason: String },

    #[error("failed to serialize topology '{name}': {source}")]
    Write {
        name: String,
        #[source]
        source: WriteError,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not advance the timestamp of topology '{0}'")]
    Redeploy(String),
}

/// Source of truth for the deployed topologies.
#[async_trait]
pub trait TopologyService: Send + Sync + 'static {
    /// Currently published topologies, ordered by name.
    fn topologies(&self) -> Vec<Arc<Topology>>;

    /// The currently published snapshot. Never blocks.
    fn snapshot(&self) -> Arc<Snapshot>;

    /// Run one reconciliation pass and return the events it produced.
    async fn reload(&self) -> Vec<TopologyEvent>;

    /// Write `topology` into the watched directory and reconcile.
    async fn deploy(&self, topology: &Topology) -> Result<(), TopologyError>;

    /// Force republication of one topology, or of all when `name` is `None`.
    async fn redeploy(&self, name: Option<&str>) -> Result<(), TopologyError>;

    /// Remove the topology's descriptor files and reconcile.
    async fn delete(&self, name: &str) -> Result<(), TopologyError>;

    /// Redeploy every topology using the changed service definition.
    async fn redeploy_for_service_definition(
        &self,
        role: &str,
        name: &str,
        version: Option<&Version>,
    ) -> Result<(), TopologyError>;

    fn add_listener(&self, listener: Arc<dyn TopologyListener>);

    /// Begin watching. Idempotent.
    async fn start(&self) -> Result<(), TopologyError>;

    /// Stop watching. Idempotent.
    async fn stop(&self);
}
