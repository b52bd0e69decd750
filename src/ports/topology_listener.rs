use thiserror::Error;

use crate::core::reconcile::TopologyEvent;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ListenerError {
    #[error("listener failed: {0}")]
    Failed(String),
}

/// Receives the event batch of every reconciliation pass that changed
/// something.
pub trait TopologyListener: Send + Sync + 'static {
    fn handle_topology_events(&self, events: &[TopologyEvent]) -> Result<(), ListenerError>;
}

impl<F> TopologyListener for F
where
    F: Fn(&[TopologyEvent]) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    fn handle_topology_events(&self, events: &[TopologyEvent]) -> Result<(), ListenerError> {
        self(events)
    }
}
