pub mod dispatch;
pub mod path_map;
pub mod reconcile;
pub mod topology;

pub use dispatch::{DispatchEngine, DispatchOutcome, Step, StepRegistry};
pub use path_map::PathMap;
pub use reconcile::{Snapshot, TopologyEvent, TopologyEventKind};
pub use topology::{Application, Provider, Service, Topology, Version};
