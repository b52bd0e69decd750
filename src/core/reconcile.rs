//! Published snapshots and the change diff between two of them.
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;

use super::topology::Topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TopologyEventKind {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for TopologyEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TopologyEventKind::Created => "created",
            TopologyEventKind::Updated => "updated",
            TopologyEventKind::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

/// One change in a reconciliation batch. `Deleted` carries the last
/// published version of the topology.
#[derive(Debug, Clone)]
pub struct TopologyEvent {
    pub kind: TopologyEventKind,
    pub topology: Arc<Topology>,
}

impl TopologyEvent {
    pub fn new(kind: TopologyEventKind, topology: Arc<Topology>) -> Self {
        Self { kind, topology }
    }
}

/// Immutable mapping from source file to its published topology.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    topologies: HashMap<PathBuf, Arc<Topology>>,
}

impl Snapshot {
    pub fn new(topologies: HashMap<PathBuf, Arc<Topology>>) -> Self {
        Self { topologies }
    }

    pub fn get(&self, file: &Path) -> Option<&Arc<Topology>> {
        self.topologies.get(file)
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.topologies.contains_key(file)
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<Topology>> {
        self.topologies.values().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.topologies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topologies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Arc<Topology>)> {
        self.topologies.iter()
    }

    /// Published topologies ordered by name.
    pub fn topologies(&self) -> Vec<Arc<Topology>> {
        let mut all: Vec<_> = self.topologies.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

/// Compute the change events that turn `prev` into `next`.
///
/// Deletions come first, then creations and updates; within each group
/// events follow source-path order. A file present in both snapshots yields
/// an update only when its timestamp advanced.
pub fn diff_snapshots(prev: &Snapshot, next: &Snapshot) -> Vec<TopologyEvent> {
    let mut deleted: Vec<_> = prev
        .topologies
        .iter()
        .filter(|(file, _)| !next.contains(file))
        .collect();
    deleted.sort_by(|a, b| a.0.cmp(b.0));

    let mut changed: Vec<_> = next
        .topologies
        .iter()
        .filter_map(|(file, topology)| match prev.get(file) {
            None => Some((file, TopologyEventKind::Created, topology)),
            Some(old) if topology.timestamp > old.timestamp => {
                Some((file, TopologyEventKind::Updated, topology))
            }
            Some(_) => None,
        })
        .collect();
    changed.sort_by(|a, b| a.0.cmp(b.0));

    deleted
        .into_iter()
        .map(|(_, t)| TopologyEvent::new(TopologyEventKind::Deleted, t.clone()))
        .chain(
            changed
                .into_iter()
                .map(|(_, kind, t)| TopologyEvent::new(kind, t.clone())),
        )
        .collect()
}
