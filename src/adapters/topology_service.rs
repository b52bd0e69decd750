//! Directory-backed topology lifecycle manager.
//!
//! [`DirectoryTopologyService`] keeps the published [`Snapshot`] of a
//! directory of descriptor files current:
//!
//! * a background task reconciles on a fixed poll interval, and sooner when
//!   the `notify` watcher reports a change in the directory
//! * a reconciliation pass loads every eligible file, diffs the result
//!   against the published snapshot, swaps the new snapshot in with one
//!   atomic store, and hands the event batch to every listener
//! * passes are serialized; readers never block and never see a partial pass
//! * per-file and per-listener failures are audited and isolated
//!
//! `deploy`, `redeploy`, and `delete` change the directory and then
//! reconcile, so their effects are published by the time they return.
use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime},
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use notify::{RecursiveMode, Watcher};
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    adapters::{json_codec::JsonTopologyCodec, tracing_auditor::TracingAuditor},
    config::{models::TopologySettings, validation::TopologyValidator},
    core::{
        reconcile::{Snapshot, TopologyEvent, diff_snapshots},
        topology::{Topology, Version},
    },
    metrics,
    ports::{
        auditor::{AuditAction, AuditOutcome, AuditRecord, Auditor, ResourceType},
        topology_listener::TopologyListener,
        topology_parser::{ParseError, TopologyParser, TopologyWriter},
        topology_service::{TopologyError, TopologyService},
    },
    tracing_setup::create_reconcile_span,
};

const TEMP_SUFFIX: &str = "tmp";
const REDEPLOY_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Builder for [`DirectoryTopologyService`]. Parser and writer default to
/// JSON descriptors, the auditor to [`TracingAuditor`].
pub struct DirectoryTopologyServiceBuilder {
    settings: TopologySettings,
    parser: Arc<dyn TopologyParser>,
    writer: Arc<dyn TopologyWriter>,
    auditor: Arc<dyn Auditor>,
}

impl DirectoryTopologyServiceBuilder {
    pub fn parser(mut self, parser: impl TopologyParser) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn writer(mut self, writer: impl TopologyWriter) -> Self {
        self.writer = Arc::new(writer);
        self
    }

    pub fn auditor(mut self, auditor: Arc<dyn Auditor>) -> Self {
        self.auditor = auditor;
        self
    }

    pub fn build(self) -> DirectoryTopologyService {
        if !self.settings.accepts_extension(self.writer.extension()) {
            tracing::warn!(
                "Deployed topologies use extension '{}' which is not watched ({:?})",
                self.writer.extension(),
                self.settings.extensions
            );
        }
        DirectoryTopologyService {
            inner: Arc::new(Inner {
                settings: self.settings,
                parser: self.parser,
                writer: self.writer,
                auditor: self.auditor,
                snapshot: ArcSwap::from_pointee(Snapshot::default()),
                listeners: ArcSwap::from_pointee(Vec::new()),
                reconcile_lock: tokio::sync::Mutex::new(()),
                watch: Mutex::new(None),
            }),
        }
    }
}

struct Inner {
    settings: TopologySettings,
    parser: Arc<dyn TopologyParser>,
    writer: Arc<dyn TopologyWriter>,
    auditor: Arc<dyn Auditor>,
    snapshot: ArcSwap<Snapshot>,
    listeners: ArcSwap<Vec<Arc<dyn TopologyListener>>>,
    reconcile_lock: tokio::sync::Mutex<()>,
    watch: Mutex<Option<WatchHandle>>,
}

/// Background scan state while started.
struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _watcher: Option<notify::RecommendedWatcher>,
}

/// Topology service over a watched directory. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct DirectoryTopologyService {
    inner: Arc<Inner>,
}

impl DirectoryTopologyService {
    pub fn builder(settings: TopologySettings) -> DirectoryTopologyServiceBuilder {
        DirectoryTopologyServiceBuilder {
            settings,
            parser: Arc::new(JsonTopologyCodec),
            writer: Arc::new(JsonTopologyCodec),
            auditor: Arc::new(TracingAuditor),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.inner.settings.directory
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .watch
            .lock()
            .map(|w| w.is_some())
            .unwrap_or(false)
    }

    fn audit(
        &self,
        action: AuditAction,
        resource: &str,
        resource_type: ResourceType,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) {
        let mut record = AuditRecord::new(action, resource, resource_type, outcome);
        record.detail = detail;
        self.inner.auditor.audit(&record);
    }

    /// Parse one file, retrying transient failures within the retry window.
    pub async fn load_one(&self, path: &Path) -> Result<Topology, ParseError> {
        let window = self.inner.settings.parse_retry_window();
        let delay = self.inner.settings.parse_retry_delay();
        let start = Instant::now();
        let mut attempt = 1u32;

        loop {
            match self.try_load(path).await {
                Err(e) if e.is_transient() && start.elapsed() + delay <= window => {
                    tracing::debug!(
                        "Transient failure loading {} (attempt {}): {}",
                        path.display(),
                        attempt,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn try_load(&self, path: &Path) -> Result<Topology, ParseError> {
        // read the timestamp first so a concurrent write is seen as newer next pass
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ParseError::Transient(format!("{}: {e}", path.display())))?;
        let modified = metadata
            .modified()
            .map_err(|e| ParseError::Permanent(format!("{}: {e}", path.display())))?;
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| ParseError::Transient(format!("{}: {e}", path.display())))?;
        let topology = self.inner.parser.parse(&content)?;
        Ok(topology.located_at(path, modified))
    }

    /// Eligible descriptor files with their modification times, in path order.
    async fn scan(&self) -> Vec<(PathBuf, SystemTime)> {
        let dir = &self.inner.settings.directory;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot read topology directory {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut files = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Error listing {}: {}", dir.display(), e);
                    break;
                }
            };
            let path = entry.path();
            if let Some(modified) = self.eligible(&path).await {
                files.push((path, modified));
            }
        }
        files.sort();
        files
    }

    async fn eligible(&self, path: &Path) -> Option<SystemTime> {
        let extension = path.extension()?.to_str()?;
        if !self.inner.settings.accepts_extension(extension) {
            return None;
        }
        let metadata = tokio::fs::metadata(path).await.ok()?;
        if !metadata.is_file() {
            return None;
        }
        // unreadable files are skipped rather than retried
        tokio::fs::File::open(path).await.ok()?;
        metadata.modified().ok()
    }

    /// Load every eligible file. A published version is replaced only by a
    /// strictly newer file; otherwise it is reused without parsing. A file
    /// that fails to load keeps its published version, if any.
    async fn load_all(&self, prev: &Snapshot) -> Snapshot {
        let mut next = HashMap::new();

        for (path, modified) in self.scan().await {
            if let Some(published) = prev.get(&path) {
                if modified <= published.timestamp {
                    if modified < published.timestamp {
                        tracing::debug!(
                            "Ignoring {}: older than published topology '{}'",
                            path.display(),
                            published.name
                        );
                    }
                    next.insert(path, published.clone());
                    continue;
                }
            }

            match self.load_one(&path).await {
                Ok(topology) => {
                    tracing::debug!("Loaded topology '{}' from {}", topology.name, path.display());
                    next.insert(path, Arc::new(topology));
                }
                Err(e) => {
                    let name = file_stem(&path);
                    tracing::warn!("Failed to load topology {}: {}", path.display(), e);
                    metrics::increment_load_failure(&name);
                    self.audit(
                        AuditAction::Load,
                        &name,
                        ResourceType::Topology,
                        AuditOutcome::Failure,
                        Some(e.to_string()),
                    );
                    if let Some(published) = prev.get(&path) {
                        next.insert(path, published.clone());
                    }
                }
            }
        }

        Snapshot::new(next)
    }

    /// One load, diff, publish, notify pass.
    pub async fn reconcile(&self) -> Vec<TopologyEvent> {
        let _guard = self.inner.reconcile_lock.lock().await;
        let span = create_reconcile_span(&self.inner.settings.directory);

        async {
            let started = Instant::now();
            let prev = self.inner.snapshot.load_full();
            let next = self.load_all(&prev).await;
            let events = diff_snapshots(&prev, &next);
            let published = next.len();
            self.inner.snapshot.store(Arc::new(next));
            metrics::record_reconcile(started.elapsed(), published);

            tracing::Span::current().record("events", events.len());
            if !events.is_empty() {
                for event in &events {
                    tracing::info!("Topology '{}' {}", event.topology.name, event.kind);
                    metrics::increment_topology_event(event.kind);
                }
                self.notify(&events);
            }
            events
        }
        .instrument(span)
        .await
    }

    fn notify(&self, events: &[TopologyEvent]) {
        let listeners = self.inner.listeners.load();
        for (index, listener) in listeners.iter().enumerate() {
            let failure = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                listener.handle_topology_events(events)
            })) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("listener panicked".to_string()),
            };
            if let Some(reason) = failure {
                tracing::error!("Topology listener #{} failed: {}", index, reason);
                metrics::increment_listener_failure();
                self.audit(
                    AuditAction::Notify,
                    &format!("listener-{index}"),
                    ResourceType::Listener,
                    AuditOutcome::Failure,
                    Some(reason),
                );
            }
        }
    }

    /// Names become file stems, so a bad name is refused whatever the
    /// validation mode.
    fn check_name(&self, action: AuditAction, name: &str) -> Result<(), TopologyError> {
        let Err(e) = TopologyValidator::validate_name(name) else {
            return Ok(());
        };
        self.audit(
            action,
            name,
            ResourceType::Topology,
            AuditOutcome::Failure,
            Some(e.to_string()),
        );
        Err(TopologyError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    fn check(&self, action: AuditAction, topology: &Topology) -> Result<(), TopologyError> {
        self.check_name(action, &topology.name)?;
        let Err(e) = TopologyValidator::validate(topology) else {
            return Ok(());
        };
        if self.inner.settings.strict_validation {
            self.audit(
                action,
                &topology.name,
                ResourceType::Topology,
                AuditOutcome::Failure,
                Some(e.to_string()),
            );
            return Err(TopologyError::Invalid {
                name: topology.name.clone(),
                reason: e.to_string(),
            });
        }
        tracing::warn!("Topology '{}' failed validation: {}", topology.name, e);
        Ok(())
    }

    fn descriptor_path(&self, name: &str, extension: &str) -> PathBuf {
        self.inner
            .settings
            .directory
            .join(format!("{name}.{extension}"))
    }

    async fn write_descriptor(&self, topology: &Topology) -> Result<PathBuf, TopologyError> {
        let content = self
            .inner
            .writer
            .write(topology)
            .map_err(|source| TopologyError::Write {
                name: topology.name.clone(),
                source,
            })?;

        let dir = &self.inner.settings.directory;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| TopologyError::Io {
                path: dir.clone(),
                source,
            })?;

        let extension = self.inner.writer.extension();
        let target = self.descriptor_path(&topology.name, extension);
        let temp = self.descriptor_path(&topology.name, &format!("{extension}.{TEMP_SUFFIX}"));

        let written = match tokio::fs::write(&temp, &content).await {
            Ok(()) => tokio::fs::rename(&temp, &target).await,
            Err(e) => Err(e),
        };
        if let Err(source) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(TopologyError::Io { path: target, source });
        }

        for extension in &self.inner.settings.extensions {
            let sibling = self.descriptor_path(&topology.name, extension);
            if sibling != target && tokio::fs::remove_file(&sibling).await.is_ok() {
                tracing::debug!("Removed superseded descriptor {}", sibling.display());
            }
        }
        Ok(target)
    }

    /// Move `path`'s modification time strictly past its current value,
    /// retrying for the redeploy window on coarse-grained file systems.
    async fn advance_timestamp(
        &self,
        path: &Path,
        floor: Option<SystemTime>,
    ) -> Result<(), TopologyError> {
        let io_err = |source| TopologyError::Io {
            path: path.to_path_buf(),
            source,
        };
        let window = self.inner.settings.redeploy_window();
        let start = Instant::now();

        loop {
            let original = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .map_err(io_err)?;
            let baseline = floor.map_or(original, |f| f.max(original));
            let elapsed = start.elapsed().max(Duration::from_millis(1));
            let target = SystemTime::now().max(baseline + elapsed);

            std::fs::OpenOptions::new()
                .write(true)
                .open(path)
                .and_then(|f| f.set_modified(target))
                .map_err(io_err)?;

            let updated = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .map_err(io_err)?;
            if updated > baseline {
                return Ok(());
            }
            if start.elapsed() >= window {
                return Err(TopologyError::Redeploy(file_stem(path)));
            }
            tokio::time::sleep(REDEPLOY_RETRY_DELAY).await;
        }
    }

    async fn redeploy_topology(&self, topology: &Topology) -> Result<(), TopologyError> {
        let result = match &topology.uri {
            Some(path) => {
                self.check(AuditAction::Redeploy, topology)?;
                self.advance_timestamp(path, Some(topology.timestamp)).await
            }
            None => Err(TopologyError::NotFound(topology.name.clone())),
        };
        let outcome = match &result {
            Ok(()) => AuditOutcome::Success,
            Err(e) => {
                tracing::warn!("Failed to redeploy topology '{}': {}", topology.name, e);
                AuditOutcome::Failure
            }
        };
        self.audit(
            AuditAction::Redeploy,
            &topology.name,
            ResourceType::Topology,
            outcome,
            result.as_ref().err().map(ToString::to_string),
        );
        result
    }

    async fn redeploy_all(&self, targets: Vec<Arc<Topology>>) -> Result<(), TopologyError> {
        let mut first_error = None;
        for topology in targets {
            if let Err(e) = self.redeploy_topology(&topology).await {
                first_error.get_or_insert(e);
            }
        }
        self.reconcile().await;
        first_error.map_or(Ok(()), Err)
    }

    fn spawn_watcher(&self, tx: mpsc::Sender<()>) -> notify::Result<notify::RecommendedWatcher> {
        let extensions = self.inner.settings.extensions.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if (event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove())
                        && event.paths.iter().any(|p| {
                            p.extension()
                                .and_then(|e| e.to_str())
                                .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
                        })
                    {
                        tracing::trace!("Topology directory changed: {:?}", event.kind);
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => tracing::error!("Topology watch error: {:?}", e),
            })?;
        watcher.watch(&self.inner.settings.directory, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl TopologyService for DirectoryTopologyService {
    fn topologies(&self) -> Vec<Arc<Topology>> {
        self.inner.snapshot.load().topologies()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load_full()
    }

    async fn reload(&self) -> Vec<TopologyEvent> {
        self.reconcile().await
    }

    async fn deploy(&self, topology: &Topology) -> Result<(), TopologyError> {
        self.check(AuditAction::Deploy, topology)?;

        let previous = self.inner.snapshot.load().by_name(&topology.name).cloned();
        let target = match self.write_descriptor(topology).await {
            Ok(target) => target,
            Err(e) => {
                tracing::error!("Failed to deploy topology '{}': {}", topology.name, e);
                self.audit(
                    AuditAction::Deploy,
                    &topology.name,
                    ResourceType::Topology,
                    AuditOutcome::Failure,
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };

        // a rewrite within the file system's timestamp granularity must still
        // read as newer than the published version
        if let Some(previous) = previous {
            if let Err(e) = self.advance_timestamp(&target, Some(previous.timestamp)).await {
                tracing::warn!("Deployed '{}' may not be picked up: {}", topology.name, e);
            }
        }

        tracing::info!("Deployed topology '{}' to {}", topology.name, target.display());
        self.audit(
            AuditAction::Deploy,
            &topology.name,
            ResourceType::Topology,
            AuditOutcome::Success,
            None,
        );
        self.reconcile().await;
        Ok(())
    }

    async fn redeploy(&self, name: Option<&str>) -> Result<(), TopologyError> {
        let snapshot = self.inner.snapshot.load_full();
        let targets = match name {
            Some(name) => vec![
                snapshot
                    .by_name(name)
                    .cloned()
                    .ok_or_else(|| TopologyError::NotFound(name.to_string()))?,
            ],
            None => snapshot.topologies(),
        };
        self.redeploy_all(targets).await
    }

    async fn delete(&self, name: &str) -> Result<(), TopologyError> {
        self.check_name(AuditAction::Undeploy, name)?;
        let mut removed = 0;
        for extension in &self.inner.settings.extensions {
            let path = self.descriptor_path(name, extension);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    self.audit(
                        AuditAction::Undeploy,
                        name,
                        ResourceType::Topology,
                        AuditOutcome::Failure,
                        Some(source.to_string()),
                    );
                    return Err(TopologyError::Io { path, source });
                }
            }
        }

        if removed == 0 && self.inner.snapshot.load().by_name(name).is_none() {
            return Err(TopologyError::NotFound(name.to_string()));
        }

        tracing::info!("Deleted topology '{}'", name);
        self.audit(
            AuditAction::Undeploy,
            name,
            ResourceType::Topology,
            AuditOutcome::Success,
            None,
        );
        self.reconcile().await;
        Ok(())
    }

    async fn redeploy_for_service_definition(
        &self,
        role: &str,
        name: &str,
        version: Option<&Version>,
    ) -> Result<(), TopologyError> {
        let targets: Vec<_> = self
            .topologies()
            .into_iter()
            .filter(|t| t.uses_service_definition(role, name, version))
            .collect();
        if targets.is_empty() {
            return Ok(());
        }
        for topology in &targets {
            tracing::info!(
                "Redeploying topology '{}' after change to service definition {}/{}",
                topology.name,
                role,
                name
            );
        }
        self.redeploy_all(targets).await
    }

    fn add_listener(&self, listener: Arc<dyn TopologyListener>) {
        self.inner.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(listener.clone());
            next
        });
    }

    async fn start(&self) -> Result<(), TopologyError> {
        let dir = self.inner.settings.directory.clone();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| TopologyError::Io {
                path: dir.clone(),
                source,
            })?;

        let Ok(mut watch) = self.inner.watch.lock() else {
            return Ok(());
        };
        if watch.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel(1);
        let watcher = if self.inner.settings.watch_events {
            match self.spawn_watcher(tx) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!("File change events unavailable, polling only: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let service = self.clone();
        let poll_interval = self.inner.settings.poll_interval();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    Some(()) = rx.recv() => {}
                }
                service.reconcile().await;
            }
            tracing::debug!("Topology scan stopped");
        });

        tracing::info!("Watching {} every {:?}", dir.display(), poll_interval);
        *watch = Some(WatchHandle {
            cancel,
            task,
            _watcher: watcher,
        });
        Ok(())
    }

    async fn stop(&self) {
        let handle = self.inner.watch.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                tracing::warn!("Topology scan task ended abnormally: {}", e);
            }
            tracing::info!("Stopped watching {}", self.inner.settings.directory.display());
        }
    }
}
