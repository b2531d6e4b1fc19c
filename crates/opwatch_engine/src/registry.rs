use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use monitor_logging::{monitor_debug, monitor_info, monitor_warn};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::monitor::{spawn_monitor, FinishHook, MonitorContext};
use crate::{
    ChannelMetrics, MonitorHandle, MonitorSettings, ProgressObserver, ReqwestStatusSource,
    StatusSource, TransportError,
};

struct MonitorEntry {
    generation: u64,
    handle: MonitorHandle,
}

type MonitorTable = Mutex<HashMap<String, MonitorEntry>>;
type KindLocks = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Process-wide table of monitors, at most one per operation kind.
#[derive(Clone)]
pub struct MonitorRegistry {
    ctx: MonitorContext,
    table: Arc<MonitorTable>,
    // Serializes start/stop per kind so a replacement never overlaps a teardown.
    kind_locks: Arc<KindLocks>,
    generations: Arc<AtomicU64>,
}

impl MonitorRegistry {
    pub fn new(
        source: Arc<dyn StatusSource>,
        observer: Arc<dyn ProgressObserver>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            ctx: MonitorContext {
                source,
                observer,
                settings: Arc::new(settings),
                metrics: ChannelMetrics::new(),
            },
            table: Arc::new(Mutex::new(HashMap::new())),
            kind_locks: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registry backed by the HTTP status source.
    pub fn connect(
        settings: MonitorSettings,
        observer: Arc<dyn ProgressObserver>,
    ) -> Result<Self, TransportError> {
        let source = ReqwestStatusSource::new(settings.clone())?;
        Ok(Self::new(Arc::new(source), observer, settings))
    }

    pub fn metrics(&self) -> &ChannelMetrics {
        &self.ctx.metrics
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.ctx.settings
    }

    pub fn source(&self) -> &Arc<dyn StatusSource> {
        &self.ctx.source
    }

    /// Starts monitoring `operation_id`, replacing any monitor of the same kind.
    ///
    /// The previous monitor is fully torn down before the new one opens a channel.
    pub async fn start_monitoring(&self, kind: &str, operation_id: &str) -> MonitorHandle {
        let kind_lock = self.kind_lock(kind);
        let _serialized = kind_lock.lock().await;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (go_tx, go_rx) = oneshot::channel();
        let handle = spawn_monitor(
            self.ctx.clone(),
            kind,
            operation_id,
            generation,
            go_rx,
            self.finish_hook(kind, generation),
        );

        let previous = lock_table(&self.table).insert(
            kind.to_string(),
            MonitorEntry {
                generation,
                handle: handle.clone(),
            },
        );
        if let Some(previous) = previous {
            monitor_info!(
                "{kind}: replacing monitor for {} with {operation_id}",
                previous.handle.operation_id()
            );
            previous.handle.stop();
            previous.handle.wait().await;
        }

        let _ = go_tx.send(());
        monitor_debug!("{kind}/{operation_id}: monitor started (generation {generation})");
        handle
    }

    /// Stops the monitor of `kind` if there is one; returns whether one was stopped.
    pub async fn stop_monitoring(&self, kind: &str) -> bool {
        let kind_lock = self.kind_lock(kind);
        let _serialized = kind_lock.lock().await;
        let removed = lock_table(&self.table).remove(kind);
        match removed {
            Some(entry) => {
                entry.handle.stop();
                entry.handle.wait().await;
                monitor_info!("{kind}: monitor stopped");
                true
            }
            None => false,
        }
    }

    pub fn active(&self, kind: &str) -> Option<MonitorHandle> {
        lock_table(&self.table)
            .get(kind)
            .map(|entry| entry.handle.clone())
    }

    pub fn active_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = lock_table(&self.table).keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Resumes observing a task of `kind` the server still runs.
    ///
    /// Returns the existing handle when that operation is already monitored.
    pub async fn reattach(&self, kind: &str) -> Result<Option<MonitorHandle>, TransportError> {
        let Some(active) = self.ctx.source.current(kind).await? else {
            monitor_debug!("{kind}: nothing running server-side");
            return Ok(None);
        };
        if !active.record.status.is_active() {
            monitor_debug!(
                "{kind}: last operation {} already {}",
                active.operation_id,
                active.record.status
            );
            return Ok(None);
        }
        if let Some(existing) = self.active(kind) {
            if existing.operation_id() == active.operation_id && !existing.is_finished() {
                return Ok(Some(existing));
            }
        }

        monitor_info!(
            "{kind}: re-attaching to running operation {} ({})",
            active.operation_id,
            active.record.status
        );
        Ok(Some(
            self.start_monitoring(kind, &active.operation_id).await,
        ))
    }

    /// Re-attaches every kind; kinds that fail to answer are logged and skipped.
    pub async fn reattach_all<I, S>(&self, kinds: I) -> Vec<MonitorHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut handles = Vec::new();
        for kind in kinds {
            let kind = kind.as_ref();
            match self.reattach(kind).await {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => {}
                Err(err) => monitor_warn!("{kind}: re-attach query failed: {err}"),
            }
        }
        handles
    }

    /// Stops every monitor.
    pub async fn shutdown(&self) {
        let entries: Vec<MonitorEntry> = lock_table(&self.table)
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &entries {
            entry.handle.stop();
        }
        for entry in entries {
            entry.handle.wait().await;
        }
    }

    fn kind_lock(&self, kind: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .kind_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(kind.to_string()).or_default().clone()
    }

    fn finish_hook(&self, kind: &str, generation: u64) -> FinishHook {
        let table: Weak<MonitorTable> = Arc::downgrade(&self.table);
        let kind = kind.to_string();
        Box::new(move |outcome| {
            let Some(table) = table.upgrade() else {
                return;
            };
            let mut table = lock_table(&table);
            // A replacement may already own the slot.
            if table
                .get(&kind)
                .is_some_and(|entry| entry.generation == generation)
            {
                table.remove(&kind);
                monitor_debug!("{kind}: monitor deregistered after {outcome:?}");
            }
        })
    }
}

fn lock_table(table: &MonitorTable) -> MutexGuard<'_, HashMap<String, MonitorEntry>> {
    // Entries stay consistent under panic; every mutation is a single map call.
    table.lock().unwrap_or_else(PoisonError::into_inner)
}
