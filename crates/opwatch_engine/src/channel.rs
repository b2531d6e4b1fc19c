use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use monitor_logging::{monitor_debug, monitor_trace, monitor_warn};
use opwatch_core::{Msg, StatusRecord};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::{StatusSource, TransportError};

/// Server event names that announce an orderly end of the stream.
const END_EVENTS: [&str; 2] = ["close", "end"];

#[derive(Debug, Default)]
struct MetricsInner {
    live: AtomicUsize,
    peak_live: AtomicUsize,
    push_opened: AtomicUsize,
    pull_started: AtomicUsize,
    polls: AtomicUsize,
}

/// Counters shared by every channel a registry creates.
#[derive(Debug, Clone, Default)]
pub struct ChannelMetrics {
    inner: Arc<MetricsInner>,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push subscriptions and pollers currently alive.
    pub fn live_channels(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Highest number of channels that were ever alive at the same time.
    pub fn peak_live_channels(&self) -> usize {
        self.inner.peak_live.load(Ordering::SeqCst)
    }

    pub fn push_channels_opened(&self) -> usize {
        self.inner.push_opened.load(Ordering::SeqCst)
    }

    pub fn pull_channels_started(&self) -> usize {
        self.inner.pull_started.load(Ordering::SeqCst)
    }

    pub fn polls_issued(&self) -> usize {
        self.inner.polls.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> LiveGuard {
        let live = self.inner.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_live.fetch_max(live, Ordering::SeqCst);
        LiveGuard {
            metrics: self.clone(),
        }
    }
}

struct LiveGuard {
    metrics: ChannelMetrics,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.metrics.inner.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Events surfaced by a push subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Opened,
    Message(StatusRecord),
    Malformed(String),
    Closed { was_clean: bool },
}

impl From<PushEvent> for Msg {
    fn from(event: PushEvent) -> Self {
        match event {
            PushEvent::Opened => Msg::PushOpened,
            PushEvent::Message(record) => Msg::PushFrame(record),
            PushEvent::Malformed(reason) => Msg::PushMalformed { reason },
            PushEvent::Closed { was_clean } => Msg::PushClosed { was_clean },
        }
    }
}

/// Persistent subscription to one operation's status stream.
///
/// The stream is read on its own task; dropping the channel aborts it.
pub struct PushChannel {
    events: mpsc::UnboundedReceiver<PushEvent>,
    task: JoinHandle<()>,
    closed: bool,
    _live: LiveGuard,
}

impl PushChannel {
    pub fn open(
        source: Arc<dyn StatusSource>,
        kind: &str,
        operation_id: &str,
        metrics: &ChannelMetrics,
    ) -> Self {
        metrics.inner.push_opened.fetch_add(1, Ordering::SeqCst);
        let live = metrics.acquire();
        let (tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump_stream(
            source,
            kind.to_string(),
            operation_id.to_string(),
            tx,
        ));
        Self {
            events,
            task,
            closed: false,
            _live: live,
        }
    }

    /// Next event; pends forever once `Closed` has been returned.
    pub async fn next_event(&mut self) -> PushEvent {
        if self.closed {
            return std::future::pending().await;
        }
        let event = self.events.recv().await.unwrap_or(PushEvent::Closed { was_clean: false });
        if matches!(event, PushEvent::Closed { .. }) {
            self.closed = true;
        }
        event
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn pump_stream(
    source: Arc<dyn StatusSource>,
    kind: String,
    operation_id: String,
    tx: mpsc::UnboundedSender<PushEvent>,
) {
    let mut frames = match source.open_stream(&kind, &operation_id).await {
        Ok(frames) => frames,
        Err(err) => {
            monitor_warn!("{kind}/{operation_id}: push channel failed to open: {err}");
            let _ = tx.send(PushEvent::Closed { was_clean: false });
            return;
        }
    };
    let _ = tx.send(PushEvent::Opened);

    let mut was_clean = false;
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                monitor_warn!("{kind}/{operation_id}: push stream error: {err}");
                was_clean = false;
                break;
            }
        };
        if END_EVENTS.contains(&frame.event.as_str()) {
            was_clean = true;
            break;
        }
        if frame.data.trim().is_empty() {
            continue;
        }
        monitor_trace!("{kind}/{operation_id}: push frame {}", frame.data);
        let event = match StatusRecord::parse(&frame.data) {
            Ok(record) => {
                if record.status.is_terminal() {
                    was_clean = true;
                }
                PushEvent::Message(record)
            }
            Err(err) => PushEvent::Malformed(err.to_string()),
        };
        if tx.send(event).is_err() {
            return;
        }
    }
    monitor_debug!("{kind}/{operation_id}: push stream ended (clean: {was_clean})");
    let _ = tx.send(PushEvent::Closed { was_clean });
}

type PendingPoll = Pin<Box<dyn Future<Output = Result<StatusRecord, TransportError>> + Send>>;

/// Timer-driven status queries for one operation.
///
/// A query that is interrupted mid-flight is resumed by the next call to
/// `next_poll`, so every tick's answer gets classified exactly once.
pub struct PullChannel {
    source: Arc<dyn StatusSource>,
    kind: String,
    operation_id: String,
    interval: Interval,
    polls: u64,
    pending: Option<PendingPoll>,
    metrics: ChannelMetrics,
    _live: LiveGuard,
}

impl PullChannel {
    /// The first poll fires immediately, later ones every `every`.
    pub fn start(
        source: Arc<dyn StatusSource>,
        kind: &str,
        operation_id: &str,
        every: Duration,
        metrics: &ChannelMetrics,
    ) -> Self {
        metrics.inner.pull_started.fetch_add(1, Ordering::SeqCst);
        let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            source,
            kind: kind.to_string(),
            operation_id: operation_id.to_string(),
            interval,
            polls: 0,
            pending: None,
            metrics: metrics.clone(),
            _live: metrics.acquire(),
        }
    }

    /// Waits for the next tick and issues one status query.
    ///
    /// Cancel-safe: dropping the returned future keeps the query in flight.
    pub async fn next_poll(&mut self) -> Result<StatusRecord, TransportError> {
        let query = match self.pending.take() {
            Some(query) => query,
            None => {
                self.interval.tick().await;
                self.issue()
            }
        };
        let result = self.pending.insert(query).await;
        self.pending = None;
        result
    }

    fn issue(&mut self) -> PendingPoll {
        self.polls += 1;
        self.metrics.inner.polls.fetch_add(1, Ordering::SeqCst);
        monitor_trace!(
            "{}/{}: poll #{}",
            self.kind,
            self.operation_id,
            self.polls
        );
        let source = self.source.clone();
        let kind = self.kind.clone();
        let operation_id = self.operation_id.clone();
        Box::pin(async move { source.fetch_status(&kind, &operation_id).await })
    }
}

/// The single channel a monitor owns at any time.
#[derive(Default)]
pub(crate) enum ActiveChannel {
    #[default]
    Idle,
    Push(PushChannel),
    Pull(PullChannel),
}

impl ActiveChannel {
    pub(crate) async fn next_msg(&mut self) -> Msg {
        match self {
            ActiveChannel::Idle => std::future::pending().await,
            ActiveChannel::Push(channel) => channel.next_event().await.into(),
            ActiveChannel::Pull(channel) => match channel.next_poll().await {
                Ok(record) => Msg::Polled(record),
                Err(err) => Msg::PollFailed {
                    reason: err.to_string(),
                },
            },
        }
    }
}
