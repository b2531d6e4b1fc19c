#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use opwatch_core::{StatusRecord, TaskStatus};
use opwatch_engine::{
    ActiveOperation, CancelReply, FailureKind, FrameStream, MonitorSettings, ProgressObserver,
    RawFrame, StatusSource, TransportError,
};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(monitor_logging::initialize_for_tests);
}

pub fn settings() -> MonitorSettings {
    MonitorSettings {
        default_poll_interval: Duration::from_millis(20),
        ..MonitorSettings::default()
    }
}

pub fn record(status: TaskStatus, message: &str, progress: f64) -> StatusRecord {
    StatusRecord::new(status, message).with_progress(progress)
}

pub fn data_frame(record: &StatusRecord) -> RawFrame {
    RawFrame {
        event: "message".to_string(),
        data: serde_json::to_string(record).unwrap(),
    }
}

pub fn network_error() -> TransportError {
    TransportError::new(FailureKind::Network, "connection refused")
}

/// How a scripted push stream behaves.
pub enum StreamScript {
    /// `open_stream` fails.
    Refuse,
    /// Frames, then the stream stays open.
    Hang(Vec<RawFrame>),
    /// Frames, then EOF.
    End(Vec<RawFrame>),
    /// Frames, then a transport error.
    Break(Vec<RawFrame>),
}

/// In-memory backend driven by per-call scripts.
pub struct ScriptedSource {
    streams: Mutex<VecDeque<StreamScript>>,
    polls: Mutex<VecDeque<Result<StatusRecord, TransportError>>>,
    idle_poll: Mutex<Result<StatusRecord, TransportError>>,
    cancel_reply: Mutex<Result<CancelReply, TransportError>>,
    after_cancel: Mutex<Option<StatusRecord>>,
    current: Mutex<HashMap<String, ActiveOperation>>,
    poll_delay: Duration,
    poll_count: AtomicUsize,
    answered_polls: AtomicUsize,
    stream_count: AtomicUsize,
    cancel_count: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            polls: Mutex::new(VecDeque::new()),
            idle_poll: Mutex::new(Ok(StatusRecord::new(TaskStatus::Running, "working"))),
            cancel_reply: Mutex::new(Ok(CancelReply {
                success: true,
                message: Some("Cancellation requested".to_string()),
            })),
            after_cancel: Mutex::new(None),
            current: Mutex::new(HashMap::new()),
            poll_delay: Duration::ZERO,
            poll_count: AtomicUsize::new(0),
            answered_polls: AtomicUsize::new(0),
            stream_count: AtomicUsize::new(0),
            cancel_count: AtomicUsize::new(0),
        }
    }

    pub fn stream(self, script: StreamScript) -> Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    pub fn poll(self, result: Result<StatusRecord, TransportError>) -> Self {
        self.polls.lock().unwrap().push_back(result);
        self
    }

    /// Answer once the poll script is used up.
    pub fn idle_poll(self, result: Result<StatusRecord, TransportError>) -> Self {
        *self.idle_poll.lock().unwrap() = result;
        self
    }

    /// Each status query takes this long to answer.
    pub fn poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    pub fn cancel_reply(self, reply: Result<CancelReply, TransportError>) -> Self {
        *self.cancel_reply.lock().unwrap() = reply;
        self
    }

    /// Record the next poll returns after a successful cancellation.
    pub fn after_cancel(self, record: StatusRecord) -> Self {
        *self.after_cancel.lock().unwrap() = Some(record);
        self
    }

    pub fn current(self, kind: &str, operation_id: &str, record: StatusRecord) -> Self {
        self.current.lock().unwrap().insert(
            kind.to_string(),
            ActiveOperation {
                operation_id: operation_id.to_string(),
                record,
            },
        );
        self
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn answered_polls(&self) -> usize {
        self.answered_polls.load(Ordering::SeqCst)
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::SeqCst)
    }
}

fn frames(items: Vec<RawFrame>) -> impl futures_util::Stream<Item = Result<RawFrame, TransportError>> {
    stream::iter(items.into_iter().map(Ok))
}

#[async_trait::async_trait]
impl StatusSource for ScriptedSource {
    async fn fetch_status(
        &self,
        _kind: &str,
        _operation_id: &str,
    ) -> Result<StatusRecord, TransportError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        let next = self.polls.lock().unwrap().pop_front();
        self.answered_polls.fetch_add(1, Ordering::SeqCst);
        next.unwrap_or_else(|| self.idle_poll.lock().unwrap().clone())
    }

    async fn open_stream(
        &self,
        _kind: &str,
        _operation_id: &str,
    ) -> Result<FrameStream, TransportError> {
        self.stream_count.fetch_add(1, Ordering::SeqCst);
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StreamScript::Hang(Vec::new()));
        match script {
            StreamScript::Refuse => Err(TransportError::new(FailureKind::HttpStatus(503), "503")),
            StreamScript::Hang(items) => Ok(Box::pin(frames(items).chain(stream::pending()))),
            StreamScript::End(items) => Ok(Box::pin(frames(items))),
            StreamScript::Break(items) => Ok(Box::pin(
                frames(items).chain(stream::iter(vec![Err(network_error())])),
            )),
        }
    }

    async fn cancel(
        &self,
        _kind: &str,
        _operation_id: &str,
    ) -> Result<CancelReply, TransportError> {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        let reply = self.cancel_reply.lock().unwrap().clone();
        if matches!(reply, Ok(CancelReply { success: true, .. })) {
            if let Some(record) = self.after_cancel.lock().unwrap().take() {
                self.polls.lock().unwrap().push_front(Ok(record));
            }
        }
        reply
    }

    async fn current(&self, kind: &str) -> Result<Option<ActiveOperation>, TransportError> {
        Ok(self.current.lock().unwrap().get(kind).cloned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Progress(String, Option<f64>),
    Complete(String, String),
    Error(String, String),
    Cancelled(String, String),
    CancelAccepted(String),
    Warning(String, String),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Seen>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Seen> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Seen) -> bool) -> usize {
        self.events().iter().filter(|seen| pred(seen)).count()
    }

    fn push(&self, seen: Seen) {
        self.events.lock().unwrap().push(seen);
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, kind: &str, record: &StatusRecord) {
        self.push(Seen::Progress(kind.to_string(), record.progress));
    }

    fn on_complete(&self, kind: &str, message: &str, _details: Option<&str>) {
        self.push(Seen::Complete(kind.to_string(), message.to_string()));
    }

    fn on_error(&self, kind: &str, message: &str, _details: Option<&str>) {
        self.push(Seen::Error(kind.to_string(), message.to_string()));
    }

    fn on_cancelled(&self, kind: &str, message: &str) {
        self.push(Seen::Cancelled(kind.to_string(), message.to_string()));
    }

    fn on_cancel_accepted(&self, kind: &str) {
        self.push(Seen::CancelAccepted(kind.to_string()));
    }

    fn on_warning(&self, kind: &str, message: &str) {
        self.push(Seen::Warning(kind.to_string(), message.to_string()));
    }
}

/// Polls `check` until it holds; time is virtual in paused tests.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
