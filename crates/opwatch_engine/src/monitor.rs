use std::sync::Arc;

use monitor_logging::{monitor_debug, monitor_info};
use opwatch_core::{
    update, Effect, LifecycleState, MonitorOutcome, MonitorSnapshot, MonitorState, Msg,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::channel::ActiveChannel;
use crate::{
    CancelReply, ChannelMetrics, MonitorSettings, ProgressObserver, PullChannel, PushChannel,
    StatusSource, TransportError,
};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor for {kind}/{operation_id} is no longer running")]
    NotRunning { kind: String, operation_id: String },
    #[error("cancellation request failed: {0}")]
    Transport(#[from] TransportError),
}

/// Collaborators shared by every monitor of a registry.
#[derive(Clone)]
pub(crate) struct MonitorContext {
    pub(crate) source: Arc<dyn StatusSource>,
    pub(crate) observer: Arc<dyn ProgressObserver>,
    pub(crate) settings: Arc<MonitorSettings>,
    pub(crate) metrics: ChannelMetrics,
}

pub(crate) type FinishHook = Box<dyn FnOnce(MonitorOutcome) + Send>;

/// Cloneable handle to a running monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    kind: String,
    operation_id: String,
    generation: u64,
    source: Arc<dyn StatusSource>,
    inbox: mpsc::UnboundedSender<Msg>,
    shutdown: CancellationToken,
    snapshot: watch::Receiver<MonitorSnapshot>,
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("kind", &self.kind)
            .field("operation_id", &self.operation_id)
            .field("generation", &self.generation)
            .finish()
    }
}

impl MonitorHandle {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.snapshot.borrow().lifecycle
    }

    pub fn is_finished(&self) -> bool {
        self.snapshot.borrow().outcome.is_some()
    }

    /// Asks the server to cancel the operation.
    ///
    /// The lifecycle only changes once a `cancelled` record arrives. A refusal
    /// or transport failure is reported to the observer as a warning and the
    /// monitor keeps running.
    pub async fn request_cancel(&self) -> Result<CancelReply, MonitorError> {
        if self.is_finished() {
            return Err(MonitorError::NotRunning {
                kind: self.kind.clone(),
                operation_id: self.operation_id.clone(),
            });
        }

        match self.source.cancel(&self.kind, &self.operation_id).await {
            Ok(reply) => {
                let msg = if reply.success {
                    Msg::CancelAccepted {
                        message: reply.message.clone(),
                    }
                } else {
                    Msg::CancelRejected {
                        message: reply
                            .message
                            .clone()
                            .unwrap_or_else(|| "cancellation refused by server".to_string()),
                    }
                };
                self.deliver(msg);
                Ok(reply)
            }
            Err(err) => {
                self.deliver(Msg::CancelRejected {
                    message: format!("cancellation request failed: {err}"),
                });
                Err(err.into())
            }
        }
    }

    /// Requests teardown without waiting for it.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once the monitor has finished, whatever the reason.
    pub async fn wait(&self) -> MonitorOutcome {
        let mut rx = self.snapshot.clone();
        let outcome = rx
            .wait_for(|snapshot| snapshot.outcome.is_some())
            .await
            .ok()
            .and_then(|snapshot| snapshot.outcome);
        // A vanished sender means the task died; treat it as a stop.
        outcome
            .or_else(|| self.snapshot.borrow().outcome)
            .unwrap_or(MonitorOutcome::Stopped)
    }

    fn deliver(&self, msg: Msg) {
        if self.inbox.send(msg).is_err() {
            monitor_debug!(
                "{}/{}: monitor gone, dropping message",
                self.kind,
                self.operation_id
            );
        }
    }
}

/// Owns the state machine and the one live channel of a monitor.
struct OperationMonitor {
    state: MonitorState,
    ctx: MonitorContext,
    channel: ActiveChannel,
    inbox: mpsc::UnboundedReceiver<Msg>,
    shutdown: CancellationToken,
    snapshot: watch::Sender<MonitorSnapshot>,
    on_finish: Option<FinishHook>,
}

/// Spawns a monitor that begins tracking once `go` fires (or is dropped).
pub(crate) fn spawn_monitor(
    ctx: MonitorContext,
    kind: &str,
    operation_id: &str,
    generation: u64,
    go: oneshot::Receiver<()>,
    on_finish: FinishHook,
) -> MonitorHandle {
    let state = MonitorState::new(kind, operation_id)
        .with_max_attempts(ctx.settings.max_attempts)
        .with_push(ctx.settings.push_enabled);
    let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    let source = ctx.source.clone();

    let monitor = OperationMonitor {
        state,
        ctx,
        channel: ActiveChannel::Idle,
        inbox: inbox_rx,
        shutdown: shutdown.clone(),
        snapshot: snapshot_tx,
        on_finish: Some(on_finish),
    };
    tokio::spawn(monitor.run(go));

    MonitorHandle {
        kind: kind.to_string(),
        operation_id: operation_id.to_string(),
        generation,
        source,
        inbox: inbox_tx,
        shutdown,
        snapshot: snapshot_rx,
    }
}

impl OperationMonitor {
    async fn run(mut self, go: oneshot::Receiver<()>) -> MonitorOutcome {
        let begin = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Msg::Teardown,
            _ = go => Msg::Begin,
        };
        self.dispatch(begin);

        loop {
            if let Some(outcome) = self.state.outcome() {
                return outcome;
            }
            let msg = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Msg::Teardown,
                Some(msg) = self.inbox.recv() => msg,
                msg = self.channel.next_msg() => msg,
            };
            self.dispatch(msg);
        }
    }

    fn dispatch(&mut self, msg: Msg) {
        let state = std::mem::take(&mut self.state);
        let (state, effects) = update(state, msg);
        self.state = state;
        for effect in effects {
            self.execute(effect);
        }
        self.snapshot.send_replace(self.state.snapshot());
    }

    fn execute(&mut self, effect: Effect) {
        let kind = self.state.kind();
        let operation_id = self.state.operation_id();
        match effect {
            Effect::OpenPush => {
                self.channel = ActiveChannel::Push(PushChannel::open(
                    self.ctx.source.clone(),
                    kind,
                    operation_id,
                    &self.ctx.metrics,
                ));
            }
            Effect::StartPull => {
                let every = self.ctx.settings.poll_interval_for(kind);
                monitor_info!("{kind}/{operation_id}: polling every {every:?}");
                self.channel = ActiveChannel::Pull(PullChannel::start(
                    self.ctx.source.clone(),
                    kind,
                    operation_id,
                    every,
                    &self.ctx.metrics,
                ));
            }
            Effect::CloseChannel => {
                self.channel = ActiveChannel::Idle;
            }
            Effect::Progress(record) => self.ctx.observer.on_progress(kind, &record),
            Effect::Complete { message, details } => {
                self.ctx
                    .observer
                    .on_complete(kind, &message, details.as_deref());
            }
            Effect::Fail { message, details } => {
                self.ctx.observer.on_error(kind, &message, details.as_deref());
            }
            Effect::Cancelled { message } => self.ctx.observer.on_cancelled(kind, &message),
            Effect::CancelAccepted => self.ctx.observer.on_cancel_accepted(kind),
            Effect::Warn { message } => self.ctx.observer.on_warning(kind, &message),
            Effect::Finished(outcome) => {
                self.channel = ActiveChannel::Idle;
                if let Some(hook) = self.on_finish.take() {
                    hook(outcome);
                }
            }
        }
    }
}
