use crate::retry::DEFAULT_MAX_ATTEMPTS;
use crate::{RetryBudget, StatusRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::Completed | LifecycleState::Failed | LifecycleState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Push,
    Pull,
}

/// Why a monitor stopped observing its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Completed,
    Failed,
    Cancelled,
    /// Retry budget spent on the pull channel; the real outcome is unknown.
    Abandoned,
    /// Torn down explicitly or replaced by a newer monitor of the same kind.
    Stopped,
}

/// State of one monitor for a single (kind, operation id) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorState {
    kind: String,
    operation_id: String,
    lifecycle: LifecycleState,
    channel: Option<ChannelKind>,
    retry: Option<RetryBudget>,
    max_attempts: u32,
    push_enabled: bool,
    cancel_requested: bool,
    outcome: Option<MonitorOutcome>,
    last_record: Option<StatusRecord>,
}

impl MonitorState {
    pub fn new(kind: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            operation_id: operation_id.into(),
            lifecycle: LifecycleState::Idle,
            channel: None,
            retry: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            push_enabled: true,
            cancel_requested: false,
            outcome: None,
            last_record: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// When disabled the monitor starts directly on the pull channel.
    pub fn with_push(mut self, enabled: bool) -> Self {
        self.push_enabled = enabled;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn channel(&self) -> Option<ChannelKind> {
        self.channel
    }

    pub fn retry_budget(&self) -> Option<&RetryBudget> {
        self.retry.as_ref()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn outcome(&self) -> Option<MonitorOutcome> {
        self.outcome
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            kind: self.kind.clone(),
            operation_id: self.operation_id.clone(),
            lifecycle: self.lifecycle,
            channel: self.channel,
            retry_attempts: self.retry.map(|budget| budget.attempts()),
            cancel_requested: self.cancel_requested,
            outcome: self.outcome,
            progress: self.last_record.as_ref().and_then(|record| record.progress),
        }
    }

    pub(crate) fn push_enabled(&self) -> bool {
        self.push_enabled
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: LifecycleState) {
        self.lifecycle = lifecycle;
    }

    pub(crate) fn set_channel(&mut self, channel: Option<ChannelKind>) {
        self.channel = channel;
    }

    pub(crate) fn fresh_retry_budget(&mut self) {
        self.retry = Some(RetryBudget::new(self.max_attempts));
    }

    pub(crate) fn retry_budget_mut(&mut self) -> Option<&mut RetryBudget> {
        self.retry.as_mut()
    }

    pub(crate) fn mark_cancel_requested(&mut self) {
        self.cancel_requested = true;
    }

    pub(crate) fn finish(&mut self, outcome: MonitorOutcome) {
        self.outcome = Some(outcome);
    }

    pub(crate) fn remember(&mut self, record: StatusRecord) {
        self.last_record = Some(record);
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new(String::new(), String::new())
    }
}

/// Read-only view of a monitor, published after every transition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitorSnapshot {
    pub kind: String,
    pub operation_id: String,
    pub lifecycle: LifecycleState,
    pub channel: Option<ChannelKind>,
    pub retry_attempts: Option<u32>,
    pub cancel_requested: bool,
    pub outcome: Option<MonitorOutcome>,
    pub progress: Option<f64>,
}
