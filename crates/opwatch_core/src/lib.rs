//! Opwatch core: pure monitor state machine for long-running server tasks.
mod effect;
mod msg;
mod record;
mod retry;
mod state;
mod update;

pub use effect::Effect;
pub use msg::Msg;
pub use record::{RecordError, StatusRecord, TaskStatus};
pub use retry::{RetryBudget, DEFAULT_MAX_ATTEMPTS};
pub use state::{ChannelKind, LifecycleState, MonitorOutcome, MonitorSnapshot, MonitorState};
pub use update::update;
