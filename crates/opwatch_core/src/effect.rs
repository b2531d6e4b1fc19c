use crate::{MonitorOutcome, StatusRecord};

/// Side effects requested by [`crate::update`], executed in order by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenPush,
    /// Start polling; the monitor already holds a fresh retry budget.
    StartPull,
    CloseChannel,
    Progress(StatusRecord),
    Complete {
        message: String,
        details: Option<String>,
    },
    Fail {
        message: String,
        details: Option<String>,
    },
    Cancelled {
        message: String,
    },
    /// Hide the cancellation affordance; the task has not stopped yet.
    CancelAccepted,
    Warn {
        message: String,
    },
    /// The monitor is done and must leave the registry.
    Finished(MonitorOutcome),
}
