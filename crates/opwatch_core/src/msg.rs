use crate::StatusRecord;

/// Inputs to the monitor state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Tracking was requested for the monitor's operation id.
    Begin,
    /// The push subscription is established.
    PushOpened,
    /// A push frame carried a valid status record.
    PushFrame(StatusRecord),
    /// A push frame could not be parsed; it is dropped.
    PushMalformed { reason: String },
    /// The push subscription ended.
    PushClosed { was_clean: bool },
    /// A poll returned a status record (including `not_found`).
    Polled(StatusRecord),
    /// A poll failed at the transport level or returned garbage.
    PollFailed { reason: String },
    /// The server accepted a cancellation request.
    CancelAccepted { message: Option<String> },
    /// The cancellation request failed or was refused.
    CancelRejected { message: String },
    /// Explicit teardown (registry replacement or stop).
    Teardown,
}
