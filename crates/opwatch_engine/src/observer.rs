use opwatch_core::StatusRecord;

/// UI surface notified by monitors.
///
/// Callbacks run on the monitor's task in delivery order. Progress may repeat
/// identical values, so implementations must be idempotent.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, kind: &str, record: &StatusRecord);

    fn on_complete(&self, kind: &str, message: &str, details: Option<&str>);

    fn on_error(&self, kind: &str, message: &str, details: Option<&str>);

    /// Distinct from `on_error`: a cancelled task is not a failure.
    fn on_cancelled(&self, kind: &str, message: &str);

    /// The server took the cancellation request; hide the cancel affordance.
    fn on_cancel_accepted(&self, _kind: &str) {}

    /// Cancellation could not be requested; monitoring goes on.
    fn on_warning(&self, kind: &str, message: &str);
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_progress(&self, _kind: &str, _record: &StatusRecord) {}

    fn on_complete(&self, _kind: &str, _message: &str, _details: Option<&str>) {}

    fn on_error(&self, _kind: &str, _message: &str, _details: Option<&str>) {}

    fn on_cancelled(&self, _kind: &str, _message: &str) {}

    fn on_warning(&self, _kind: &str, _message: &str) {}
}
