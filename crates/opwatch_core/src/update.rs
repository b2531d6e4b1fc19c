use monitor_logging::{monitor_debug, monitor_info, monitor_warn};

use crate::{
    ChannelKind, Effect, LifecycleState, MonitorOutcome, MonitorState, Msg, StatusRecord,
    TaskStatus,
};

/// Pure update function: applies a message to a monitor and returns any effects.
///
/// Once the monitor has an outcome every further message is discarded, so a
/// stray frame after completion can never reach the UI surface.
pub fn update(mut state: MonitorState, msg: Msg) -> (MonitorState, Vec<Effect>) {
    if state.is_finished() {
        monitor_debug!(
            "{}/{}: discarding {:?} after monitor finished",
            state.kind(),
            state.operation_id(),
            msg
        );
        return (state, Vec::new());
    }

    let effects = match msg {
        Msg::Begin => {
            if state.lifecycle() != LifecycleState::Idle {
                return (state, Vec::new());
            }
            state.set_lifecycle(LifecycleState::Starting);
            if state.push_enabled() {
                state.set_channel(Some(ChannelKind::Push));
                vec![Effect::OpenPush]
            } else {
                start_pull(&mut state)
            }
        }
        Msg::PushOpened => {
            monitor_debug!(
                "{}/{}: push channel open",
                state.kind(),
                state.operation_id()
            );
            Vec::new()
        }
        Msg::PushFrame(record) => {
            if state.channel() != Some(ChannelKind::Push) {
                monitor_debug!(
                    "{}/{}: ignoring push frame, push channel not active",
                    state.kind(),
                    state.operation_id()
                );
                Vec::new()
            } else if record.status == TaskStatus::NotFound {
                // The stream closes right after; the pull fallback owns the retry budget.
                monitor_info!(
                    "{}/{}: push stream does not know the operation yet",
                    state.kind(),
                    state.operation_id()
                );
                Vec::new()
            } else {
                apply_record(&mut state, record)
            }
        }
        Msg::PushMalformed { reason } => {
            monitor_warn!(
                "{}/{}: dropping malformed push frame: {}",
                state.kind(),
                state.operation_id(),
                reason
            );
            Vec::new()
        }
        Msg::PushClosed { was_clean } => {
            if state.channel() != Some(ChannelKind::Push) {
                return (state, Vec::new());
            }
            state.set_channel(None);
            if was_clean {
                monitor_info!(
                    "{}/{}: push stream closed by server without a final status",
                    state.kind(),
                    state.operation_id()
                );
                vec![Effect::CloseChannel]
            } else {
                monitor_warn!(
                    "{}/{}: push stream interrupted, falling back to polling",
                    state.kind(),
                    state.operation_id()
                );
                let mut effects = vec![Effect::CloseChannel];
                effects.extend(start_pull(&mut state));
                effects
            }
        }
        Msg::Polled(record) => {
            if state.channel() != Some(ChannelKind::Pull) {
                return (state, Vec::new());
            }
            if record.status == TaskStatus::NotFound {
                charge_retry(&mut state, "operation not found")
            } else {
                if let Some(budget) = state.retry_budget_mut() {
                    budget.reset();
                }
                apply_record(&mut state, record)
            }
        }
        Msg::PollFailed { reason } => {
            if state.channel() != Some(ChannelKind::Pull) {
                return (state, Vec::new());
            }
            charge_retry(&mut state, &reason)
        }
        Msg::CancelAccepted { message } => {
            state.mark_cancel_requested();
            monitor_info!(
                "{}/{}: cancellation accepted ({}), waiting for confirmation",
                state.kind(),
                state.operation_id(),
                message.as_deref().unwrap_or("no message")
            );
            vec![Effect::CancelAccepted]
        }
        Msg::CancelRejected { message } => {
            monitor_warn!(
                "{}/{}: cancellation failed: {}",
                state.kind(),
                state.operation_id(),
                message
            );
            vec![Effect::Warn { message }]
        }
        Msg::Teardown => {
            let mut effects = Vec::with_capacity(2);
            if state.channel().is_some() {
                state.set_channel(None);
                effects.push(Effect::CloseChannel);
            }
            state.finish(MonitorOutcome::Stopped);
            effects.push(Effect::Finished(MonitorOutcome::Stopped));
            effects
        }
    };

    (state, effects)
}

fn start_pull(state: &mut MonitorState) -> Vec<Effect> {
    state.set_channel(Some(ChannelKind::Pull));
    state.fresh_retry_budget();
    vec![Effect::StartPull]
}

fn apply_record(state: &mut MonitorState, record: StatusRecord) -> Vec<Effect> {
    state.remember(record.clone());
    match record.status {
        TaskStatus::Completed => finish_with(
            state,
            LifecycleState::Completed,
            MonitorOutcome::Completed,
            Effect::Complete {
                message: record.message,
                details: record.details,
            },
        ),
        TaskStatus::Error => {
            let message = record.failure_text().to_string();
            finish_with(
                state,
                LifecycleState::Failed,
                MonitorOutcome::Failed,
                Effect::Fail {
                    message,
                    details: record.details,
                },
            )
        }
        TaskStatus::Cancelled => finish_with(
            state,
            LifecycleState::Cancelled,
            MonitorOutcome::Cancelled,
            Effect::Cancelled {
                message: record.message,
            },
        ),
        TaskStatus::NotFound => Vec::new(),
        TaskStatus::Starting
        | TaskStatus::Initializing
        | TaskStatus::Extracting
        | TaskStatus::Saving
        | TaskStatus::Filtering
        | TaskStatus::Processing
        | TaskStatus::Running => {
            if state.lifecycle() == LifecycleState::Starting {
                state.set_lifecycle(LifecycleState::Running);
            }
            vec![Effect::Progress(record)]
        }
    }
}

fn finish_with(
    state: &mut MonitorState,
    lifecycle: LifecycleState,
    outcome: MonitorOutcome,
    notification: Effect,
) -> Vec<Effect> {
    monitor_info!(
        "{}/{}: reached {:?}",
        state.kind(),
        state.operation_id(),
        lifecycle
    );
    state.set_lifecycle(lifecycle);
    state.set_channel(None);
    state.finish(outcome);
    vec![
        Effect::CloseChannel,
        notification,
        Effect::Finished(outcome),
    ]
}

fn charge_retry(state: &mut MonitorState, reason: &str) -> Vec<Effect> {
    let Some(budget) = state.retry_budget_mut() else {
        return Vec::new();
    };
    let exhausted = budget.record_failure();
    let (attempts, max_attempts) = (budget.attempts(), budget.max_attempts());

    if !exhausted {
        monitor_debug!(
            "{}/{}: poll attempt {}/{} failed: {}",
            state.kind(),
            state.operation_id(),
            attempts,
            max_attempts,
            reason
        );
        return Vec::new();
    }

    // Outcome is ambiguous: the task may have finished before it became queryable.
    monitor_warn!(
        "{}/{}: giving up after {} failed polls ({}), outcome unknown",
        state.kind(),
        state.operation_id(),
        attempts,
        reason
    );
    state.set_channel(None);
    state.finish(MonitorOutcome::Abandoned);
    vec![
        Effect::CloseChannel,
        Effect::Finished(MonitorOutcome::Abandoned),
    ]
}
