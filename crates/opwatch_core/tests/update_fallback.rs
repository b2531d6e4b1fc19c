use std::sync::Once;

use opwatch_core::{
    update, ChannelKind, Effect, LifecycleState, MonitorOutcome, MonitorState, Msg, StatusRecord,
    TaskStatus, DEFAULT_MAX_ATTEMPTS,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(monitor_logging::initialize_for_tests);
}

fn apply(state: MonitorState, msgs: Vec<Msg>) -> (MonitorState, Vec<Effect>) {
    let mut all = Vec::new();
    let mut state = state;
    for msg in msgs {
        let (next, effects) = update(state, msg);
        state = next;
        all.extend(effects);
    }
    (state, all)
}

fn on_pull(kind: &str, id: &str) -> MonitorState {
    let (state, _) = update(MonitorState::new(kind, id), Msg::Begin);
    let (state, effects) = update(state, Msg::PushClosed { was_clean: false });
    assert_eq!(effects, vec![Effect::CloseChannel, Effect::StartPull]);
    state
}

fn count_pull_starts(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|effect| matches!(effect, Effect::StartPull))
        .count()
}

#[test]
fn clean_push_close_never_starts_polling() {
    init_logging();
    let (state, effects) = apply(
        MonitorState::new("upload", "op-1"),
        vec![
            Msg::Begin,
            Msg::PushOpened,
            Msg::PushFrame(StatusRecord::new(TaskStatus::Processing, "working")),
            Msg::PushClosed { was_clean: true },
        ],
    );
    assert_eq!(count_pull_starts(&effects), 0);
    assert_eq!(state.channel(), None);
    assert_eq!(state.lifecycle(), LifecycleState::Running);
    assert_eq!(state.outcome(), None);
}

#[test]
fn abnormal_push_close_starts_exactly_one_pull() {
    init_logging();
    let (state, effects) = apply(
        MonitorState::new("background-update", "op-2"),
        vec![
            Msg::Begin,
            Msg::PushClosed { was_clean: false },
            // A duplicate close from a dying stream must not spawn a second poller.
            Msg::PushClosed { was_clean: false },
        ],
    );
    assert_eq!(count_pull_starts(&effects), 1);
    assert_eq!(state.channel(), Some(ChannelKind::Pull));
    assert_eq!(state.operation_id(), "op-2");
    assert_eq!(state.retry_budget().map(|budget| budget.attempts()), Some(0));
}

#[test]
fn push_frames_after_fallback_are_ignored() {
    init_logging();
    let state = on_pull("upload", "op-3");
    let (state, effects) = update(
        state,
        Msg::PushFrame(StatusRecord::new(TaskStatus::Completed, "late push")),
    );
    assert!(effects.is_empty());
    assert_eq!(state.outcome(), None);
}

#[test]
fn background_update_falls_back_and_completes() {
    init_logging();
    let mut state = on_pull("background-update", "op-4");
    let mut polls = 0;
    let mut completions = 0;
    let mut progress = Vec::new();

    let responses = vec![
        StatusRecord::new(TaskStatus::Processing, "Scoring").with_progress(10.0),
        StatusRecord::new(TaskStatus::Processing, "Scoring").with_progress(45.0),
        StatusRecord::new(TaskStatus::Processing, "Scoring").with_progress(80.0),
        StatusRecord::new(TaskStatus::Completed, "Risk scores updated").with_progress(100.0),
    ];
    for record in responses {
        if state.channel() != Some(ChannelKind::Pull) {
            break;
        }
        polls += 1;
        let (next, effects) = update(state, Msg::Polled(record));
        state = next;
        for effect in effects {
            match effect {
                Effect::Progress(record) => progress.push(record.progress),
                Effect::Complete { .. } => completions += 1,
                _ => {}
            }
        }
    }

    assert_eq!(polls, 4);
    assert_eq!(completions, 1);
    assert_eq!(progress, vec![Some(10.0), Some(45.0), Some(80.0)]);
    assert_eq!(state.lifecycle(), LifecycleState::Completed);
    assert_eq!(state.channel(), None);
}

#[test]
fn push_disabled_starts_on_pull_with_fresh_budget() {
    init_logging();
    let state = MonitorState::new("upload", "op-5").with_push(false);
    let (state, effects) = update(state, Msg::Begin);
    assert_eq!(effects, vec![Effect::StartPull]);
    assert_eq!(state.channel(), Some(ChannelKind::Pull));
    assert_eq!(state.lifecycle(), LifecycleState::Starting);
    assert_eq!(
        state.retry_budget().map(|budget| budget.max_attempts()),
        Some(DEFAULT_MAX_ATTEMPTS)
    );
}

#[test]
fn not_found_on_push_waits_for_close() {
    init_logging();
    let (state, effects) = apply(
        MonitorState::new("upload", "op-6"),
        vec![
            Msg::Begin,
            Msg::PushFrame(StatusRecord::not_found("unknown task")),
        ],
    );
    assert_eq!(effects, vec![Effect::OpenPush]);
    assert_eq!(state.lifecycle(), LifecycleState::Starting);
    assert_eq!(state.outcome(), None::<MonitorOutcome>);
}
