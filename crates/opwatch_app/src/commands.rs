use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use monitor_logging::{monitor_info, monitor_warn};
use opwatch_core::MonitorOutcome;
use opwatch_engine::{
    MonitorHandle, MonitorRegistry, MonitorSettings, ReqwestStatusSource, StatusSource,
};

use crate::console::ConsoleObserver;

fn registry(settings: MonitorSettings) -> Result<MonitorRegistry> {
    MonitorRegistry::connect(settings, Arc::new(ConsoleObserver))
        .context("failed to set up the status client")
}

/// Follows one operation until it reaches a final outcome.
pub async fn watch(
    settings: MonitorSettings,
    kind: &str,
    operation_id: &str,
) -> Result<MonitorOutcome> {
    let registry = registry(settings)?;
    let handle = registry.start_monitoring(kind, operation_id).await;
    let outcome = follow(&handle).await;
    report(&registry, &handle, outcome);
    Ok(outcome)
}

/// Sends one cancellation request and prints the server's answer.
pub async fn cancel(settings: MonitorSettings, kind: &str, operation_id: &str) -> Result<bool> {
    let source = ReqwestStatusSource::new(settings).context("failed to set up the status client")?;
    let reply = source
        .cancel(kind, operation_id)
        .await
        .with_context(|| format!("cancellation request for {kind}/{operation_id} failed"))?;
    let message = reply.message.as_deref().unwrap_or("no message");
    if reply.success {
        println!("[{kind}] cancellation accepted: {message}");
    } else {
        println!("[{kind}] cancellation refused: {message}");
    }
    Ok(reply.success)
}

/// Resumes observing every configured kind the server reports as running.
pub async fn reattach(settings: MonitorSettings, kinds: &[String]) -> Result<Vec<MonitorOutcome>> {
    let registry = registry(settings)?;
    let handles = registry.reattach_all(kinds).await;
    if handles.is_empty() {
        println!("No running operations for {}", kinds.join(", "));
        return Ok(Vec::new());
    }
    for handle in &handles {
        println!(
            "[{}] re-attached to operation {}",
            handle.kind(),
            handle.operation_id()
        );
    }

    let outcomes = join_all(handles.iter().map(|handle| follow(handle))).await;
    for (handle, outcome) in handles.iter().zip(&outcomes) {
        report(&registry, handle, *outcome);
    }
    Ok(outcomes)
}

/// Waits for the monitor; the first Ctrl-C requests cancellation, the second stops watching.
async fn follow(handle: &MonitorHandle) -> MonitorOutcome {
    let mut cancel_sent = false;
    loop {
        tokio::select! {
            outcome = handle.wait() => return outcome,
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    monitor_warn!("Ctrl-C handler unavailable: {err}");
                    return handle.wait().await;
                }
                if cancel_sent {
                    handle.stop();
                    return handle.wait().await;
                }
                cancel_sent = true;
                // Failures already reach the console through on_warning.
                if let Err(err) = handle.request_cancel().await {
                    monitor_warn!("{}: {err}", handle.kind());
                }
            }
        }
    }
}

fn report(registry: &MonitorRegistry, handle: &MonitorHandle, outcome: MonitorOutcome) {
    let metrics = registry.metrics();
    monitor_info!(
        "{}/{} finished: {:?} (push opened {}, pull started {}, polls {}, peak live channels {})",
        handle.kind(),
        handle.operation_id(),
        outcome,
        metrics.push_channels_opened(),
        metrics.pull_channels_started(),
        metrics.polls_issued(),
        metrics.peak_live_channels()
    );
    if outcome == MonitorOutcome::Abandoned {
        println!(
            "[{}] lost track of operation {}; its outcome is unknown",
            handle.kind(),
            handle.operation_id()
        );
    }
}
