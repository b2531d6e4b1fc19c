use chrono::Local;
use opwatch_core::StatusRecord;
use opwatch_engine::ProgressObserver;

/// Prints monitor notifications to stdout, one line each.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl ConsoleObserver {
    fn print(&self, kind: &str, text: &str) {
        println!("{} [{kind}] {text}", Local::now().format("%H:%M:%S"));
    }
}

impl ProgressObserver for ConsoleObserver {
    fn on_progress(&self, kind: &str, record: &StatusRecord) {
        self.print(kind, &render_progress(record));
    }

    fn on_complete(&self, kind: &str, message: &str, details: Option<&str>) {
        self.print(kind, &with_details(&format!("done: {message}"), details));
    }

    fn on_error(&self, kind: &str, message: &str, details: Option<&str>) {
        self.print(kind, &with_details(&format!("FAILED: {message}"), details));
    }

    fn on_cancelled(&self, kind: &str, message: &str) {
        self.print(kind, &format!("cancelled: {message}"));
    }

    fn on_cancel_accepted(&self, kind: &str) {
        self.print(kind, "cancellation requested, waiting for the task to stop");
    }

    fn on_warning(&self, kind: &str, message: &str) {
        self.print(kind, &format!("warning: {message}"));
    }
}

/// `status  progress  message (processed/total) - details`
pub fn render_progress(record: &StatusRecord) -> String {
    let progress = match record.progress {
        Some(value) => format!("{value:5.1}%"),
        None => "   ...".to_string(),
    };
    let mut line = format!("{:<12} {progress} {}", record.status.as_wire(), record.message);
    match (record.processed_count, record.total_count) {
        (Some(processed), Some(total)) => line.push_str(&format!(" ({processed}/{total})")),
        (Some(processed), None) => line.push_str(&format!(" ({processed})")),
        _ => {}
    }
    with_details(&line, record.details.as_deref())
}

fn with_details(line: &str, details: Option<&str>) -> String {
    match details {
        Some(details) if !details.is_empty() => format!("{line} - {details}"),
        _ => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use opwatch_core::TaskStatus;

    use super::*;

    #[test]
    fn renders_quantitative_progress() {
        let record = StatusRecord::new(TaskStatus::Saving, "Saving rows")
            .with_progress(75.0)
            .with_counts(3, 4)
            .with_details("batch 2");
        assert_eq!(
            render_progress(&record),
            "saving        75.0% Saving rows (3/4) - batch 2"
        );
    }

    #[test]
    fn renders_indeterminate_progress() {
        let record = StatusRecord::new(TaskStatus::Initializing, "Preparing");
        assert_eq!(render_progress(&record), "initializing    ... Preparing");
    }
}
