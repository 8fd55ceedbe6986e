//! One-shot run from the command line
//!
//! Takes the same run lock as the daemon, waits for the result and prints
//! the summary.

use std::sync::Arc;

use crate::config::Settings;
use crate::controller::Trigger;
use crate::error::{Error, Result};
use crate::workflow::RunOutcome;

use super::build_controller;

pub async fn run(settings: Settings, message: Option<String>, dry_run: bool) -> Result<RunOutcome> {
    let controller = build_controller(Arc::new(settings));
    let handle = controller.trigger_run(message, dry_run, Trigger::Cli)?;
    println!(
        "{} started: {} contacts, run id {}",
        if dry_run { "Test run" } else { "Streak run" },
        handle.contacts,
        handle.run_id
    );
    let outcome = handle
        .task
        .await
        .map_err(|e| Error::Automation(format!("run task failed: {}", e)))?;
    println!("{}", format_outcome(&outcome));
    Ok(outcome)
}

/// Plain-text summary for the terminal.
pub fn format_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Aborted { error, .. } => format!("Run aborted: {}", error),
        RunOutcome::Completed(result) => {
            let mut out = format!(
                "Attempted: {}  Succeeded: {}  Failed: {}  ({}s)",
                result.attempted,
                result.succeeded,
                result.failed,
                result.duration().as_secs()
            );
            for failure in &result.failures {
                out.push_str(&format!("\n  - {}: {}", failure.contact, failure.reason));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ContactFailure, FailureReason, RunResult};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn summary_lists_failures() {
        let now = Utc::now();
        let outcome = RunOutcome::Completed(RunResult {
            run_id: Uuid::new_v4(),
            dry_run: false,
            message: "m".into(),
            started_at: now,
            finished_at: now,
            attempted: 2,
            succeeded: 1,
            failed: 1,
            failures: vec![ContactFailure {
                contact: "bob".into(),
                reason: FailureReason::ContactNotFound,
            }],
        });
        let text = format_outcome(&outcome);
        assert!(text.starts_with("Attempted: 2  Succeeded: 1  Failed: 1"));
        assert!(text.contains("- bob: not found in conversation list"));
    }

    #[test]
    fn aborted_summary() {
        let outcome = RunOutcome::Aborted {
            run_id: Uuid::new_v4(),
            dry_run: true,
            at: Utc::now(),
            error: "Cookies file not found: cookies.json".into(),
        };
        assert_eq!(
            format_outcome(&outcome),
            "Run aborted: Cookies file not found: cookies.json"
        );
    }
}
