//! Plain-text rendering of job snapshots and connection state.

use vimax_jobsync::job::{Job, Step, StepStatus};
use vimax_jobsync::ConnectionState;

/// Connection label, with the retry counter while reconnecting.
///
/// `Disconnected (Retry 2)`, `Connected`, `Connection Failed (Retry 5)`.
pub fn connection_line(state: &ConnectionState) -> String {
    let attempts = state.reconnect_attempts();
    if attempts > 0 {
        format!("{} (Retry {attempts})", state.phase())
    } else {
        state.phase().to_string()
    }
}

/// One-line summary of a snapshot.
pub fn progress_line(job: &Job) -> String {
    let mut line = format!("[{}] {:>3.0}% {}", job.job_id, job.progress, job.status);
    if let Some(step) = job.current_step() {
        line.push_str(&format!(" | {}", step.name));
    }
    if let Some(message) = &job.message {
        line.push_str(&format!(" | {message}"));
    }
    line
}

/// Step list, one line per step.
pub fn steps_block(job: &Job) -> String {
    let current = job.current_step_index();
    job.steps
        .iter()
        .enumerate()
        .map(|(i, step)| step_line(step, Some(i) == current))
        .collect::<Vec<_>>()
        .join("\n")
}

fn step_line(step: &Step, current: bool) -> String {
    let marker = match step.status {
        StepStatus::Completed => "[x]",
        StepStatus::InProgress => "[~]",
        StepStatus::Error => "[!]",
        StepStatus::Pending | StepStatus::Other(_) => "[ ]",
    };
    let pointer = if current { ">" } else { " " };
    match step.estimated_time {
        Some(secs) => format!("{pointer} {marker} {} (~{secs}s)", step.name),
        None => format!("{pointer} {marker} {}", step.name),
    }
}
