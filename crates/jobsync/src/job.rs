//! Job status model.
//!
//! [`Job`] holds the latest known snapshot of one job's pipeline. It is
//! changed only by [`Job::apply`], which merges a [`JobUpdate`] field by
//! field (last write wins). The remote service is authoritative: values
//! are taken as sent, including progress that moves backwards.

use std::fmt;

use serde::{Deserialize, Serialize};
use vimax_core::status_names::{
    JOB_STATUS_COMPLETED, JOB_STATUS_FAILED, JOB_STATUS_PROCESSING, JOB_STATUS_QUEUED,
    STEP_STATUS_COMPLETED, STEP_STATUS_ERROR, STEP_STATUS_IN_PROGRESS, STEP_STATUS_PENDING,
    STEP_STATUS_PROCESSING,
};
use vimax_core::types::{JobId, Timestamp};

use crate::messages::JobUpdate;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall job status as reported by the service.
///
/// Unrecognised strings are kept verbatim in [`JobStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => JOB_STATUS_QUEUED,
            Self::Processing => JOB_STATUS_PROCESSING,
            Self::Completed => JOB_STATUS_COMPLETED,
            Self::Failed => JOB_STATUS_FAILED,
            Self::Other(s) => s,
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            JOB_STATUS_QUEUED => Self::Queued,
            JOB_STATUS_PROCESSING => Self::Processing,
            JOB_STATUS_COMPLETED => Self::Completed,
            JOB_STATUS_FAILED => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Error,
    Other(String),
}

impl StepStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => STEP_STATUS_PENDING,
            Self::InProgress => STEP_STATUS_IN_PROGRESS,
            Self::Completed => STEP_STATUS_COMPLETED,
            Self::Error => STEP_STATUS_ERROR,
            Self::Other(s) => s,
        }
    }
}

impl From<String> for StepStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            STEP_STATUS_PENDING => Self::Pending,
            STEP_STATUS_IN_PROGRESS | STEP_STATUS_PROCESSING => Self::InProgress,
            STEP_STATUS_COMPLETED => Self::Completed,
            STEP_STATUS_ERROR => Self::Error,
            _ => Self::Other(s),
        }
    }
}

impl From<StepStatus> for String {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One named stage of the generation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub status: StepStatus,
    /// Informational estimate in seconds.
    #[serde(default)]
    pub estimated_time: Option<f64>,
}

/// Reference to the current step.
///
/// The service sends the step name; some views send a zero-based index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepRef {
    Index(usize),
    Name(String),
}

// ---------------------------------------------------------------------------
// Job snapshot
// ---------------------------------------------------------------------------

/// Latest known snapshot of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Overall completion percentage (0-100).
    pub progress: f64,
    pub message: Option<String>,
    /// Pipeline steps in execution order.
    pub steps: Vec<Step>,
    pub current_step: Option<StepRef>,
    /// Percentage of steps reached, as computed by the service.
    pub step_progress: Option<f64>,
    pub total_steps: Option<u32>,
    /// Fields the model does not interpret, merged key by key.
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// When the last update was applied.
    pub updated_at: Option<Timestamp>,
}

impl Job {
    /// Empty snapshot for a freshly submitted job.
    pub fn new(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            message: None,
            steps: Vec::new(),
            current_step: None,
            step_progress: None,
            total_steps: None,
            extra: serde_json::Map::new(),
            updated_at: None,
        }
    }

    /// Merge an update into the snapshot.
    ///
    /// Fields present in `update` overwrite the stored value; absent
    /// fields leave it unchanged. `steps`, when present, replaces the
    /// whole list.
    pub fn apply(&mut self, update: JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if let Some(message) = update.message {
            self.message = Some(message);
        }
        if let Some(steps) = update.steps {
            self.steps = steps;
        }
        if let Some(current_step) = update.current_step {
            self.current_step = Some(current_step);
        }
        if let Some(step_progress) = update.step_progress {
            self.step_progress = Some(step_progress);
        }
        if let Some(total_steps) = update.total_steps {
            self.total_steps = Some(total_steps);
        }
        self.extra.extend(update.extra);
        self.updated_at = Some(chrono::Utc::now());
    }

    /// Position of the current step within [`steps`](Self::steps), if the
    /// reference resolves.
    pub fn current_step_index(&self) -> Option<usize> {
        match self.current_step.as_ref()? {
            StepRef::Index(i) if *i < self.steps.len() => Some(*i),
            StepRef::Index(_) => None,
            StepRef::Name(name) => self.steps.iter().position(|s| &s.name == name),
        }
    }

    /// The current step, if the reference resolves.
    pub fn current_step(&self) -> Option<&Step> {
        self.current_step_index().map(|i| &self.steps[i])
    }

    /// Whether the service has reported a final status.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    /// Relative download path of the finished video, once completed.
    pub fn download_path(&self) -> Option<String> {
        (self.status == JobStatus::Completed).then(|| format!("/job/{}/download", self.job_id))
    }
}
