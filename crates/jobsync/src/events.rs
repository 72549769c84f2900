//! Lifecycle notifications emitted by a job's connection manager.
//!
//! Snapshots are published through `watch` channels; these events are
//! the edge-triggered counterpart for consumers that log or react to
//! individual changes.

use serde::Serialize;
use vimax_core::types::JobId;

use crate::job::JobStatus;
use crate::state::Phase;

/// A notification originating from one job's status connection.
#[derive(Debug, Clone, Serialize)]
pub enum SyncEvent {
    /// The connection phase changed.
    PhaseChanged {
        job_id: JobId,
        phase: Phase,
        reconnect_attempts: u32,
    },

    /// A reconnect timer was armed.
    ReconnectScheduled {
        job_id: JobId,
        /// 1-based attempt number.
        attempt: u32,
        delay_ms: u64,
    },

    /// Reconnects are exhausted; no further updates will arrive.
    ///
    /// This is a connection-level failure and says nothing about the
    /// job's own status.
    ConnectionFailed { job_id: JobId, attempts: u32 },

    /// A status update was applied to the job snapshot.
    JobUpdated {
        job_id: JobId,
        status: JobStatus,
        /// Completion percentage (0-100).
        progress: f64,
    },
}
