//! Well-known wire names shared by the status channel and the REST API.
//!
//! These must match the strings emitted by the ViMax web service.

// ---------------------------------------------------------------------------
// Control frame types
// ---------------------------------------------------------------------------

/// `type` discriminator of a liveness request frame.
pub const MSG_TYPE_PING: &str = "ping";

/// `type` discriminator of a liveness acknowledgement frame.
pub const MSG_TYPE_PONG: &str = "pong";

// ---------------------------------------------------------------------------
// Job status names
// ---------------------------------------------------------------------------

/// Job accepted but not yet started.
pub const JOB_STATUS_QUEUED: &str = "queued";
/// Job pipeline is running.
pub const JOB_STATUS_PROCESSING: &str = "processing";
/// Job finished and its video is downloadable.
pub const JOB_STATUS_COMPLETED: &str = "completed";
/// Job pipeline failed.
pub const JOB_STATUS_FAILED: &str = "failed";

// ---------------------------------------------------------------------------
// Step status names
// ---------------------------------------------------------------------------

/// Step has not started.
pub const STEP_STATUS_PENDING: &str = "pending";
/// Step is running.
pub const STEP_STATUS_IN_PROGRESS: &str = "in_progress";
/// Legacy spelling of [`STEP_STATUS_IN_PROGRESS`] used by older pipeline views.
pub const STEP_STATUS_PROCESSING: &str = "processing";
/// Step finished.
pub const STEP_STATUS_COMPLETED: &str = "completed";
/// Step failed.
pub const STEP_STATUS_ERROR: &str = "error";
