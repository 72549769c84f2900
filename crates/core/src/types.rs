use crate::error::CoreError;

/// Job identifiers are opaque strings assigned by the ViMax service
/// (e.g. `job_3f9a0c1b2d4e5f60`).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Maximum accepted length of a job identifier.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Validate a job identifier before it is embedded in a URL path.
///
/// Allowed characters: ASCII alphanumerics, hyphen and underscore.
pub fn validate_job_id(job_id: &str) -> Result<(), CoreError> {
    if job_id.is_empty() {
        return Err(CoreError::Validation("Job id must not be empty".to_string()));
    }
    if job_id.len() > MAX_JOB_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Job id exceeds {MAX_JOB_ID_LEN} characters"
        )));
    }
    if !job_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(format!(
            "Job id contains invalid characters: '{job_id}'"
        )));
    }
    Ok(())
}
