//! REST client for the ViMax job endpoints.
//!
//! Covers what the status subsystem needs around a live connection:
//! submitting a generation job (which yields the job id), fetching the
//! stored snapshot of a job, and building its download URL.

use serde::Deserialize;
use vimax_core::error::CoreError;
use vimax_core::types::{validate_job_id, JobId};

use crate::job::{Job, JobStatus};
use crate::messages::JobUpdate;

/// HTTP client for one ViMax service.
pub struct JobApi {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

/// Pipeline variants offered by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineType {
    #[default]
    Idea2Video,
    Script2Video,
    Novel2Video,
}

impl PipelineType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idea2Video => "idea2video",
            Self::Script2Video => "script2video",
            Self::Novel2Video => "novel2video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idea2video" => Some(Self::Idea2Video),
            "script2video" => Some(Self::Script2Video),
            "novel2video" => Some(Self::Novel2Video),
            _ => None,
        }
    }
}

/// Parameters of a generation job.
///
/// Defaults mirror the service's form defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub user_id: String,
    pub pipeline_type: PipelineType,
    pub idea: String,
    pub script: String,
    pub user_requirement: String,
    pub style: String,
    pub image_generator: String,
    pub video_generator: String,
    pub quality: String,
    pub resolution: String,
    pub format: String,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            pipeline_type: PipelineType::default(),
            idea: String::new(),
            script: String::new(),
            user_requirement: String::new(),
            style: "Realistic".to_string(),
            image_generator: "google".to_string(),
            video_generator: "google".to_string(),
            quality: "standard".to_string(),
            resolution: "1080p".to_string(),
            format: "mp4".to_string(),
        }
    }
}

impl GenerationRequest {
    /// Form fields sent to `POST /generate-video`, in a stable order.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("user_id", self.user_id.clone()),
            ("pipeline_type", self.pipeline_type.as_str().to_string()),
            ("idea", self.idea.clone()),
            ("script", self.script.clone()),
            ("user_requirement", self.user_requirement.clone()),
            ("style", self.style.clone()),
            ("image_generator", self.image_generator.clone()),
            ("video_generator", self.video_generator.clone()),
            ("quality", self.quality.clone()),
            ("resolution", self.resolution.clone()),
            ("format", self.format.clone()),
        ]
    }
}

/// Response of `POST /generate-video`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub message: Option<String>,
    /// True when the service answered from its asset cache; the job is
    /// then already completed and no live updates will follow.
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub video_url: Option<String>,
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum JobApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("ViMax API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl JobApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://localhost:8000`.
    /// * `api_key` - Bearer token for authenticated endpoints.
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_key)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Submit a generation job.
    pub async fn submit(&self, request: &GenerationRequest) -> Result<SubmitResponse, JobApiError> {
        let form = request
            .form_fields()
            .into_iter()
            .fold(reqwest::multipart::Form::new(), |form, (name, value)| {
                form.text(name, value)
            });

        let mut builder = self
            .client
            .post(format!("{}/generate-video", self.api_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response: SubmitResponse = Self::parse_response(builder.send().await?).await?;
        tracing::info!(
            job_id = %response.job_id,
            status = %response.status,
            cached = response.cached,
            "Generation job submitted",
        );
        Ok(response)
    }

    /// Fetch the stored snapshot of a job.
    pub async fn job_status(&self, job_id: &str) -> Result<Job, JobApiError> {
        validate_job_id(job_id)?;

        let response = self
            .client
            .get(format!("{}/job/{}", self.api_url, job_id))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound {
                entity: "job",
                id: job_id.to_string(),
            }
            .into());
        }

        let update: JobUpdate = Self::parse_response(response).await?;
        let mut job = Job::new(job_id);
        job.apply(update);
        Ok(job)
    }

    /// Absolute URL of a completed job's video.
    pub fn download_url(&self, job_id: &str) -> String {
        format!("{}/job/{}/download", self.api_url, job_id)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, returning a
    /// [`JobApiError::ApiError`] with the body text otherwise.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, JobApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(JobApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, JobApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_matches_service_defaults() {
        let fields = GenerationRequest::default().form_fields();
        let get = |name: &str| {
            fields
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("user_id"), Some("anonymous"));
        assert_eq!(get("pipeline_type"), Some("idea2video"));
        assert_eq!(get("style"), Some("Realistic"));
        assert_eq!(get("quality"), Some("standard"));
        assert_eq!(get("resolution"), Some("1080p"));
        assert_eq!(get("format"), Some("mp4"));
        assert_eq!(fields.len(), 11);
    }

    #[test]
    fn pipeline_type_names() {
        for pipeline in [
            PipelineType::Idea2Video,
            PipelineType::Script2Video,
            PipelineType::Novel2Video,
        ] {
            assert_eq!(PipelineType::parse(pipeline.as_str()), Some(pipeline));
        }
        assert_eq!(PipelineType::parse("invalid_type"), None);
    }

    #[test]
    fn download_url_strips_trailing_slash() {
        let api = JobApi::new("http://localhost:8000/".to_string(), None);
        assert_eq!(
            api.download_url("job_1"),
            "http://localhost:8000/job/job_1/download"
        );
    }

    #[test]
    fn cached_submit_response_parses() {
        let json = r#"{"job_id":"job_1","status":"completed","message":"Video retrieved from cache","cached":true,"video_url":"/cache/abc.mp4"}"#;
        let response: SubmitResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, JobStatus::Completed);
        assert!(response.cached);
        assert_eq!(response.video_url.as_deref(), Some("/cache/abc.mp4"));
    }

    #[test]
    fn fresh_submit_response_parses() {
        let json = r#"{"job_id":"job_2","status":"processing","message":"Video generation started"}"#;
        let response: SubmitResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, JobStatus::Processing);
        assert!(!response.cached);
        assert!(response.video_url.is_none());
    }
}
