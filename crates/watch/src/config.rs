//! Environment configuration for the `vimax-watch` binary.

use vimax_core::types::validate_job_id;
use vimax_jobsync::api::{GenerationRequest, PipelineType};
use vimax_jobsync::SyncConfig;

/// Default REST base URL for a local ViMax service.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// What the watcher should follow.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Attach to a job that already exists.
    Existing(String),
    /// Submit a new generation job and follow it.
    Submit(Box<GenerationRequest>),
}

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// REST base URL (default: `http://localhost:8000`).
    pub api_url: String,
    /// WebSocket base URL. Derived from `api_url` when unset.
    pub ws_url: String,
    /// Bearer token for job submission.
    pub api_key: Option<String>,
    pub target: Target,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("either VIMAX_JOB_ID or VIMAX_IDEA must be set")]
    NoTarget,

    #[error("{name} has unsupported value {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error(transparent)]
    Core(#[from] vimax_core::error::CoreError),
}

impl WatchConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var          | Default                          |
    /// |------------------|----------------------------------|
    /// | `VIMAX_API_URL`  | `http://localhost:8000`          |
    /// | `VIMAX_WS_URL`   | `VIMAX_API_URL` with a ws scheme |
    /// | `VIMAX_API_KEY`  | none                             |
    /// | `VIMAX_JOB_ID`   | none (attach to this job)        |
    /// | `VIMAX_IDEA`     | none (submit a new job)          |
    /// | `VIMAX_USER_ID`  | `anonymous`                      |
    /// | `VIMAX_PIPELINE` | `idea2video`                     |
    /// | `VIMAX_STYLE`    | `Realistic`                      |
    /// | `VIMAX_QUALITY`  | `standard`                       |
    ///
    /// `VIMAX_JOB_ID` wins when both it and `VIMAX_IDEA` are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| var(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = get("VIMAX_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.into())
            .trim_end_matches('/')
            .to_string();
        let ws_url = get("VIMAX_WS_URL").unwrap_or_else(|| ws_url_for(&api_url));
        let api_key = get("VIMAX_API_KEY");

        let target = if let Some(job_id) = get("VIMAX_JOB_ID") {
            validate_job_id(&job_id)?;
            Target::Existing(job_id)
        } else if let Some(idea) = get("VIMAX_IDEA") {
            let mut request = GenerationRequest {
                idea,
                ..GenerationRequest::default()
            };
            if let Some(user_id) = get("VIMAX_USER_ID") {
                request.user_id = user_id;
            }
            if let Some(pipeline) = get("VIMAX_PIPELINE") {
                request.pipeline_type =
                    PipelineType::parse(&pipeline).ok_or(ConfigError::Invalid {
                        name: "VIMAX_PIPELINE",
                        value: pipeline,
                    })?;
            }
            if let Some(style) = get("VIMAX_STYLE") {
                request.style = style;
            }
            if let Some(quality) = get("VIMAX_QUALITY") {
                request.quality = quality;
            }
            Target::Submit(Box::new(request))
        } else {
            return Err(ConfigError::NoTarget);
        };

        Ok(Self {
            api_url,
            ws_url,
            api_key,
            target,
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new(self.ws_url.clone())
    }
}

/// Map an HTTP base URL onto the matching WebSocket scheme.
pub fn ws_url_for(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    }
}
