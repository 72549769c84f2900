//! `vimax-watch` -- follow a ViMax video-generation job from the terminal.
//!
//! Submits a new job (or attaches to an existing one), then prints live
//! progress from the job's status channel until the job finishes, the
//! connection gives up, or the user presses Ctrl-C.
//!
//! See [`WatchConfig::from_env`] for the environment variables.

use vimax_core::error::CoreError;
use vimax_jobsync::api::{JobApi, JobApiError};
use vimax_jobsync::job::{Job, JobStatus};
use vimax_jobsync::{JobSession, Phase};
use vimax_watch::config::{Target, WatchConfig};
use vimax_watch::render;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code when the status connection exhausted its reconnects.
const EXIT_CONNECTION_FAILED: i32 = 2;

/// Exit code when the job itself failed.
const EXIT_JOB_FAILED: i32 = 3;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vimax_watch=info,vimax_jobsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WatchConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        "Starting vimax-watch",
    );

    let api = JobApi::new(config.api_url.clone(), config.api_key.clone());

    let seed = resolve_job(&api, &config.target).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Could not resolve job");
        std::process::exit(1);
    });

    if seed.is_terminal() {
        std::process::exit(finish(&api, &seed));
    }

    let code = follow(&api, &config, seed).await;
    std::process::exit(code);
}

/// Submit or look up the job to follow, returning its initial snapshot.
async fn resolve_job(api: &JobApi, target: &Target) -> Result<Job, JobApiError> {
    match target {
        Target::Submit(request) => {
            let response = api.submit(request).await?;
            let mut job = Job::new(response.job_id);
            job.status = response.status;
            job.message = response.message;
            if response.cached {
                job.progress = 100.0;
            }
            Ok(job)
        }
        Target::Existing(job_id) => match api.job_status(job_id).await {
            Ok(job) => Ok(job),
            Err(e @ JobApiError::Core(CoreError::NotFound { .. })) => Err(e),
            Err(e) => {
                // The live channel may still know the job.
                tracing::warn!(job_id = %job_id, error = %e, "Job lookup failed");
                Ok(Job::new(job_id.as_str()))
            }
        },
    }
}

/// Print live updates until the job or the connection ends.
async fn follow(api: &JobApi, config: &WatchConfig, seed: Job) -> i32 {
    let mut session = JobSession::new(config.sync_config());
    let (mut jobs, mut states) = match session.watch_from(seed).await {
        Ok(manager) => (manager.watch_job(), manager.watch_connection()),
        Err(e) => {
            tracing::error!(error = %e, "Could not start status connection");
            return 1;
        }
    };

    println!("{}", render::progress_line(&jobs.borrow_and_update()));

    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping");
                break 0;
            }
            changed = jobs.changed() => {
                if changed.is_err() {
                    break 1;
                }
                let job = jobs.borrow_and_update().clone();
                println!("{}", render::progress_line(&job));
                if !job.steps.is_empty() {
                    println!("{}", render::steps_block(&job));
                }
                if job.is_terminal() {
                    break finish(api, &job);
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break 1;
                }
                let state = states.borrow_and_update().clone();
                println!("-- {}", render::connection_line(&state));
                if state.phase() == Phase::Failed {
                    eprintln!("Lost connection to the job status channel. Restart to resume watching.");
                    break EXIT_CONNECTION_FAILED;
                }
            }
        }
    };

    session.clear().await;
    code
}

/// Report a finished job and return the process exit code.
fn finish(api: &JobApi, job: &Job) -> i32 {
    match job.status {
        JobStatus::Completed => {
            println!("Video ready: {}", api.download_url(&job.job_id));
            0
        }
        _ => {
            let reason = job.message.as_deref().unwrap_or("no details");
            eprintln!("Job {} failed: {reason}", job.job_id);
            EXIT_JOB_FAILED
        }
    }
}
