//! Active-job bookkeeping.
//!
//! A [`JobSession`] holds at most one [`ConnectionManager`]. Switching to
//! another job stops the current manager and waits for it to exit before
//! the next one starts, so two connections never feed the same view.

use vimax_core::error::CoreError;
use vimax_core::types::validate_job_id;

use crate::config::SyncConfig;
use crate::job::Job;
use crate::manager::ConnectionManager;

pub struct JobSession {
    config: SyncConfig,
    current: Option<ConnectionManager>,
}

impl JobSession {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    /// The manager for the active job, if any.
    pub fn current(&self) -> Option<&ConnectionManager> {
        self.current.as_ref()
    }

    /// Track `job_id`, replacing any previously watched job.
    ///
    /// Watching the job that is already active keeps the existing manager.
    pub async fn watch(&mut self, job_id: &str) -> Result<&ConnectionManager, CoreError> {
        self.watch_from(Job::new(job_id)).await
    }

    /// Like [`watch`](Self::watch), seeding the snapshot with `job`.
    pub async fn watch_from(&mut self, job: Job) -> Result<&ConnectionManager, CoreError> {
        validate_job_id(&job.job_id)?;

        let manager = match self.current.take() {
            Some(active) if active.job_id() == job.job_id && active.is_running() => active,
            previous => {
                if let Some(mut old) = previous {
                    tracing::info!(job_id = %old.job_id(), "Stopping previous job watch");
                    old.stop().await;
                }
                tracing::info!(job_id = %job.job_id, "Watching job");
                ConnectionManager::start_from(&self.config, job)?
            }
        };

        Ok(&*self.current.insert(manager))
    }

    /// Replace the active job's manager with a fresh one.
    ///
    /// This is the recovery path after the connection reached
    /// [`Phase::Failed`](crate::state::Phase::Failed). The last known
    /// snapshot carries over.
    pub async fn restart(&mut self) -> Result<Option<&ConnectionManager>, CoreError> {
        let Some(mut old) = self.current.take() else {
            return Ok(None);
        };

        let snapshot = old.job();
        old.stop().await;
        tracing::info!(job_id = %snapshot.job_id, "Restarting status connection");
        let manager = ConnectionManager::start_from(&self.config, snapshot)?;
        Ok(Some(&*self.current.insert(manager)))
    }

    /// Stop watching. Returns once the old connection has shut down.
    pub async fn clear(&mut self) {
        if let Some(mut manager) = self.current.take() {
            tracing::info!(job_id = %manager.job_id(), "Stopping job watch");
            manager.stop().await;
        }
    }
}
