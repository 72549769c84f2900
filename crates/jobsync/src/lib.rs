//! Live job-status synchronization for the ViMax video-generation service.
//!
//! Provides the status-channel frame codec, the per-job connection state
//! machine and its tokio driver (reconnect with exponential backoff,
//! heartbeat), the job snapshot model, active-job switching, and the thin
//! REST wrappers used around a live connection.

pub mod api;
pub mod client;
pub mod config;
pub mod events;
pub mod job;
pub mod manager;
pub mod messages;
pub mod reconnect;
pub mod session;
pub mod state;

pub use config::SyncConfig;
pub use job::Job;
pub use manager::ConnectionManager;
pub use session::JobSession;
pub use state::{ConnectionState, Phase};
