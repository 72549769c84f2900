//! Shared types and constants for the ViMax job-status client.

pub mod error;
pub mod status_names;
pub mod types;
