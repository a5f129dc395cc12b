//! Shared types, configuration, job queue and history for Tubefetch.

pub mod config;
pub mod db;
pub mod errors;
pub mod link_detector;
pub mod models;
pub mod task_queue;

pub use config::AppConfig;
pub use errors::{ExtractError, FetchError, FetchResult, ProcessError};
pub use models::{DownloadFormat, DownloadProgress, FormatSummary, JobStatus, ProgressStatus, VideoInfo};
