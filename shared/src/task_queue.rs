/// Concurrent job queue for managing download operations.
///
/// Uses tokio Semaphore to limit concurrency and track active jobs.
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use chrono::Utc;
use serde::Serialize;

use crate::models::{DownloadFormat, DownloadProgress, JobStatus, ProgressStatus};

/// Live state of a tracked download job.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedJob {
    pub job_id: String,
    pub url: String,
    pub format: DownloadFormat,
    pub status: JobStatus,
    pub progress: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub filename: Option<String>,
    pub file_path: Option<String>,
    pub error: Option<String>,
    pub enqueued_at: chrono::DateTime<Utc>,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub finished_at: Option<chrono::DateTime<Utc>>,
    #[serde(skip)]
    pub cancel: CancellationToken,
}

/// Main job queue with concurrency control.
pub struct TaskQueue {
    /// Semaphore to limit concurrent jobs.
    semaphore: Arc<Semaphore>,
    /// Active permits (held while a job runs).
    permits: Arc<Mutex<HashMap<String, OwnedSemaphorePermit>>>,
    /// Tracked job metadata.
    jobs: Arc<Mutex<HashMap<String, TrackedJob>>>,
    /// Max concurrent jobs.
    max_concurrent: usize,
}

impl TaskQueue {
    /// Create a new queue with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            permits: Arc::new(Mutex::new(HashMap::new())),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            max_concurrent,
        }
    }

    /// Enqueue a job. Returns its cancellation token, or `None` if already tracked.
    pub async fn enqueue(&self, job_id: &str, url: &str, format: DownloadFormat) -> Option<CancellationToken> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(job_id) {
            warn!("Job {} already in queue", job_id);
            return None;
        }

        let cancel = CancellationToken::new();
        jobs.insert(job_id.to_string(), TrackedJob {
            job_id: job_id.to_string(),
            url: url.to_string(),
            format,
            status: JobStatus::Queued,
            progress: 0.0,
            speed: None,
            eta: None,
            filename: None,
            file_path: None,
            error: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancel: cancel.clone(),
        });

        info!("Job {} enqueued (format: {})", job_id, format);
        Some(cancel)
    }

    /// Acquire a concurrency permit. Waits if at capacity.
    ///
    /// Returns false if the job was cancelled while waiting or is unknown.
    pub async fn acquire(&self, job_id: &str) -> bool {
        let cancel = match self.jobs.lock().await.get(job_id) {
            Some(job) => job.cancel.clone(),
            None => {
                warn!("Acquire for unknown job {}", job_id);
                return false;
            }
        };

        let permit = tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => {
                    warn!("Semaphore closed for job {}", job_id);
                    return false;
                }
            },
            _ = cancel.cancelled() => {
                info!("Job {} cancelled while waiting for a slot", job_id);
                return false;
            }
        };

        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
            }
            _ => return false,
        }
        drop(jobs);

        // Store permit and mark running
        self.permits.lock().await.insert(job_id.to_string(), permit);
        info!("Job {} acquired slot, now running", job_id);
        true
    }

    /// Take a slot for work that is not tracked as a job. Waits if at capacity.
    ///
    /// The slot is released when the permit is dropped.
    pub async fn slot(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }

    /// Apply a progress snapshot to a running job.
    pub async fn update_progress(&self, job_id: &str, progress: &DownloadProgress) {
        if let Some(job) = self.jobs.lock().await.get_mut(job_id) {
            if job.status != JobStatus::Running {
                return;
            }
            job.progress = progress.percentage.clamp(0.0, 100.0);
            job.speed = progress.speed.clone();
            job.eta = progress.eta.clone();
            if progress.filename.is_some() {
                job.filename = progress.filename.clone();
            }
            if progress.status == ProgressStatus::Error {
                job.error = progress.error_message.clone();
            }
        }
    }

    /// Mark job as completed and release its permit. Cancelled jobs keep their state.
    pub async fn complete(&self, job_id: &str, file_path: &str) {
        if let Some(job) = self.jobs.lock().await.get_mut(job_id) {
            if job.status != JobStatus::Cancelled {
                job.status = JobStatus::Done;
                job.progress = 100.0;
                job.file_path = Some(file_path.to_string());
                job.finished_at = Some(Utc::now());
            }
        }
        // Drop the permit to free the slot
        self.permits.lock().await.remove(job_id);
        info!("Job {} completed, slot released", job_id);
    }

    /// Mark job as failed and release its permit.
    pub async fn fail(&self, job_id: &str, error: &str) {
        if let Some(job) = self.jobs.lock().await.get_mut(job_id) {
            if job.status != JobStatus::Cancelled {
                job.status = JobStatus::Error;
                job.error = Some(error.to_string());
            }
            job.finished_at = Some(Utc::now());
        }
        self.permits.lock().await.remove(job_id);
        warn!("Job {} failed, slot released", job_id);
    }

    /// Cancel a job (fires its token, releases permit if held).
    ///
    /// Returns false for unknown or already finished jobs.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(job_id) {
            Some(job) if !job.status.is_finished() => {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(Utc::now());
                job.cancel.cancel();
                drop(jobs);
                self.permits.lock().await.remove(job_id);
                info!("Job {} cancelled", job_id);
                true
            }
            _ => false,
        }
    }

    /// Get the current status of a job.
    pub async fn get_status(&self, job_id: &str) -> Option<TrackedJob> {
        self.jobs.lock().await.get(job_id).cloned()
    }

    /// All tracked jobs, newest first.
    pub async fn list(&self) -> Vec<TrackedJob> {
        let mut jobs: Vec<TrackedJob> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at));
        jobs
    }

    /// Get count of currently running jobs.
    pub async fn running_count(&self) -> usize {
        self.permits.lock().await.len()
    }

    /// Get queue statistics.
    pub async fn stats(&self) -> QueueStats {
        let jobs = self.jobs.lock().await;
        let running = self.permits.lock().await.len();
        let count = |status: JobStatus| jobs.values().filter(|j| j.status == status).count();
        QueueStats {
            max_concurrent: self.max_concurrent,
            running,
            queued: count(JobStatus::Queued),
            completed: count(JobStatus::Done),
            failed: count(JobStatus::Error),
            cancelled: count(JobStatus::Cancelled),
            total_tracked: jobs.len(),
        }
    }

    /// Drop every finished job. Returns how many were removed.
    pub async fn clear_finished(&self) -> usize {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, j| !j.status.is_finished());
        before - jobs.len()
    }

    /// Remove finished jobs older than the retention period.
    pub async fn cleanup_old(&self, max_age_secs: i64) {
        let cutoff = Utc::now() - chrono::Duration::seconds(max_age_secs);
        let mut jobs = self.jobs.lock().await;
        jobs.retain(|_, j| match j.finished_at {
            Some(finished) if j.status.is_finished() => finished > cutoff,
            _ => true,
        });
    }
}

/// Queue statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub max_concurrent: usize,
    pub running: usize,
    pub queued: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_tracked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    #[tokio::test]
    async fn test_enqueue_and_acquire() {
        let queue = TaskQueue::new(2);
        assert!(queue.enqueue("j1", URL, DownloadFormat::Mp4Best).await.is_some());
        assert!(queue.acquire("j1").await);
        assert_eq!(queue.running_count().await, 1);
        assert_eq!(queue.get_status("j1").await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_complete_releases_slot() {
        let queue = TaskQueue::new(1);
        queue.enqueue("j1", URL, DownloadFormat::Mp4Best).await;
        queue.acquire("j1").await;
        assert_eq!(queue.running_count().await, 1);

        queue.complete("j1", "/tmp/video.mp4").await;
        assert_eq!(queue.running_count().await, 0);
        let job = queue.get_status("j1").await.unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.file_path.as_deref(), Some("/tmp/video.mp4"));
    }

    #[tokio::test]
    async fn test_duplicate_enqueue() {
        let queue = TaskQueue::new(2);
        assert!(queue.enqueue("j1", URL, DownloadFormat::Mp4Best).await.is_some());
        assert!(queue.enqueue("j1", URL, DownloadFormat::Mp4Best).await.is_none());
    }

    #[tokio::test]
    async fn test_progress_updates() {
        let queue = TaskQueue::new(1);
        queue.enqueue("j1", URL, DownloadFormat::Mp3Best).await;

        let mut progress = DownloadProgress::new(ProgressStatus::Downloading);
        progress.percentage = 42.5;
        progress.speed = Some("1.2MiB/s".into());

        // Ignored while queued
        queue.update_progress("j1", &progress).await;
        assert_eq!(queue.get_status("j1").await.unwrap().progress, 0.0);

        queue.acquire("j1").await;
        queue.update_progress("j1", &progress).await;
        let job = queue.get_status("j1").await.unwrap();
        assert_eq!(job.progress, 42.5);
        assert_eq!(job.speed.as_deref(), Some("1.2MiB/s"));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_slot() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.enqueue("j1", URL, DownloadFormat::Mp4Best).await;
        queue.enqueue("j2", URL, DownloadFormat::Mp4Best).await;
        assert!(queue.acquire("j1").await);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.acquire("j2").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.cancel("j2").await);

        assert!(!waiter.await.unwrap());
        assert_eq!(queue.get_status("j2").await.unwrap().status, JobStatus::Cancelled);
        assert_eq!(queue.running_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_fires_token_and_not_twice() {
        let queue = TaskQueue::new(1);
        let token = queue.enqueue("j1", URL, DownloadFormat::Mp4Best).await.unwrap();
        queue.acquire("j1").await;
        assert!(queue.cancel("j1").await);
        assert!(token.is_cancelled());
        assert_eq!(queue.running_count().await, 0);
        assert!(!queue.cancel("j1").await);

        // A late failure does not overwrite the cancelled state
        queue.fail("j1", "killed").await;
        assert_eq!(queue.get_status("j1").await.unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_untracked_slot_blocks_jobs() {
        let queue = Arc::new(TaskQueue::new(1));
        let slot = queue.slot().await.unwrap();
        queue.enqueue("j1", URL, DownloadFormat::Mp4Best).await;

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.acquire("j1").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(queue.get_status("j1").await.unwrap().status, JobStatus::Queued);

        drop(slot);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_late_completion_keeps_cancelled() {
        let queue = TaskQueue::new(1);
        queue.enqueue("j1", URL, DownloadFormat::Mp4Best).await;
        assert!(queue.acquire("j1").await);
        assert!(queue.cancel("j1").await);

        queue.complete("j1", "/tmp/video.mp4").await;
        let job = queue.get_status("j1").await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.file_path.is_none());
        assert_eq!(queue.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_counts_from_finish_time() {
        let queue = TaskQueue::new(2);
        queue.enqueue("old", URL, DownloadFormat::Mp4Best).await;
        queue.enqueue("long", URL, DownloadFormat::Mp4Best).await;
        queue.enqueue("live", URL, DownloadFormat::Mp4Best).await;
        queue.acquire("old").await;
        queue.acquire("long").await;
        queue.complete("old", "/tmp/old.mp4").await;
        queue.complete("long", "/tmp/long.mp4").await;
        {
            let mut jobs = queue.jobs.lock().await;
            let hour_ago = Utc::now() - chrono::Duration::hours(1);
            let old = jobs.get_mut("old").unwrap();
            old.enqueued_at = hour_ago;
            old.finished_at = Some(hour_ago);
            // enqueued long ago but only just finished
            jobs.get_mut("long").unwrap().enqueued_at = hour_ago;
            jobs.get_mut("live").unwrap().enqueued_at = hour_ago;
        }

        queue.cleanup_old(600).await;
        assert!(queue.get_status("old").await.is_none());
        assert!(queue.get_status("long").await.is_some());
        assert!(queue.get_status("live").await.is_some());
    }

    #[tokio::test]
    async fn test_stats_and_clear_finished() {
        let queue = TaskQueue::new(3);
        queue.enqueue("j1", URL, DownloadFormat::Mp4Best).await;
        queue.enqueue("j2", URL, DownloadFormat::Mp3Best).await;
        queue.enqueue("j3", URL, DownloadFormat::Mp4Best).await;
        queue.acquire("j1").await;
        queue.acquire("j3").await;
        queue.fail("j3", "boom").await;

        let stats = queue.stats().await;
        assert_eq!(stats.running, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.max_concurrent, 3);

        assert_eq!(queue.clear_finished().await, 1);
        assert_eq!(queue.list().await.len(), 2);
    }
}
