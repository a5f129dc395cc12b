/// Database connection pool and job history helpers.
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteJournalMode};
use std::str::FromStr;
use tracing::info;

use crate::models::{DownloadProgress, Job};

/// Create SQLite connection pool with WAL mode and busy timeout.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(10))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!("Connected to database: {}", database_url);
    Ok(pool)
}

/// Create a private in-memory database (single connection), with migrations applied.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run migrations from the migrations directory.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await?;

    info!("Database migrations completed");
    Ok(())
}

/// Record a new queued job.
pub async fn create_job(
    pool: &SqlitePool,
    job_id: &str,
    url: &str,
    format: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (id, url, format, status, progress)
        VALUES (?, ?, ?, 'queued', 0)
        "#,
    )
    .bind(job_id)
    .bind(url)
    .bind(format)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark job as running.
pub async fn start_job(pool: &SqlitePool, job_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs SET status = 'running', started_at = CURRENT_TIMESTAMP
        WHERE id = ? AND status = 'queued'
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store the latest progress snapshot of a running job.
pub async fn update_job_progress(
    pool: &SqlitePool,
    job_id: &str,
    progress: &DownloadProgress,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs SET progress = ?, speed = ?, eta = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(progress.percentage.clamp(0.0, 100.0))
    .bind(progress.speed.as_deref())
    .bind(progress.eta.as_deref())
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark job as completed with file path. Cancelled jobs keep their state.
pub async fn complete_job(
    pool: &SqlitePool,
    job_id: &str,
    file_path: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'done', progress = 100, file_path = ?, finished_at = CURRENT_TIMESTAMP
        WHERE id = ? AND status != 'cancelled'
        "#,
    )
    .bind(file_path)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark job as failed. Cancelled jobs keep their state.
pub async fn fail_job(
    pool: &SqlitePool,
    job_id: &str,
    error_msg: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'error', error_msg = ?, finished_at = CURRENT_TIMESTAMP
        WHERE id = ? AND status != 'cancelled'
        "#,
    )
    .bind(error_msg)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Cancel a queued or running job. Returns whether a row changed.
pub async fn cancel_job(pool: &SqlitePool, job_id: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs SET status = 'cancelled', finished_at = CURRENT_TIMESTAMP
        WHERE id = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Get a job by ID.
pub async fn get_job(pool: &SqlitePool, job_id: &str) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    Ok(job)
}

/// Most recent jobs, newest first.
pub async fn list_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<Job>> {
    let jobs = sqlx::query_as::<_, Job>(
        r#"
        SELECT * FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(jobs)
}

/// Delete finished jobs from history. Returns the number of rows removed.
pub async fn clear_finished_jobs(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM jobs WHERE status IN ('done', 'error', 'cancelled')",
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Jobs left queued/running by a previous process are marked failed.
pub async fn fail_interrupted_jobs(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'error', error_msg = 'Interrupted by server restart', finished_at = CURRENT_TIMESTAMP
        WHERE status IN ('queued', 'running')
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressStatus;

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    #[tokio::test]
    async fn test_job_lifecycle() {
        let pool = create_memory_pool().await.unwrap();
        create_job(&pool, "j1", URL, "mp4_best").await.unwrap();

        let job = get_job(&pool, "j1").await.unwrap().unwrap();
        assert_eq!(job.status, "queued");
        assert_eq!(job.format, "mp4_best");

        start_job(&pool, "j1").await.unwrap();
        let mut progress = DownloadProgress::new(ProgressStatus::Downloading);
        progress.percentage = 37.5;
        progress.eta = Some("00:12".into());
        update_job_progress(&pool, "j1", &progress).await.unwrap();

        let job = get_job(&pool, "j1").await.unwrap().unwrap();
        assert_eq!(job.status, "running");
        assert_eq!(job.progress, 37.5);
        assert_eq!(job.eta.as_deref(), Some("00:12"));
        assert!(job.started_at.is_some());

        complete_job(&pool, "j1", "/tmp/out.mp4").await.unwrap();
        let job = get_job(&pool, "j1").await.unwrap().unwrap();
        assert_eq!(job.status, "done");
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.file_path.as_deref(), Some("/tmp/out.mp4"));
    }

    #[tokio::test]
    async fn test_cancel_is_sticky() {
        let pool = create_memory_pool().await.unwrap();
        create_job(&pool, "j1", URL, "mp3_best").await.unwrap();
        assert!(cancel_job(&pool, "j1").await.unwrap());
        assert!(!cancel_job(&pool, "j1").await.unwrap());

        fail_job(&pool, "j1", "killed").await.unwrap();
        let job = get_job(&pool, "j1").await.unwrap().unwrap();
        assert_eq!(job.status, "cancelled");
        assert!(job.error_msg.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_running_job_ignores_completion() {
        let pool = create_memory_pool().await.unwrap();
        create_job(&pool, "j1", URL, "mp4_best").await.unwrap();
        start_job(&pool, "j1").await.unwrap();
        assert!(cancel_job(&pool, "j1").await.unwrap());

        complete_job(&pool, "j1", "/tmp/out.mp4").await.unwrap();
        let job = get_job(&pool, "j1").await.unwrap().unwrap();
        assert_eq!(job.status, "cancelled");
        assert!(job.file_path.is_none());
    }

    #[tokio::test]
    async fn test_list_and_clear() {
        let pool = create_memory_pool().await.unwrap();
        for id in ["a", "b", "c"] {
            create_job(&pool, id, URL, "mp4_best").await.unwrap();
        }
        fail_job(&pool, "a", "boom").await.unwrap();
        complete_job(&pool, "b", "/tmp/b.mp4").await.unwrap();

        let jobs = list_jobs(&pool, 10).await.unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].id, "c");

        assert_eq!(clear_finished_jobs(&pool).await.unwrap(), 2);
        let jobs = list_jobs(&pool, 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, "queued");
    }

    #[tokio::test]
    async fn test_fail_interrupted_jobs() {
        let pool = create_memory_pool().await.unwrap();
        create_job(&pool, "q", URL, "mp4_best").await.unwrap();
        create_job(&pool, "r", URL, "mp4_best").await.unwrap();
        start_job(&pool, "r").await.unwrap();
        create_job(&pool, "d", URL, "mp4_best").await.unwrap();
        complete_job(&pool, "d", "/tmp/d.mp4").await.unwrap();

        assert_eq!(fail_interrupted_jobs(&pool).await.unwrap(), 2);
        let job = get_job(&pool, "r").await.unwrap().unwrap();
        assert_eq!(job.status, "error");
        assert!(get_job(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::AppConfig {
            database_path: dir.path().join("history.db"),
            ..Default::default()
        };

        let pool = create_pool(&config.database_url()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        create_job(&pool, "kept", URL, "mp3_best").await.unwrap();
        pool.close().await;

        let pool = create_pool(&config.database_url()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let job = get_job(&pool, "kept").await.unwrap().unwrap();
        assert_eq!(job.format, "mp3_best");
        assert!(dir.path().join("history.db").exists());
    }
}
