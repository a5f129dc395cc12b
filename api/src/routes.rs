/// API route handlers for the Tubefetch web UI.
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::{Form, Json};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tubefetch_downloader::{check_tools, DownloadOptions, ProgressCallback};
use tubefetch_shared::db;
use tubefetch_shared::link_detector::{detect_link, DetectedLink};
use tubefetch_shared::models::{
    DownloadFormat, DownloadProgress, Job, JobStatus, PlaylistPreview, ProgressStatus, VideoInfo,
};
use tubefetch_shared::task_queue::TrackedJob;

use crate::error::ApiError;
use crate::AppState;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Jobs returned by `GET /api/jobs`.
const HISTORY_LIMIT: i64 = 50;

// ====== REQUEST / RESPONSE TYPES ======

#[derive(Deserialize)]
pub struct InfoBody {
    pub url: String,
}

#[derive(Deserialize)]
pub struct DownloadBody {
    pub url: String,
    #[serde(default)]
    pub format: DownloadFormat,
}

#[derive(Deserialize)]
pub struct SimpleDownloadForm {
    pub video_url: Option<String>,
}

#[derive(Serialize)]
pub struct FormatOption {
    pub key: &'static str,
    pub label: &'static str,
    pub audio: bool,
    pub default: bool,
}

/// Video metadata with the display strings the UI shows.
#[derive(Serialize)]
pub struct VideoView {
    #[serde(flatten)]
    pub video: VideoInfo,
    pub duration_label: Option<String>,
    pub views_label: Option<String>,
    pub description_preview: String,
}

impl From<VideoInfo> for VideoView {
    fn from(video: VideoInfo) -> Self {
        Self {
            duration_label: video.duration_label(),
            views_label: video.views_label(),
            description_preview: video.description_preview(),
            video,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InfoResponse {
    Video {
        video: VideoView,
    },
    Playlist {
        count: usize,
        videos: Vec<VideoView>,
        remaining: usize,
    },
}

/// A job as shown to clients: the stored record with live queue state on top.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: String,
    pub url: String,
    pub format: String,
    pub status: String,
    pub progress: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub filename: Option<String>,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub download_url: Option<String>,
}

fn file_name(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

impl JobView {
    fn new(job: Job, live: Option<&TrackedJob>) -> Self {
        let mut view = Self {
            filename: job.file_path.as_deref().and_then(file_name),
            id: job.id,
            url: job.url,
            format: job.format,
            status: job.status,
            progress: job.progress,
            speed: job.speed,
            eta: job.eta,
            error: job.error_msg,
            created_at: job.created_at,
            finished_at: job.finished_at,
            download_url: None,
        };

        if let Some(live) = live {
            view.status = live.status.to_string();
            view.progress = live.progress;
            view.speed = live.speed.clone();
            view.eta = live.eta.clone();
            if let Some(name) = live
                .file_path
                .as_deref()
                .or(live.filename.as_deref())
                .and_then(file_name)
            {
                view.filename = Some(name);
            }
            if view.error.is_none() {
                view.error = live.error.clone();
            }
        }

        if view.status == JobStatus::Done.to_string() {
            view.download_url = Some(format!("/api/files/{}", view.id));
        }
        view
    }
}

fn require_url(raw: &str) -> Result<DetectedLink, ApiError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("Please enter a video URL"));
    }
    detect_link(url).ok_or_else(|| ApiError::bad_request(format!("Not a valid URL: {}", url)))
}

// ====== PAGE ROUTES ======

/// GET /
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// POST /download - Synchronous download of the best single file (form field `video_url`)
pub async fn simple_download(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SimpleDownloadForm>,
) -> Json<Value> {
    let url = form.video_url.as_deref().map(str::trim).unwrap_or_default();
    if url.is_empty() {
        return Json(json!({ "status": "fail", "message": "No URL provided." }));
    }

    let options = DownloadOptions::new(DownloadFormat::Mp4Best)
        .with_selector("best")
        .no_playlist();

    // Shares the download slots with queued jobs
    let Some(_slot) = state.queue.slot().await else {
        return Json(json!({ "status": "fail", "message": "Download queue is closed." }));
    };

    let message = match state.ytdlp.download(url, options).await {
        Ok(path) => {
            info!("Form download finished: {}", path.display());
            "Download successful".to_string()
        }
        Err(e) => format!("Error: {}", e),
    };

    Json(json!({ "status": "success", "message": message }))
}

// ====== INFO ROUTES ======

/// GET /api/formats
pub async fn list_formats() -> Json<Vec<FormatOption>> {
    Json(
        DownloadFormat::MENU
            .iter()
            .map(|f| FormatOption {
                key: f.key(),
                label: f.label(),
                audio: f.is_audio(),
                default: *f == DownloadFormat::default(),
            })
            .collect(),
    )
}

/// POST /api/info - Video details, or a preview of a playlist/channel
pub async fn video_info(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InfoBody>,
) -> Result<Json<InfoResponse>, ApiError> {
    let link = require_url(&body.url)?;

    if !link.is_listing() {
        let video = state.ytdlp.get_video_info(link.url()).await?;
        return Ok(Json(InfoResponse::Video { video: video.into() }));
    }

    let mut videos = state.ytdlp.get_playlist_info(link.url()).await?;
    info!("Found {} videos at {}", videos.len(), link.url());

    if videos.len() == 1 {
        let video = videos.remove(0);
        return Ok(Json(InfoResponse::Video { video: video.into() }));
    }

    let preview = PlaylistPreview::from_videos(videos);
    Ok(Json(InfoResponse::Playlist {
        count: preview.count,
        videos: preview.videos.into_iter().map(VideoView::from).collect(),
        remaining: preview.remaining,
    }))
}

/// GET /api/sites
pub async fn supported_sites(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let sites = state.ytdlp.get_supported_sites().await?;
    Ok(Json(json!({ "count": sites.len(), "sites": sites })))
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tools = check_tools(&state.ytdlp).await;
    let queue = state.queue.stats().await;
    let status = if tools.ytdlp_version.is_some() { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "tools": tools,
        "queue": queue,
        "download_dir": state.ytdlp.download_dir(),
    }))
}

// ====== DOWNLOAD ROUTES ======

/// POST /api/download - Queue a background download
pub async fn submit_download(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DownloadBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let link = require_url(&body.url)?;
    let url = link.url().to_string();
    let job_id = uuid::Uuid::new_v4().to_string();

    db::create_job(&state.pool, &job_id, &url, body.format.key()).await?;
    let cancel = state
        .queue
        .enqueue(&job_id, &url, body.format)
        .await
        .ok_or_else(|| ApiError::conflict("Job already queued"))?;

    info!("Download queued: job={} link={} url={}", job_id, link.kind(), url);
    tokio::spawn(run_job(state.clone(), job_id.clone(), url, body.format, cancel));

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "status": JobStatus::Queued })),
    ))
}

/// Waits for a slot, runs the download and records the outcome.
async fn run_job(
    state: Arc<AppState>,
    job_id: String,
    url: String,
    format: DownloadFormat,
    cancel: CancellationToken,
) {
    if !state.queue.acquire(&job_id).await {
        return;
    }
    if let Err(e) = db::start_job(&state.pool, &job_id).await {
        warn!("Failed to mark job {} running: {}", job_id, e);
    }

    let (tx, rx) = mpsc::unbounded_channel::<DownloadProgress>();
    let forwarder = tokio::spawn(forward_progress(state.clone(), job_id.clone(), rx));
    let on_progress: ProgressCallback = Arc::new(move |progress| {
        let _ = tx.send(progress);
    });

    let options = DownloadOptions::new(format)
        .with_cancel(cancel)
        .with_progress(on_progress);
    let result = state.ytdlp.download(&url, options).await;

    // The sender went away with the options, so this drains and ends
    if let Err(e) = forwarder.await {
        warn!("Progress forwarder for job {} failed: {}", job_id, e);
    }

    match result {
        Ok(path) => {
            let path = path.display().to_string();
            state.queue.complete(&job_id, &path).await;
            if let Err(e) = db::complete_job(&state.pool, &job_id, &path).await {
                warn!("Failed to record completion of job {}: {}", job_id, e);
            }
        }
        Err(e) if e.is_cancelled() => {
            info!("Job {} stopped after cancellation", job_id);
        }
        Err(e) => {
            let message = e.to_string();
            state.queue.fail(&job_id, &message).await;
            if let Err(e) = db::fail_job(&state.pool, &job_id, &message).await {
                warn!("Failed to record failure of job {}: {}", job_id, e);
            }
        }
    }
}

/// Applies progress snapshots to the queue and, in whole-percent steps, to the history table.
async fn forward_progress(
    state: Arc<AppState>,
    job_id: String,
    mut rx: mpsc::UnboundedReceiver<DownloadProgress>,
) {
    let mut last_saved = f64::NEG_INFINITY;
    while let Some(progress) = rx.recv().await {
        state.queue.update_progress(&job_id, &progress).await;

        if progress.status != ProgressStatus::Downloading || progress.percentage - last_saved >= 1.0 {
            last_saved = progress.percentage;
            if let Err(e) = db::update_job_progress(&state.pool, &job_id, &progress).await {
                warn!("Failed to store progress of job {}: {}", job_id, e);
            }
        }
    }
}

// ====== JOB ROUTES ======

/// GET /api/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let records = db::list_jobs(&state.pool, HISTORY_LIMIT).await?;

    let mut jobs = Vec::with_capacity(records.len());
    for record in records {
        let live = state.queue.get_status(&record.id).await;
        jobs.push(JobView::new(record, live.as_ref()));
    }

    let queue = state.queue.stats().await;
    Ok(Json(json!({ "jobs": jobs, "queue": queue })))
}

/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let record = db::get_job(&state.pool, &job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    let live = state.queue.get_status(&job_id).await;
    Ok(Json(JobView::new(record, live.as_ref())))
}

/// DELETE /api/jobs/:id - Cancel a queued or running job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let live = state.queue.cancel(&job_id).await;
    let stored = db::cancel_job(&state.pool, &job_id).await?;

    if live || stored {
        info!("Job {} cancelled", job_id);
        return Ok(Json(json!({ "message": "Job cancelled" })));
    }

    match db::get_job(&state.pool, &job_id).await? {
        Some(_) => Err(ApiError::conflict("Job cannot be cancelled (already finished)")),
        None => Err(ApiError::not_found("Job not found")),
    }
}

/// DELETE /api/jobs - Clear finished jobs
pub async fn clear_jobs(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let tracked = state.queue.clear_finished().await;
    let cleared = db::clear_finished_jobs(&state.pool).await?;
    info!("Cleared {} finished jobs ({} tracked in memory)", cleared, tracked);

    Ok(Json(json!({
        "cleared": cleared,
        "message": format!("Cleared {} finished jobs", cleared),
    })))
}

// ====== FILE ROUTES ======

fn content_type_for(filename: &str) -> &'static str {
    let ext = std::path::Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "m4a" | "aac" => "audio/mp4",
        "opus" | "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// `attachment` with an ASCII fallback name and the exact UTF-8 name.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect();
    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", fallback, encoded)
}

/// GET /api/files/:id - Serve a completed job's file
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = db::get_job(&state.pool, &job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    if job.status != JobStatus::Done.to_string() {
        return Err(ApiError::conflict("Job has not finished downloading"));
    }
    let file_path = job
        .file_path
        .ok_or_else(|| ApiError::not_found("No file for this job"))?;

    let path = tokio::fs::canonicalize(&file_path)
        .await
        .map_err(|_| ApiError::not_found("File not found on disk"))?;
    let root = tokio::fs::canonicalize(state.ytdlp.download_dir())
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if !path.starts_with(&root) {
        warn!("Job {} points outside the download directory: {}", job_id, path.display());
        return Err(ApiError::not_found("File not found on disk"));
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Cannot open file: {}", e)))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .len();

    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&filename).to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&filename)),
        ],
        body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for("Clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("Song.MP3"), "audio/mpeg");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("Clip.mp4"),
            "attachment; filename=\"Clip.mp4\"; filename*=UTF-8''Clip.mp4"
        );
        assert_eq!(
            content_disposition("Café \"live\".mp3"),
            "attachment; filename=\"Caf_ _live_.mp3\"; filename*=UTF-8''Caf%C3%A9%20%22live%22.mp3"
        );
    }

    #[test]
    fn test_require_url() {
        assert_eq!(require_url("   ").unwrap_err().status, StatusCode::BAD_REQUEST);
        assert_eq!(require_url("not a url").unwrap_err().status, StatusCode::BAD_REQUEST);
        assert!(require_url(" https://www.youtube.com/playlist?list=PL123 ").unwrap().is_listing());
    }
}
