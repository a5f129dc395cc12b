/// yt-dlp client.
///
/// Every operation spawns the `yt-dlp` executable: metadata calls read its
/// `-J` JSON dump, downloads stream marker lines from its stdout (see
/// `progress`) to report progress and the final file path.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tubefetch_shared::config::AppConfig;
use tubefetch_shared::errors::{ExtractError, FetchError, FetchResult, ProcessError};
use tubefetch_shared::models::{DownloadFormat, DownloadProgress, ProgressStatus, VideoInfo};

use crate::metadata;
use crate::process::{run_capture, run_streaming, RunLimits};
use crate::progress::{self, OutputLine};

/// Receives progress snapshots during a download.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Bitrate used when extracting MP3 audio.
const AUDIO_QUALITY: &str = "192K";

/// Settings for a `YtDlp` client.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Directory where files will be downloaded.
    pub download_dir: PathBuf,
    /// yt-dlp executable.
    pub binary: String,
    /// ffmpeg binary or directory handed to yt-dlp.
    pub ffmpeg_location: Option<PathBuf>,
    /// Timeout for metadata extraction.
    pub info_timeout: Duration,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            binary: "yt-dlp".to_string(),
            ffmpeg_location: None,
            info_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&AppConfig> for YtDlpConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            download_dir: config.download_dir.clone(),
            binary: config.ytdlp_bin.clone(),
            ffmpeg_location: config.ffmpeg_path.clone(),
            info_timeout: Duration::from_secs(config.info_timeout_secs),
        }
    }
}

/// Per-download options.
#[derive(Clone, Default)]
pub struct DownloadOptions {
    pub format: DownloadFormat,
    /// Raw `-f` selector, overriding `format`'s selector.
    pub selector: Option<String>,
    /// File name inside the download directory, instead of `%(title)s.%(ext)s`.
    pub output_filename: Option<String>,
    /// Download only the video when the URL also names a playlist.
    pub no_playlist: bool,
    pub cancel: Option<CancellationToken>,
    /// Progress sink for this download, in addition to the client callback.
    pub on_progress: Option<ProgressCallback>,
}

impl DownloadOptions {
    pub fn new(format: DownloadFormat) -> Self {
        Self { format, ..Self::default() }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_output_filename(mut self, name: impl Into<String>) -> Self {
        self.output_filename = Some(name.into());
        self
    }

    pub fn no_playlist(mut self) -> Self {
        self.no_playlist = true;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }
}

/// Core downloader driving the yt-dlp executable.
pub struct YtDlp {
    config: YtDlpConfig,
    progress_callback: Option<ProgressCallback>,
}

impl YtDlp {
    /// Create a client, creating the download directory if needed.
    pub fn new(config: YtDlpConfig) -> FetchResult<Self> {
        std::fs::create_dir_all(&config.download_dir)?;
        debug!("Download directory ready: {}", config.download_dir.display());
        Ok(Self { config, progress_callback: None })
    }

    pub fn download_dir(&self) -> &Path {
        &self.config.download_dir
    }

    pub fn config(&self) -> &YtDlpConfig {
        &self.config
    }

    /// Set a callback to receive progress updates for every download.
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--no-colors");
        if let Some(ffmpeg) = &self.config.ffmpeg_location {
            cmd.arg("--ffmpeg-location").arg(ffmpeg);
        }
        cmd
    }

    fn info_limits(&self) -> RunLimits {
        RunLimits::timeout(self.config.info_timeout)
    }

    async fn extract_json(&self, url: &str, flat: bool) -> FetchResult<Value> {
        let mut cmd = self.command();
        cmd.args(["-J", "--quiet", "--no-warnings"]);
        if flat {
            cmd.arg("--flat-playlist");
        }
        cmd.arg("--").arg(url);

        let stdout = run_capture(cmd, &self.config.binary, self.info_limits()).await?;
        serde_json::from_str(stdout.trim())
            .map_err(|e| ProcessError::InvalidJson(e.to_string()).into())
    }

    /// Extract video information without downloading.
    ///
    /// For playlist/channel URLs the first video is described.
    pub async fn get_video_info(&self, url: &str) -> FetchResult<VideoInfo> {
        let result = async {
            let info = self.extract_json(url, false).await?;
            let video = metadata::first_video(&info)?;
            Ok::<_, FetchError>(metadata::video_info(video, url))
        }
        .await;

        result.map_err(|e| FetchError::context("Failed to extract video info", e))
    }

    /// Extract basic information for every video of a playlist or channel.
    ///
    /// A single-video URL yields a one-element list with full information.
    pub async fn get_playlist_info(&self, url: &str) -> FetchResult<Vec<VideoInfo>> {
        let info = self
            .extract_json(url, true)
            .await
            .map_err(|e| FetchError::context("Failed to extract playlist info", e))?;

        match metadata::flat_entries(&info) {
            Some(videos) => {
                info!("Listing {} has {} videos", url, videos.len());
                Ok(videos)
            }
            None => Ok(vec![self.get_video_info(url).await?]),
        }
    }

    /// Download a video and return the path of the resulting file.
    pub async fn download_video(
        &self,
        url: &str,
        format: DownloadFormat,
        output_filename: Option<&str>,
    ) -> FetchResult<PathBuf> {
        let mut options = DownloadOptions::new(format);
        if let Some(name) = output_filename {
            options = options.with_output_filename(name);
        }
        self.download(url, options).await
    }

    /// Download with full options.
    pub async fn download(&self, url: &str, options: DownloadOptions) -> FetchResult<PathBuf> {
        self.run_download(url, &options)
            .await
            .map_err(|e| FetchError::context("Download failed", e))
    }

    fn output_template(&self, options: &DownloadOptions) -> PathBuf {
        match &options.output_filename {
            Some(name) => self.config.download_dir.join(name),
            None => self.config.download_dir.join("%(title)s.%(ext)s"),
        }
    }

    async fn run_download(&self, url: &str, options: &DownloadOptions) -> FetchResult<PathBuf> {
        let selector = options
            .selector
            .clone()
            .unwrap_or_else(|| options.format.selector().to_string());

        let mut cmd = self.command();
        cmd.arg("-f")
            .arg(&selector)
            .arg("-o")
            .arg(self.output_template(options))
            .args(["--newline", "--progress", "--no-warnings", "--no-simulate"])
            .arg("--progress-template")
            .arg(progress::progress_template())
            .arg("--print")
            .arg(progress::file_print_template());
        if options.no_playlist {
            cmd.arg("--no-playlist");
        }
        // Audio formats are converted to MP3 by ffmpeg
        if options.selector.is_none() && options.format.is_audio() {
            cmd.args(["-x", "--audio-format", "mp3", "--audio-quality", AUDIO_QUALITY]);
        }
        cmd.arg("--").arg(url);

        info!("Downloading {} (format: {})", url, selector);

        let sinks: Vec<ProgressCallback> = self
            .progress_callback
            .iter()
            .chain(options.on_progress.iter())
            .cloned()
            .collect();
        let emit = |p: DownloadProgress| {
            for sink in &sinks {
                sink(p.clone());
            }
        };

        let mut files: Vec<PathBuf> = Vec::new();
        let mut finished_seen = false;
        let outcome = run_streaming(
            cmd,
            &self.config.binary,
            RunLimits::cancellable(options.cancel.clone()),
            |line| match progress::parse_line(line) {
                OutputLine::Progress(p) => {
                    if sinks.is_empty() {
                        return;
                    }
                    finished_seen = p.status == ProgressStatus::Finished;
                    emit(p);
                }
                OutputLine::File(path) => files.push(PathBuf::from(path)),
                OutputLine::Other => debug!(target: "ytdlp", "{}", line),
            },
        )
        .await;

        if let Err(e) = outcome {
            if !e.is_cancelled() {
                let mut failed = DownloadProgress::new(ProgressStatus::Error);
                failed.error_message = Some(e.to_string());
                emit(failed);
            }
            return Err(e);
        }

        if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(ProcessError::Cancelled.into());
        }

        let path = match files.into_iter().next() {
            Some(path) => path,
            None => {
                warn!("yt-dlp did not report a file path for {}, reconstructing", url);
                self.expected_path(url, options).await?
            }
        };

        if !finished_seen {
            let mut done = DownloadProgress::new(ProgressStatus::Finished);
            done.percentage = 100.0;
            done.filename = Some(path.display().to_string());
            emit(done);
        }

        info!("Download finished: {}", path.display());
        Ok(path)
    }

    /// Path the download is expected at when yt-dlp reported none.
    ///
    /// The title lookup stops as soon as the download is cancelled.
    async fn expected_path(&self, url: &str, options: &DownloadOptions) -> FetchResult<PathBuf> {
        if let Some(name) = &options.output_filename {
            return Ok(self.config.download_dir.join(name));
        }
        let lookup = self.get_video_info(url);
        let info = match &options.cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => return Err(ProcessError::Cancelled.into()),
                info = lookup => info?,
            },
            None => lookup.await?,
        };
        Ok(expected_file(&self.config.download_dir, &info.title, options.format))
    }

    /// Whether yt-dlp can fully extract the URL.
    pub async fn validate_url(&self, url: &str) -> bool {
        match self.extract_json(url, false).await {
            Ok(_) => true,
            Err(e) => {
                debug!("URL {} did not validate: {}", url, e);
                false
            }
        }
    }

    /// Names of all extractors the installed yt-dlp supports.
    pub async fn get_supported_sites(&self) -> FetchResult<Vec<String>> {
        let mut cmd = self.command();
        cmd.arg("--list-extractors");
        let stdout = run_capture(cmd, &self.config.binary, self.info_limits()).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Installed yt-dlp version.
    pub async fn version(&self) -> FetchResult<String> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--version");
        let stdout = run_capture(cmd, &self.config.binary, self.info_limits()).await?;
        let version = stdout.trim().to_string();
        if version.is_empty() {
            return Err(ExtractError::Unknown("yt-dlp reported an empty version".into()).into());
        }
        Ok(version)
    }
}

/// `<dir>/<clean title>.<mp3|mp4>`
pub fn expected_file(dir: &Path, title: &str, format: DownloadFormat) -> PathBuf {
    let title = if title.is_empty() { "video" } else { title };
    dir.join(format!("{}.{}", metadata::clean_title(title), format.extension()))
}

/// Create a client with default settings and the given download directory.
pub fn create_downloader(download_path: impl Into<PathBuf>) -> FetchResult<YtDlp> {
    YtDlp::new(YtDlpConfig {
        download_dir: download_path.into(),
        ..YtDlpConfig::default()
    })
}
