/// Data models shared across all Tubefetch crates.
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Supported download formats.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFormat {
    #[default]
    Mp4Best,
    #[serde(rename = "mp4_720p")]
    Mp4Hd720,
    #[serde(rename = "mp4_480p")]
    Mp4Sd480,
    Mp3Best,
    AudioOnly,
}

impl DownloadFormat {
    /// Every format, in menu order.
    pub const ALL: [DownloadFormat; 5] = [
        DownloadFormat::Mp4Best,
        DownloadFormat::Mp4Hd720,
        DownloadFormat::Mp4Sd480,
        DownloadFormat::Mp3Best,
        DownloadFormat::AudioOnly,
    ];

    /// The formats offered in the web UI.
    pub const MENU: [DownloadFormat; 4] = [
        DownloadFormat::Mp4Best,
        DownloadFormat::Mp4Hd720,
        DownloadFormat::Mp4Sd480,
        DownloadFormat::Mp3Best,
    ];

    /// The yt-dlp `-f` selector for this format.
    pub fn selector(&self) -> &'static str {
        match self {
            DownloadFormat::Mp4Best => "best[ext=mp4]",
            DownloadFormat::Mp4Hd720 => "best[height<=720][ext=mp4]",
            DownloadFormat::Mp4Sd480 => "best[height<=480][ext=mp4]",
            DownloadFormat::Mp3Best => "bestaudio[ext=m4a]/bestaudio/best",
            DownloadFormat::AudioOnly => "bestaudio/best",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            DownloadFormat::Mp4Best => "MP4 - Best Quality",
            DownloadFormat::Mp4Hd720 => "MP4 - 720p",
            DownloadFormat::Mp4Sd480 => "MP4 - 480p",
            DownloadFormat::Mp3Best => "MP3 - Audio Only",
            DownloadFormat::AudioOnly => "Audio Only",
        }
    }

    /// Audio formats are post-processed into MP3.
    pub fn is_audio(&self) -> bool {
        matches!(self, DownloadFormat::Mp3Best | DownloadFormat::AudioOnly)
    }

    /// Extension of the final file.
    pub fn extension(&self) -> &'static str {
        if self.is_audio() {
            "mp3"
        } else {
            "mp4"
        }
    }

    /// Stable key used in URLs, the database and the CLI.
    pub fn key(&self) -> &'static str {
        match self {
            DownloadFormat::Mp4Best => "mp4_best",
            DownloadFormat::Mp4Hd720 => "mp4_720p",
            DownloadFormat::Mp4Sd480 => "mp4_480p",
            DownloadFormat::Mp3Best => "mp3_best",
            DownloadFormat::AudioOnly => "audio_only",
        }
    }
}

impl std::fmt::Display for DownloadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl std::str::FromStr for DownloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "mp4_best" | "mp4" | "best" => Ok(DownloadFormat::Mp4Best),
            "mp4_720p" | "720p" => Ok(DownloadFormat::Mp4Hd720),
            "mp4_480p" | "480p" => Ok(DownloadFormat::Mp4Sd480),
            "mp3_best" | "mp3" => Ok(DownloadFormat::Mp3Best),
            "audio_only" | "audio" => Ok(DownloadFormat::AudioOnly),
            other => Err(format!("unknown download format: {}", other)),
        }
    }
}

/// A single downloadable format as reported by the extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatSummary {
    pub format_id: String,
    pub ext: String,
    pub quality: Option<f64>,
    pub filesize: u64,
    pub format_note: String,
}

/// Video metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: u64,
    pub uploader: String,
    pub upload_date: String,
    pub view_count: u64,
    pub thumbnail: String,
    pub formats: Vec<FormatSummary>,
    pub url: String,
}

const DESCRIPTION_PREVIEW_CHARS: usize = 500;

impl VideoInfo {
    /// Duration as `m:ss`, or `None` when unknown.
    pub fn duration_label(&self) -> Option<String> {
        if self.duration == 0 {
            return None;
        }
        Some(format!("{}:{:02}", self.duration / 60, self.duration % 60))
    }

    /// View count with thousands separators, or `None` when zero.
    pub fn views_label(&self) -> Option<String> {
        if self.view_count == 0 {
            return None;
        }
        Some(group_thousands(self.view_count))
    }

    /// Description cut to 500 characters.
    pub fn description_preview(&self) -> String {
        if self.description.chars().count() > DESCRIPTION_PREVIEW_CHARS {
            let head: String = self.description.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
            format!("{}...", head)
        } else {
            self.description.clone()
        }
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Download progress status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Downloading,
    Finished,
    Error,
}

/// Progress snapshot delivered to progress callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadProgress {
    pub status: ProgressStatus,
    pub percentage: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub filename: Option<String>,
    pub error_message: Option<String>,
}

impl DownloadProgress {
    pub fn new(status: ProgressStatus) -> Self {
        Self {
            status,
            percentage: 0.0,
            speed: None,
            eta: None,
            filename: None,
            error_message: None,
        }
    }
}

const PLAYLIST_PREVIEW_LEN: usize = 10;

/// The head of a playlist/channel listing.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistPreview {
    pub count: usize,
    pub videos: Vec<VideoInfo>,
    pub remaining: usize,
}

impl PlaylistPreview {
    pub fn from_videos(videos: Vec<VideoInfo>) -> Self {
        let count = videos.len();
        let shown: Vec<VideoInfo> = videos.into_iter().take(PLAYLIST_PREVIEW_LEN).collect();
        let remaining = count - shown.len();
        Self { count, videos: shown, remaining }
    }
}

/// Download job status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Whether the job reached a final state.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Download job record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub format: String,
    pub status: String,
    pub progress: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub file_path: Option<String>,
    pub error_msg: Option<String>,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
}
