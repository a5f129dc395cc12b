//! yt-dlp and ffmpeg process driver.
//!
//! `YtDlp` extracts metadata and downloads videos by running the `yt-dlp`
//! executable; `Ffmpeg` converts audio. Both report failures as
//! `tubefetch_shared::FetchError`.

pub mod media;
pub mod metadata;
pub mod process;
pub mod progress;
pub mod tools;
pub mod ytdlp;

pub use media::{AudioCodec, AudioTarget, Ffmpeg};
pub use tools::{ToolReport, MIN_YTDLP_VERSION};
pub use ytdlp::{create_downloader, DownloadOptions, ProgressCallback, YtDlp, YtDlpConfig};

/// Check the installed yt-dlp and ffmpeg.
pub async fn check_tools(client: &YtDlp) -> ToolReport {
    let ytdlp_version = client.version().await.ok();
    let ytdlp_supported = ytdlp_version
        .as_deref()
        .map(|v| tools::version_at_least(v, MIN_YTDLP_VERSION))
        .unwrap_or(false);

    let ffmpeg = Ffmpeg::locate(client.config().ffmpeg_location.as_deref());
    let ffmpeg_version = match &ffmpeg {
        Some(f) => f.probe().await,
        None => None,
    };

    ToolReport {
        ytdlp_version,
        ytdlp_supported,
        ffmpeg_path: ffmpeg.map(|f| f.binary().to_path_buf()),
        ffmpeg_version,
    }
}
