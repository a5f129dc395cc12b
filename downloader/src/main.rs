/// Tubefetch command-line interface.
///
/// Runs the same operations as the web UI from a terminal.
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use tubefetch_downloader::{check_tools, AudioCodec, AudioTarget, Ffmpeg, YtDlp, YtDlpConfig};
use tubefetch_shared::config::AppConfig;
use tubefetch_shared::link_detector::detect_link;
use tubefetch_shared::models::{DownloadFormat, DownloadProgress, PlaylistPreview, ProgressStatus, VideoInfo};

#[derive(Parser)]
#[command(name = "tubefetch", version, about = "Download videos and audio with yt-dlp")]
struct Cli {
    /// Download directory (defaults to DOWNLOAD_DIR or <tmp>/youtube_downloads)
    #[arg(long, global = true, env = "DOWNLOAD_DIR")]
    dir: Option<PathBuf>,

    /// yt-dlp executable
    #[arg(long, global = true, env = "YTDLP_BIN")]
    ytdlp: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a video
    Info { url: String },
    /// List the videos of a playlist or channel
    Playlist { url: String },
    /// Download a video or its audio
    Download {
        url: String,
        /// mp4-best, mp4-720p, mp4-480p, mp3 or audio
        #[arg(short, long, default_value = "mp4-best")]
        format: DownloadFormat,
        /// Output file name inside the download directory
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Check whether yt-dlp can handle a URL
    Validate { url: String },
    /// List the sites yt-dlp supports
    Sites,
    /// Convert a media file to audio with ffmpeg
    Convert {
        file: PathBuf,
        #[arg(long, default_value = "mp3")]
        codec: AudioCodec,
        #[arg(long, default_value_t = 192)]
        bitrate: u32,
    },
    /// Check the installed yt-dlp and ffmpeg
    Check,
}

fn print_video(video: &VideoInfo) {
    println!("{}", video.title);
    println!("  uploader: {}", video.uploader);
    if let Some(duration) = video.duration_label() {
        println!("  duration: {}", duration);
    }
    if let Some(views) = video.views_label() {
        println!("  views:    {}", views);
    }
    if !video.upload_date.is_empty() {
        println!("  uploaded: {}", video.upload_date);
    }
    println!("  url:      {}", video.url);
    if !video.formats.is_empty() {
        println!("  formats:  {}", video.formats.len());
    }
    let description = video.description_preview();
    if !description.is_empty() {
        println!();
        println!("{}", description);
    }
}

fn print_progress(progress: DownloadProgress) {
    let mut err = std::io::stderr();
    match progress.status {
        ProgressStatus::Downloading => {
            let _ = write!(
                err,
                "\r{:>5.1}%  {:>12}  ETA {:>8}",
                progress.percentage,
                progress.speed.as_deref().unwrap_or("-"),
                progress.eta.as_deref().unwrap_or("-"),
            );
        }
        ProgressStatus::Finished => {
            let _ = writeln!(err, "\r100.0%  done{:30}", "");
        }
        ProgressStatus::Error => {
            let _ = writeln!(
                err,
                "\rerror: {}",
                progress.error_message.as_deref().unwrap_or("Unknown error")
            );
        }
    }
    let _ = err.flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,tubefetch=info,tubefetch_downloader=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(dir) = cli.dir {
        config.download_dir = dir;
    }
    if let Some(bin) = cli.ytdlp {
        config.ytdlp_bin = bin;
    }

    let mut client = YtDlp::new(YtDlpConfig::from(&config))
        .with_context(|| format!("cannot use download directory {}", config.download_dir.display()))?;

    match cli.command {
        Commands::Info { url } => {
            let video = client.get_video_info(&url).await?;
            print_video(&video);
        }
        Commands::Playlist { url } => {
            let videos = client.get_playlist_info(&url).await?;
            let preview = PlaylistPreview::from_videos(videos);
            println!("Playlist ({} videos)", preview.count);
            for (i, video) in preview.videos.iter().enumerate() {
                let duration = video.duration_label().unwrap_or_default();
                println!("{:>3}. {}  {}  {}", i + 1, video.title, video.uploader, duration);
            }
            if preview.remaining > 0 {
                println!("... and {} more videos", preview.remaining);
            }
        }
        Commands::Download { url, format, output } => {
            if let Some(link) = detect_link(&url) {
                info!("Link type: {}", link.kind());
            }
            client.set_progress_callback(print_progress);
            let path = client.download_video(&url, format, output.as_deref()).await?;
            println!("{}", path.display());
        }
        Commands::Validate { url } => {
            if client.validate_url(&url).await {
                println!("valid");
            } else {
                println!("invalid");
                std::process::exit(1);
            }
        }
        Commands::Sites => {
            for site in client.get_supported_sites().await? {
                println!("{}", site);
            }
        }
        Commands::Convert { file, codec, bitrate } => {
            let ffmpeg = Ffmpeg::locate(config.ffmpeg_path.as_deref())
                .context("ffmpeg not found; set FFMPEG_PATH")?;
            let target = AudioTarget { codec, bitrate_kbps: bitrate };
            let output = ffmpeg.convert_audio(&file, &target).await?;
            println!("{}", output.display());
        }
        Commands::Check => {
            let report = check_tools(&client).await;
            println!(
                "yt-dlp: {} (minimum {})",
                report.ytdlp_version.as_deref().unwrap_or("not found"),
                tubefetch_downloader::MIN_YTDLP_VERSION
            );
            match (&report.ffmpeg_path, &report.ffmpeg_version) {
                (Some(path), version) => println!(
                    "ffmpeg: {} ({})",
                    path.display(),
                    version.as_deref().unwrap_or("unknown version")
                ),
                (None, _) => println!("ffmpeg: not found"),
            }
            if !report.ytdlp_supported || report.ffmpeg_path.is_none() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
