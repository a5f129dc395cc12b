/// Audio conversion through the ffmpeg executable.
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

use tubefetch_shared::errors::{FetchError, FetchResult, ProcessError};

use crate::process::{run_capture, run_streaming, RunLimits};
use crate::tools;

/// Target audio codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Mp3,
    Aac,
    Opus,
    Flac,
    Wav,
}

impl AudioCodec {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Aac => "m4a",
            AudioCodec::Opus => "opus",
            AudioCodec::Flac => "flac",
            AudioCodec::Wav => "wav",
        }
    }

    fn encoder(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "libmp3lame",
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "libopus",
            AudioCodec::Flac => "flac",
            AudioCodec::Wav => "pcm_s16le",
        }
    }

    /// Lossless codecs ignore the bitrate.
    pub fn is_lossless(&self) -> bool {
        matches!(self, AudioCodec::Flac | AudioCodec::Wav)
    }
}

impl std::str::FromStr for AudioCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(AudioCodec::Mp3),
            "aac" | "m4a" => Ok(AudioCodec::Aac),
            "opus" => Ok(AudioCodec::Opus),
            "flac" => Ok(AudioCodec::Flac),
            "wav" => Ok(AudioCodec::Wav),
            other => Err(format!("unsupported audio codec: {}", other)),
        }
    }
}

/// Conversion target.
#[derive(Debug, Clone, Copy)]
pub struct AudioTarget {
    pub codec: AudioCodec,
    pub bitrate_kbps: u32,
}

impl Default for AudioTarget {
    fn default() -> Self {
        Self { codec: AudioCodec::Mp3, bitrate_kbps: 192 }
    }
}

/// Output path: the input's path with the codec's extension.
pub fn output_path_for(input: &Path, codec: AudioCodec) -> PathBuf {
    input.with_extension(codec.extension())
}

/// Arguments passed to ffmpeg for a conversion.
fn conversion_args(input: &Path, output: &Path, target: &AudioTarget) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-vn".to_string(),
        "-c:a".to_string(),
        target.codec.encoder().to_string(),
    ];
    if !target.codec.is_lossless() {
        args.push("-b:a".to_string());
        args.push(format!("{}k", target.bitrate_kbps));
    }
    args.push(output.display().to_string());
    args
}

/// Handle on an ffmpeg binary.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
}

impl Ffmpeg {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// Locate ffmpeg (see `tools::locate_ffmpeg`).
    pub fn locate(explicit: Option<&Path>) -> Option<Self> {
        tools::locate_ffmpeg(explicit).map(Self::new)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn program(&self) -> String {
        self.binary.display().to_string()
    }

    /// First line of `ffmpeg -version`, or `None` if it cannot run.
    pub async fn probe(&self) -> Option<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-version");
        let stdout = run_capture(cmd, &self.program(), RunLimits::timeout(Duration::from_secs(10)))
            .await
            .ok()?;
        stdout.lines().next().map(|l| l.trim().to_string())
    }

    /// Convert `input` to audio next to it and return the output path.
    pub async fn convert_audio(&self, input: &Path, target: &AudioTarget) -> FetchResult<PathBuf> {
        if !input.is_file() {
            return Err(FetchError::context(
                "Audio conversion failed",
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", input.display()),
                ),
            ));
        }
        let output = output_path_for(input, target.codec);
        if output == input {
            return Err(FetchError::Config(format!(
                "{} is already {}; conversion would overwrite it",
                input.display(),
                target.codec.extension()
            )));
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(conversion_args(input, &output, target));

        info!("Converting {} -> {}", input.display(), output.display());
        run_streaming(cmd, &self.program(), RunLimits::default(), |_| {})
            .await
            .map_err(|e| FetchError::context("Audio conversion failed", e))?;

        if !output.is_file() {
            return Err(FetchError::context(
                "Audio conversion failed",
                ProcessError::ReadFailed(format!("ffmpeg produced no {}", output.display())),
            ));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_args() {
        let args = conversion_args(
            Path::new("/v/a.m4a"),
            Path::new("/v/a.mp3"),
            &AudioTarget::default(),
        );
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-loglevel", "error", "-y", "-i", "/v/a.m4a", "-vn",
                "-c:a", "libmp3lame", "-b:a", "192k", "/v/a.mp3",
            ]
        );

        let flac = conversion_args(
            Path::new("/v/a.m4a"),
            Path::new("/v/a.flac"),
            &AudioTarget { codec: AudioCodec::Flac, bitrate_kbps: 320 },
        );
        assert!(!flac.iter().any(|a| a == "-b:a"));
    }

    #[test]
    fn test_output_path_and_codec_parse() {
        assert_eq!(output_path_for(Path::new("/v/song.webm"), AudioCodec::Mp3), PathBuf::from("/v/song.mp3"));
        assert_eq!("M4A".parse::<AudioCodec>().unwrap(), AudioCodec::Aac);
        assert!("ogg-vorbis".parse::<AudioCodec>().is_err());
    }

    #[tokio::test]
    async fn test_missing_input() {
        let ffmpeg = Ffmpeg::new("ffmpeg");
        let err = ffmpeg
            .convert_audio(Path::new("/definitely/missing.m4a"), &AudioTarget::default())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Audio conversion failed"));
    }

    #[tokio::test]
    async fn test_refuses_to_overwrite_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("song.mp3");
        std::fs::write(&input, b"id3").unwrap();
        let err = Ffmpeg::new("ffmpeg")
            .convert_audio(&input, &AudioTarget::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Config(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_with_fake_ffmpeg() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-ffmpeg");
        // The output path is the last argument
        std::fs::write(&fake, "#!/bin/sh\nfor last; do :; done\necho converted > \"$last\"\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let input = dir.path().join("clip.m4a");
        std::fs::write(&input, b"audio").unwrap();

        let output = Ffmpeg::new(&fake)
            .convert_audio(&input, &AudioTarget::default())
            .await
            .unwrap();
        assert_eq!(output, dir.path().join("clip.mp3"));
        assert!(output.is_file());
    }
}
