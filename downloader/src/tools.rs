/// Discovery and version checks for the external tools (yt-dlp, ffmpeg).
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Oldest yt-dlp release known to work.
pub const MIN_YTDLP_VERSION: &str = "2023.10.13";

fn ffmpeg_file_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    }
}

/// Resolve an explicit ffmpeg location, which may name the binary or its directory.
fn resolve_explicit(path: &Path) -> Option<PathBuf> {
    if path.is_dir() {
        let bin = path.join(ffmpeg_file_name());
        return bin.exists().then_some(bin);
    }
    path.exists().then(|| path.to_path_buf())
}

/// Find the ffmpeg binary.
///
/// Checks the explicit location, then `FFMPEG_PATH`, then common install
/// locations, then `PATH`.
pub fn locate_ffmpeg(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(found) = explicit.and_then(resolve_explicit) {
        return Some(found);
    }

    if let Ok(env_path) = std::env::var("FFMPEG_PATH") {
        if let Some(found) = resolve_explicit(Path::new(&env_path)) {
            return Some(found);
        }
        warn!("FFMPEG_PATH={} does not contain ffmpeg", env_path);
    }

    // Auto-discover common locations on Windows
    if cfg!(target_os = "windows") {
        if let Ok(local_app) = std::env::var("LOCALAPPDATA") {
            // winget installs ffmpeg here
            let winget_dir = PathBuf::from(&local_app)
                .join("Microsoft")
                .join("WinGet")
                .join("Packages");
            if let Ok(entries) = std::fs::read_dir(&winget_dir) {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if !name.starts_with("Gyan.FFmpeg") {
                        continue;
                    }
                    if let Ok(sub_entries) = std::fs::read_dir(entry.path()) {
                        for sub in sub_entries.flatten() {
                            let bin = sub.path().join("bin").join("ffmpeg.exe");
                            if bin.exists() {
                                return Some(bin);
                            }
                        }
                    }
                }
            }
        }

        for dir in [r"C:\ffmpeg\bin", r"C:\Program Files\ffmpeg\bin"] {
            let bin = PathBuf::from(dir).join("ffmpeg.exe");
            if bin.exists() {
                return Some(bin);
            }
        }
    }

    if cfg!(target_os = "linux") || cfg!(target_os = "macos") {
        for dir in [
            "/usr/bin",
            "/usr/local/bin",
            "/snap/bin",
            "/opt/homebrew/bin",
            "/home/linuxbrew/.linuxbrew/bin",
        ] {
            let bin = PathBuf::from(dir).join("ffmpeg");
            if bin.exists() {
                return Some(bin);
            }
        }
    }

    find_on_path(ffmpeg_file_name())
}

/// Search the `PATH` directories for an executable.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Parse a date-style version ("2023.10.13", "2024.08.06.232925").
pub fn parse_version(version: &str) -> Option<Vec<u64>> {
    let parts: Result<Vec<u64>, _> = version
        .trim()
        .split('.')
        .map(|p| p.parse::<u64>())
        .collect();
    parts.ok().filter(|p| !p.is_empty())
}

/// Whether `found` is at least `minimum`, comparing numerically by component.
pub fn version_at_least(found: &str, minimum: &str) -> bool {
    match (parse_version(found), parse_version(minimum)) {
        (Some(found), Some(minimum)) => found >= minimum,
        _ => false,
    }
}

/// Result of checking the installed yt-dlp.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolReport {
    pub ytdlp_version: Option<String>,
    pub ytdlp_supported: bool,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffmpeg_version: Option<String>,
}

impl ToolReport {
    /// Log the report at startup.
    pub fn log(&self) {
        match &self.ytdlp_version {
            Some(v) if self.ytdlp_supported => info!("yt-dlp {} found", v),
            Some(v) => warn!("yt-dlp {} is older than {}; downloads may fail", v, MIN_YTDLP_VERSION),
            None => warn!("yt-dlp not found; info and downloads will fail"),
        }
        match (&self.ffmpeg_path, &self.ffmpeg_version) {
            (Some(p), Some(v)) => info!("ffmpeg found at {} ({})", p.display(), v),
            (Some(p), None) => warn!("ffmpeg at {} did not report a version", p.display()),
            (None, _) => warn!("ffmpeg not found; audio extraction will fail"),
        }
        debug!("Tool report: {:?}", self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("2023.10.13"), Some(vec![2023, 10, 13]));
        assert_eq!(parse_version(" 2024.08.06.232925\n"), Some(vec![2024, 8, 6, 232925]));
        assert_eq!(parse_version("nightly"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_version_at_least() {
        assert!(version_at_least("2023.10.13", MIN_YTDLP_VERSION));
        assert!(version_at_least("2023.11.16", MIN_YTDLP_VERSION));
        assert!(version_at_least("2024.1.1", MIN_YTDLP_VERSION));
        assert!(version_at_least("2023.10.13.1", MIN_YTDLP_VERSION));
        assert!(!version_at_least("2023.09.24", MIN_YTDLP_VERSION));
        assert!(!version_at_least("garbage", MIN_YTDLP_VERSION));
    }

    #[test]
    fn test_explicit_location() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join(ffmpeg_file_name());
        std::fs::write(&bin, b"").unwrap();

        assert_eq!(locate_ffmpeg(Some(dir.path())), Some(bin.clone()));
        assert_eq!(locate_ffmpeg(Some(&bin)), Some(bin));
    }

    #[test]
    fn test_find_on_path_missing() {
        assert!(find_on_path("definitely-not-a-real-binary-xyz").is_none());
    }
}
