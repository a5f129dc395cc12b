/// Environment-driven configuration shared by the API server and the CLI.
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Runtime configuration for Tubefetch.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory downloads are written to.
    pub download_dir: PathBuf,
    /// yt-dlp executable (name on PATH or absolute path).
    pub ytdlp_bin: String,
    /// Explicit ffmpeg location (binary or directory).
    pub ffmpeg_path: Option<PathBuf>,
    /// SQLite job history file.
    pub database_path: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    /// Maximum downloads running at once.
    pub max_concurrent_downloads: usize,
    /// Timeout for metadata extraction calls.
    pub info_timeout_secs: u64,
    /// How long finished jobs stay in the in-memory queue.
    pub job_retention_secs: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_path: None,
            database_path: PathBuf::from("./tubefetch.db"),
            api_host: "0.0.0.0".to_string(),
            api_port: 8501,
            max_concurrent_downloads: 2,
            info_timeout_secs: 60,
            job_retention_secs: 3600,
        }
    }
}

/// `<tmp>/youtube_downloads`
pub fn default_download_dir() -> PathBuf {
    std::env::temp_dir().join("youtube_downloads")
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            download_dir: non_empty("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            ytdlp_bin: non_empty("YTDLP_BIN").unwrap_or(defaults.ytdlp_bin),
            ffmpeg_path: non_empty("FFMPEG_PATH").map(PathBuf::from),
            database_path: non_empty("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            api_host: non_empty("API_HOST").unwrap_or(defaults.api_host),
            api_port: parse_or("API_PORT", non_empty("API_PORT"), defaults.api_port),
            max_concurrent_downloads: parse_or(
                "MAX_CONCURRENT_DOWNLOADS",
                non_empty("MAX_CONCURRENT_DOWNLOADS"),
                defaults.max_concurrent_downloads,
            )
            .max(1),
            info_timeout_secs: parse_or(
                "INFO_TIMEOUT_SECS",
                non_empty("INFO_TIMEOUT_SECS"),
                defaults.info_timeout_secs,
            ),
            job_retention_secs: parse_or(
                "JOB_RETENTION_SECS",
                non_empty("JOB_RETENTION_SECS"),
                defaults.job_retention_secs,
            ),
        }
    }

    /// SQLite connection URL for `database_path`.
    pub fn database_url(&self) -> String {
        let path = self
            .database_path
            .canonicalize()
            .unwrap_or_else(|_| self.database_path.clone());
        // Strip Windows UNC prefix (\\?\) which breaks SQLite URL parsing
        let path = path.display().to_string();
        let path = path.strip_prefix(r"\\?\").unwrap_or(&path).to_string();
        format!("sqlite://{}?mode=rwc", path)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid value for {}: {:?}, using default", key, v);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(config.ytdlp_bin, "yt-dlp");
        assert_eq!(config.api_port, 8501);
        assert_eq!(config.max_concurrent_downloads, 2);
        assert!(config.download_dir.ends_with("youtube_downloads"));
        assert!(config.ffmpeg_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DOWNLOAD_DIR", "/data/videos"),
            ("API_PORT", "9000"),
            ("FFMPEG_PATH", "/opt/ffmpeg/bin"),
            ("MAX_CONCURRENT_DOWNLOADS", "4"),
        ]));
        assert_eq!(config.download_dir, PathBuf::from("/data/videos"));
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg/bin")));
        assert_eq!(config.max_concurrent_downloads, 4);
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = AppConfig::from_lookup(lookup(&[
            ("API_PORT", "not-a-port"),
            ("MAX_CONCURRENT_DOWNLOADS", "0"),
            ("DOWNLOAD_DIR", "  "),
        ]));
        assert_eq!(config.api_port, 8501);
        assert_eq!(config.max_concurrent_downloads, 1);
        assert!(config.download_dir.ends_with("youtube_downloads"));
    }

    #[test]
    fn test_database_url() {
        let config = AppConfig {
            database_path: PathBuf::from("/nonexistent/dir/jobs.db"),
            ..AppConfig::default()
        };
        assert_eq!(config.database_url(), "sqlite:///nonexistent/dir/jobs.db?mode=rwc");
    }
}
