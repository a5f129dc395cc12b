/// Unified error types for Tubefetch.
use thiserror::Error;

/// Top-level error type for Tubefetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("{0}")]
    Extract(#[from] ExtractError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An operation-level failure, e.g. "Download failed: <cause>".
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// Wrap an error with an operation prefix.
    pub fn context(context: impl Into<String>, source: impl Into<FetchError>) -> Self {
        FetchError::Context {
            context: context.into(),
            source: Box::new(source.into()),
        }
    }

    /// The innermost error, skipping `Context` layers.
    pub fn root(&self) -> &FetchError {
        match self {
            FetchError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// The classified extractor error, if this chain ends in one.
    pub fn extract_error(&self) -> Option<&ExtractError> {
        match self.root() {
            FetchError::Extract(e) => Some(e),
            _ => None,
        }
    }

    /// Whether this chain ends in a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), FetchError::Process(ProcessError::Cancelled))
    }
}

/// Errors related to running the yt-dlp / ffmpeg executables.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn {0}")]
    SpawnFailed(String),

    #[error("Failed to read process output: {0}")]
    ReadFailed(String),

    #[error("Process timed out after {0}s")]
    Timeout(u64),

    #[error("Process exited with code {code}: {stderr}")]
    Exited { code: i32, stderr: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Process returned invalid JSON: {0}")]
    InvalidJson(String),
}

/// Errors reported by yt-dlp's extractors, classified from its `ERROR:` line.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("Video unavailable: {0}")]
    VideoUnavailable(String),

    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("No videos found in playlist/channel")]
    NoEntries,

    #[error("{0}")]
    Unknown(String),
}

impl ExtractError {
    /// Classify yt-dlp stderr output.
    ///
    /// Returns `None` when the output carries no `ERROR:` line.
    pub fn from_stderr(stderr: &str) -> Option<Self> {
        let line = stderr
            .lines()
            .rev()
            .find(|l| l.trim_start().starts_with("ERROR:"))?;
        let message = line
            .trim_start()
            .trim_start_matches("ERROR:")
            .trim()
            .to_string();
        let lower = message.to_lowercase();

        let err = if lower.contains("unsupported url") || lower.contains("is not a valid url") {
            ExtractError::UnsupportedUrl(message)
        } else if lower.contains("private video")
            || lower.contains("video unavailable")
            || lower.contains("has been removed")
            || lower.contains("not available in your country")
            || lower.contains("http error 404")
        {
            ExtractError::VideoUnavailable(message)
        } else if lower.contains("sign in") || lower.contains("login required") || lower.contains("cookies") {
            ExtractError::AuthRequired(message)
        } else if lower.contains("http error 429") || lower.contains("too many requests") {
            ExtractError::RateLimited(message)
        } else if lower.contains("timed out") || lower.contains("connection reset") || lower.contains("temporary failure") {
            ExtractError::NetworkTimeout(message)
        } else {
            ExtractError::Unknown(message)
        };
        Some(err)
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ExtractError::RateLimited(_) | ExtractError::NetworkTimeout(_))
    }
}

/// Result type alias for Tubefetch operations.
pub type FetchResult<T> = Result<T, FetchError>;
