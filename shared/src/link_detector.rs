/// URL classification for incoming download requests.
///
/// Decides whether a URL points at a single video or at a listing
/// (playlist/channel) so the right extraction mode is used.
use once_cell::sync::Lazy;
use regex::Regex;

/// Detected link type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedLink {
    /// Single YouTube video.
    YoutubeVideo { url: String, video_id: String },
    /// YouTube playlist.
    YoutubePlaylist { url: String, playlist_id: String },
    /// YouTube channel (`/@handle`, `/channel/<id>`, `/c/<name>`, `/user/<name>`).
    YoutubeChannel { url: String, channel: String },
    /// YouTube short.
    YoutubeShort { url: String, video_id: String },
    /// YouTube Music link.
    YoutubeMusic { url: String, video_id: String },
    /// Any other http(s) URL; yt-dlp may still support it.
    Other { url: String },
}

impl DetectedLink {
    /// Get the URL regardless of type.
    pub fn url(&self) -> &str {
        match self {
            DetectedLink::YoutubeVideo { url, .. } => url,
            DetectedLink::YoutubePlaylist { url, .. } => url,
            DetectedLink::YoutubeChannel { url, .. } => url,
            DetectedLink::YoutubeShort { url, .. } => url,
            DetectedLink::YoutubeMusic { url, .. } => url,
            DetectedLink::Other { url } => url,
        }
    }

    /// Whether this resolves to multiple videos.
    ///
    /// Non-YouTube URLs fall back to a substring check on the URL.
    pub fn is_listing(&self) -> bool {
        match self {
            DetectedLink::YoutubePlaylist { .. } | DetectedLink::YoutubeChannel { .. } => true,
            DetectedLink::Other { url } => {
                let lower = url.to_lowercase();
                lower.contains("playlist") || lower.contains("channel")
            }
            _ => false,
        }
    }

    /// Whether this is a YouTube link.
    pub fn is_youtube(&self) -> bool {
        !matches!(self, DetectedLink::Other { .. })
    }

    /// Short name for logs and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            DetectedLink::YoutubeVideo { .. } => "video",
            DetectedLink::YoutubePlaylist { .. } => "playlist",
            DetectedLink::YoutubeChannel { .. } => "channel",
            DetectedLink::YoutubeShort { .. } => "short",
            DetectedLink::YoutubeMusic { .. } => "music",
            DetectedLink::Other { .. } => "other",
        }
    }
}

// ====== REGEX PATTERNS ======

static YOUTUBE_VIDEO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/watch\?(?:.*&)?v=|youtu\.be/)([a-zA-Z0-9_-]{11})"
    ).unwrap()
});

static YOUTUBE_PLAYLIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.|music\.)?youtube\.com/playlist\?(?:.*&)?list=([a-zA-Z0-9_-]+)"
    ).unwrap()
});

static YOUTUBE_CHANNEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.)?youtube\.com/(@[\w.-]+|channel/[\w-]+|c/[\w.-]+|user/[\w.-]+)"
    ).unwrap()
});

static YOUTUBE_SHORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.)?youtube\.com/shorts/([a-zA-Z0-9_-]{11})"
    ).unwrap()
});

static YOUTUBE_MUSIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://)?music\.youtube\.com/watch\?(?:.*&)?v=([a-zA-Z0-9_-]{11})"
    ).unwrap()
});

static GENERIC_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^https?://[^\s<>\[\](){},"']+$"#
    ).unwrap()
});

/// Classify a single URL. Returns `None` when the input is not a URL.
pub fn detect_link(input: &str) -> Option<DetectedLink> {
    let url = input.trim();
    if url.is_empty() {
        return None;
    }

    // Playlist first: watch URLs may carry a list= parameter too, but only
    // /playlist pages are treated as listings.
    if let Some(cap) = YOUTUBE_PLAYLIST_RE.captures(url) {
        return Some(DetectedLink::YoutubePlaylist {
            url: url.to_string(),
            playlist_id: cap[1].to_string(),
        });
    }

    if let Some(cap) = YOUTUBE_MUSIC_RE.captures(url) {
        return Some(DetectedLink::YoutubeMusic {
            url: url.to_string(),
            video_id: cap[1].to_string(),
        });
    }

    if let Some(cap) = YOUTUBE_SHORT_RE.captures(url) {
        return Some(DetectedLink::YoutubeShort {
            url: url.to_string(),
            video_id: cap[1].to_string(),
        });
    }

    if let Some(cap) = YOUTUBE_VIDEO_RE.captures(url) {
        return Some(DetectedLink::YoutubeVideo {
            url: url.to_string(),
            video_id: cap[1].to_string(),
        });
    }

    if let Some(cap) = YOUTUBE_CHANNEL_RE.captures(url) {
        return Some(DetectedLink::YoutubeChannel {
            url: url.to_string(),
            channel: cap[1].to_string(),
        });
    }

    if GENERIC_URL_RE.is_match(url) {
        return Some(DetectedLink::Other { url: url.to_string() });
    }

    None
}
