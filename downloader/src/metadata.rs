/// Mapping of yt-dlp `-J` output onto `VideoInfo`.
use serde_json::Value;

use tubefetch_shared::errors::ExtractError;
use tubefetch_shared::models::{FormatSummary, VideoInfo};

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

fn text(info: &Value, key: &str, default: &str) -> String {
    info.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn count(info: &Value, key: &str) -> u64 {
    match info.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .unwrap_or(0),
        _ => 0,
    }
}

/// The document describing a single video: the document itself, or the
/// first entry of a listing.
pub fn first_video(info: &Value) -> Result<&Value, ExtractError> {
    match info.get("entries") {
        None => Ok(info),
        Some(entries) => entries
            .as_array()
            .and_then(|list| list.iter().find(|e| !e.is_null()))
            .ok_or(ExtractError::NoEntries),
    }
}

fn format_summary(format: &Value) -> FormatSummary {
    FormatSummary {
        format_id: text(format, "format_id", ""),
        ext: text(format, "ext", ""),
        quality: format.get("quality").and_then(Value::as_f64),
        filesize: count(format, "filesize"),
        format_note: text(format, "format_note", ""),
    }
}

/// Full video metadata from a non-flat extraction.
pub fn video_info(info: &Value, url: &str) -> VideoInfo {
    VideoInfo {
        id: text(info, "id", ""),
        title: text(info, "title", "Unknown Title"),
        description: text(info, "description", ""),
        duration: count(info, "duration"),
        uploader: text(info, "uploader", "Unknown"),
        upload_date: text(info, "upload_date", ""),
        view_count: count(info, "view_count"),
        thumbnail: text(info, "thumbnail", ""),
        formats: info
            .get("formats")
            .and_then(Value::as_array)
            .map(|formats| formats.iter().map(format_summary).collect())
            .unwrap_or_default(),
        url: url.to_string(),
    }
}

/// Basic metadata for one entry of a flat listing.
pub fn flat_entry(entry: &Value) -> VideoInfo {
    let id = text(entry, "id", "");
    let url = if id.is_empty() {
        text(entry, "url", "")
    } else {
        format!("{}{}", WATCH_URL_PREFIX, id)
    };
    let thumbnail = match entry.get("thumbnail").and_then(Value::as_str) {
        Some(t) => t.to_string(),
        // Flat entries usually carry a thumbnails list instead
        None => entry
            .get("thumbnails")
            .and_then(Value::as_array)
            .and_then(|list| list.last())
            .map(|t| text(t, "url", ""))
            .unwrap_or_default(),
    };

    VideoInfo {
        id,
        title: text(entry, "title", "Unknown Title"),
        description: String::new(),
        duration: count(entry, "duration"),
        uploader: text(entry, "uploader", "Unknown"),
        upload_date: String::new(),
        view_count: 0,
        thumbnail,
        formats: Vec::new(),
        url,
    }
}

/// Entries of a flat listing, skipping nulls. `None` if not a listing.
pub fn flat_entries(info: &Value) -> Option<Vec<VideoInfo>> {
    let entries = info.get("entries")?;
    Some(
        entries
            .as_array()
            .map(|list| list.iter().filter(|e| !e.is_null()).map(flat_entry).collect())
            .unwrap_or_default(),
    )
}

/// Keep alphanumerics, spaces, `-` and `_`, then trim.
pub fn clean_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string()
}
