/// Translation of yt-dlp's progress output into `DownloadProgress`.
///
/// yt-dlp is asked to print each progress record as JSON behind a marker
/// (`--progress-template`) and the final file path behind another marker
/// (`--print after_move:`), so both can be picked out of its stdout.
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use tubefetch_shared::models::{DownloadProgress, ProgressStatus};

/// Prefix of progress lines on stdout.
pub const PROGRESS_MARKER: &str = "tubefetch-progress:";
/// Prefix of final file path lines on stdout.
pub const FILE_MARKER: &str = "tubefetch-file:";

/// `--progress-template` argument.
pub fn progress_template() -> String {
    format!("download:{}%(progress)j", PROGRESS_MARKER)
}

/// `--print` argument reporting the post-processed file path.
pub fn file_print_template() -> String {
    format!("after_move:{}%(filepath)s", FILE_MARKER)
}

/// A recognised line of yt-dlp download output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress(DownloadProgress),
    File(String),
    Other,
}

/// Classify one stdout line.
pub fn parse_line(line: &str) -> OutputLine {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix(PROGRESS_MARKER) {
        return match serde_json::from_str::<Value>(rest) {
            Ok(record) => progress_from_record(&record)
                .map(OutputLine::Progress)
                .unwrap_or(OutputLine::Other),
            Err(_) => OutputLine::Other,
        };
    }
    if let Some(path) = line.strip_prefix(FILE_MARKER) {
        let path = path.trim();
        if !path.is_empty() && path != "NA" {
            return OutputLine::File(path.to_string());
        }
    }
    OutputLine::Other
}

static ANSI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

fn strip_ansi(s: &str) -> String {
    ANSI_RE.replace_all(s, "").trim().to_string()
}

fn str_field(record: &Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(strip_ansi)
        .filter(|s| !s.is_empty())
}

fn num_field(record: &Value, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64)
}

/// Build a progress snapshot from a yt-dlp progress record.
///
/// Returns `None` for statuses other than downloading/finished/error.
pub fn progress_from_record(record: &Value) -> Option<DownloadProgress> {
    let status = match record.get("status").and_then(Value::as_str)? {
        "downloading" => ProgressStatus::Downloading,
        "finished" => ProgressStatus::Finished,
        "error" => ProgressStatus::Error,
        _ => return None,
    };
    let mut progress = DownloadProgress::new(status);

    match status {
        ProgressStatus::Downloading => {
            let downloaded = num_field(record, "downloaded_bytes");
            let total = num_field(record, "total_bytes")
                .filter(|t| *t > 0.0)
                .or_else(|| num_field(record, "total_bytes_estimate").filter(|t| *t > 0.0));

            progress.percentage = match (downloaded, total) {
                (Some(done), Some(total)) => done / total * 100.0,
                _ => str_field(record, "_percent_str")
                    .and_then(|s| s.trim_end_matches('%').trim().parse::<f64>().ok())
                    .unwrap_or(0.0),
            };
            progress.percentage = progress.percentage.clamp(0.0, 100.0);
            progress.speed = str_field(record, "_speed_str");
            progress.eta = str_field(record, "_eta_str");
            progress.filename = str_field(record, "filename");
        }
        ProgressStatus::Finished => {
            progress.percentage = 100.0;
            progress.filename = str_field(record, "filename");
        }
        ProgressStatus::Error => {
            progress.error_message =
                Some(str_field(record, "error").unwrap_or_else(|| "Unknown error".to_string()));
        }
    }

    Some(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bytes_take_precedence() {
        let p = progress_from_record(&json!({
            "status": "downloading",
            "downloaded_bytes": 250,
            "total_bytes": 1000,
            "_percent_str": " 99.0%",
            "_speed_str": "1.00MiB/s",
            "_eta_str": "00:03",
            "filename": "/tmp/a.mp4",
        }))
        .unwrap();
        assert_eq!(p.status, ProgressStatus::Downloading);
        assert_eq!(p.percentage, 25.0);
        assert_eq!(p.speed.as_deref(), Some("1.00MiB/s"));
        assert_eq!(p.eta.as_deref(), Some("00:03"));
        assert_eq!(p.filename.as_deref(), Some("/tmp/a.mp4"));
    }

    #[test]
    fn test_estimate_used_without_total() {
        let p = progress_from_record(&json!({
            "status": "downloading",
            "downloaded_bytes": 50,
            "total_bytes": null,
            "total_bytes_estimate": 200.0,
        }))
        .unwrap();
        assert_eq!(p.percentage, 25.0);
    }

    #[test]
    fn test_percent_string_fallback_with_colors() {
        let p = progress_from_record(&json!({
            "status": "downloading",
            "total_bytes": 0,
            "_percent_str": "\u{1b}[0;94m 50.0%\u{1b}[0m",
        }))
        .unwrap();
        assert_eq!(p.percentage, 50.0);

        let p = progress_from_record(&json!({"status": "downloading", "_percent_str": "N/A"})).unwrap();
        assert_eq!(p.percentage, 0.0);
    }

    #[test]
    fn test_finished_and_error() {
        let p = progress_from_record(&json!({"status": "finished", "filename": "x.m4a"})).unwrap();
        assert_eq!(p.percentage, 100.0);
        assert_eq!(p.filename.as_deref(), Some("x.m4a"));

        let p = progress_from_record(&json!({"status": "error"})).unwrap();
        assert_eq!(p.error_message.as_deref(), Some("Unknown error"));

        assert!(progress_from_record(&json!({"status": "processing"})).is_none());
    }

    #[test]
    fn test_parse_lines() {
        let line = format!("{}{}", PROGRESS_MARKER, r#"{"status":"downloading","downloaded_bytes":1,"total_bytes":4}"#);
        match parse_line(&line) {
            OutputLine::Progress(p) => assert_eq!(p.percentage, 25.0),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(
            parse_line("tubefetch-file:/tmp/My Video.mp4"),
            OutputLine::File("/tmp/My Video.mp4".to_string())
        );
        assert_eq!(parse_line("tubefetch-file:NA"), OutputLine::Other);
        assert_eq!(parse_line("[youtube] Extracting URL"), OutputLine::Other);
        assert_eq!(parse_line("tubefetch-progress:{not json"), OutputLine::Other);
    }

    #[test]
    fn test_templates() {
        assert_eq!(progress_template(), "download:tubefetch-progress:%(progress)j");
        assert_eq!(file_print_template(), "after_move:tubefetch-file:%(filepath)s");
    }
}
