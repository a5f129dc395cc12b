/// Child process runner for yt-dlp and ffmpeg.
///
/// Stdout is delivered line by line to a handler as it arrives.
/// Stderr is collected for error classification and forwarded to tracing.
use std::future::pending;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tubefetch_shared::errors::{ExtractError, FetchError, FetchResult, ProcessError};

/// Stderr excerpt kept in `ProcessError::Exited`.
const STDERR_TAIL_CHARS: usize = 2000;

/// Limits applied to a single process run.
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl RunLimits {
    pub fn timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout), cancel: None }
    }

    pub fn cancellable(cancel: Option<CancellationToken>) -> Self {
        Self { timeout: None, cancel }
    }
}

/// Run `cmd`, feeding every stdout line to `on_line`.
///
/// On success returns the collected stderr. A non-zero exit becomes an
/// `ExtractError` when stderr carries a yt-dlp `ERROR:` line, otherwise
/// `ProcessError::Exited`. The child is killed on timeout or cancellation.
pub async fn run_streaming<F>(
    mut cmd: Command,
    program: &str,
    limits: RunLimits,
    mut on_line: F,
) -> FetchResult<String>
where
    F: FnMut(&str),
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProcessError::NotFound(program.to_string())
        } else {
            ProcessError::SpawnFailed(format!("{}: {}", program, e))
        }
    })?;
    debug!("Spawned {} (pid: {:?})", program, child.id());

    let stdout = child.stdout.take()
        .ok_or_else(|| ProcessError::ReadFailed("No stdout handle".into()))?;
    let stderr = child.stderr.take()
        .ok_or_else(|| ProcessError::ReadFailed("No stderr handle".into()))?;

    // Stderr reader task - collect and forward to tracing
    let stderr_handle = tokio::spawn(async move {
        let mut collected = String::new();
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "ytdlp", "{}", line);
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    });

    let run = async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ProcessError::ReadFailed(e.to_string()))?
        {
            let line = line.trim_end();
            if !line.is_empty() {
                on_line(line);
            }
        }
        let status = child.wait().await?;
        Ok::<_, FetchError>(status)
    };

    let timeout = limits.timeout;
    let expired = async move {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => pending::<()>().await,
        }
    };
    let cancel = limits.cancel.clone();
    let cancelled = async move {
        match cancel {
            Some(token) => token.cancelled().await,
            None => pending::<()>().await,
        }
    };

    // Losing branches drop `run`, which drops the child and kills it.
    let status = tokio::select! {
        status = run => status?,
        _ = expired => {
            return Err(ProcessError::Timeout(timeout.map(|t| t.as_secs()).unwrap_or_default()).into());
        }
        _ = cancelled => {
            debug!("{} cancelled", program);
            return Err(ProcessError::Cancelled.into());
        }
    };

    let stderr = stderr_handle.await.unwrap_or_default();
    if status.success() {
        return Ok(stderr);
    }

    if let Some(extract) = ExtractError::from_stderr(&stderr) {
        return Err(extract.into());
    }
    Err(ProcessError::Exited {
        code: status.code().unwrap_or(-1),
        stderr: tail(&stderr, STDERR_TAIL_CHARS),
    }
    .into())
}

/// Run `cmd` and return its whole stdout.
pub async fn run_capture(cmd: Command, program: &str, limits: RunLimits) -> FetchResult<String> {
    let mut stdout = String::new();
    run_streaming(cmd, program, limits, |line| {
        stdout.push_str(line);
        stdout.push('\n');
    })
    .await?;
    Ok(stdout)
}

fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(count - max_chars).collect()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_streams_lines_in_order() {
        let mut seen = Vec::new();
        run_streaming(sh("echo one; echo; echo two"), "sh", RunLimits::default(), |l| {
            seen.push(l.to_string())
        })
        .await
        .unwrap();
        assert_eq!(seen, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_capture_returns_stdout_only() {
        let out = run_capture(sh("echo hello; echo noise >&2"), "sh", RunLimits::default())
            .await
            .unwrap();
        assert_eq!(out, "hello\n");
    }

    #[tokio::test]
    async fn test_exit_with_ytdlp_error_is_classified() {
        let err = run_capture(
            sh("echo 'ERROR: Unsupported URL: https://example.com' >&2; exit 1"),
            "sh",
            RunLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Extract(ExtractError::UnsupportedUrl(_))));
    }

    #[tokio::test]
    async fn test_plain_exit_code() {
        let err = run_capture(sh("echo bad >&2; exit 3"), "sh", RunLimits::default())
            .await
            .unwrap_err();
        match err {
            FetchError::Process(ProcessError::Exited { code, stderr }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "bad");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let err = run_capture(sh("sleep 5"), "sh", RunLimits::timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Process(ProcessError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = run_capture(sh("sleep 5"), "sh", RunLimits::cancellable(Some(token)))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = run_capture(
            Command::new("definitely-not-a-real-binary-xyz"),
            "definitely-not-a-real-binary-xyz",
            RunLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Process(ProcessError::NotFound(_))));
    }
}
