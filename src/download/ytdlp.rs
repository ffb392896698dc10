use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

pub(super) fn not_found_or(e: std::io::Error, what: &str) -> anyhow::Error {
  if e.kind() == std::io::ErrorKind::NotFound {
    anyhow!("yt-dlp not found. Install it with: brew install yt-dlp (macOS) or pip install yt-dlp")
  } else {
    anyhow!(e).context(format!("Failed to execute yt-dlp {what}"))
  }
}

/// Run yt-dlp to completion and return its stdout.
pub(super) async fn capture(bin: &Path, args: &[&str], url: &str, what: &str) -> Result<String> {
  let output = Command::new(bin)
    .args(args)
    .args(["--no-playlist", "--no-warnings", "--", url])
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .output()
    .await
    .map_err(|e| not_found_or(e, what))?;

  if !output.status.success() {
    return Err(anyhow!("yt-dlp {what} failed: {}", String::from_utf8_lossy(&output.stderr).trim()));
  }
  String::from_utf8(output.stdout).with_context(|| format!("yt-dlp {what} printed invalid UTF-8"))
}

/// Percentage from a `--newline` progress line such as
/// `[download]  12.3% of 10.00MiB at 1.2MiB/s ETA 00:07`.
pub(super) fn parse_progress_line(line: &str) -> Option<f64> {
  let rest = line.trim_start().strip_prefix("[download]")?;
  let (before, _) = rest.split_once('%')?;
  before.split_whitespace().last()?.parse().ok()
}

/// Title and direct URL from `--print title --print url` output.
pub(super) fn parse_title_and_url(stdout: &str) -> Option<(String, String)> {
  let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
  let title = lines.next()?.to_string();
  let url = lines.next().filter(|u| u.starts_with("http"))?.to_string();
  Some((title, url))
}
