use anyhow::{Context, Result, anyhow};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use super::strategy::{Resolved, Strategy};
use super::{Progress, ytdlp};
use crate::constants::constants;

#[derive(Deserialize)]
struct CliInfo {
  title: Option<String>,
}

/// Hands the whole job to yt-dlp, following its `--newline` progress output.
pub struct CliStrategy {
  yt_dlp: PathBuf,
}

impl CliStrategy {
  pub fn new(yt_dlp: PathBuf) -> Self {
    Self { yt_dlp }
  }
}

impl Strategy for CliStrategy {
  fn name(&self) -> &'static str {
    "cli"
  }

  fn resolve<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Resolved>> {
    Box::pin(async move {
      let stdout = ytdlp::capture(&self.yt_dlp, &["--skip-download", "--dump-json"], url, "metadata").await?;
      let info: CliInfo = serde_json::from_str(stdout.trim()).context("Failed to parse yt-dlp metadata")?;
      let title = info.title.filter(|t| !t.trim().is_empty()).ok_or_else(|| anyhow!("metadata has no title"))?;
      Ok(Resolved { title, sources: Vec::new(), total_bytes: None })
    })
  }

  fn download<'a>(
    &'a self,
    url: &'a str,
    _resolved: &'a Resolved,
    final_path: &'a Path,
    progress: &'a mut Progress,
  ) -> BoxFuture<'a, Result<PathBuf>> {
    Box::pin(async move {
      let mut child = Command::new(&self.yt_dlp)
        .args(["-f", constants().cli_format.as_str(), "--merge-output-format", "mp4", "--newline", "--output"])
        .arg(final_path)
        .args(["--no-playlist", "--no-warnings", "--", url])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ytdlp::not_found_or(e, "download"))?;

      let stdout = child.stdout.take().ok_or_else(|| anyhow!("yt-dlp stdout unavailable"))?;
      let mut lines = BufReader::new(stdout).lines();
      while let Some(line) = lines.next_line().await.context("Failed to read yt-dlp output")? {
        match ytdlp::parse_progress_line(&line) {
          Some(pct) => progress.set_percent(pct).await,
          None => debug!(line = %line, "download: yt-dlp"),
        }
      }

      let output = child.wait_with_output().await.context("Failed to wait for yt-dlp")?;
      if !output.status.success() {
        return Err(anyhow!("yt-dlp download failed: {}", String::from_utf8_lossy(&output.stderr).trim()));
      }
      if !final_path.is_file() {
        return Err(anyhow!("yt-dlp finished but {} is missing", final_path.display()));
      }
      Ok(final_path.to_path_buf())
    })
  }
}
