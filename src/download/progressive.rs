use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use reqwest::Client;
use std::path::{Path, PathBuf};

use super::strategy::{Resolved, Strategy};
use super::{Progress, temp_path, transfer, ytdlp};
use crate::constants::constants;

/// A single muxed mp4 stream, fetched directly over HTTP.
pub struct ProgressiveStrategy {
  yt_dlp: PathBuf,
  client: Client,
}

impl ProgressiveStrategy {
  pub fn new(yt_dlp: PathBuf, client: Client) -> Self {
    Self { yt_dlp, client }
  }
}

impl Strategy for ProgressiveStrategy {
  fn name(&self) -> &'static str {
    "progressive"
  }

  fn resolve<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Resolved>> {
    Box::pin(async move {
      let format = &constants().progressive_format;
      let args = ["-f", format.as_str(), "--print", "title", "--print", "url"];
      let stdout = ytdlp::capture(&self.yt_dlp, &args, url, "stream lookup").await?;
      let (title, stream) =
        ytdlp::parse_title_and_url(&stdout).ok_or_else(|| anyhow!("no progressive mp4 stream for {url}"))?;
      Ok(Resolved { title, sources: vec![stream], total_bytes: None })
    })
  }

  fn download<'a>(
    &'a self,
    _url: &'a str,
    resolved: &'a Resolved,
    final_path: &'a Path,
    progress: &'a mut Progress,
  ) -> BoxFuture<'a, Result<PathBuf>> {
    Box::pin(async move {
      let source = resolved.sources.first().ok_or_else(|| anyhow!("no stream to download"))?;
      let temp = temp_path(final_path, ".download");
      transfer::stream_to_file(&self.client, source, &temp, 0, resolved.total_bytes, progress).await?;
      Ok(temp)
    })
  }
}
