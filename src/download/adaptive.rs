//! Separate video-only and audio-only streams, merged locally with ffmpeg.

use anyhow::{Context, Result, anyhow};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::strategy::{Resolved, Strategy};
use super::{Progress, temp_path, transfer, ytdlp};

#[derive(Debug, Deserialize)]
struct MediaInfo {
  title: Option<String>,
  #[serde(default)]
  formats: Vec<MediaFormat>,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaFormat {
  url: Option<String>,
  ext: Option<String>,
  vcodec: Option<String>,
  acodec: Option<String>,
  height: Option<u32>,
  tbr: Option<f64>,
  abr: Option<f64>,
  filesize: Option<u64>,
  filesize_approx: Option<u64>,
}

impl MediaFormat {
  fn has(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|c| c != "none")
  }

  fn is_video_only(&self) -> bool {
    self.ext.as_deref() == Some("mp4") && Self::has(&self.vcodec) && !Self::has(&self.acodec)
  }

  fn is_audio_only(&self) -> bool {
    self.ext.as_deref() == Some("m4a") && Self::has(&self.acodec) && !Self::has(&self.vcodec)
  }

  fn size(&self) -> Option<u64> {
    self.filesize.or(self.filesize_approx)
  }
}

/// Best mp4 video-only and m4a audio-only formats with a direct URL.
fn pick_streams(formats: &[MediaFormat]) -> Option<(&MediaFormat, &MediaFormat)> {
  let usable = || formats.iter().filter(|f| f.url.is_some());
  let video = usable()
    .filter(|f| f.is_video_only())
    .max_by(|a, b| a.height.cmp(&b.height).then(a.tbr.unwrap_or(0.0).total_cmp(&b.tbr.unwrap_or(0.0))))?;
  let audio = usable()
    .filter(|f| f.is_audio_only())
    .max_by(|a, b| a.abr.unwrap_or(0.0).total_cmp(&b.abr.unwrap_or(0.0)))?;
  Some((video, audio))
}

fn resolve_info(info: MediaInfo) -> Result<Resolved> {
  let title = info.title.filter(|t| !t.trim().is_empty()).ok_or_else(|| anyhow!("metadata has no title"))?;
  let (video, audio) = pick_streams(&info.formats).ok_or_else(|| anyhow!("no separate mp4/m4a streams"))?;
  let total_bytes = video.size().zip(audio.size()).map(|(v, a)| v + a);
  let sources = [video, audio].iter().filter_map(|f| f.url.clone()).collect();
  Ok(Resolved { title, sources, total_bytes })
}

pub struct AdaptiveStrategy {
  yt_dlp: PathBuf,
  ffmpeg: PathBuf,
  client: Client,
}

impl AdaptiveStrategy {
  pub fn new(yt_dlp: PathBuf, ffmpeg: PathBuf, client: Client) -> Self {
    Self { yt_dlp, ffmpeg, client }
  }

  async fn merge(&self, video: &Path, audio: &Path, out: &Path) -> Result<()> {
    let output = Command::new(&self.ffmpeg)
      .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
      .arg(video)
      .arg("-i")
      .arg(audio)
      .args(["-map", "0:v:0", "-map", "1:a:0", "-c", "copy", "-f", "mp4"])
      .arg(out)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .output()
      .await
      .map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
          anyhow!("ffmpeg not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg")
        } else {
          anyhow!(e).context("Failed to execute ffmpeg merge")
        }
      })?;

    if !output.status.success() {
      return Err(anyhow!("ffmpeg merge failed: {}", String::from_utf8_lossy(&output.stderr).trim()));
    }
    Ok(())
  }
}

impl Strategy for AdaptiveStrategy {
  fn name(&self) -> &'static str {
    "adaptive"
  }

  fn resolve<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Resolved>> {
    Box::pin(async move {
      let stdout = ytdlp::capture(&self.yt_dlp, &["-J"], url, "metadata").await?;
      let info: MediaInfo = serde_json::from_str(&stdout).context("Failed to parse yt-dlp metadata")?;
      resolve_info(info)
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
      let [video_url, audio_url] = resolved.sources.as_slice() else {
        return Err(anyhow!("expected a video and an audio stream"));
      };
      let video = temp_path(final_path, ".video.download");
      let audio = temp_path(final_path, ".audio.download");
      let merged = temp_path(final_path, ".download");

      let total = resolved.total_bytes;
      let fetched = transfer::stream_to_file(&self.client, video_url, &video, 0, total, progress).await?;
      transfer::stream_to_file(&self.client, audio_url, &audio, fetched, total, progress).await?;

      progress.status("Merging audio and video").await;
      self.merge(&video, &audio, &merged).await?;
      debug!(path = %merged.display(), "download: merged adaptive streams");
      for part in [&video, &audio] {
        let _ = tokio::fs::remove_file(part).await;
      }
      Ok(merged)
    })
  }
}
