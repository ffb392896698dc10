use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::Progress;

/// Stream `url` into `dest`, reporting progress against `total`.
///
/// `offset` is the number of bytes already fetched by earlier transfers of the
/// same request. When `total` is unknown the response's content length is used.
/// Returns the number of bytes written.
pub(super) async fn stream_to_file(
  client: &Client,
  url: &str,
  dest: &Path,
  offset: u64,
  total: Option<u64>,
  progress: &mut Progress,
) -> Result<u64> {
  let response = client.get(url).send().await.context("Failed to start media transfer")?;
  let response = response.error_for_status().context("Media server refused the transfer")?;
  let total = total.or_else(|| response.content_length().map(|len| offset + len));
  debug!(dest = %dest.display(), total = ?total, "download: streaming");

  let mut file = tokio::fs::File::create(dest).await.with_context(|| format!("Failed to create {}", dest.display()))?;
  let mut stream = response.bytes_stream();
  let mut written: u64 = 0;

  while let Some(chunk) = stream.next().await {
    let chunk = chunk.context("Error downloading media chunk")?;
    file.write_all(&chunk).await.context("Error writing media file")?;
    written += chunk.len() as u64;
    progress.bytes(offset + written, total).await;
  }

  file.flush().await.context("Error flushing media file")?;
  Ok(written)
}
