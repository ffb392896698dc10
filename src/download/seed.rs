use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{DownloadEvent, Pipeline, Progress};

/// Shared cancellation flag, checked between downloads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
  pub succeeded: usize,
  pub failed: usize,
  pub cancelled: bool,
}

/// Download each of `urls` in turn. A failed item is counted and skipped;
/// cancellation takes effect before the next item starts.
pub async fn seed_library(
  pipeline: &Pipeline,
  urls: &[String],
  cancel: &CancelToken,
  events: mpsc::Sender<DownloadEvent>,
) -> SeedReport {
  let mut report = SeedReport::default();
  let total = urls.len();
  info!(total, "seed: populating empty video library");

  for (i, url) in urls.iter().enumerate() {
    if cancel.is_cancelled() {
      info!(done = i, total, "seed: cancelled");
      report.cancelled = true;
      break;
    }
    let mut progress = Progress::new(events.clone());
    progress.status(format!("Downloading video {} of {total}", i + 1)).await;
    let _ = events.send(DownloadEvent::Started { url: url.clone() }).await;

    let outcome = pipeline.run(url, &mut progress).await;
    match &outcome {
      Ok(_) => report.succeeded += 1,
      Err(e) => {
        warn!(url = %url, err = %e, "seed: skipping video");
        report.failed += 1;
      }
    }
    let outcome = outcome.map_err(|e| e.to_string());
    let _ = events.send(DownloadEvent::Finished { url: url.clone(), outcome }).await;
  }

  info!(succeeded = report.succeeded, failed = report.failed, "seed: done");
  report
}
