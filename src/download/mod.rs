//! Video acquisition: turn a URL into a playable file in the videos directory.
//!
//! Each request walks `Idle → Resolving → Downloading → Finalizing` and ends in
//! `Succeeded` or `Failed`. Strategies are tried in order; a strategy failure is
//! logged and the next one runs. Only when every strategy fails does the caller
//! see an error. Leftover `.download` / `.part` files are swept after every
//! request, successful or not.

mod adaptive;
mod cli;
mod progressive;
mod seed;
mod strategy;
mod transfer;
mod ytdlp;

pub use seed::{CancelToken, SeedReport, seed_library};
pub use strategy::{Resolved, Strategy, Tools, default_strategies};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::constants;
use crate::error::{LibraryError, Result};

/// Suffixes of in-flight download artifacts.
const TEMP_SUFFIXES: [&str; 2] = [".download", ".part"];

// --- Filename sanitation ---

/// Turn a video title into a safe file stem.
///
/// Reserved characters `\ / : * ? " < > |` become spaces, control characters
/// are dropped, whitespace runs collapse to one space, the result is trimmed,
/// an empty result becomes `video`, and the stem is cut to 200 characters.
pub fn sanitize_title(title: &str) -> String {
  let c = constants();
  let replaced: String = title
    .chars()
    .filter(|ch| !is_control(*ch))
    .map(|ch| if matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { ' ' } else { ch })
    .collect();
  let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
  let stem = if collapsed.is_empty() { c.fallback_title.clone() } else { collapsed };
  let truncated: String = stem.chars().take(c.max_title_chars).collect();
  // Cutting can expose a trailing space from the collapsed text.
  truncated.trim_end().to_string()
}

// C0 and C1 controls, tabs and newlines included.
fn is_control(ch: char) -> bool {
  matches!(ch, '\u{0}'..='\u{1f}' | '\u{7f}'..='\u{9f}')
}

/// Final file name for a video titled `title`.
pub fn video_file_name(title: &str) -> String {
  format!("{}.mp4", sanitize_title(title))
}

/// Temporary sibling of `final_path` with the given suffix, e.g. `Song.mp4.download`.
pub(crate) fn temp_path(final_path: &Path, suffix: &str) -> PathBuf {
  let mut name = final_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(suffix);
  final_path.with_file_name(name)
}

fn is_temp_artifact(path: &Path) -> bool {
  path.file_name().and_then(|n| n.to_str()).is_some_and(|n| TEMP_SUFFIXES.iter().any(|s| n.ends_with(s)))
}

/// Remove every `.download` / `.part` file directly inside `dir`. Returns how many were removed.
pub fn sweep_temp_files(dir: &Path) -> usize {
  let Ok(entries) = std::fs::read_dir(dir) else { return 0 };
  let mut removed = 0;
  for path in entries.flatten().map(|e| e.path()).filter(|p| p.is_file() && is_temp_artifact(p)) {
    match std::fs::remove_file(&path) {
      Ok(()) => {
        debug!(path = %path.display(), "download: removed partial file");
        removed += 1;
      }
      Err(e) => warn!(path = %path.display(), err = %e, "download: could not remove partial file"),
    }
  }
  removed
}

// --- Progress reporting ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStage {
  Idle,
  Resolving,
  Downloading,
  Finalizing,
  Succeeded,
  Failed,
}

impl DownloadStage {
  pub fn label(self) -> &'static str {
    match self {
      DownloadStage::Idle => "idle",
      DownloadStage::Resolving => "resolving",
      DownloadStage::Downloading => "downloading",
      DownloadStage::Finalizing => "finalizing",
      DownloadStage::Succeeded => "succeeded",
      DownloadStage::Failed => "failed",
    }
  }
}

/// Events sent from the download worker to whoever drives the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
  Started { url: String },
  Stage(DownloadStage),
  /// Whole percent, 0-100.
  Progress(u8),
  Status(String),
  Finished { url: String, outcome: std::result::Result<PathBuf, String> },
}

/// Per-request progress sink. The reported percentage never goes down, even
/// when a later strategy starts its own transfer from zero.
pub struct Progress {
  tx: mpsc::Sender<DownloadEvent>,
  percent: u8,
  stage: DownloadStage,
}

impl Progress {
  pub fn new(tx: mpsc::Sender<DownloadEvent>) -> Self {
    Self { tx, percent: 0, stage: DownloadStage::Idle }
  }

  #[cfg(test)]
  pub fn percent(&self) -> u8 {
    self.percent
  }

  #[cfg(test)]
  pub fn stage(&self) -> DownloadStage {
    self.stage
  }

  pub async fn set_stage(&mut self, stage: DownloadStage) {
    debug!(from = self.stage.label(), to = stage.label(), "download: stage");
    self.stage = stage;
    self.emit(DownloadEvent::Stage(stage)).await;
  }

  pub async fn status(&mut self, message: impl Into<String>) {
    self.emit(DownloadEvent::Status(message.into())).await;
  }

  /// Byte-level progress. An unknown total leaves the percentage where it was.
  pub async fn bytes(&mut self, received: u64, total: Option<u64>) {
    if let Some(total) = total.filter(|t| *t > 0) {
      self.set_percent(received as f64 / total as f64 * 100.0).await;
    }
  }

  pub async fn set_percent(&mut self, percent: f64) {
    if !percent.is_finite() {
      return;
    }
    let pct = percent.clamp(0.0, 100.0) as u8;
    if pct > self.percent {
      self.percent = pct;
      self.emit(DownloadEvent::Progress(pct)).await;
    }
  }

  async fn emit(&self, event: DownloadEvent) {
    // A closed receiver means nobody is watching; the download carries on.
    let _ = self.tx.send(event).await;
  }
}

// --- Pipeline ---

pub struct Pipeline {
  videos_dir: PathBuf,
  strategies: Vec<Box<dyn Strategy>>,
}

impl Pipeline {
  pub fn new(videos_dir: impl Into<PathBuf>, strategies: Vec<Box<dyn Strategy>>) -> Self {
    Self { videos_dir: videos_dir.into(), strategies }
  }

  /// Download `url` into the videos directory, trying each strategy in turn.
  pub async fn run(&self, url: &str, progress: &mut Progress) -> Result<PathBuf> {
    std::fs::create_dir_all(&self.videos_dir).map_err(|e| LibraryError::io(&self.videos_dir, e))?;
    let outcome = self.try_strategies(url, progress).await;
    let swept = sweep_temp_files(&self.videos_dir);
    if swept > 0 {
      debug!(swept, "download: cleaned up partial files");
    }

    match outcome {
      Some(path) => {
        progress.set_percent(100.0).await;
        progress.set_stage(DownloadStage::Succeeded).await;
        info!(url = %url, path = %path.display(), "download: finished");
        Ok(path)
      }
      None => {
        progress.set_stage(DownloadStage::Failed).await;
        warn!(url = %url, reached = progress.percent, "download: every strategy failed");
        Err(LibraryError::Download { url: url.to_string() })
      }
    }
  }

  async fn try_strategies(&self, url: &str, progress: &mut Progress) -> Option<PathBuf> {
    for strategy in &self.strategies {
      let name = strategy.name();
      match self.attempt(strategy.as_ref(), url, progress).await {
        Ok(path) => return Some(path),
        Err(e) => {
          warn!(strategy = name, url = %url, err = %format!("{e:#}"), "download: strategy failed, trying next");
          progress.status(format!("{name} failed, trying next method")).await;
        }
      }
    }
    None
  }

  async fn attempt(&self, strategy: &dyn Strategy, url: &str, progress: &mut Progress) -> anyhow::Result<PathBuf> {
    use anyhow::Context;

    progress.set_stage(DownloadStage::Resolving).await;
    let resolved = strategy.resolve(url).await.context("resolve failed")?;
    let final_path = self.videos_dir.join(video_file_name(&resolved.title));
    info!(strategy = strategy.name(), title = %resolved.title, path = %final_path.display(), "download: resolved");

    progress.set_stage(DownloadStage::Downloading).await;
    progress.status(format!("Downloading {}", resolved.title)).await;
    let produced = strategy.download(url, &resolved, &final_path, progress).await.context("download failed")?;

    progress.set_stage(DownloadStage::Finalizing).await;
    finalize(&produced, &final_path)?;
    Ok(final_path)
  }
}

/// Move a finished temporary file over `final_path`, replacing any existing file.
fn finalize(produced: &Path, final_path: &Path) -> anyhow::Result<()> {
  use anyhow::{Context, anyhow};

  if !produced.is_file() {
    return Err(anyhow!("strategy reported {} but no file exists", produced.display()));
  }
  if produced == final_path {
    return Ok(());
  }
  if final_path.exists() {
    std::fs::remove_file(final_path).with_context(|| format!("Failed to replace {}", final_path.display()))?;
  }
  std::fs::rename(produced, final_path)
    .with_context(|| format!("Failed to move {} into place", produced.display()))?;
  Ok(())
}

// --- Worker ---

/// Handle to the background download worker. Requests run one at a time, so
/// two downloads never share a temporary file.
pub struct DownloadQueue {
  tx: mpsc::Sender<String>,
  handle: JoinHandle<()>,
}

impl DownloadQueue {
  pub fn spawn(pipeline: Arc<Pipeline>, events: mpsc::Sender<DownloadEvent>) -> Self {
    let (tx, mut rx) = mpsc::channel::<String>(constants().event_buffer);
    let handle = tokio::spawn(async move {
      while let Some(url) = rx.recv().await {
        let _ = events.send(DownloadEvent::Started { url: url.clone() }).await;
        let mut progress = Progress::new(events.clone());
        let outcome = pipeline.run(&url, &mut progress).await.map_err(|e| e.to_string());
        let _ = events.send(DownloadEvent::Finished { url, outcome }).await;
      }
      debug!("download: queue closed");
    });
    Self { tx, handle }
  }

  pub async fn submit(&self, url: impl Into<String>) -> Result<()> {
    let url = url.into();
    self.tx.send(url.clone()).await.map_err(|_| LibraryError::Download { url })
  }

  /// Stop accepting requests and wait for queued ones to finish.
  pub async fn close(self) {
    drop(self.tx);
    let _ = self.handle.await;
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use anyhow::anyhow;
  use futures::future::BoxFuture;

  /// What a scripted strategy does when asked to download.
  #[derive(Clone, Copy)]
  pub(crate) enum Script {
    FailResolve,
    FailDownload,
    /// Writes a temp file with the given suffix and hands it back.
    Succeed(&'static str),
  }

  pub(crate) struct Scripted {
    pub(crate) name: &'static str,
    pub(crate) title: &'static str,
    pub(crate) script: Script,
  }

  impl Strategy for Scripted {
    fn name(&self) -> &'static str {
      self.name
    }

    fn resolve<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, anyhow::Result<Resolved>> {
      Box::pin(async move {
        match self.script {
          Script::FailResolve => Err(anyhow!("{} cannot resolve", self.name)),
          _ => Ok(Resolved { title: self.title.to_string(), sources: Vec::new(), total_bytes: None }),
        }
      })
    }

    fn download<'a>(
      &'a self,
      _url: &'a str,
      _resolved: &'a Resolved,
      final_path: &'a Path,
      progress: &'a mut Progress,
    ) -> BoxFuture<'a, anyhow::Result<PathBuf>> {
      Box::pin(async move {
        match self.script {
          Script::FailResolve => unreachable!(),
          Script::FailDownload => {
            // Leave a partial file behind, like an interrupted transfer.
            std::fs::write(temp_path(final_path, ".part"), b"half")?;
            progress.bytes(40, Some(100)).await;
            Err(anyhow!("{} connection reset", self.name))
          }
          Script::Succeed(suffix) => {
            let temp = if suffix.is_empty() { final_path.to_path_buf() } else { temp_path(final_path, suffix) };
            progress.bytes(20, Some(100)).await;
            std::fs::write(&temp, b"video bytes")?;
            progress.bytes(100, Some(100)).await;
            Ok(temp)
          }
        }
      })
    }
  }

  pub(crate) fn scripted(name: &'static str, script: Script) -> Box<dyn Strategy> {
    Box::new(Scripted { name, title: "My Song: Live! (2024)", script })
  }

  fn drain(mut rx: mpsc::Receiver<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
      events.push(event);
    }
    events
  }

  fn leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
      .unwrap()
      .flatten()
      .map(|e| e.file_name().to_string_lossy().into_owned())
      .filter(|n| n.ends_with(".download") || n.ends_with(".part"))
      .collect()
  }

  // --- sanitize ---

  #[test]
  fn sanitize_examples() {
    assert_eq!(sanitize_title("My Song: Live! (2024)"), "My Song Live! (2024)");
    assert_eq!(sanitize_title(""), "video");
    assert_eq!(sanitize_title("a/b\\c"), "a b c");
    assert_eq!(video_file_name("a/b\\c"), "a b c.mp4");
  }

  #[test]
  fn sanitize_strips_controls_and_collapses_space() {
    assert_eq!(sanitize_title("  tab\there\nnew\u{7f}line\u{85}  "), "tabherenewline");
    assert_eq!(sanitize_title("a\u{0}b"), "ab");
    assert_eq!(sanitize_title("a\tb"), "ab");
    assert_eq!(sanitize_title("a \r\n b"), "a b");
    assert_eq!(sanitize_title("***???"), "video");
    assert_eq!(sanitize_title("x <|> y"), "x y");
  }

  #[test]
  fn sanitize_truncates_to_200_chars() {
    let long = "é".repeat(250);
    assert_eq!(sanitize_title(&long).chars().count(), 200);
    let spaced = format!("{} tail", "a".repeat(199));
    assert_eq!(sanitize_title(&spaced), "a".repeat(199));
  }

  #[test]
  fn sanitize_is_idempotent() {
    let samples = [
      "",
      "   ",
      "My Song: Live! (2024)",
      "a/b\\c",
      "\u{1}\u{2}weird\u{9f}",
      "  many    spaces  ",
      "\"quoted\" <tag> |pipe|",
      &"long title ".repeat(40),
      &format!("{} :", "x".repeat(199)),
    ];
    for s in samples {
      let once = sanitize_title(s);
      assert_eq!(sanitize_title(&once), once, "not idempotent for {s:?}");
    }
  }

  #[test]
  fn temp_path_appends_suffix() {
    let p = temp_path(Path::new("/v/Song.mp4"), ".download");
    assert_eq!(p, PathBuf::from("/v/Song.mp4.download"));
  }

  #[test]
  fn sweep_removes_only_partials() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.mp4", "a.mp4.download", "b.mp4.part", "c.mkv"] {
      std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    assert_eq!(sweep_temp_files(dir.path()), 2);
    assert!(dir.path().join("a.mp4").exists());
    assert!(dir.path().join("c.mkv").exists());
    assert!(leftovers(dir.path()).is_empty());
  }

  // --- progress ---

  #[tokio::test]
  async fn progress_never_regresses() {
    let (tx, rx) = mpsc::channel(64);
    let mut progress = Progress::new(tx);
    progress.bytes(50, Some(100)).await;
    progress.bytes(10, Some(100)).await;
    progress.bytes(70, None).await;
    progress.set_percent(f64::NAN).await;
    progress.bytes(99, Some(100)).await;
    progress.set_percent(250.0).await;
    assert_eq!(progress.percent(), 100);
    drop(progress);

    let pcts: Vec<u8> = drain(rx)
      .into_iter()
      .filter_map(|e| match e {
        DownloadEvent::Progress(p) => Some(p),
        _ => None,
      })
      .collect();
    assert_eq!(pcts, [50, 99, 100]);
  }

  // --- pipeline ---

  #[tokio::test]
  async fn falls_back_to_third_strategy() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("stale.mp4.part"), b"old").unwrap();
    let pipeline = Pipeline::new(
      dir.path(),
      vec![
        scripted("progressive", Script::FailResolve),
        scripted("adaptive", Script::FailDownload),
        scripted("cli", Script::Succeed("")),
      ],
    );
    let (tx, rx) = mpsc::channel(256);
    let mut progress = Progress::new(tx);

    let path = pipeline.run("https://example.com/watch?v=1", &mut progress).await.unwrap();

    assert_eq!(path, dir.path().join("My Song Live! (2024).mp4"));
    assert_eq!(std::fs::read(&path).unwrap(), b"video bytes");
    assert!(leftovers(dir.path()).is_empty());
    assert_eq!(progress.stage(), DownloadStage::Succeeded);
    assert_eq!(progress.percent(), 100);
    drop(progress);

    let events = drain(rx);
    assert_eq!(events.last(), Some(&DownloadEvent::Stage(DownloadStage::Succeeded)));
    // Progress from the failed attempt is not undone by the retry.
    let pcts: Vec<u8> = events
      .iter()
      .filter_map(|e| match e {
        DownloadEvent::Progress(p) => Some(*p),
        _ => None,
      })
      .collect();
    assert_eq!(pcts, [40, 100]);
  }

  #[tokio::test]
  async fn temp_file_replaces_existing_video() {
    let dir = tempfile::tempdir().unwrap();
    let final_path = dir.path().join("My Song Live! (2024).mp4");
    std::fs::write(&final_path, b"previous").unwrap();
    let pipeline = Pipeline::new(dir.path(), vec![scripted("progressive", Script::Succeed(".download"))]);
    let (tx, _rx) = mpsc::channel(256);

    let path = pipeline.run("u", &mut Progress::new(tx)).await.unwrap();
    assert_eq!(path, final_path);
    assert_eq!(std::fs::read(&final_path).unwrap(), b"video bytes");
    assert!(leftovers(dir.path()).is_empty());
  }

  #[tokio::test]
  async fn exhaustion_is_a_download_error_and_leaves_no_partials() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
      dir.path(),
      vec![scripted("a", Script::FailDownload), scripted("b", Script::FailResolve), scripted("c", Script::FailDownload)],
    );
    let (tx, rx) = mpsc::channel(256);
    let mut progress = Progress::new(tx);

    let err = pipeline.run("https://example.com/x", &mut progress).await.unwrap_err();
    assert!(matches!(err, LibraryError::Download { ref url } if url == "https://example.com/x"));
    assert!(leftovers(dir.path()).is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    drop(progress);
    assert_eq!(drain(rx).last(), Some(&DownloadEvent::Stage(DownloadStage::Failed)));
  }

  #[tokio::test]
  async fn stages_follow_the_state_machine() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(dir.path(), vec![scripted("only", Script::Succeed(".download"))]);
    let (tx, rx) = mpsc::channel(256);
    let mut progress = Progress::new(tx);
    assert_eq!(progress.stage(), DownloadStage::Idle);
    pipeline.run("u", &mut progress).await.unwrap();
    drop(progress);

    let stages: Vec<DownloadStage> = drain(rx)
      .into_iter()
      .filter_map(|e| match e {
        DownloadEvent::Stage(s) => Some(s),
        _ => None,
      })
      .collect();
    assert_eq!(
      stages,
      [DownloadStage::Resolving, DownloadStage::Downloading, DownloadStage::Finalizing, DownloadStage::Succeeded]
    );
  }

  #[tokio::test]
  async fn queue_runs_requests_and_reports_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(Pipeline::new(dir.path(), vec![scripted("only", Script::Succeed(".download"))]));
    let (tx, mut rx) = mpsc::channel(256);
    let queue = DownloadQueue::spawn(pipeline, tx);
    queue.submit("first").await.unwrap();
    queue.submit("second").await.unwrap();
    queue.close().await;

    let mut finished = Vec::new();
    while let Ok(event) = rx.try_recv() {
      if let DownloadEvent::Finished { url, outcome } = event {
        assert!(outcome.is_ok());
        finished.push(url);
      }
    }
    assert_eq!(finished, ["first", "second"]);
  }
}
