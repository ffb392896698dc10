use anyhow::{Context, Result, anyhow};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::settings::Settings;

/// The second-screen output: a looping background video with one lyric on top.
pub trait PresentationSurface: Send {
  fn set_video<'a>(&'a mut self, path: &'a Path) -> BoxFuture<'a, Result<()>>;

  fn set_lyric<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, Result<()>>;

  /// Close the current video file. Must be called before the file is renamed.
  fn release_video(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// mpv options that render lyrics the way `settings` describes.
pub fn osd_args(settings: &Settings) -> Vec<String> {
  let [left, top, right, bottom] = settings.margins;
  vec![
    format!("--osd-font-size={}", settings.font_size),
    format!("--osd-color={}", mpv_color(&settings.font_color)),
    format!("--osd-italic={}", if settings.italic { "yes" } else { "no" }),
    format!("--osd-margin-x={}", left.max(right).max(0)),
    format!("--osd-margin-y={}", top.max(bottom).max(0)),
    "--osd-align-x=center".to_string(),
    "--osd-align-y=center".to_string(),
  ]
}

/// mpv wants `#RRGGBB`; map the common color names onto it.
fn mpv_color(color: &str) -> String {
  let hex = match color.trim().to_ascii_lowercase().as_str() {
    "white" => "#FFFFFF",
    "black" => "#000000",
    "yellow" => "#FFFF00",
    "red" => "#FF0000",
    "green" => "#00FF00",
    "blue" => "#0000FF",
    "gray" | "grey" => "#808080",
    _ => return color.trim().to_string(),
  };
  hex.to_string()
}

/// JSON IPC line that shows `text` until replaced.
fn show_text_command(text: &str) -> String {
  let cmd = serde_json::json!({ "command": ["show-text", text, i32::MAX] });
  format!("{cmd}\n")
}

async fn send_text(socket_path: &Path, text: &str) -> Result<()> {
  // mpv creates the socket shortly after start.
  let mut stream = None;
  for _ in 0..20 {
    match tokio::net::UnixStream::connect(socket_path).await {
      Ok(s) => {
        stream = Some(s);
        break;
      }
      Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
    }
  }
  let mut stream = stream.context("Failed to connect to mpv IPC socket")?;
  stream.write_all(show_text_command(text).as_bytes()).await.context("Failed to send lyric to mpv")?;
  debug!(chars = text.chars().count(), "presenter: lyric shown");
  Ok(())
}

/// Drives an mpv window: `set_video` (re)starts mpv on a looping muted file,
/// lyrics go over its IPC socket as OSD text.
pub struct MpvSurface {
  bin: PathBuf,
  settings: Settings,
  process: Option<Child>,
  socket_path: Option<PathBuf>,
  lyric: Option<String>,
}

impl MpvSurface {
  pub fn new(bin: impl Into<PathBuf>, settings: Settings) -> Self {
    Self { bin: bin.into(), settings, process: None, socket_path: None, lyric: None }
  }

  async fn start(&mut self, path: &Path) -> Result<()> {
    self.stop().await.context("Failed to stop previous video")?;

    let socket_path = std::env::temp_dir().join(format!("psalter-mpv-{}.sock", std::process::id()));
    // Remove stale socket if it exists from a previous crash.
    let _ = std::fs::remove_file(&socket_path);

    let mut cmd = Command::new(&self.bin);
    cmd.args(["--loop-file=inf", "--no-audio", "--force-window=yes", "--keep-open=yes", "--osd-level=1"]);
    cmd.args(osd_args(&self.settings));
    cmd.arg(format!("--input-ipc-server={}", socket_path.display()));
    cmd.arg(path);
    cmd.stdin(Stdio::null());
    // Piped but never drained would fill the buffer and block mpv.
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        anyhow!("mpv not found. Install it with: brew install mpv (macOS) or apt install mpv (Linux)")
      } else {
        anyhow!(e).context("Failed to spawn mpv process")
      }
    })?;

    info!(path = %path.display(), "presenter: video started");
    self.process = Some(child);
    self.socket_path = Some(socket_path.clone());

    if let Some(text) = &self.lyric {
      send_text(&socket_path, text).await?;
    }
    Ok(())
  }

  async fn stop(&mut self) -> Result<()> {
    if let Some(mut child) = self.process.take() {
      // An mpv the operator already closed has nothing left to kill.
      if let Err(e) = child.kill().await {
        debug!(error = %e, "presenter: mpv already gone");
      }
      info!("presenter: video released");
    }
    if let Some(path) = self.socket_path.take() {
      let _ = std::fs::remove_file(&path);
    }
    Ok(())
  }
}

impl PresentationSurface for MpvSurface {
  fn set_video<'a>(&'a mut self, path: &'a Path) -> BoxFuture<'a, Result<()>> {
    Box::pin(self.start(path))
  }

  fn set_lyric<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.lyric = Some(text.to_string());
      match &self.socket_path {
        Some(socket_path) => send_text(socket_path, text).await,
        None => Ok(()),
      }
    })
  }

  fn release_video(&mut self) -> BoxFuture<'_, Result<()>> {
    Box::pin(self.stop())
  }
}
