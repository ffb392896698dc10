use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, ImageFormat, codecs::jpeg::JpegEncoder, imageops::FilterType};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::constants::constants;

/// Decodes the first frame of a video file.
pub trait FrameSource: Send + Sync {
  fn first_frame(&self, video: &Path) -> Result<DynamicImage>;
}

/// Grabs the first frame by piping a single PNG out of ffmpeg.
pub struct FfmpegFrames {
  bin: PathBuf,
}

impl FfmpegFrames {
  pub fn new(bin: impl Into<PathBuf>) -> Self {
    Self { bin: bin.into() }
  }
}

impl FrameSource for FfmpegFrames {
  fn first_frame(&self, video: &Path) -> Result<DynamicImage> {
    let output = Command::new(&self.bin)
      .args(["-hide_banner", "-loglevel", "error", "-i"])
      .arg(video)
      .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .output()
      .map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
          anyhow!("ffmpeg not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg")
        } else {
          anyhow!(e).context("Failed to execute ffmpeg frame capture")
        }
      })?;

    if !output.status.success() || output.stdout.is_empty() {
      return Err(anyhow!("ffmpeg could not decode {}: {}", video.display(), String::from_utf8_lossy(&output.stderr)));
    }

    image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
      .with_context(|| format!("Failed to decode frame of {}", video.display()))
  }
}

/// Resize `frame` to the thumbnail size and write it to `dest` as JPEG.
pub fn write_thumbnail(frame: &DynamicImage, dest: &Path) -> Result<()> {
  let c = constants();
  let resized = frame.resize_exact(c.thumbnail_width, c.thumbnail_height, FilterType::Triangle).to_rgb8();
  let file = std::fs::File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
  let mut writer = BufWriter::new(file);
  JpegEncoder::new_with_quality(&mut writer, c.thumbnail_quality)
    .encode_image(&resized)
    .with_context(|| format!("Failed to encode {}", dest.display()))?;
  Ok(())
}
