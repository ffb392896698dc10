//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!`, so it's always available
//! without runtime file I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Library layout
  pub lyrics_dir: String,
  pub videos_dir: String,
  pub config_dir: String,
  pub logs_dir: String,
  pub thumbnails_dir: String,
  pub settings_file: String,
  pub video_extensions: Vec<String>,

  // Thumbnails
  pub thumbnail_width: u32,
  pub thumbnail_height: u32,
  pub thumbnail_quality: u8,

  // Downloads
  pub max_title_chars: usize,
  pub fallback_title: String,
  pub progressive_format: String,
  pub cli_format: String,
  pub event_buffer: usize,

  pub seed_urls: Vec<String>,
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed this is a build-time error.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}
