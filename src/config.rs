use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// How `list_songs` orders titles.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SongOrder {
  #[default]
  CaseSensitive,
  CaseInsensitive,
}

/// Application preferences, stored as `config.toml` in the platform config dir.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
  /// Root of the library: holds `lyrics/`, `videos/`, `config/` and `logs/`.
  pub base_dir: PathBuf,
  pub yt_dlp: PathBuf,
  pub ffmpeg: PathBuf,
  /// Player behind the presentation surface.
  pub mpv: PathBuf,
  pub song_order: SongOrder,
  /// Download the default background videos when the library has none.
  pub seed_on_empty: bool,
}

impl Default for Config {
  fn default() -> Self {
    let base_dir = project_dirs()
      .map(|p| p.data_dir().to_path_buf())
      .unwrap_or_else(|| std::env::temp_dir().join("psalter"));
    Self {
      base_dir,
      yt_dlp: PathBuf::from("yt-dlp"),
      ffmpeg: PathBuf::from("ffmpeg"),
      mpv: PathBuf::from("mpv"),
      song_order: SongOrder::default(),
      seed_on_empty: true,
    }
  }
}

fn project_dirs() -> Option<ProjectDirs> {
  ProjectDirs::from("", "", "psalter")
}

pub fn default_config_path() -> Option<PathBuf> {
  project_dirs().map(|p| p.config_dir().join("config.toml"))
}

impl Config {
  /// Load from `path`, or the default location when `None`. A missing or
  /// malformed file yields the defaults.
  pub fn load(path: Option<&Path>) -> Self {
    let Some(path) = path.map(Path::to_path_buf).or_else(default_config_path) else {
      return Self::default();
    };
    let Ok(content) = std::fs::read_to_string(&path) else {
      return Self::default();
    };
    match toml::from_str(&content) {
      Ok(config) => config,
      Err(e) => {
        warn!(path = %path.display(), err = %e, "config: malformed, using defaults");
        Self::default()
      }
    }
  }

  pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
    let path = path.map(Path::to_path_buf).or_else(default_config_path).context("No config directory available")?;
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
  }
}
