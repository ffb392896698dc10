//! Presentation settings (`<base>/config/defaults.json`).
//!
//! Keys missing from the file fall back to the built-in defaults, and so does
//! any key whose value has the wrong type. Keys this version doesn't know are
//! kept and written back untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{LibraryError, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
  pub font_size: u32,
  /// Hex (`#ffffff`) or a color name.
  pub font_color: String,
  /// Left, top, right, bottom.
  pub margins: [i32; 4],
  pub italic: bool,
  /// Lyric fade in seconds.
  pub fade_duration: f64,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      font_size: 48,
      font_color: "white".to_string(),
      margins: [50, 0, 50, 0],
      italic: false,
      fade_duration: 0.5,
      extra: Map::new(),
    }
  }
}

impl Settings {
  /// Read settings from `path`. A missing file is created with the defaults;
  /// an unreadable or corrupt one is logged and replaced by the defaults in memory.
  pub fn load(path: &Path) -> Result<Self> {
    if !path.exists() {
      let defaults = Self::default();
      defaults.save(path)?;
      info!(path = %path.display(), "settings: wrote defaults");
      return Ok(defaults);
    }
    let content = std::fs::read_to_string(path).map_err(|e| LibraryError::io(path, e))?;
    match serde_json::from_str::<Value>(&content) {
      Ok(Value::Object(saved)) => Ok(Self::merged(saved)),
      Ok(_) => {
        warn!(path = %path.display(), "settings: not a JSON object, using defaults");
        Ok(Self::default())
      }
      Err(e) => {
        warn!(path = %path.display(), err = %e, "settings: corrupt file, using defaults");
        Ok(Self::default())
      }
    }
  }

  /// Lay `saved` over the defaults one key at a time, skipping keys that
  /// don't fit their field.
  fn merged(saved: Map<String, Value>) -> Self {
    let mut settings = Self::default();
    let mut object = settings.to_object();
    for (key, value) in saved {
      let mut candidate = object.clone();
      candidate.insert(key.clone(), value);
      match serde_json::from_value::<Self>(Value::Object(candidate.clone())) {
        Ok(next) => {
          settings = next;
          object = candidate;
        }
        Err(e) => warn!(key = %key, err = %e, "settings: ignoring bad value, keeping default"),
      }
    }
    settings
  }

  fn to_object(&self) -> Map<String, Value> {
    match serde_json::to_value(self) {
      Ok(Value::Object(map)) => map,
      _ => Map::new(),
    }
  }

  pub fn save(&self, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir).map_err(|e| LibraryError::io(dir, e))?;
    }
    let json = serde_json::to_string_pretty(self).map_err(|e| LibraryError::Json { path: path.to_path_buf(), source: e })?;
    std::fs::write(path, json).map_err(|e| LibraryError::io(path, e))
  }

  /// Apply a single `key=value` edit, parsing `value` as JSON and falling
  /// back to a plain string.
  pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    let mut object = self.to_object();
    object.insert(key.to_string(), value);
    *self = serde_json::from_value(Value::Object(object))
      .map_err(|e| LibraryError::Validation(format!("bad value for {key}: {e}")))?;
    Ok(())
  }
}
