//! Error types for library, navigator and download operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, LibraryError>;

/// Errors surfaced to the caller by the library store, the slide navigator
/// and the download pipeline.
#[derive(Debug, Error)]
pub enum LibraryError {
  /// Empty title or text, or a name that sanitizes to nothing.
  #[error("invalid input: {0}")]
  Validation(String),

  /// Missing song, slide or video.
  #[error("{kind} not found: {name}")]
  NotFound { kind: &'static str, name: String },

  /// A song with the same file stem already exists.
  #[error("song already exists: {0}")]
  Duplicate(String),

  #[error("I/O error on {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed JSON in {}: {source}", path.display())]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// Every acquisition strategy failed for `url`.
  #[error("all download strategies failed for {url}")]
  Download { url: String },

  /// A reorder that is not a permutation of the current slides.
  #[error("inconsistent reorder: {0}")]
  Consistency(String),

  /// The presentation surface refused a command.
  #[error("presentation surface: {0}")]
  Surface(String),
}

impl LibraryError {
  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io { path: path.into(), source }
  }

  pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
    Self::NotFound { kind, name: name.into() }
  }
}
