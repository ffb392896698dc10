use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Stable identifier of a slide, kept across edits and reorders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlideId(String);

impl SlideId {
  pub fn generate() -> Self {
    Self(uuid::Uuid::new_v4().simple().to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for SlideId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl fmt::Display for SlideId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A single displayable lyric unit.
///
/// `section` is empty when the slide belongs to no section. On disk an empty
/// section is omitted; `null` and `""` are both read back as empty. Slides
/// written before ids existed read back with an empty id until
/// [`Song::fill_missing_ids`] assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
  #[serde(default)]
  pub id: SlideId,
  pub text: String,
  #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "String::is_empty")]
  pub section: String,
}

impl Slide {
  pub fn new(text: impl Into<String>, section: impl Into<String>) -> Self {
    Self { id: SlideId::generate(), text: text.into(), section: section.into() }
  }
}

fn null_as_empty<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
  Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

/// A song: a title plus its slides in presentation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
  pub title: String,
  #[serde(default)]
  pub lyrics: Vec<Slide>,
}

impl Song {
  pub fn new(title: impl Into<String>) -> Self {
    Self { title: title.into(), lyrics: Vec::new() }
  }

  pub fn slide(&self, id: &SlideId) -> Option<&Slide> {
    self.lyrics.iter().find(|s| &s.id == id)
  }

  pub fn position(&self, id: &SlideId) -> Option<usize> {
    self.lyrics.iter().position(|s| &s.id == id)
  }

  /// Give every id-less slide a fresh id. Returns how many were filled.
  pub fn fill_missing_ids(&mut self) -> usize {
    let mut filled = 0;
    for slide in self.lyrics.iter_mut().filter(|s| s.id.as_str().is_empty()) {
      slide.id = SlideId::generate();
      filled += 1;
    }
    filled
  }
}

/// Reduce a song title to a filesystem-safe stem: alphanumerics, space,
/// hyphen and underscore survive; the result is trimmed.
pub fn song_stem(title: &str) -> String {
  title.chars().filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_')).collect::<String>().trim().to_string()
}
