//! Slide navigation for the selected song: section-annotated views,
//! section filtering, and slide edits that are persisted as they happen.

use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{LibraryError, Result};
use crate::library::LibraryStore;
use crate::song::{Slide, SlideId, Song};

/// Where navigator edits are written.
pub trait SongRepository {
  fn save_song(&self, song: &Song) -> Result<PathBuf>;
}

impl SongRepository for LibraryStore {
  fn save_song(&self, song: &Song) -> Result<PathBuf> {
    LibraryStore::save_song(self, song)
  }
}

/// One row of a rendered slide list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEntry {
  /// Start of a run of slides sharing a section. Empty label is "no section".
  Header(String),
  Slide(Slide),
}

/// One row of a slide list as it looks after a drag-and-drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderItem {
  Header(String),
  Slide(SlideId),
}

/// Slides in order, with a header before the first slide of every run whose
/// section differs from the run before it.
///
/// Unsectioned slides at the very top get no header, even when their file
/// stores `"section": ""`. Unsectioned slides after a named run get a header
/// with an empty label.
pub fn annotate(slides: &[Slide]) -> Vec<ViewEntry> {
  let mut entries = Vec::with_capacity(slides.len());
  let mut current = "";
  for slide in slides {
    if slide.section != current {
      current = slide.section.as_str();
      entries.push(ViewEntry::Header(current.to_string()));
    }
    entries.push(ViewEntry::Slide(slide.clone()));
  }
  entries
}

/// Slides whose section equals `section` exactly (empty matches unsectioned).
pub fn filter_slides(slides: &[Slide], section: &str) -> Vec<ViewEntry> {
  slides.iter().filter(|s| s.section == section).cloned().map(ViewEntry::Slide).collect()
}

/// Rebuild `slides` in the order of `items`. A slide takes the section of the
/// nearest header above it; slides above every header keep their own.
/// `items` must name every slide exactly once.
pub fn apply_reorder(slides: &[Slide], items: &[ReorderItem]) -> Result<Vec<Slide>> {
  let mut remaining: HashMap<&SlideId, &Slide> = slides.iter().map(|s| (&s.id, s)).collect();
  let mut reordered = Vec::with_capacity(slides.len());
  let mut current: Option<&str> = None;

  for item in items {
    match item {
      ReorderItem::Header(section) => current = Some(section.as_str()),
      ReorderItem::Slide(id) => {
        let Some(slide) = remaining.remove(id) else {
          let reason = if slides.iter().any(|s| &s.id == id) { "appears twice" } else { "is not in this song" };
          return Err(LibraryError::Consistency(format!("slide {id} {reason}")));
        };
        let mut slide = slide.clone();
        if let Some(section) = current {
          slide.section = section.to_string();
        }
        reordered.push(slide);
      }
    }
  }

  if !remaining.is_empty() {
    return Err(LibraryError::Consistency(format!("{} slide(s) missing from the new order", remaining.len())));
  }
  Ok(reordered)
}

/// In-memory view over the selected song. Dropped and rebuilt on every song switch.
#[derive(Debug, Default)]
pub struct SlideNavigator {
  song: Option<Song>,
  filter: Option<String>,
}

impl SlideNavigator {
  /// Make `song` current and clear the section filter.
  pub fn select_song(&mut self, song: Song) -> Vec<ViewEntry> {
    debug!(title = %song.title, slides = song.lyrics.len(), "navigator: song selected");
    self.song = Some(song);
    self.filter = None;
    self.view()
  }

  pub fn song(&self) -> Option<&Song> {
    self.song.as_ref()
  }

  pub fn filter(&self) -> Option<&str> {
    self.filter.as_deref()
  }

  /// `None` shows everything with headers; `Some` narrows to one section.
  pub fn filter_by_section(&mut self, section: Option<&str>) -> Result<Vec<ViewEntry>> {
    self.current()?;
    self.filter = section.map(str::to_string);
    Ok(self.view())
  }

  pub fn view(&self) -> Vec<ViewEntry> {
    let Some(song) = &self.song else { return Vec::new() };
    match &self.filter {
      None => annotate(&song.lyrics),
      Some(section) => filter_slides(&song.lyrics, section),
    }
  }

  /// Distinct named sections of the current song, sorted.
  pub fn sections(&self) -> Vec<String> {
    let Some(song) = &self.song else { return Vec::new() };
    let mut sections: Vec<String> =
      song.lyrics.iter().filter(|s| !s.section.is_empty()).map(|s| s.section.clone()).collect();
    sections.sort();
    sections.dedup();
    sections
  }

  pub fn add_slide(&mut self, repo: &dyn SongRepository, text: &str, section: &str) -> Result<Slide> {
    let text = required_text(text)?;
    let mut song = self.current()?.clone();
    let slide = Slide::new(text, section.trim());
    song.lyrics.push(slide.clone());
    self.commit(repo, song)?;
    info!(id = %slide.id, section = %slide.section, "navigator: slide added");
    Ok(slide)
  }

  pub fn edit_slide(&mut self, repo: &dyn SongRepository, id: &SlideId, text: &str, section: &str) -> Result<Slide> {
    let text = required_text(text)?;
    let mut song = self.current()?.clone();
    let idx = song.position(id).ok_or_else(|| LibraryError::not_found("slide", id.to_string()))?;
    let slide = &mut song.lyrics[idx];
    slide.text = text.to_string();
    slide.section = section.trim().to_string();
    let edited = slide.clone();
    self.commit(repo, song)?;
    info!(id = %id, "navigator: slide edited");
    Ok(edited)
  }

  pub fn delete_slide(&mut self, repo: &dyn SongRepository, id: &SlideId) -> Result<Slide> {
    let mut song = self.current()?.clone();
    let idx = song.position(id).ok_or_else(|| LibraryError::not_found("slide", id.to_string()))?;
    let removed = song.lyrics.remove(idx);
    self.commit(repo, song)?;
    info!(id = %id, "navigator: slide deleted");
    Ok(removed)
  }

  /// Replace the slide order with `items`, as dropped in the annotated view.
  pub fn reorder(&mut self, repo: &dyn SongRepository, items: &[ReorderItem]) -> Result<()> {
    let mut song = self.current()?.clone();
    song.lyrics = apply_reorder(&song.lyrics, items)?;
    self.commit(repo, song)?;
    info!(slides = items.len(), "navigator: slides reordered");
    Ok(())
  }

  /// Reorder by ids alone; every slide keeps its section.
  pub fn reorder_ids(&mut self, repo: &dyn SongRepository, ids: &[SlideId]) -> Result<()> {
    let items: Vec<ReorderItem> = ids.iter().cloned().map(ReorderItem::Slide).collect();
    self.reorder(repo, &items)
  }

  fn current(&self) -> Result<&Song> {
    self.song.as_ref().ok_or_else(|| LibraryError::not_found("song", "no song selected"))
  }

  /// Persist `song`, then make it current. A failed save leaves the old state.
  fn commit(&mut self, repo: &dyn SongRepository, song: Song) -> Result<()> {
    repo.save_song(&song)?;
    self.song = Some(song);
    Ok(())
  }
}

fn required_text(text: &str) -> Result<&str> {
  let text = text.trim();
  if text.is_empty() {
    return Err(LibraryError::Validation("slide text is empty".to_string()));
  }
  Ok(text)
}
