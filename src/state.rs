//! Application state. Every operator action is a [`Command`] applied through
//! [`AppState::apply`], which returns the resulting [`Change`] and broadcasts
//! it to anyone listening.

use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::constants::constants;
use crate::error::{LibraryError, Result};
use crate::library::{LibraryStore, VideoEntry};
use crate::navigator::{ReorderItem, SlideNavigator, ViewEntry};
use crate::presenter::PresentationSurface;
use crate::song::{SlideId, Song};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Re-read songs and videos from disk.
  Refresh,
  AddSong(String),
  SelectSong(String),
  FilterSection(Option<String>),
  AddSlide { text: String, section: String },
  EditSlide { id: SlideId, text: String, section: String },
  DeleteSlide(SlideId),
  Reorder(Vec<ReorderItem>),
  GoLive(SlideId),
  SelectVideo(String),
  RenameVideo { name: String, new_stem: String },
  /// A download finished into the videos directory.
  VideoAdded(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
  Library { songs: usize, videos: usize },
  SongAdded(String),
  /// The selected song's slides, as currently filtered.
  Slides { title: String, view: Vec<ViewEntry> },
  LyricLive(SlideId),
  VideoLive(PathBuf),
  VideoRenamed { from: PathBuf, to: PathBuf },
  VideoAdded(PathBuf),
}

pub struct AppState {
  store: LibraryStore,
  songs: Vec<Song>,
  videos: Vec<VideoEntry>,
  navigator: SlideNavigator,
  surface: Box<dyn PresentationSurface>,
  live_video: Option<PathBuf>,
  live_slide: Option<SlideId>,
  changes: broadcast::Sender<Change>,
}

fn surface_err(e: anyhow::Error) -> LibraryError {
  LibraryError::Surface(format!("{e:#}"))
}

impl AppState {
  pub fn new(store: LibraryStore, surface: Box<dyn PresentationSurface>) -> Result<Self> {
    let (changes, _) = broadcast::channel(constants().event_buffer);
    let mut state = Self {
      store,
      songs: Vec::new(),
      videos: Vec::new(),
      navigator: SlideNavigator::default(),
      surface,
      live_video: None,
      live_slide: None,
      changes,
    };
    state.reload()?;
    Ok(state)
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Change> {
    self.changes.subscribe()
  }

  pub fn store(&self) -> &LibraryStore {
    &self.store
  }

  pub fn songs(&self) -> &[Song] {
    &self.songs
  }

  pub fn videos(&self) -> &[VideoEntry] {
    &self.videos
  }

  pub fn navigator(&self) -> &SlideNavigator {
    &self.navigator
  }

  pub fn live_video(&self) -> Option<&PathBuf> {
    self.live_video.as_ref()
  }

  pub fn live_slide(&self) -> Option<&SlideId> {
    self.live_slide.as_ref()
  }

  /// Release the surface's video before exit.
  pub async fn shutdown(&mut self) -> Result<()> {
    self.live_video = None;
    self.surface.release_video().await.map_err(surface_err)
  }

  pub async fn apply(&mut self, command: Command) -> Result<Change> {
    debug!(command = ?command, "state: apply");
    let change = match command {
      Command::Refresh => self.reload()?,
      Command::AddSong(title) => {
        let song = self.store.add_song(&title)?;
        self.songs = self.store.list_songs()?;
        Change::SongAdded(song.title)
      }
      Command::SelectSong(title) => {
        let song = self.songs.iter().find(|s| s.title == title).cloned();
        let song = match song {
          Some(song) => song,
          None => self.store.load_song(&title)?,
        };
        // Until a slide goes live the screen shows the song title.
        self.surface.set_lyric(&song.title).await.map_err(surface_err)?;
        self.navigator.select_song(song);
        self.live_slide = None;
        self.slides_change()
      }
      Command::FilterSection(section) => {
        self.navigator.filter_by_section(section.as_deref())?;
        self.slides_change()
      }
      Command::AddSlide { text, section } => {
        self.navigator.add_slide(&self.store, &text, &section)?;
        self.sync_selected()
      }
      Command::EditSlide { id, text, section } => {
        self.navigator.edit_slide(&self.store, &id, &text, &section)?;
        self.sync_selected()
      }
      Command::DeleteSlide(id) => {
        self.navigator.delete_slide(&self.store, &id)?;
        if self.live_slide.as_ref() == Some(&id) {
          self.live_slide = None;
        }
        self.sync_selected()
      }
      Command::Reorder(items) => {
        self.navigator.reorder(&self.store, &items)?;
        self.sync_selected()
      }
      Command::GoLive(id) => self.go_live_slide(&id).await?,
      Command::SelectVideo(name) => self.select_video(&name).await?,
      Command::RenameVideo { name, new_stem } => self.rename_video(&name, &new_stem).await?,
      Command::VideoAdded(path) => {
        self.videos = self.store.list_videos()?;
        Change::VideoAdded(path)
      }
    };
    // No subscribers is fine.
    let _ = self.changes.send(change.clone());
    Ok(change)
  }

  fn reload(&mut self) -> Result<Change> {
    self.songs = self.store.list_songs()?;
    self.videos = self.store.list_videos()?;
    info!(songs = self.songs.len(), videos = self.videos.len(), "state: library loaded");
    Ok(Change::Library { songs: self.songs.len(), videos: self.videos.len() })
  }

  fn slides_change(&self) -> Change {
    let title = self.navigator.song().map(|s| s.title.clone()).unwrap_or_default();
    Change::Slides { title, view: self.navigator.view() }
  }

  /// Copy the navigator's freshly saved song back into the song list.
  fn sync_selected(&mut self) -> Change {
    if let Some(song) = self.navigator.song() {
      match self.songs.iter_mut().find(|s| s.title == song.title) {
        Some(slot) => *slot = song.clone(),
        None => self.songs.push(song.clone()),
      }
    }
    self.slides_change()
  }

  async fn go_live_slide(&mut self, id: &SlideId) -> Result<Change> {
    let song = self.navigator.song().ok_or_else(|| LibraryError::not_found("song", "no song selected"))?;
    let slide = song.slide(id).ok_or_else(|| LibraryError::not_found("slide", id.to_string()))?;
    let text = slide.text.clone();
    self.surface.set_lyric(&text).await.map_err(surface_err)?;
    self.live_slide = Some(id.clone());
    Ok(Change::LyricLive(id.clone()))
  }

  async fn select_video(&mut self, name: &str) -> Result<Change> {
    let entry = self.store.find_video(name)?;
    self.surface.set_video(&entry.path).await.map_err(surface_err)?;
    self.live_video = Some(entry.path.clone());
    Ok(Change::VideoLive(entry.path))
  }

  /// Rename a library video. The surface lets go of its file first and is
  /// pointed at the new name afterwards if it was showing this video.
  async fn rename_video(&mut self, name: &str, new_stem: &str) -> Result<Change> {
    let entry = self.store.find_video(name)?;
    let was_live = self.live_video.as_ref() == Some(&entry.path);
    self.surface.release_video().await.map_err(surface_err)?;
    self.live_video = None;

    let renamed = self.store.rename_video(&entry.path, new_stem);
    let target = match &renamed {
      Ok(new_path) => new_path.clone(),
      Err(_) => entry.path.clone(),
    };
    if was_live {
      match self.surface.set_video(&target).await {
        Ok(()) => self.live_video = Some(target),
        Err(e) => warn!(path = %target.display(), err = %format!("{e:#}"), "state: could not resume video"),
      }
    }

    let new_path = renamed?;
    self.videos = self.store.list_videos()?;
    Ok(Change::VideoRenamed { from: entry.path, to: new_path })
  }
}
