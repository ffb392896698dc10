//! On-disk library: one JSON file per song under `lyrics/`, media files under
//! `videos/` with a `.thumbnails/` cache beside them.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::SongOrder;
use crate::constants::constants;
use crate::error::{LibraryError, Result};
use crate::song::{Song, song_stem};
use crate::thumbnail::{FrameSource, write_thumbnail};

/// A video in the library. The file itself is the only record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEntry {
  pub path: PathBuf,
  pub file_name: String,
  pub size_bytes: u64,
}

impl VideoEntry {
  pub fn stem(&self) -> &str {
    Path::new(&self.file_name).file_stem().and_then(|s| s.to_str()).unwrap_or(&self.file_name)
  }

  pub fn size_mb(&self) -> f64 {
    self.size_bytes as f64 / (1024.0 * 1024.0)
  }
}

/// Whether `path` has one of the recognised video extensions (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|ext| constants().video_extensions.iter().any(|v| v.eq_ignore_ascii_case(ext)))
}

pub struct LibraryStore {
  base: PathBuf,
  order: SongOrder,
  frames: Box<dyn FrameSource>,
}

impl LibraryStore {
  /// Open the library rooted at `base`, creating its directories if needed.
  pub fn open(base: impl Into<PathBuf>, order: SongOrder, frames: Box<dyn FrameSource>) -> Result<Self> {
    let store = Self { base: base.into(), order, frames };
    store.ensure_layout()?;
    Ok(store)
  }

  pub fn ensure_layout(&self) -> Result<()> {
    for dir in [self.lyrics_dir(), self.videos_dir(), self.config_dir()] {
      std::fs::create_dir_all(&dir).map_err(|e| LibraryError::io(&dir, e))?;
    }
    Ok(())
  }

  pub fn lyrics_dir(&self) -> PathBuf {
    self.base.join(&constants().lyrics_dir)
  }

  pub fn videos_dir(&self) -> PathBuf {
    self.base.join(&constants().videos_dir)
  }

  pub fn config_dir(&self) -> PathBuf {
    self.base.join(&constants().config_dir)
  }

  pub fn thumbnails_dir(&self) -> PathBuf {
    self.videos_dir().join(&constants().thumbnails_dir)
  }

  pub fn settings_path(&self) -> PathBuf {
    self.config_dir().join(&constants().settings_file)
  }

  // --- Songs ---

  /// Every readable song in the lyrics directory, sorted by title.
  /// Corrupt or unreadable files are skipped with a warning.
  pub fn list_songs(&self) -> Result<Vec<Song>> {
    let dir = self.lyrics_dir();
    let entries = std::fs::read_dir(&dir).map_err(|e| LibraryError::io(&dir, e))?;

    let mut songs = Vec::new();
    for entry in entries.flatten() {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      match read_song(&path) {
        Ok(song) => songs.push(song),
        Err(e) => warn!(path = %path.display(), err = %e, "library: skipping unreadable song"),
      }
    }

    match self.order {
      SongOrder::CaseSensitive => songs.sort_by(|a, b| a.title.cmp(&b.title)),
      SongOrder::CaseInsensitive => songs.sort_by_cached_key(|s| s.title.to_lowercase()),
    }
    debug!(count = songs.len(), "library: listed songs");
    Ok(songs)
  }

  pub fn load_song(&self, title: &str) -> Result<Song> {
    self.list_songs()?.into_iter().find(|s| s.title == title).ok_or_else(|| LibraryError::not_found("song", title))
  }

  /// Path a song is stored at: `<lyrics>/<stem>.json`.
  pub fn song_path(&self, title: &str) -> Result<PathBuf> {
    let stem = song_stem(title);
    if stem.is_empty() {
      return Err(LibraryError::Validation(format!("song title {title:?} has no usable characters")));
    }
    Ok(self.lyrics_dir().join(format!("{stem}.json")))
  }

  /// Write `song` as pretty-printed JSON, overwriting any existing file.
  ///
  /// The file is keyed by the current title only; if the title changed since
  /// the last save, the file under the old title stays on disk.
  pub fn save_song(&self, song: &Song) -> Result<PathBuf> {
    let path = self.song_path(&song.title)?;
    write_song(&path, song)?;
    debug!(path = %path.display(), slides = song.lyrics.len(), "library: saved song");
    Ok(path)
  }

  /// Create and persist an empty song.
  pub fn add_song(&self, title: &str) -> Result<Song> {
    let title = title.trim();
    let path = self.song_path(title)?;
    if path.exists() {
      return Err(LibraryError::Duplicate(title.to_string()));
    }
    let song = Song::new(title);
    self.save_song(&song)?;
    info!(title = %title, "library: added song");
    Ok(song)
  }

  // --- Videos ---

  /// Video files directly inside the videos directory, sorted by name.
  pub fn list_videos(&self) -> Result<Vec<VideoEntry>> {
    let dir = self.videos_dir();
    let entries = std::fs::read_dir(&dir).map_err(|e| LibraryError::io(&dir, e))?;

    let mut videos: Vec<VideoEntry> = entries
      .flatten()
      .filter_map(|entry| {
        let path = entry.path();
        let meta = entry.metadata().ok()?;
        if !meta.is_file() || !is_video_file(&path) {
          return None;
        }
        let file_name = path.file_name()?.to_string_lossy().into_owned();
        Some(VideoEntry { path, file_name, size_bytes: meta.len() })
      })
      .collect();
    videos.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(videos)
  }

  pub fn find_video(&self, name: &str) -> Result<VideoEntry> {
    self
      .list_videos()?
      .into_iter()
      .find(|v| v.file_name == name || v.stem() == name)
      .ok_or_else(|| LibraryError::not_found("video", name))
  }

  pub fn thumbnail_path(&self, video: &Path) -> PathBuf {
    let stem = video.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    self.thumbnails_dir().join(format!("{stem}.jpg"))
  }

  /// Cached thumbnail for `video`, capturing it on first request.
  /// `None` when the video can't be decoded.
  pub fn get_or_create_thumbnail(&self, video: &Path) -> Option<PathBuf> {
    let thumb = self.thumbnail_path(video);
    if thumb.exists() {
      return Some(thumb);
    }

    let dir = self.thumbnails_dir();
    if let Err(e) = std::fs::create_dir_all(&dir) {
      warn!(dir = %dir.display(), err = %e, "thumbnail: cannot create cache dir");
      return None;
    }

    let result = self.frames.first_frame(video).and_then(|frame| write_thumbnail(&frame, &thumb));
    match result {
      Ok(()) => {
        debug!(video = %video.display(), thumb = %thumb.display(), "thumbnail: created");
        Some(thumb)
      }
      Err(e) => {
        warn!(video = %video.display(), err = %format!("{e:#}"), "thumbnail: capture failed");
        let _ = std::fs::remove_file(&thumb);
        None
      }
    }
  }

  /// Rename a video file, keeping its extension, and carry its cached
  /// thumbnail along.
  ///
  /// Whoever holds the file open for playback must release it first; the
  /// rename fails on platforms that lock open files.
  pub fn rename_video(&self, old_path: &Path, new_stem: &str) -> Result<PathBuf> {
    let new_stem = new_stem.trim();
    if new_stem.is_empty() {
      return Err(LibraryError::Validation("new video name is blank".to_string()));
    }
    if new_stem.contains(['/', '\\']) {
      return Err(LibraryError::Validation(format!("video name {new_stem:?} contains a path separator")));
    }
    if !old_path.is_file() {
      return Err(LibraryError::not_found("video", old_path.display().to_string()));
    }

    let file_name = match old_path.extension().and_then(|e| e.to_str()) {
      Some(ext) => format!("{new_stem}.{ext}"),
      None => new_stem.to_string(),
    };
    let new_path = self.videos_dir().join(file_name);
    if new_path == old_path {
      return Ok(new_path);
    }
    if new_path.exists() {
      let err = std::io::Error::new(std::io::ErrorKind::AlreadyExists, "target file already exists");
      return Err(LibraryError::io(&new_path, err));
    }

    std::fs::rename(old_path, &new_path).map_err(|e| LibraryError::io(old_path, e))?;
    info!(from = %old_path.display(), to = %new_path.display(), "library: renamed video");

    let old_thumb = self.thumbnail_path(old_path);
    if old_thumb.exists() {
      let new_thumb = self.thumbnail_path(&new_path);
      if let Err(e) = std::fs::rename(&old_thumb, &new_thumb) {
        warn!(thumb = %old_thumb.display(), err = %e, "library: could not move thumbnail, it will be regenerated");
      }
    }
    Ok(new_path)
  }
}

/// Parse a song file. Slides without an id get one, and the file is rewritten
/// so the ids stay the same on the next read.
fn read_song(path: &Path) -> Result<Song> {
  let content = std::fs::read_to_string(path).map_err(|e| LibraryError::io(path, e))?;
  let mut song: Song = serde_json::from_str(&content).map_err(|e| LibraryError::Json { path: path.to_path_buf(), source: e })?;
  let filled = song.fill_missing_ids();
  if filled > 0 {
    match write_song(path, &song) {
      Ok(()) => info!(path = %path.display(), filled, "library: assigned missing slide ids"),
      Err(e) => warn!(path = %path.display(), err = %e, "library: could not save assigned slide ids"),
    }
  }
  Ok(song)
}

fn write_song(path: &Path, song: &Song) -> Result<()> {
  let json = serde_json::to_string_pretty(song).map_err(|e| LibraryError::Json { path: path.to_path_buf(), source: e })?;
  std::fs::write(path, json).map_err(|e| LibraryError::io(path, e))
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::song::Slide;
  use anyhow::anyhow;
  use image::{DynamicImage, RgbImage};

  /// Decodes any file whose name doesn't contain "corrupt" as a solid frame.
  pub(crate) struct SolidFrames;

  impl FrameSource for SolidFrames {
    fn first_frame(&self, video: &Path) -> anyhow::Result<DynamicImage> {
      if video.to_string_lossy().contains("corrupt") {
        return Err(anyhow!("no frames"));
      }
      Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 180, image::Rgb([0, 0, 0]))))
    }
  }

  pub(crate) fn store_in(dir: &Path) -> LibraryStore {
    LibraryStore::open(dir, SongOrder::CaseSensitive, Box::new(SolidFrames)).unwrap()
  }

  fn slide(id: &str, text: &str, section: &str) -> Slide {
    Slide { id: id.into(), text: text.into(), section: section.into() }
  }

  #[test]
  fn open_creates_layout() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    assert!(store.lyrics_dir().is_dir());
    assert!(store.videos_dir().is_dir());
    assert!(store.config_dir().is_dir());
  }

  #[test]
  fn save_then_list_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let mut song = Song::new("Amazing Grace");
    song.lyrics = vec![slide("1", "Amazing grace", "Verse 1"), slide("2", "How sweet the sound", ""), slide("3", "Chorus line", "Chorus")];
    store.save_song(&song).unwrap();

    let songs = store.list_songs().unwrap();
    assert_eq!(songs, vec![song]);
  }

  #[test]
  fn saved_file_is_pretty_json_keyed_by_stem() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let song = Song::new("It Is Well (With My Soul)");
    let path = store.save_song(&song).unwrap();
    assert_eq!(path, store.lyrics_dir().join("It Is Well With My Soul.json"));
    let raw = std::fs::read_to_string(path).unwrap();
    assert!(raw.contains("\n  \"title\": \"It Is Well (With My Soul)\""));
  }

  #[test]
  fn corrupt_song_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    store.save_song(&Song::new("Good")).unwrap();
    std::fs::write(store.lyrics_dir().join("Broken.json"), "{ \"title\": ").unwrap();
    std::fs::write(store.lyrics_dir().join("notes.txt"), "ignored").unwrap();

    let titles: Vec<String> = store.list_songs().unwrap().into_iter().map(|s| s.title).collect();
    assert_eq!(titles, ["Good"]);
  }

  #[test]
  fn list_repairs_missing_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    std::fs::write(store.lyrics_dir().join("Old.json"), r#"{"title":"Old","lyrics":[{"text":"a"},{"text":"b","section":null}]}"#)
      .unwrap();
    let song = store.load_song("Old").unwrap();
    assert_eq!(song.lyrics.len(), 2);
    assert!(!song.lyrics[0].id.as_str().is_empty());
    assert_ne!(song.lyrics[0].id, song.lyrics[1].id);
    assert_eq!(song.lyrics[1].section, "");

    // The repaired ids are written back, so later reads see the same ones.
    let again = store.load_song("Old").unwrap();
    assert_eq!(again, song);
    let on_disk = std::fs::read_to_string(store.lyrics_dir().join("Old.json")).unwrap();
    assert!(on_disk.contains(song.lyrics[0].id.as_str()));
  }

  #[test]
  fn repaired_id_can_be_edited_after_reload() {
    use crate::navigator::SlideNavigator;
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    std::fs::write(store.lyrics_dir().join("Old.json"), r#"{"title":"Old","lyrics":[{"text":"a"}]}"#).unwrap();
    let id = store.load_song("Old").unwrap().lyrics[0].id.clone();

    let mut nav = SlideNavigator::default();
    nav.select_song(store.load_song("Old").unwrap());
    nav.edit_slide(&store, &id, "changed", "Verse").unwrap();
    assert_eq!(store.load_song("Old").unwrap().slide(&id).map(|s| s.text.as_str()), Some("changed"));
  }

  #[test]
  fn list_sorts_case_sensitive_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    for title in ["beta", "Alpha", "Gamma"] {
      store.add_song(title).unwrap();
    }
    let titles: Vec<String> = store.list_songs().unwrap().into_iter().map(|s| s.title).collect();
    assert_eq!(titles, ["Alpha", "Gamma", "beta"]);
  }

  #[test]
  fn list_sorts_case_insensitive_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let store = LibraryStore::open(dir.path(), SongOrder::CaseInsensitive, Box::new(SolidFrames)).unwrap();
    for title in ["beta", "Alpha", "Gamma"] {
      store.add_song(title).unwrap();
    }
    let titles: Vec<String> = store.list_songs().unwrap().into_iter().map(|s| s.title).collect();
    assert_eq!(titles, ["Alpha", "beta", "Gamma"]);
  }

  #[test]
  fn add_song_rejects_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    store.add_song("Amazing Grace").unwrap();
    assert!(matches!(store.add_song("Amazing Grace"), Err(LibraryError::Duplicate(_))));
    // Same stem after sanitation
    assert!(matches!(store.add_song("Amazing Grace!"), Err(LibraryError::Duplicate(_))));
  }

  #[test]
  fn add_song_rejects_unusable_titles() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    assert!(matches!(store.add_song("  "), Err(LibraryError::Validation(_))));
    assert!(matches!(store.add_song("?!*"), Err(LibraryError::Validation(_))));
  }

  #[test]
  fn retitled_song_leaves_old_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let mut song = store.add_song("Old Name").unwrap();
    song.title = "New Name".to_string();
    store.save_song(&song).unwrap();

    assert!(store.lyrics_dir().join("Old Name.json").exists());
    assert!(store.lyrics_dir().join("New Name.json").exists());
    assert_eq!(store.list_songs().unwrap().len(), 2);
  }

  #[test]
  fn load_song_reports_missing() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    assert!(matches!(store.load_song("Nope"), Err(LibraryError::NotFound { kind: "song", .. })));
  }

  #[test]
  fn list_videos_filters_extensions() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let videos = store.videos_dir();
    std::fs::write(videos.join("b.MP4"), b"1234").unwrap();
    std::fs::write(videos.join("a.mkv"), b"12").unwrap();
    std::fs::write(videos.join("c.txt"), b"x").unwrap();
    std::fs::write(videos.join("d.mp4.part"), b"x").unwrap();
    std::fs::create_dir_all(store.thumbnails_dir()).unwrap();
    std::fs::write(store.thumbnails_dir().join("a.jpg"), b"x").unwrap();

    let listed = store.list_videos().unwrap();
    let names: Vec<&str> = listed.iter().map(|v| v.file_name.as_str()).collect();
    assert_eq!(names, ["a.mkv", "b.MP4"]);
    assert_eq!(listed[1].size_bytes, 4);
    assert_eq!(listed[1].stem(), "b");
  }

  #[test]
  fn thumbnail_is_created_once_and_cached() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let video = store.videos_dir().join("Sunrise.mp4");
    std::fs::write(&video, b"not really a video").unwrap();

    let thumb = store.get_or_create_thumbnail(&video).unwrap();
    assert_eq!(thumb, store.thumbnails_dir().join("Sunrise.jpg"));
    let first = std::fs::metadata(&thumb).unwrap().len();
    assert!(first > 0);

    // A cached file is returned as-is.
    std::fs::write(&thumb, b"cached").unwrap();
    assert_eq!(store.get_or_create_thumbnail(&video), Some(thumb.clone()));
    assert_eq!(std::fs::read(&thumb).unwrap(), b"cached");
  }

  #[test]
  fn undecodable_video_has_no_thumbnail() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let video = store.videos_dir().join("corrupt.mp4");
    std::fs::write(&video, b"garbage").unwrap();
    assert_eq!(store.get_or_create_thumbnail(&video), None);
    assert!(!store.thumbnail_path(&video).exists());
  }

  #[test]
  fn rename_keeps_extension_and_moves_thumbnail() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let video = store.videos_dir().join("old.mov");
    std::fs::write(&video, b"data").unwrap();
    store.get_or_create_thumbnail(&video).unwrap();

    let renamed = store.rename_video(&video, "  Ocean Waves ").unwrap();
    assert_eq!(renamed, store.videos_dir().join("Ocean Waves.mov"));
    assert!(renamed.exists());
    assert!(!video.exists());
    assert!(store.thumbnails_dir().join("Ocean Waves.jpg").exists());
    assert!(!store.thumbnails_dir().join("old.jpg").exists());
  }

  #[test]
  fn rename_rejects_blank_and_missing() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let video = store.videos_dir().join("clip.mp4");
    std::fs::write(&video, b"data").unwrap();

    assert!(matches!(store.rename_video(&video, "   "), Err(LibraryError::Validation(_))));
    assert!(matches!(store.rename_video(&video, "a/b"), Err(LibraryError::Validation(_))));
    let missing = store.videos_dir().join("gone.mp4");
    assert!(matches!(store.rename_video(&missing, "new"), Err(LibraryError::NotFound { .. })));
  }

  #[test]
  fn rename_refuses_to_clobber() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let a = store.videos_dir().join("a.mp4");
    let b = store.videos_dir().join("b.mp4");
    std::fs::write(&a, b"a").unwrap();
    std::fs::write(&b, b"b").unwrap();
    assert!(matches!(store.rename_video(&a, "b"), Err(LibraryError::Io { .. })));
    assert_eq!(std::fs::read(&b).unwrap(), b"b");
  }
}
