mod config;
mod constants;
mod download;
mod error;
mod library;
mod logging;
mod navigator;
mod presenter;
mod settings;
mod song;
mod state;
mod thumbnail;

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use config::Config;
use constants::constants;
use download::{CancelToken, DownloadEvent, DownloadQueue, Pipeline, Tools, default_strategies, seed_library};
use library::LibraryStore;
use navigator::{ReorderItem, SlideNavigator, ViewEntry};
use presenter::MpvSurface;
use settings::Settings;
use song::SlideId;
use state::{AppState, Change, Command};
use thumbnail::FfmpegFrames;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// Library root (default: `base_dir` from the config file)
  #[arg(long, global = true)]
  base_dir: Option<PathBuf>,

  /// Config file (default: platform config directory)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Debug logging when RUST_LOG is unset
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Song library
  #[command(subcommand)]
  Songs(SongsCmd),
  /// Edit the slides of one song
  #[command(subcommand)]
  Slide(SlideCmd),
  /// Background video library
  #[command(subcommand)]
  Videos(VideosCmd),
  /// Download the default background videos into an empty library
  Seed {
    /// Seed even when videos already exist
    #[arg(long)]
    force: bool,
  },
  /// Drive the presentation screen from an interactive prompt
  Present {
    /// Video to start with
    #[arg(long)]
    video: Option<String>,
    /// Song to select on start
    #[arg(long)]
    song: Option<String>,
  },
  /// Presentation settings (font, color, margins, fade)
  #[command(subcommand)]
  Settings(SettingsCmd),
  /// Application config file
  #[command(subcommand)]
  Config(ConfigCmd),
  /// Print shell completions
  Completions { shell: Shell },
}

#[derive(Subcommand, Debug)]
enum SongsCmd {
  List,
  Add { title: String },
  /// Print slides with section headers
  Show {
    title: String,
    /// Only slides in this section ("" for unsectioned)
    #[arg(long)]
    section: Option<String>,
  },
  /// Named sections of a song
  Sections { title: String },
}

#[derive(Subcommand, Debug)]
enum SlideCmd {
  Add {
    song: String,
    text: String,
    #[arg(long, default_value = "")]
    section: String,
  },
  Edit {
    song: String,
    id: String,
    text: String,
    #[arg(long, default_value = "")]
    section: String,
  },
  Delete { song: String, id: String },
  /// New order as slide ids; `#Name` starts a section, a bare `#` ends one
  Reorder {
    song: String,
    #[arg(required = true, allow_hyphen_values = true)]
    items: Vec<String>,
  },
}

#[derive(Subcommand, Debug)]
enum VideosCmd {
  List,
  /// Download videos from URLs, one after another
  Add {
    #[arg(required = true)]
    urls: Vec<String>,
  },
  Rename { name: String, new_name: String },
  /// Create (or show) the cached thumbnail
  Thumb { name: String },
}

#[derive(Subcommand, Debug)]
enum SettingsCmd {
  Show,
  /// Set one key; the value is parsed as JSON, else taken as a string
  Set { key: String, value: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
  Show,
  Save,
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  if let Cmd::Completions { shell } = args.command {
    clap_complete::generate(shell, &mut Args::command(), "psalter", &mut std::io::stdout());
    return Ok(());
  }

  let mut config = Config::load(args.config.as_deref());
  if let Some(base) = &args.base_dir {
    config.base_dir = base.clone();
  }
  let _guard = logging::init(&config.base_dir.join(&constants().logs_dir), args.verbose)?;
  debug!(base = %config.base_dir.display(), "psalter: starting");

  let store = LibraryStore::open(&config.base_dir, config.song_order, Box::new(FfmpegFrames::new(&config.ffmpeg)))
    .context("Failed to open library")?;

  match args.command {
    Cmd::Songs(cmd) => run_songs(&store, cmd),
    Cmd::Slide(cmd) => run_slide(&store, cmd),
    Cmd::Videos(cmd) => run_videos(&store, &config, cmd).await,
    Cmd::Seed { force } => run_seed(&store, &config, force).await,
    Cmd::Present { video, song } => run_present(store, &config, video, song).await,
    Cmd::Settings(cmd) => run_settings(&store, cmd),
    Cmd::Config(cmd) => run_config(&config, args.config.as_deref(), cmd),
    Cmd::Completions { .. } => Ok(()),
  }
}

// --- Songs & slides ---

fn print_view(view: &[ViewEntry]) {
  for entry in view {
    match entry {
      ViewEntry::Header(section) if section.is_empty() => println!("[no section]"),
      ViewEntry::Header(section) => println!("[{section}]"),
      ViewEntry::Slide(slide) => {
        let first_line = slide.text.lines().next().unwrap_or_default();
        println!("  {}  {}", slide.id.as_str(), first_line);
      }
    }
  }
}

fn navigator_for(store: &LibraryStore, title: &str) -> Result<SlideNavigator> {
  let mut navigator = SlideNavigator::default();
  navigator.select_song(store.load_song(title)?);
  Ok(navigator)
}

fn run_songs(store: &LibraryStore, cmd: SongsCmd) -> Result<()> {
  match cmd {
    SongsCmd::List => {
      for song in store.list_songs()? {
        println!("{} ({} slides)", song.title, song.lyrics.len());
      }
    }
    SongsCmd::Add { title } => {
      let song = store.add_song(&title)?;
      println!("Added {}", song.title);
    }
    SongsCmd::Show { title, section } => {
      let mut navigator = navigator_for(store, &title)?;
      let view = navigator.filter_by_section(section.as_deref())?;
      print_view(&view);
    }
    SongsCmd::Sections { title } => {
      for section in navigator_for(store, &title)?.sections() {
        println!("{section}");
      }
    }
  }
  Ok(())
}

/// `#Name` is a section header, `#` alone an unsectioned header, anything else a slide id.
fn parse_reorder_item(raw: &str) -> ReorderItem {
  match raw.strip_prefix('#') {
    Some(section) => ReorderItem::Header(section.trim().to_string()),
    None => ReorderItem::Slide(SlideId::from(raw)),
  }
}

fn run_slide(store: &LibraryStore, cmd: SlideCmd) -> Result<()> {
  match cmd {
    SlideCmd::Add { song, text, section } => {
      let slide = navigator_for(store, &song)?.add_slide(store, &text, &section)?;
      println!("{}", slide.id);
    }
    SlideCmd::Edit { song, id, text, section } => {
      navigator_for(store, &song)?.edit_slide(store, &SlideId::from(id.as_str()), &text, &section)?;
    }
    SlideCmd::Delete { song, id } => {
      navigator_for(store, &song)?.delete_slide(store, &SlideId::from(id.as_str()))?;
    }
    SlideCmd::Reorder { song, items } => {
      let items: Vec<ReorderItem> = items.iter().map(|s| parse_reorder_item(s)).collect();
      let mut navigator = navigator_for(store, &song)?;
      if items.iter().any(|item| matches!(item, ReorderItem::Header(_))) {
        navigator.reorder(store, &items)?;
      } else {
        let ids: Vec<SlideId> = items
          .into_iter()
          .filter_map(|item| match item {
            ReorderItem::Slide(id) => Some(id),
            ReorderItem::Header(_) => None,
          })
          .collect();
        navigator.reorder_ids(store, &ids)?;
      }
      print_view(&navigator.view());
    }
  }
  Ok(())
}

// --- Videos & downloads ---

fn pipeline_for(store: &LibraryStore, config: &Config) -> Pipeline {
  let tools = Tools { yt_dlp: config.yt_dlp.clone(), ffmpeg: config.ffmpeg.clone() };
  Pipeline::new(store.videos_dir(), default_strategies(&tools))
}

/// Render one download event on stderr. Returns the outcome for `Finished`.
fn render_event(event: DownloadEvent) -> Option<std::result::Result<PathBuf, String>> {
  let mut stderr = std::io::stderr();
  match event {
    DownloadEvent::Started { url } => eprintln!("Fetching {url}"),
    DownloadEvent::Stage(stage) => debug!(stage = stage.label(), "download: stage"),
    DownloadEvent::Progress(pct) => {
      let _ = write!(stderr, "\r  {pct:>3}%");
      let _ = stderr.flush();
    }
    DownloadEvent::Status(message) => eprintln!("\r  {message}"),
    DownloadEvent::Finished { outcome, .. } => {
      match &outcome {
        Ok(path) => eprintln!("\r  saved {}", path.display()),
        Err(e) => eprintln!("\r  failed: {e}"),
      }
      return Some(outcome);
    }
  }
  None
}

/// Print events until every sender is gone; returns (succeeded, failed).
async fn drain_events(mut rx: mpsc::Receiver<DownloadEvent>) -> (usize, usize) {
  let (mut ok, mut failed) = (0, 0);
  while let Some(event) = rx.recv().await {
    match render_event(event) {
      Some(Ok(_)) => ok += 1,
      Some(Err(_)) => failed += 1,
      None => {}
    }
  }
  (ok, failed)
}

async fn run_videos(store: &LibraryStore, config: &Config, cmd: VideosCmd) -> Result<()> {
  match cmd {
    VideosCmd::List => {
      for video in store.list_videos()? {
        let thumb = if store.thumbnail_path(&video.path).exists() { "*" } else { " " };
        println!("{thumb} {:<50} {:>8.1} MB", video.file_name, video.size_mb());
      }
    }
    VideosCmd::Add { urls } => {
      let (tx, rx) = mpsc::channel(constants().event_buffer);
      let queue = DownloadQueue::spawn(Arc::new(pipeline_for(store, config)), tx);
      let printer = tokio::spawn(drain_events(rx));
      for url in urls {
        queue.submit(url).await?;
      }
      queue.close().await;
      let (ok, failed) = printer.await.context("Download printer crashed")?;
      if failed > 0 {
        return Err(anyhow!("{failed} of {} downloads failed", ok + failed));
      }
    }
    VideosCmd::Rename { name, new_name } => {
      let video = store.find_video(&name)?;
      let path = store.rename_video(&video.path, &new_name)?;
      println!("{}", path.display());
    }
    VideosCmd::Thumb { name } => {
      let video = store.find_video(&name)?;
      match store.get_or_create_thumbnail(&video.path) {
        Some(path) => println!("{}", path.display()),
        None => return Err(anyhow!("Could not create a thumbnail for {}", video.file_name)),
      }
    }
  }
  Ok(())
}

async fn seed(store: &LibraryStore, config: &Config) -> Result<()> {
  let pipeline = pipeline_for(store, config);
  let cancel = CancelToken::new();
  let watcher = {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nStopping after the current video...");
        cancel.cancel();
      }
    })
  };

  let (tx, rx) = mpsc::channel(constants().event_buffer);
  let printer = tokio::spawn(drain_events(rx));
  let report = seed_library(&pipeline, &constants().seed_urls, &cancel, tx).await;
  watcher.abort();
  printer.await.context("Download printer crashed")?;

  println!(
    "Seeded {} video(s), {} failed{}",
    report.succeeded,
    report.failed,
    if report.cancelled { ", cancelled" } else { "" }
  );
  Ok(())
}

async fn run_seed(store: &LibraryStore, config: &Config, force: bool) -> Result<()> {
  if !force && !store.list_videos()?.is_empty() {
    println!("Library already has videos; use --force to seed anyway");
    return Ok(());
  }
  seed(store, config).await
}

// --- Presentation ---

#[derive(Debug, PartialEq)]
enum PromptInput {
  Apply(Command),
  /// 1-based position among the visible slides.
  Live(usize),
  Next,
  Download(String),
  List,
  Show,
  Help,
  Quit,
}

const PROMPT_HELP: &str = "\
song <title>            select a song
section [name]          filter by section (no name: show all)
live <n> | next         show slide n of the current view / the following one
add <text> [| section]  append a slide
video <name>            play a background video
rename <name> | <new>   rename a video
download <url>          fetch a video in the background
list                    songs and videos in the library
show | refresh | quit";

fn parse_prompt(line: &str) -> std::result::Result<PromptInput, String> {
  let line = line.trim();
  let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
  let rest = rest.trim();
  let need = |what: &str| if rest.is_empty() { Err(format!("{word} needs {what}")) } else { Ok(rest.to_string()) };

  Ok(match word {
    "song" => PromptInput::Apply(Command::SelectSong(need("a title")?)),
    "section" => PromptInput::Apply(Command::FilterSection((!rest.is_empty()).then(|| rest.to_string()))),
    "live" => PromptInput::Live(need("a slide number")?.parse().map_err(|_| format!("not a number: {rest}"))?),
    "next" => PromptInput::Next,
    "add" => {
      let (text, section) = need("text")?.split_once('|').map_or((rest.to_string(), String::new()), |(t, s)| {
        (t.trim().to_string(), s.trim().to_string())
      });
      PromptInput::Apply(Command::AddSlide { text, section })
    }
    "video" => PromptInput::Apply(Command::SelectVideo(need("a video name")?)),
    "rename" => {
      let (name, new_stem) = need("<name> | <new>")?
        .split_once('|')
        .map(|(a, b)| (a.trim().to_string(), b.trim().to_string()))
        .ok_or_else(|| "usage: rename <name> | <new>".to_string())?;
      PromptInput::Apply(Command::RenameVideo { name, new_stem })
    }
    "download" => PromptInput::Download(need("a URL")?),
    "refresh" => PromptInput::Apply(Command::Refresh),
    "list" => PromptInput::List,
    "show" | "" => PromptInput::Show,
    "help" | "?" => PromptInput::Help,
    "quit" | "exit" => PromptInput::Quit,
    other => return Err(format!("unknown command: {other} (try help)")),
  })
}

fn visible_slide_ids(navigator: &SlideNavigator) -> Vec<SlideId> {
  navigator
    .view()
    .into_iter()
    .filter_map(|entry| match entry {
      ViewEntry::Slide(slide) => Some(slide.id),
      ViewEntry::Header(_) => None,
    })
    .collect()
}

fn print_library(state: &AppState) {
  for song in state.songs() {
    println!("  {} ({} slides)", song.title, song.lyrics.len());
  }
  for video in state.videos() {
    let marker = if state.live_video() == Some(&video.path) { ">" } else { " " };
    let thumb = if state.store().thumbnail_path(&video.path).exists() { "*" } else { " " };
    println!("{marker}{thumb} {}", video.file_name);
  }
}

fn print_numbered(navigator: &SlideNavigator, live: Option<&SlideId>) {
  if let Some(section) = navigator.filter() {
    println!("(section: {})", if section.is_empty() { "no section" } else { section });
  }
  let mut n = 0;
  for entry in navigator.view() {
    match entry {
      ViewEntry::Header(section) => println!("[{}]", if section.is_empty() { "no section" } else { section.as_str() }),
      ViewEntry::Slide(slide) => {
        n += 1;
        let marker = if live == Some(&slide.id) { ">" } else { " " };
        println!("{marker}{n:>3}. {}", slide.text.lines().next().unwrap_or_default());
      }
    }
  }
}

fn describe(change: &Change) -> String {
  match change {
    Change::Library { songs, videos } => format!("{songs} song(s), {videos} video(s)"),
    Change::SongAdded(title) => format!("added {title}"),
    Change::Slides { title, view } => format!("{title}: {} row(s)", view.len()),
    Change::LyricLive(id) => format!("live: {id}"),
    Change::VideoLive(path) | Change::VideoAdded(path) => path.display().to_string(),
    Change::VideoRenamed { to, .. } => format!("renamed to {}", to.display()),
  }
}

async fn run_present(store: LibraryStore, config: &Config, video: Option<String>, song: Option<String>) -> Result<()> {
  if config.seed_on_empty && store.list_videos()?.is_empty() {
    seed(&store, config).await?;
  }

  let settings = Settings::load(&store.settings_path())?;
  let (tx, mut events) = mpsc::channel(constants().event_buffer);
  let queue = DownloadQueue::spawn(Arc::new(pipeline_for(&store, config)), tx);
  let surface = MpvSurface::new(&config.mpv, settings);
  let mut state = AppState::new(store, Box::new(surface))?;

  let mut changes = state.subscribe();
  tokio::spawn(async move {
    while let Ok(change) = changes.recv().await {
      debug!(change = ?change, "present: change");
    }
  });

  if let Some(name) = video {
    state.apply(Command::SelectVideo(name)).await?;
  }
  if let Some(title) = song {
    state.apply(Command::SelectSong(title)).await?;
    print_numbered(state.navigator(), state.live_slide());
  }
  println!("{PROMPT_HELP}");

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    print!("> ");
    let _ = std::io::stdout().flush();

    tokio::select! {
      Some(event) = events.recv() => {
        if let Some(Ok(path)) = render_event(event) {
          state.apply(Command::VideoAdded(path)).await?;
        }
      }
      line = lines.next_line() => {
        let Some(line) = line.context("Failed to read input")? else { break };
        let input = match parse_prompt(&line) {
          Ok(input) => input,
          Err(e) => {
            eprintln!("{e}");
            continue;
          }
        };
        let command = match input {
          PromptInput::Quit => break,
          PromptInput::Help => {
            println!("{PROMPT_HELP}");
            continue;
          }
          PromptInput::List => {
            print_library(&state);
            continue;
          }
          PromptInput::Show => {
            print_numbered(state.navigator(), state.live_slide());
            continue;
          }
          PromptInput::Download(url) => {
            queue.submit(url).await?;
            continue;
          }
          PromptInput::Live(n) => match visible_slide_ids(state.navigator()).get(n.wrapping_sub(1)) {
            Some(id) => Command::GoLive(id.clone()),
            None => {
              eprintln!("no slide {n}");
              continue;
            }
          },
          PromptInput::Next => {
            let ids = visible_slide_ids(state.navigator());
            let next = match state.live_slide().and_then(|live| ids.iter().position(|id| id == live)) {
              Some(i) => ids.get(i + 1),
              None => ids.first(),
            };
            match next {
              Some(id) => Command::GoLive(id.clone()),
              None => {
                eprintln!("no more slides");
                continue;
              }
            }
          }
          PromptInput::Apply(command) => command,
        };
        match state.apply(command).await {
          Ok(change @ Change::Slides { .. }) => {
            println!("{}", describe(&change));
            print_numbered(state.navigator(), state.live_slide());
          }
          Ok(change) => println!("{}", describe(&change)),
          Err(e) => {
            warn!(err = %e, "present: command failed");
            eprintln!("{e}");
          }
        }
      }
    }
  }

  queue.close().await;
  state.shutdown().await?;
  Ok(())
}

// --- Settings & config ---

fn run_settings(store: &LibraryStore, cmd: SettingsCmd) -> Result<()> {
  let path = store.settings_path();
  let mut settings = Settings::load(&path)?;
  match cmd {
    SettingsCmd::Show => {}
    SettingsCmd::Set { key, value } => {
      settings.set(&key, &value)?;
      settings.save(&path)?;
    }
  }
  println!("{}", serde_json::to_string_pretty(&settings).context("Failed to render settings")?);
  Ok(())
}

fn run_config(config: &Config, path: Option<&std::path::Path>, cmd: ConfigCmd) -> Result<()> {
  match cmd {
    ConfigCmd::Show => print!("{}", toml::to_string_pretty(config).context("Failed to render config")?),
    ConfigCmd::Save => println!("Saved {}", config.save(path)?.display()),
  }
  Ok(())
}
