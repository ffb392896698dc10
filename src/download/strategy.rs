use futures::future::BoxFuture;
use reqwest::Client;
use std::path::{Path, PathBuf};

use super::Progress;
use super::adaptive::AdaptiveStrategy;
use super::cli::CliStrategy;
use super::progressive::ProgressiveStrategy;

/// What a strategy learned about a URL before downloading anything.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
  pub title: String,
  /// Direct media URLs, in the order the strategy will fetch them.
  pub sources: Vec<String>,
  /// Combined size of `sources`, when the extractor knows it.
  pub total_bytes: Option<u64>,
}

/// One way of getting a video onto disk.
///
/// `download` returns the file it produced. The pipeline moves it over the
/// final path; a strategy that already wrote `final_path` just returns it.
pub trait Strategy: Send + Sync {
  fn name(&self) -> &'static str;

  fn resolve<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<Resolved>>;

  fn download<'a>(
    &'a self,
    url: &'a str,
    resolved: &'a Resolved,
    final_path: &'a Path,
    progress: &'a mut Progress,
  ) -> BoxFuture<'a, anyhow::Result<PathBuf>>;
}

/// External programs the strategies shell out to.
#[derive(Debug, Clone)]
pub struct Tools {
  pub yt_dlp: PathBuf,
  pub ffmpeg: PathBuf,
}

/// Progressive stream first, then adaptive streams merged locally, then
/// letting yt-dlp do the whole job.
pub fn default_strategies(tools: &Tools) -> Vec<Box<dyn Strategy>> {
  let client = Client::new();
  vec![
    Box::new(ProgressiveStrategy::new(tools.yt_dlp.clone(), client.clone())),
    Box::new(AdaptiveStrategy::new(tools.yt_dlp.clone(), tools.ffmpeg.clone(), client)),
    Box::new(CliStrategy::new(tools.yt_dlp.clone())),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_chain_order() {
    let tools = Tools { yt_dlp: "yt-dlp".into(), ffmpeg: "ffmpeg".into() };
    let names: Vec<&str> = default_strategies(&tools).iter().map(|s| s.name()).collect();
    assert_eq!(names, ["progressive", "adaptive", "cli"]);
  }
}
