//! Terminal output helpers: colored status lines, diff listings and JSON.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use fleetsync_lib::baseline::DiffResult;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const REMOVE: &str = "-";
}

/// Paths listed per class before the rest are summarized as a count.
const DIFF_PREVIEW: usize = 20;

pub fn truncate_hash(hash: &str) -> &str {
  hash.get(..12).unwrap_or(hash)
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];

  if bytes < 1024 {
    return format!("{bytes} B");
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = UNITS[0];
  for next in &UNITS[1..] {
    if value < 1024.0 {
      break;
    }
    value /= 1024.0;
    unit = next;
  }
  format!("{value:.1} {unit}")
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  match secs {
    0 => format!("{}ms", duration.subsec_millis()),
    1..60 => format!("{secs}.{:02}s", duration.subsec_millis() / 10),
    _ => format!("{}m {}s", secs / 60, secs % 60),
  }
}

#[derive(Clone, Copy)]
enum Tone {
  Good,
  Bad,
  Warn,
  Note,
}

/// `symbol` colored for `stream`, or left plain when the stream is not a terminal.
fn paint(symbol: &str, tone: Tone, stream: Stream) -> String {
  match tone {
    Tone::Good => symbol.if_supports_color(stream, |s| s.green()).to_string(),
    Tone::Bad => symbol.if_supports_color(stream, |s| s.red()).to_string(),
    Tone::Warn => symbol.if_supports_color(stream, |s| s.yellow()).to_string(),
    Tone::Note => symbol.if_supports_color(stream, |s| s.blue()).to_string(),
  }
}

pub fn print_success(message: &str) {
  println!("{} {message}", paint(symbols::SUCCESS, Tone::Good, Stream::Stdout));
}

pub fn print_info(message: &str) {
  println!("{} {message}", paint(symbols::INFO, Tone::Note, Stream::Stdout));
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    paint(symbols::ERROR, Tone::Bad, Stream::Stderr),
    paint(message, Tone::Bad, Stream::Stderr)
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    paint(symbols::WARNING, Tone::Warn, Stream::Stderr),
    paint(message, Tone::Warn, Stream::Stderr)
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Print the drifted paths of `diff`, one class at a time.
///
/// `only_local` is shown as removed and `only_remote` as added, reading the
/// diff as "what it takes to turn the first side into the second".
pub fn print_diff(diff: &DiffResult, verbose: bool) {
  let classes = [
    (symbols::MODIFY, Tone::Warn, "changed", &diff.changed),
    (symbols::REMOVE, Tone::Bad, "only in first", &diff.only_local),
    (symbols::ADD, Tone::Good, "only in second", &diff.only_remote),
  ];
  let limit = if verbose { usize::MAX } else { DIFF_PREVIEW };

  for (symbol, tone, label, paths) in classes {
    if paths.is_empty() {
      continue;
    }
    println!("{label} ({}):", paths.len());
    let marker = paint(symbol, tone, Stream::Stdout);
    for path in paths.iter().take(limit) {
      println!("  {marker} {path}");
    }
    if let Some(rest) = paths.len().checked_sub(limit).filter(|n| *n > 0) {
      println!("  ... and {rest} more");
    }
  }
}
