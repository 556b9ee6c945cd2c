//! `fleet baseline ...`: record, check and manage expected live states.

use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use serde::Serialize;

use fleetsync_lib::baseline::{BaselineError, BaselineStore, RetentionPolicy, compare};
use fleetsync_lib::consts::FLEET_LOCK_FILENAME;
use fleetsync_lib::dir_lock::DirLock;
use fleetsync_lib::registry::Registry;

use super::{EXIT_DRIFT, live_manifest, load_registry};
use crate::output::{
  OutputFormat, format_bytes, print_diff, print_error, print_info, print_json, print_stat, print_success, truncate_hash,
};

#[derive(Subcommand, Debug)]
pub enum BaselineCommand {
  /// Record the current live tree as the expected state
  Record {
    /// Free-form label stored with the baseline
    #[arg(long)]
    label: Option<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Compare the live tree against the current baseline; exits 2 on drift
  Check {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// List recorded baselines, newest first
  List {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show one baseline
  Show {
    /// Baseline ID to show
    id: String,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Delete old baselines; the current one is always kept
  Prune {
    /// Only delete baselines older than this (e.g. "7d", "24h")
    #[arg(long, value_parser = humantime::parse_duration)]
    older_than: Option<Duration>,

    /// Newest baselines to keep (default: [baseline] keep)
    #[arg(long)]
    keep: Option<usize>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

pub fn cmd_baseline(config: Option<&Path>, command: BaselineCommand, verbose: bool) -> Result<ExitCode> {
  let registry = load_registry(config)?;
  let store = BaselineStore::new(registry.baseline_dir());

  match command {
    BaselineCommand::Record { label, output } => cmd_record(&registry, &store, label, output),
    BaselineCommand::Check { output } => cmd_check(&registry, &store, verbose, output),
    BaselineCommand::List { output } => cmd_list(&store, output),
    BaselineCommand::Show { id, output } => cmd_show(&store, &id, verbose, output),
    BaselineCommand::Prune {
      older_than,
      keep,
      output,
    } => cmd_prune(&registry, &store, older_than, keep, output),
  }
}

fn cmd_record(registry: &Registry, store: &BaselineStore, label: Option<String>, output: OutputFormat) -> Result<ExitCode> {
  let root = registry.root();
  if !root.is_dir() {
    bail!("Fleet root {} does not exist", root.display());
  }
  let _lock = DirLock::acquire_file(&root.join(FLEET_LOCK_FILENAME), root, "baseline record")?;

  let manifest = live_manifest(registry)?;
  let baseline = store.record(manifest, label).context("Failed to record baseline")?;

  if output.is_json() {
    print_json(&baseline.to_metadata())?;
  } else {
    print_success(&format!("Recorded baseline {}", baseline.id));
    print_stat("Files", &baseline.manifest.len().to_string());
  }
  Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct CheckOutput {
  clean: bool,
  baseline: Option<String>,
  drifted: Vec<String>,
}

fn cmd_check(registry: &Registry, store: &BaselineStore, verbose: bool, output: OutputFormat) -> Result<ExitCode> {
  let fresh = live_manifest(registry)?;

  match store.check(&fresh) {
    Ok(diff) => {
      let baseline = store.current_id()?;
      if output.is_json() {
        print_json(&CheckOutput {
          clean: true,
          baseline,
          drifted: Vec::new(),
        })?;
      } else if let (Some(diff), Some(id)) = (diff, baseline) {
        print_success(&format!("Live tree matches baseline {} ({} files)", id, diff.unchanged.len()));
      } else {
        print_info("No baseline recorded and the fleet root is empty");
      }
      Ok(ExitCode::SUCCESS)
    }
    Err(e @ (BaselineError::Drift { .. } | BaselineError::MissingBaseline { .. })) => {
      let current = store.load_current()?;
      let diff = current.as_ref().map(|b| compare(&b.manifest, &fresh));

      if output.is_json() {
        print_json(&CheckOutput {
          clean: false,
          baseline: current.map(|b| b.id),
          drifted: diff.map(|d| d.drifted_paths()).unwrap_or_default(),
        })?;
      } else {
        print_error(&e.to_string());
        if let Some(diff) = &diff {
          print_diff(diff, verbose);
        }
      }
      Ok(ExitCode::from(EXIT_DRIFT))
    }
    Err(e) => Err(e).context("Baseline check failed"),
  }
}

fn cmd_list(store: &BaselineStore, output: OutputFormat) -> Result<ExitCode> {
  let mut baselines = store.list()?;
  let current_id = store.current_id()?;
  baselines.reverse();

  if output.is_json() {
    #[derive(Serialize)]
    struct ListOutput<'a> {
      baselines: &'a [fleetsync_lib::baseline::BaselineMetadata],
      current: Option<String>,
    }

    print_json(&ListOutput {
      baselines: &baselines,
      current: current_id,
    })?;
    return Ok(ExitCode::SUCCESS);
  }

  if baselines.is_empty() {
    print_info("No baselines found");
    return Ok(ExitCode::SUCCESS);
  }

  for baseline in &baselines {
    let current_marker = if current_id.as_ref() == Some(&baseline.id) {
      " (current)"
    } else {
      ""
    };
    let label = baseline.label.as_deref().map(|l| format!(" [{}]", l)).unwrap_or_default();
    println!(
      "{}{}{} - {} ({} files)",
      baseline.id,
      current_marker,
      label,
      format_timestamp(baseline.created_at),
      baseline.file_count
    );
  }
  print_info(&format!("{} baseline(s) total", baselines.len()));
  Ok(ExitCode::SUCCESS)
}

fn cmd_show(store: &BaselineStore, id: &str, verbose: bool, output: OutputFormat) -> Result<ExitCode> {
  let baseline = store.load(id)?;

  if output.is_json() {
    print_json(&baseline)?;
    return Ok(ExitCode::SUCCESS);
  }

  let is_current = store.current_id()?.as_deref() == Some(baseline.id.as_str());
  let current_marker = if is_current { " (current)" } else { "" };

  println!("Baseline: {}{}", baseline.id, current_marker);
  println!("Created:  {}", format_timestamp(baseline.created_at));
  if let Some(label) = &baseline.label {
    println!("Label:    {}", label);
  }
  println!("Root:     {}", baseline.manifest.root);
  println!(
    "Files:    {} ({})",
    baseline.manifest.len(),
    format_bytes(baseline.manifest.total_size())
  );

  if verbose {
    println!();
    for (path, entry) in &baseline.manifest.files {
      println!("  {} {}", truncate_hash(&entry.content_hash.0), path);
    }
  }
  Ok(ExitCode::SUCCESS)
}

fn cmd_prune(
  registry: &Registry,
  store: &BaselineStore,
  older_than: Option<Duration>,
  keep: Option<usize>,
  output: OutputFormat,
) -> Result<ExitCode> {
  let policy = RetentionPolicy {
    older_than,
    keep_latest: keep.unwrap_or(registry.baseline().keep),
  };
  let deleted = store.prune(&policy).context("Failed to prune baselines")?;

  if output.is_json() {
    print_json(&serde_json::json!({ "deleted": deleted }))?;
  } else if deleted.is_empty() {
    print_info("Nothing to prune");
  } else {
    for id in &deleted {
      println!("  {}", id);
    }
    print_success(&format!("Deleted {} baseline(s)", deleted.len()));
  }
  Ok(ExitCode::SUCCESS)
}

fn format_timestamp(timestamp: u64) -> String {
  let datetime = UNIX_EPOCH + Duration::from_secs(timestamp);
  match SystemTime::now().duration_since(datetime) {
    Ok(age) => format!("{} ago", humantime::format_duration(Duration::from_secs(age.as_secs()))),
    Err(_) => format!("timestamp: {}", timestamp),
  }
}
