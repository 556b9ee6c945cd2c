use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

use cmd::BaselineCommand;
use output::{OutputFormat, print_error};

/// fleet - sync, deploy and self-update a fleet of worker processes
#[derive(Parser)]
#[command(name = "fleet")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Registry file (default: $FLEETSYNC_CONFIG, ./fleet.toml, then the config directory)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Write a content-hash manifest of a directory
  BuildManifest {
    /// Directory to describe
    #[arg(long)]
    root: PathBuf,

    /// Hash text files with normalized line endings
    #[arg(long)]
    normalize_text_eol: bool,

    /// Output file (default: stdout)
    #[arg(long)]
    out: Option<PathBuf>,
  },

  /// Compare two manifests; exits 2 on drift
  CompareManifests {
    /// Local manifest file
    local: PathBuf,

    /// Second manifest file, or a path on the remote host with --remote
    #[arg(value_name = "REMOTE")]
    other: String,

    /// Fetch the second manifest through the registry's [remote] transport
    #[arg(long)]
    remote: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Deploy a release archive to the fleet root
  DeployApply {
    /// Release archive (.tar.gz, .tgz or .tar)
    archive: PathBuf,

    /// Stage the orchestrator instead of replacing it in place
    #[arg(long)]
    defer_self: bool,

    /// Skip restarting updated services
    #[arg(long)]
    no_restart: bool,

    /// Label for the recorded baseline (default: archive file name)
    #[arg(long)]
    label: Option<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Stage a self-update from a directory
  StageSelfUpdate {
    /// Directory holding the new code tree, or its parent
    staged_dir: PathBuf,

    /// Component to stage (default: the orchestrator)
    #[arg(long)]
    component: Option<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Apply a staged self-update; run before the component starts
  ApplyPending {
    /// Component to apply (default: the orchestrator)
    #[arg(long)]
    component: Option<String>,

    /// Do not re-record the baseline after applying
    #[arg(long)]
    no_rebaseline: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Print and clear the record of the last applied self-update
  LastApplied {
    /// Component to read (default: the orchestrator)
    #[arg(long)]
    component: Option<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Manage recorded baselines
  #[command(subcommand)]
  Baseline(BaselineCommand),

  /// Pack component folders from a checkout into a release archive
  BuildArchive {
    /// Repository checkout holding the component folders
    #[arg(long)]
    repo: PathBuf,

    /// Archive to write (.tar.gz)
    #[arg(long)]
    out: PathBuf,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show registry, update and service state
  Status {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match run(cli) {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<ExitCode> {
  let config = cli.config.as_deref();
  let started = std::time::Instant::now();

  let code = match cli.command {
    Commands::BuildManifest {
      root,
      normalize_text_eol,
      out,
    } => cmd::cmd_build_manifest(config, &root, normalize_text_eol, out.as_deref())?,
    Commands::CompareManifests {
      local,
      other,
      remote,
      output,
    } => cmd::cmd_compare_manifests(config, &local, &other, remote, cli.verbose, output)?,
    Commands::DeployApply {
      archive,
      defer_self,
      no_restart,
      label,
      output,
    } => cmd::cmd_deploy_apply(config, &archive, defer_self, !no_restart, label, output)?,
    Commands::StageSelfUpdate {
      staged_dir,
      component,
      output,
    } => cmd::cmd_stage_self_update(config, &staged_dir, component.as_deref(), output)?,
    Commands::ApplyPending {
      component,
      no_rebaseline,
      output,
    } => cmd::cmd_apply_pending(config, component.as_deref(), !no_rebaseline, output)?,
    Commands::LastApplied { component, output } => cmd::cmd_last_applied(config, component.as_deref(), output)?,
    Commands::Baseline(command) => cmd::cmd_baseline(config, command, cli.verbose)?,
    Commands::BuildArchive { repo, out, output } => cmd::cmd_build_archive(config, &repo, &out, output)?,
    Commands::Status { output } => cmd::cmd_status(config, cli.verbose, output)?,
  };

  tracing::debug!(elapsed = %output::format_duration(started.elapsed()), "done");
  Ok(code)
}
