mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use suitebuild_lib::suite::ConflictPolicy;

use crate::output::{OutputFormat, print_error};

/// suitebuild - resolve suite imports and build their dependencies
#[derive(Parser)]
#[command(name = "sb")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Commands,
}

/// Where the primary suite lives and how its imports are resolved.
#[derive(Args, Debug, Clone)]
pub struct SuiteArgs {
  /// Directory of the primary suite
  #[arg(short = 'C', long = "dir", default_value = ".")]
  pub dir: PathBuf,

  /// Version conflict policy (none, ignore, suite, latest, latest_all)
  #[arg(long)]
  pub policy: Option<ConflictPolicy>,

  /// Import an extra suite into the primary suite for this run
  #[arg(long = "dynamic-import", value_name = "SUITE")]
  pub dynamic_imports: Vec<String>,

  /// Never pull from remotes; only clone what is missing
  #[arg(long)]
  pub no_fetch: bool,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve the suite import graph and pin every repository
  Resolve {
    #[command(flatten)]
    suite: SuiteArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Build dependencies (every default root when none are named)
  Build {
    /// Dependencies to build, optionally qualified as suite:name
    names: Vec<String>,

    #[command(flatten)]
    suite: SuiteArgs,

    /// Only execute these tasks; the others are skipped
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,

    /// Rebuild even if up to date
    #[arg(short, long)]
    force: bool,

    /// Remove prior output before building
    #[arg(long)]
    clean: bool,

    /// CPU units shared by running tasks
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Abort the run after this long (e.g. 10m)
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Show how long each task took
    #[arg(long)]
    print_timing: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Remove build outputs
  Clean {
    /// Dependencies to clean (every default root's closure when none are named)
    names: Vec<String>,

    #[command(flatten)]
    suite: SuiteArgs,
  },

  /// Show the dependency graph
  Graph {
    #[command(flatten)]
    suite: SuiteArgs,

    /// Show how FROM reaches TO instead of the whole graph
    #[arg(long, num_args = 2, value_names = ["FROM", "TO"])]
    path: Option<Vec<String>>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = match cli.verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Resolve { suite, output } => cmd::cmd_resolve(&suite, output),
    Commands::Build {
      names,
      suite,
      only,
      force,
      clean,
      jobs,
      timeout,
      print_timing,
      output,
    } => cmd::cmd_build(
      &suite,
      &cmd::BuildArgs {
        names,
        only,
        force,
        clean,
        jobs,
        timeout,
        print_timing,
        output,
      },
    ),
    Commands::Clean { names, suite } => cmd::cmd_clean(&suite, &names),
    Commands::Graph { suite, path, output } => cmd::cmd_graph(&suite, path.as_deref(), output),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::from(cmd::exit_code(&e))
    }
  }
}
