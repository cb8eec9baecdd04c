//! Command-line interface definitions using clap.

use procpool::logging::LogFormat;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Run a batch of task parameters across a pool of worker processes.
#[derive(Parser, Debug)]
#[command(name = "procpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Log output format.
    #[arg(long, value_enum, env = "PROCPOOL_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file.
    #[arg(long, env = "PROCPOOL_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a task over a batch of parameter sets.
    Run(RunArgs),

    /// List the built-in tasks.
    Tasks,

    /// Generate shell completions.
    Completions(CompletionsArgs),

    /// Worker runtime started by the generated artifact.
    #[command(hide = true)]
    InternalWorker(WorkerArgs),
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "procpool",
            &mut std::io::stdout(),
        );
    }
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task every worker runs (see `procpool tasks`).
    #[arg(short, long, env = "PROCPOOL_TASK")]
    pub task: String,

    /// File of parameter sets: a JSON array or one JSON value per line.
    /// Use `-` for stdin.
    #[arg(short, long, value_name = "FILE")]
    pub params: Option<PathBuf>,

    /// Single parameter set as JSON (repeatable, queued after --params).
    #[arg(long = "param", value_name = "JSON")]
    pub inline_params: Vec<String>,

    /// Maximum number of concurrent workers.
    #[arg(short, long, env = "PROCPOOL_JOBS")]
    pub jobs: Option<usize>,

    /// Seconds one parameter set may run before its worker is killed.
    #[arg(long, value_name = "SECS", value_parser = parse_seconds, default_value = "60")]
    pub time_to_close: Duration,

    /// Disable the per-task deadline.
    #[arg(long, conflicts_with = "time_to_close")]
    pub no_deadline: bool,

    /// Shell text placed at the top of the worker script.
    #[arg(long, conflicts_with = "dependency_file")]
    pub dependency: Option<String>,

    /// Read the worker script preamble from a file.
    #[arg(long, value_name = "FILE")]
    pub dependency_file: Option<PathBuf>,

    /// Directory for the generated worker script.
    #[arg(long, env = "PROCPOOL_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// File stem of the generated worker script.
    #[arg(long)]
    pub artifact_name: Option<String>,

    /// Retries allowed per parameter set before it is abandoned
    /// (retries forever when unset).
    #[arg(long, env = "PROCPOOL_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// The configured deadline, `None` when disabled.
    pub fn deadline(&self) -> Option<Duration> {
        (!self.no_deadline).then_some(self.time_to_close)
    }
}

/// Arguments for the hidden worker mode.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Registered task to run.
    #[arg(long)]
    pub task: String,

    /// Initial parameter set, as passed by the pool.
    #[arg(last = true)]
    pub argv: Vec<String>,
}

/// Parse fractional seconds into a positive duration.
fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", s))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(Duration::from_secs_f64(secs))
}
