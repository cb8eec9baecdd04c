//! procpool - run one task over many parameter sets in a local process pool

mod cli;
mod theme;

use anyhow::{Context, Result, bail};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use std::io::Read;
use std::path::Path;

use cli::{Cli, Commands};
use procpool::logging::{self, LogConfig};
use procpool::tasks;
use procpool::worker::{Pool, PoolConfig, PoolReport, TaskParam, run_worker_main};

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        theme::disable_colors();
    }

    // Workers report on stdout and exit with their own codes
    if let Commands::InternalWorker(args) = &cli.command {
        init_logging(&cli, LogConfig::for_worker());
        std::process::exit(run_worker_main(&tasks::registry(), &args.task, &args.argv));
    }

    init_logging(&cli, LogConfig::for_cli(cli.verbose));

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Tasks => cmd_tasks(),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
        Commands::InternalWorker(_) => Ok(()),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        // Print the error chain if there are causes
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Apply global flags on top of a preset, then environment overrides.
fn init_logging(cli: &Cli, mut config: LogConfig) {
    if cli.quiet {
        config = config.with_level(tracing::Level::ERROR);
    }
    config = config.with_env_overrides();
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }
    logging::init_with_file(config);
}

/// Runs the selected task over every parameter set and prints the report.
///
/// Fails after printing when any parameter set did not complete.
fn cmd_run(cli: &Cli, args: &cli::RunArgs) -> Result<()> {
    use theme::Themed;

    let registry = tasks::registry();
    if !registry.contains(&args.task) {
        bail!(
            "Unknown task '{}' (available: {})",
            args.task,
            registry.names().join(", ")
        );
    }

    let mut params = match &args.params {
        Some(path) => read_params(path)?,
        None => Vec::new(),
    };
    for (i, raw) in args.inline_params.iter().enumerate() {
        let value = serde_json::from_str(raw)
            .with_context(|| format!("--param #{} is not valid JSON", i + 1))?;
        params.push(TaskParam::new(value));
    }

    let dependency = match (&args.dependency, &args.dependency_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dependency file {}", path.display()))?,
        (None, None) => String::new(),
    };

    let mut config = PoolConfig::new(&args.task)
        .time_to_close(args.deadline())
        .task_params(params)
        .dependency(dependency)
        .max_retries(args.max_retries);
    if let Some(jobs) = args.jobs {
        config = config.max_parallel(jobs);
    }
    if let Some(dir) = &args.work_dir {
        config = config.work_dir(procpool::paths::expand_tilde(dir));
    }
    if let Some(name) = &args.artifact_name {
        config = config.artifact_name(name);
    }

    let total = config.task_params.len();
    tracing::info!(task = %args.task, params = total, jobs = config.max_parallel, "Starting pool");

    let mut pool = Pool::new(config).context("Failed to start process pool")?;
    let report = pool.run().context("Process pool stopped")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !cli.quiet {
        print_summary(&args.task, total, &report);
    }

    let incomplete = report.abandoned.len() + report.lost.len() + report.pending.len();
    if incomplete > 0 {
        bail!(
            "{} of {} parameter sets did not complete",
            incomplete.warning(),
            total
        );
    }
    Ok(())
}

fn print_summary(task: &str, total: usize, report: &PoolReport) {
    use theme::Themed;

    let headline = if report.completed.len() == total {
        "done".success()
    } else {
        "incomplete".error_style()
    };
    println!(
        "{} {} ({}/{})",
        task.label(),
        headline,
        report.completed.len(),
        total
    );
    println!("{}", report);
}

/// Lists the built-in tasks.
fn cmd_tasks() -> Result<()> {
    use theme::Themed;

    let registry = tasks::registry();
    let width = registry.names().iter().map(|n| n.len()).max().unwrap_or(0);
    for entry in registry.iter() {
        println!(
            "{}{}  {}",
            entry.name.label(),
            " ".repeat(width - entry.name.len()),
            entry.description
        );
    }
    Ok(())
}

/// Read parameter sets from a file, or stdin for `-`.
fn read_params(path: &Path) -> Result<Vec<TaskParam>> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read parameters from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameters from {}", path.display()))?
    };
    parse_params(&text)
}

/// A lone JSON array is the list of parameter sets; otherwise every JSON
/// value in the stream (typically one per line) is one parameter set.
fn parse_params(text: &str) -> Result<Vec<TaskParam>> {
    let values = serde_json::Deserializer::from_str(text)
        .into_iter::<serde_json::Value>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Parameters are not valid JSON")?;

    Ok(match <[serde_json::Value; 1]>::try_from(values) {
        Ok([serde_json::Value::Array(items)]) => items.into_iter().map(TaskParam::new).collect(),
        Ok([single]) => vec![TaskParam::new(single)],
        Err(values) => values.into_iter().map(TaskParam::new).collect(),
    })
}
