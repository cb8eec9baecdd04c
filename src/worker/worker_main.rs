//! Worker subprocess main entry point.
//!
//! This module runs when `procpool internal-worker --task NAME -- ARGV...`
//! is invoked by the generated artifact. It resolves the task in the
//! registry, runs it on the argv parameter, then serves assignments from
//! stdin until EOF or an exit request.
//!
//! stdout is the report channel. Tasks must log to stderr.

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{ControlMessage, TaskParam, WorkerSignal};
use super::registry::{TaskEntry, TaskRegistry};
use super::signals::EXIT_UNKNOWN_TASK;
use std::io;
use std::panic::{self, AssertUnwindSafe};

/// Run one task body, converting errors and panics into `failed`.
fn run_task(entry: &TaskEntry, params: &TaskParam) -> WorkerSignal {
    match panic::catch_unwind(AssertUnwindSafe(|| entry.run(params))) {
        Ok(Ok(())) => WorkerSignal::Finish,
        Ok(Err(e)) => {
            tracing::warn!(task = %entry.name, params = %params, error = %format!("{:#}", e), "Task failed");
            WorkerSignal::Failed
        }
        Err(_) => {
            tracing::error!(task = %entry.name, params = %params, "Task panicked");
            WorkerSignal::Failed
        }
    }
}

/// Worker main loop.
///
/// Runs `initial`, reports, then repeats for every assignment read from
/// `reader`.
fn worker_loop(
    entry: &TaskEntry,
    initial: &TaskParam,
    reader: &mut LineReader,
    writer: &mut LineWriter,
) -> io::Result<()> {
    let signal = run_task(entry, initial);
    writer.write_line(signal.as_str())?;

    loop {
        let line = match reader.read_line()? {
            Some(line) => line.to_string(),
            // EOF - parent closed the pipe
            None => return Ok(()),
        };
        if line.trim().is_empty() {
            continue;
        }

        match ControlMessage::from_line(&line) {
            Ok(ControlMessage::Assign { params }) => {
                let signal = run_task(entry, &params);
                writer.write_line(signal.as_str())?;
            }
            Ok(ControlMessage::Exit) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed control message");
            }
        }
    }
}

/// Run the worker subprocess and return its exit code.
pub fn run_worker_main(registry: &TaskRegistry, task: &str, argv: &[String]) -> i32 {
    // Ignore SIGPIPE - a vanished parent surfaces as an io::Error
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let Some(entry) = registry.get(task) else {
        tracing::error!(task, available = ?registry.names(), "Unknown task");
        return EXIT_UNKNOWN_TASK;
    };
    let initial = TaskParam::from_args(argv);

    // Safety: file descriptors 0 and 1 are always valid for stdin/stdout
    let stdin_fd = unsafe { PipeFd::from_raw(0) };
    let stdout_fd = unsafe { PipeFd::from_raw(1) };

    let mut reader = LineReader::new(stdin_fd);
    let mut writer = LineWriter::new(stdout_fd);

    match worker_loop(entry, &initial, &mut reader, &mut writer) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "Worker channel error");
            1
        }
    }
}
