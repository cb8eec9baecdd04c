//! Built-in tasks shipped with the `procpool` binary.
//!
//! Workers exec back into the binary, so only tasks registered here can be
//! run from the CLI. Library users build their own [`TaskRegistry`] and
//! point [`crate::worker::PoolConfig::worker_exe`] at their own executable.

use crate::worker::{EXIT_BAD_ARGS, EXIT_NO_WORKER_EXE, EXIT_UNKNOWN_TASK, TaskParam, TaskRegistry};
use anyhow::{Context, bail};
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

/// Environment variable naming the file the `append` task writes to.
pub const SINK_ENV: &str = "PROCPOOL_SINK";

/// Registry holding every built-in task.
pub fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    let builtins: [(&str, &str, fn(&TaskParam) -> anyhow::Result<()>); 5] = [
        ("echo", "Log the parameter at info level", echo),
        (
            "append",
            "Append the parameter as a JSON line to $PROCPOOL_SINK",
            append,
        ),
        ("sleep", "Sleep for the given number of milliseconds", sleep),
        ("fail", "Always fail", fail),
        (
            "exit",
            "Exit the worker with the given code without reporting (reserved codes become 1)",
            exit,
        ),
    ];
    for (name, description, handler) in builtins {
        // Names are static and distinct
        let _ = registry.register(name, description, handler);
    }
    registry
}

fn echo(params: &TaskParam) -> anyhow::Result<()> {
    tracing::info!(%params, "echo");
    Ok(())
}

fn append(params: &TaskParam) -> anyhow::Result<()> {
    let sink = std::env::var_os(SINK_ENV)
        .with_context(|| format!("{} is not set", SINK_ENV))?;
    let mut line = params.value().to_string();
    line.push('\n');

    // One write per line so concurrent workers never interleave
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&sink)
        .with_context(|| format!("Failed to open sink {}", sink.to_string_lossy()))?;
    file.write_all(line.as_bytes())
        .context("Failed to write to sink")?;
    Ok(())
}

/// Milliseconds from either a bare number or `{"ms": N}`.
fn millis(params: &TaskParam) -> Option<u64> {
    let value = params.value();
    value
        .as_u64()
        .or_else(|| value.get("ms").and_then(|ms| ms.as_u64()))
}

fn sleep(params: &TaskParam) -> anyhow::Result<()> {
    let Some(ms) = millis(params) else {
        bail!("sleep expects a number of milliseconds, got {}", params);
    };
    std::thread::sleep(Duration::from_millis(ms));
    Ok(())
}

fn fail(params: &TaskParam) -> anyhow::Result<()> {
    bail!("task failed on {}", params)
}

/// Exit status for the `exit` task.
///
/// Codes the pool reads as a broken bootstrap are mapped to 1 so the
/// parameter counts as a crash and is retried.
fn exit_code(params: &TaskParam) -> i32 {
    let code = params
        .value()
        .as_i64()
        .and_then(|c| i32::try_from(c).ok())
        .unwrap_or(1);
    match code {
        EXIT_BAD_ARGS | EXIT_UNKNOWN_TASK | EXIT_NO_WORKER_EXE => 1,
        code => code,
    }
}

fn exit(params: &TaskParam) -> anyhow::Result<()> {
    let code = exit_code(params);
    tracing::warn!(code, "Exiting worker on request");
    std::process::exit(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;

    #[test]
    fn test_registry_lists_builtins_sorted() {
        let registry = registry();
        assert_eq!(
            registry.names(),
            vec!["append", "echo", "exit", "fail", "sleep"]
        );
    }

    #[test]
    fn test_echo_and_fail() {
        let registry = registry();
        let param = TaskParam::new(json!({"id": 1}));
        assert!(registry.get("echo").unwrap().run(&param).is_ok());

        let err = registry.get("fail").unwrap().run(&param).unwrap_err();
        assert!(err.to_string().contains("\"id\":1"));
    }

    #[test]
    fn test_sleep_accepts_number_or_object() {
        assert_eq!(millis(&TaskParam::new(json!(5))), Some(5));
        assert_eq!(millis(&TaskParam::new(json!({"ms": 7}))), Some(7));
        assert_eq!(millis(&TaskParam::new(json!("soon"))), None);

        let registry = registry();
        let sleep = registry.get("sleep").unwrap();
        assert!(sleep.run(&TaskParam::new(json!(1))).is_ok());
        assert!(sleep.run(&TaskParam::new(json!(-1))).is_err());
    }

    #[test]
    fn test_exit_code_avoids_bootstrap_codes() {
        let code = |v| exit_code(&TaskParam::new(v));
        assert_eq!(code(json!(9)), 9);
        assert_eq!(code(json!(0)), 0);
        assert_eq!(code(json!(2)), 1);
        assert_eq!(code(json!(3)), 1);
        assert_eq!(code(json!(70)), 1);
        assert_eq!(code(json!("x")), 1);
        assert_eq!(code(json!(i64::MAX)), 1);
    }

    #[test]
    #[serial(env)]
    fn test_append_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("sink.jsonl");
        unsafe { std::env::set_var(SINK_ENV, &sink) };

        let registry = registry();
        let append = registry.get("append").unwrap();
        append.run(&TaskParam::new(json!([1]))).unwrap();
        append.run(&TaskParam::new(json!({"k": "v"}))).unwrap();

        let contents = std::fs::read_to_string(&sink).unwrap();
        assert_eq!(contents, "[1]\n{\"k\":\"v\"}\n");

        unsafe { std::env::remove_var(SINK_ENV) };
        assert!(append.run(&TaskParam::new(json!(1))).is_err());
    }
}
