//! IPC protocol between the pool and its worker processes.
//!
//! Controller to worker: the first parameter travels as the worker's argv,
//! every later one as a newline-delimited JSON [`ControlMessage`] on stdin.
//! Worker to controller: one literal token per finished assignment on stdout,
//! either `finish` or `failed`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque parameter set for one unit of work.
///
/// Any JSON value is accepted; the pool never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskParam(serde_json::Value);

impl TaskParam {
    /// Wrap a JSON value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Borrow the underlying JSON value.
    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consume into the underlying JSON value.
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Encode as a single argv element for the worker's first task.
    pub fn to_arg(&self) -> String {
        self.0.to_string()
    }

    /// Rebuild a parameter from the argv the worker was started with.
    ///
    /// A single element is parsed as JSON, falling back to a plain string.
    /// Several elements become an array, each parsed the same way.
    pub fn from_args(args: &[String]) -> Self {
        fn parse(arg: &str) -> serde_json::Value {
            serde_json::from_str(arg).unwrap_or_else(|_| serde_json::Value::String(arg.to_string()))
        }

        match args {
            [] => Self(serde_json::Value::Null),
            [single] => Self(parse(single)),
            many => Self(serde_json::Value::Array(
                many.iter().map(|a| parse(a)).collect(),
            )),
        }
    }
}

impl From<serde_json::Value> for TaskParam {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message from the pool to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Run the task again with a new parameter set.
    #[serde(rename = "assign")]
    Assign { params: TaskParam },

    /// Graceful shutdown request.
    #[serde(rename = "exit")]
    Exit,
}

impl ControlMessage {
    /// Create an assignment message.
    pub fn assign(params: TaskParam) -> Self {
        Self::Assign { params }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Completion signal a worker sends after each assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerSignal {
    /// The task body returned successfully.
    Finish,
    /// The task body returned an error or panicked.
    Failed,
}

impl WorkerSignal {
    /// The literal wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finish => "finish",
            Self::Failed => "failed",
        }
    }

    /// Wire line (token plus newline).
    pub fn to_line(self) -> String {
        format!("{}\n", self.as_str())
    }
}

impl fmt::Display for WorkerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "finish" => Ok(Self::Finish),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown worker signal: '{}'", other)),
        }
    }
}
