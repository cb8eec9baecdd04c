//! Generated worker entry point.
//!
//! Every worker of a pool runs the same script, written once before the
//! first spawn:
//!
//! ```text
//! <dependency preamble, verbatim>
//! <bootstrap template>
//! procpool_run '<task>' "$@"
//! ```
//!
//! The preamble prepares the environment (exports, `cd`, `ulimit`), the
//! bootstrap defines `procpool_run`, and the task body hands control to the
//! worker executable with the task name and the initial argv.

use super::registry::is_valid_task_name;
use crate::error::{ArtifactStage, PoolError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Fixed bootstrap shared by every artifact.
///
/// Must stay in sync with [`super::signals::EXIT_NO_WORKER_EXE`].
pub const BOOTSTRAP_TEMPLATE: &str = r#"
# --- procpool bootstrap ---
procpool_run() {
    procpool_task="$1"
    shift
    if [ -z "${PROCPOOL_WORKER_EXE:-}" ]; then
        echo "procpool: PROCPOOL_WORKER_EXE is not set" >&2
        exit 70
    fi
    exec "$PROCPOOL_WORKER_EXE" internal-worker --task "$procpool_task" -- "$@"
}
# --- end bootstrap ---
"#;

const ARTIFACT_MODE: u32 = 0o755;

/// The task-body section of an artifact: which registered task to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBody {
    task: String,
}

impl TaskBody {
    /// Body invoking the registered task `task`.
    pub fn new(task: &str) -> Result<Self> {
        if !is_valid_task_name(task) {
            return Err(PoolError::Config(format!(
                "task name '{}' must be non-empty and use only [A-Za-z0-9_.-]",
                task
            )));
        }
        Ok(Self {
            task: task.to_string(),
        })
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Script text for this body.
    pub fn render(&self) -> String {
        format!("procpool_run '{}' \"$@\"\n", self.task)
    }
}

/// An artifact on disk. Removed exactly once, by [`Artifact::remove`].
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the artifact. A file already gone counts as removed.
    pub fn remove(self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "Artifact already removed");
                Ok(())
            }
            Err(source) => Err(PoolError::Artifact {
                stage: ArtifactStage::Remove,
                path: self.path,
                source,
            }),
        }
    }
}

/// Write the artifact at `path`, replacing any existing file.
///
/// On failure the partially written file is removed.
pub fn build(path: &Path, preamble: &str, body: &TaskBody, template: &str) -> Result<Artifact> {
    let file = File::create(path).map_err(stage_error(ArtifactStage::Create, path))?;
    finish(path, body, write_file(file, path, preamble, body, template))
}

/// Like [`build`], but fails at [`ArtifactStage::Create`] instead of
/// touching a file that already exists at `path`.
pub fn build_new(path: &Path, preamble: &str, body: &TaskBody, template: &str) -> Result<Artifact> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(stage_error(ArtifactStage::Create, path))?;
    finish(path, body, write_file(file, path, preamble, body, template))
}

fn write_file(
    mut file: File,
    path: &Path,
    preamble: &str,
    body: &TaskBody,
    template: &str,
) -> Result<()> {
    write_sections(&mut file, path, preamble, body, template)?;
    file.sync_all()
        .map_err(stage_error(ArtifactStage::TaskBody, path))?;
    fs::set_permissions(path, fs::Permissions::from_mode(ARTIFACT_MODE))
        .map_err(stage_error(ArtifactStage::Permissions, path))
}

/// Hand out the artifact, or remove what was written if any section failed.
fn finish(path: &Path, body: &TaskBody, written: Result<()>) -> Result<Artifact> {
    if let Err(e) = written {
        if let Err(rm) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %rm, "Failed to remove partial artifact");
        }
        return Err(e);
    }

    tracing::debug!(path = %path.display(), task = body.task(), "Wrote worker artifact");
    Ok(Artifact {
        path: path.to_path_buf(),
    })
}

fn stage_error(stage: ArtifactStage, path: &Path) -> impl FnOnce(io::Error) -> PoolError + '_ {
    move |source| PoolError::Artifact {
        stage,
        path: path.to_path_buf(),
        source,
    }
}

fn write_sections<W: Write>(
    out: &mut W,
    path: &Path,
    preamble: &str,
    body: &TaskBody,
    template: &str,
) -> Result<()> {
    out.write_all(preamble.as_bytes())
        .and_then(|()| {
            if preamble.is_empty() || preamble.ends_with('\n') {
                Ok(())
            } else {
                out.write_all(b"\n")
            }
        })
        .map_err(stage_error(ArtifactStage::Preamble, path))?;

    out.write_all(template.as_bytes())
        .map_err(stage_error(ArtifactStage::Bootstrap, path))?;

    out.write_all(body.render().as_bytes())
        .and_then(|()| out.flush())
        .map_err(stage_error(ArtifactStage::TaskBody, path))?;

    Ok(())
}
