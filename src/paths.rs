//! Path utilities for worker artifacts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Extension of generated worker scripts.
pub const ARTIFACT_EXTENSION: &str = "sh";

/// Get the default directory for worker artifacts.
///
/// Uses the per-user runtime directory when the platform has one
/// (`$XDG_RUNTIME_DIR/procpool` on Linux), otherwise the system temp dir.
pub fn default_work_dir() -> PathBuf {
    dirs::runtime_dir()
        .map(|d| d.join("procpool"))
        .unwrap_or_else(|| std::env::temp_dir().join("procpool"))
}

/// Names handed out by [`default_artifact_name`] in this process.
static ARTIFACT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Default artifact stem for `task`: `<task>-<unix millis>-<pid>-<seq>`.
///
/// Distinct on every call within one process.
///
/// ```
/// let a = procpool::paths::default_artifact_name("resize");
/// let b = procpool::paths::default_artifact_name("resize");
/// assert!(a.starts_with("resize-"));
/// assert_ne!(a, b);
/// ```
pub fn default_artifact_name(task: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        task,
        chrono::Utc::now().timestamp_millis(),
        std::process::id(),
        ARTIFACT_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Full artifact path for a stem inside `work_dir`.
///
/// ```
/// use std::path::{Path, PathBuf};
/// use procpool::paths::artifact_path;
///
/// assert_eq!(
///     artifact_path(Path::new("/run/user/1000/procpool"), "echo-1"),
///     PathBuf::from("/run/user/1000/procpool/echo-1.sh")
/// );
/// ```
pub fn artifact_path<P: AsRef<Path>>(work_dir: P, name: &str) -> PathBuf {
    work_dir
        .as_ref()
        .join(format!("{}.{}", name, ARTIFACT_EXTENSION))
}

/// Whether `name` is a bare file name (no separators, not `.` or `..`).
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\0')
}

/// Expands a leading `~` in a path to the user's home directory.
///
/// This handles the common case where shell tilde expansion doesn't occur,
/// such as when using `--work-dir=~/path` syntax instead of `--work-dir ~/path`.
///
/// ```
/// use std::path::PathBuf;
/// use procpool::paths::expand_tilde;
///
/// let path = PathBuf::from("/tmp/foo");
/// assert_eq!(expand_tilde(&path), path);
/// ```
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}

/// Ensures `dir` exists, creating it and any missing parents.
pub fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_work_dir_is_namespaced() {
        let dir = default_work_dir();
        assert!(dir.ends_with("procpool"));
    }

    #[test]
    fn test_default_artifact_name_is_prefixed_with_task() {
        let name = default_artifact_name("append");
        assert!(name.starts_with("append-"));
        assert!(is_plain_file_name(&name));
    }

    #[test]
    fn test_default_artifact_names_never_repeat() {
        let names: std::collections::HashSet<String> =
            (0..1000).map(|_| default_artifact_name("echo")).collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn test_artifact_path_keeps_dots_in_stem() {
        let path = artifact_path("/tmp", "job.v2");
        assert_eq!(path, PathBuf::from("/tmp/job.v2.sh"));
    }

    #[test]
    fn test_plain_file_name() {
        assert!(is_plain_file_name("job-1"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("a/b"));
    }

    #[test]
    fn test_expand_tilde_with_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/work"), home.join("work"));
        }
    }

    #[test]
    fn test_ensure_dir_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }
}
