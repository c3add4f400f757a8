//! Advisory file locking via `flock(2)` and atomic replace-on-write.
//!
//! Uses raw `libc::flock` instead of RAII lock wrappers to avoid the
//! self-referential struct problem: an RAII guard borrows the lock owner,
//! making it impossible to store both in the same struct without lifetime
//! gymnastics. Owning the `File` (which owns the fd) is enough; `Drop`
//! calls `flock(fd, LOCK_UN)` to release.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Diagnostic information written into lock files.
#[derive(Debug, Serialize, Deserialize)]
struct LockDiagnostic {
    pid: u32,
    purpose: String,
    acquired_at: DateTime<Utc>,
}

/// Guard for an advisory lock on a path.
///
/// Holds the open `File` whose fd carries the lock. The lock protects the
/// *logical* path it was derived from (e.g. a client config file); the lock
/// file itself is a sibling `<path>.lock`.
pub struct PathLock {
    file: File,
    lock_path: PathBuf,
}

impl std::fmt::Debug for PathLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `self.file`. LOCK_UN
        // releases the advisory lock; if it fails the lock still drops with
        // the fd moments later.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl PathLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Lock file path for a protected path: sibling `<file>.lock`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

/// Acquire a blocking exclusive advisory lock protecting `path`.
///
/// Serializes writers across processes. The parent directory is created if
/// missing. `purpose` lands in the lock file for diagnostics.
pub fn lock_path(path: &Path, purpose: &str) -> Result<PathLock> {
    acquire(path, purpose, false)
}

/// Non-blocking variant; fails immediately when another process holds the lock.
pub fn try_lock_path(path: &Path, purpose: &str) -> Result<PathLock> {
    acquire(path, purpose, true)
}

fn acquire(path: &Path, purpose: &str, nonblocking: bool) -> Result<PathLock> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let lock_path = lock_path_for(path);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;

    let fd = file.as_raw_fd();
    let mut op = libc::LOCK_EX;
    if nonblocking {
        op |= libc::LOCK_NB;
    }

    // SAFETY: `fd` is a valid descriptor from the file just opened; the
    // return value is checked below.
    let ret = unsafe { libc::flock(fd, op) };
    if ret != 0 {
        let held_by = read_diagnostic(&lock_path)
            .map(|d| format!(" (held by pid {})", d.pid))
            .unwrap_or_default();
        anyhow::bail!(
            "could not lock {}{held_by}: {}",
            lock_path.display(),
            std::io::Error::last_os_error()
        );
    }

    let mut lock = PathLock { file, lock_path };
    let diagnostic = LockDiagnostic {
        pid: std::process::id(),
        purpose: purpose.to_string(),
        acquired_at: Utc::now(),
    };
    // Diagnostics are best effort; the flock is what matters.
    if let Ok(json) = serde_json::to_string(&diagnostic) {
        let _ = lock.file.set_len(0);
        let _ = lock.file.write_all(json.as_bytes());
        let _ = lock.file.flush();
    }
    Ok(lock)
}

fn read_diagnostic(lock_path: &Path) -> Option<LockDiagnostic> {
    let content = std::fs::read_to_string(lock_path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Atomically replace `path` with `contents` (temp file + rename).
///
/// The temp file is created in the target's directory so the rename never
/// crosses filesystems. Readers observe either the old or the new content,
/// never a truncated file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_then_try_lock_same_process_succeeds_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("config.json");
        let guard = lock_path(&target, "test").unwrap();
        assert!(guard.lock_path().ends_with("config.json.lock"));
        drop(guard);
        // Reacquirable once released.
        let guard = try_lock_path(&target, "test").unwrap();
        drop(guard);
    }

    #[test]
    fn test_lock_file_carries_pid_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.json");
        let guard = lock_path(&target, "unit-test").unwrap();
        let content = std::fs::read_to_string(guard.lock_path()).unwrap();
        let diag: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(diag["pid"], std::process::id());
        assert_eq!(diag["purpose"], "unit-test");
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sub").join("file.json");
        atomic_write(&target, b"{\"a\":1}").unwrap();
        atomic_write(&target, b"{\"a\":2}").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"a\":2}");
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_droppings() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.json");
        atomic_write(&target, b"x").unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("file.json")]);
    }
}
