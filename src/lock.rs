//! Directory locking and atomic writes for the task store
//!
//! Writers serialize on a marker file inside the task directory:
//! - The marker is locked under a temp name, then hard-linked into place,
//!   so exactly one caller wins and the winner's fs2 lock is never absent
//! - A marker whose advisory lock is free (holder died) is reclaimed
//!   once it is older than the stale grace period
//! - Dropping the guard removes the marker on every exit path

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::config::StoreSettings;
use crate::error::{Error, Result};

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Default retry interval when waiting for a lock
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Default age before an unheld marker is reclaimed
pub const DEFAULT_STALE_GRACE_MS: u64 = 1000;

/// Polling and timeout budget for [`DirLock::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub stale_grace: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            stale_grace: Duration::from_millis(DEFAULT_STALE_GRACE_MS),
        }
    }
}

impl LockOptions {
    pub fn new(poll_interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            ..Self::default()
        }
    }
}

/// Diagnostic body written into the marker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkerInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl MarkerInfo {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    fn describe(&self) -> String {
        format!("pid {} since {}", self.pid, self.acquired_at.to_rfc3339())
    }
}

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // On Windows, fs2/libc can surface lock/sharing violations as "Other".
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// Held directory lock. Removes the marker when dropped.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    marker: PathBuf,
}

impl DirLock {
    /// Acquire the marker, polling until `options.timeout` elapses.
    pub fn acquire(marker: impl AsRef<Path>, options: &LockOptions) -> Result<Self> {
        let marker = marker.as_ref();
        let start = Instant::now();

        loop {
            if let Some(lock) = Self::try_acquire(marker, options.stale_grace)? {
                tracing::debug!(
                    marker = %marker.display(),
                    waited_ms = start.elapsed().as_millis() as u64,
                    "lock acquired"
                );
                return Ok(lock);
            }

            let waited = start.elapsed();
            if waited >= options.timeout {
                let holder = read_marker(marker).map(|info| info.describe());
                tracing::warn!(marker = %marker.display(), ?holder, "lock timed out");
                return Err(Error::LockTimeout {
                    path: marker.to_path_buf(),
                    waited_ms: waited.as_millis() as u64,
                    holder,
                });
            }

            let remaining = options.timeout - waited;
            std::thread::sleep(options.poll_interval.min(remaining));
        }
    }

    /// Single acquisition attempt.
    ///
    /// Returns `Ok(None)` while another live holder owns the marker.
    pub fn try_acquire(marker: impl AsRef<Path>, stale_grace: Duration) -> Result<Option<Self>> {
        let marker = marker.as_ref();

        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Some(lock) = Self::create_marker(marker)? {
            return Ok(Some(lock));
        }
        if reclaim_if_stale(marker, stale_grace)? {
            // Losing the race to another contender just means Ok(None).
            return Self::create_marker(marker);
        }
        Ok(None)
    }

    /// Publish a marker that is already locked.
    ///
    /// The body is written and locked under a private temp name, then
    /// hard-linked into place. A contender can never open the marker while
    /// its advisory lock is still free.
    fn create_marker(marker: &Path) -> Result<Option<Self>> {
        let staged = temp_sibling(marker);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&staged)?;

        let published = file
            .lock_exclusive()
            .map_err(Error::Io)
            .and_then(|()| {
                let body = serde_json::to_string(&MarkerInfo::current())?;
                file.write_all(body.as_bytes())?;
                file.sync_all()?;
                Ok(())
            })
            .and_then(|()| match fs::hard_link(&staged, marker) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
                Err(err) => Err(Error::Io(err)),
            });
        let _ = fs::remove_file(&staged);

        if published? {
            Ok(Some(DirLock {
                file,
                marker: marker.to_path_buf(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Get the path to the marker file
    pub fn path(&self) -> &Path {
        &self.marker
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // Remove while still holding the advisory lock so no contender can
        // mistake a releasing holder for a dead one.
        let _ = fs::remove_file(&self.marker);
        let _ = self.file.unlock();
    }
}

/// Read the diagnostic body of a marker, if any.
pub fn read_marker(marker: &Path) -> Option<MarkerInfo> {
    let content = fs::read_to_string(marker).ok()?;
    serde_json::from_str(content.trim()).ok()
}

/// Remove `marker` when its holder is gone. Returns whether the path is now free.
fn reclaim_if_stale(marker: &Path, stale_grace: Duration) -> Result<bool> {
    let file = match OpenOptions::new().read(true).write(true).open(marker) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(Error::Io(err)),
    };

    match file.try_lock_exclusive() {
        Ok(()) => {}
        Err(err) if is_lock_contended(&err) => return Ok(false),
        Err(err) => return Err(Error::Io(err)),
    }

    let meta = file.metadata()?;
    let age = meta
        .modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .unwrap_or_default();
    if age < stale_grace {
        return Ok(false);
    }

    if !still_names(marker, &meta)? {
        return Ok(false);
    }

    match fs::remove_file(marker) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(Error::Io(err)),
    }
    tracing::warn!(
        marker = %marker.display(),
        age_ms = age.as_millis() as u64,
        holder = ?read_marker_from(&file),
        "reclaimed stale lock marker"
    );
    Ok(true)
}

fn read_marker_from(mut file: &File) -> Option<MarkerInfo> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    serde_json::from_str(content.trim()).ok()
}

#[cfg(unix)]
fn still_names(marker: &Path, opened: &fs::Metadata) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;
    match fs::metadata(marker) {
        Ok(current) => Ok(current.ino() == opened.ino() && current.dev() == opened.dev()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::Io(err)),
    }
}

#[cfg(not(unix))]
fn still_names(marker: &Path, _opened: &fs::Metadata) -> Result<bool> {
    Ok(marker.exists())
}

/// Create the task directory and an empty active file if missing.
pub fn ensure_store_files(tasks_dir: &Path, active_path: &Path) -> Result<()> {
    fs::create_dir_all(tasks_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(active_path)?;
    Ok(())
}

/// Run `f` while holding the store lock.
///
/// The store files are initialized before the first attempt. A panic inside
/// `f` comes back as [`Error::CallbackPanicked`]; the marker is removed
/// either way.
pub fn with_lock<T, F>(settings: &StoreSettings, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    ensure_store_files(&settings.tasks_dir, &settings.active_path)?;
    let _lock = DirLock::acquire(&settings.lock_path, &settings.lock)?;

    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(marker = %settings.lock_path.display(), %message, "locked operation panicked");
            Err(Error::CallbackPanicked(message))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Unique `.{name}.{uuid}.tmp` path next to `path`.
fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record");
    path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
}

/// Atomically write data to a file
///
/// This writes to a uniquely named temporary file in the same directory,
/// then renames it over the target. Readers see the old or the new content,
/// never a partial write.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(path);

    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::Io(err));
    }

    Ok(())
}
