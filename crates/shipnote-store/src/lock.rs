use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LockError {
    /// Another live invocation holds the lock. Recoverable: retry later.
    #[error("another shipnote invocation holds the run lock")]
    Busy,
    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exclusive-run guard around the pipeline's critical section.
///
/// The file implementation below is the real thing; tests substitute an
/// in-memory fake with the same contract.
pub trait RunLock {
    fn acquire(&self, timeout: Duration) -> Result<Box<dyn LockHandle>, LockError>;
}

/// Held lock. Dropping it releases the lock (owner-checked for the file
/// implementation).
pub trait LockHandle: Send {}

/// Holder metadata written into the marker file.
#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    pid: u32,
    token: String,
    acquired_at: String,
}

/// Marker-file lock with staleness reclamation.
///
/// A marker is stale when its holder process is no longer alive or the
/// marker's age exceeds `stale_after`; reclaiming logs the takeover.
pub struct FileRunLock {
    path: PathBuf,
    stale_after: Duration,
}

impl FileRunLock {
    pub fn new(path: PathBuf, stale_after: Duration) -> Self {
        Self { path, stale_after }
    }

    fn try_create(&self) -> Result<Option<FileLockHandle>, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.try_lock_exclusive()?;
        let holder = LockHolder {
            pid: std::process::id(),
            token: ulid::Ulid::new().to_string(),
            acquired_at: crate::utc_now(),
        };
        let data = serde_json::to_string_pretty(&holder).map_err(std::io::Error::other)?;
        file.write_all(data.as_bytes())?;
        file.flush()?;
        Ok(Some(FileLockHandle {
            path: self.path.clone(),
            token: holder.token,
            _file: file,
        }))
    }

    fn marker_is_stale(&self, contents: &str) -> bool {
        let holder: Option<LockHolder> = serde_json::from_str(contents).ok();
        if let Some(holder) = &holder {
            if !pid_alive(holder.pid) {
                return true;
            }
        }
        let age = marker_age(&self.path, holder.as_ref());
        matches!(age, Some(age) if age > self.stale_after)
    }

    /// Delete the marker only if it still holds the bytes the staleness
    /// check saw. A marker that changed hands in between belongs to a new
    /// live holder and must survive, same owner-check discipline as release.
    fn remove_if_unchanged(&self, snapshot: &str) -> Result<(), LockError> {
        match fs::read_to_string(&self.path) {
            Ok(current) if current == snapshot => match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl RunLock for FileRunLock {
    fn acquire(&self, timeout: Duration) -> Result<Box<dyn LockHandle>, LockError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(handle) = self.try_create()? {
                return Ok(Box::new(handle));
            }
            let Ok(snapshot) = fs::read_to_string(&self.path) else {
                // Marker vanished between create and read; retry the create.
                continue;
            };
            if self.marker_is_stale(&snapshot) {
                warn!(path = %self.path.display(), "reclaiming stale run lock");
                self.remove_if_unchanged(&snapshot)?;
                continue;
            }
            if Instant::now() >= deadline {
                return Err(LockError::Busy);
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

pub struct FileLockHandle {
    path: PathBuf,
    token: String,
    _file: fs::File,
}

impl LockHandle for FileLockHandle {}

impl Drop for FileLockHandle {
    fn drop(&mut self) {
        // Owner check: never remove a marker re-created by a newer holder
        // after a stale reclaim.
        let owned = fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str::<LockHolder>(&text).ok())
            .is_some_and(|holder| holder.token == self.token);
        if owned {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Liveness probe for the recorded holder pid. On systems without /proc the
/// age threshold is the only staleness signal.
fn pid_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if !proc_root.is_dir() {
        return true;
    }
    proc_root.join(pid.to_string()).exists()
}

/// Marker age from the recorded timestamp, falling back to file mtime.
fn marker_age(path: &Path, holder: Option<&LockHolder>) -> Option<Duration> {
    if let Some(holder) = holder {
        if let Ok(acquired) = time::OffsetDateTime::parse(
            &holder.acquired_at,
            &time::format_description::well_known::Rfc3339,
        ) {
            let delta = time::OffsetDateTime::now_utc() - acquired;
            return Some(delta.try_into().unwrap_or(Duration::ZERO));
        }
    }
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    modified.elapsed().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_lock(dir: &Path) -> FileRunLock {
        FileRunLock::new(dir.join("runtime.lock"), Duration::from_secs(3600))
    }

    #[test]
    fn acquire_creates_marker_and_release_removes_it() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = file_lock(tmp.path());
        let handle = lock.acquire(Duration::ZERO).unwrap();
        assert!(tmp.path().join("runtime.lock").exists());
        drop(handle);
        assert!(!tmp.path().join("runtime.lock").exists());
    }

    #[test]
    fn second_acquirer_observes_busy_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = file_lock(tmp.path());
        let _held = lock.acquire(Duration::ZERO).unwrap();
        let second = FileRunLock::new(
            tmp.path().join("runtime.lock"),
            Duration::from_secs(3600),
        );
        match second.acquire(Duration::ZERO) {
            Err(LockError::Busy) => {}
            other => panic!("expected Busy, got {other:?}", other = other.err()),
        }
    }

    #[test]
    fn reacquire_after_release_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = file_lock(tmp.path());
        drop(lock.acquire(Duration::ZERO).unwrap());
        lock.acquire(Duration::ZERO).unwrap();
    }

    #[test]
    fn dead_holder_marker_is_reclaimed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runtime.lock");
        let holder = LockHolder {
            // Kernel threads use pid numbers far below u32::MAX; this one
            // cannot belong to a live process.
            pid: u32::MAX - 1,
            token: "stale".into(),
            acquired_at: crate::utc_now(),
        };
        fs::write(&path, serde_json::to_string(&holder).unwrap()).unwrap();
        let lock = file_lock(tmp.path());
        // On systems without /proc, fall back to the age check instead.
        if Path::new("/proc").is_dir() {
            lock.acquire(Duration::ZERO).unwrap();
        }
    }

    #[test]
    fn expired_marker_is_reclaimed_by_age() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runtime.lock");
        let holder = LockHolder {
            pid: std::process::id(),
            token: "old".into(),
            acquired_at: "2001-01-01T00:00:00Z".into(),
        };
        fs::write(&path, serde_json::to_string(&holder).unwrap()).unwrap();
        let lock = FileRunLock::new(path.clone(), Duration::from_secs(1));
        lock.acquire(Duration::ZERO).unwrap();
    }

    #[test]
    fn release_skips_marker_owned_by_someone_else() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runtime.lock");
        let lock = FileRunLock::new(path.clone(), Duration::from_secs(3600));
        let handle = lock.acquire(Duration::ZERO).unwrap();
        // Simulate a newer holder overwriting the marker.
        let newer = LockHolder {
            pid: std::process::id(),
            token: "newer-holder".into(),
            acquired_at: crate::utc_now(),
        };
        fs::write(&path, serde_json::to_string(&newer).unwrap()).unwrap();
        drop(handle);
        assert!(path.exists(), "foreign marker must survive release");
    }

    #[test]
    fn reclaim_spares_marker_that_changed_hands() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runtime.lock");
        let stale = serde_json::to_string(&LockHolder {
            pid: u32::MAX - 1,
            token: "stale".into(),
            acquired_at: "2001-01-01T00:00:00Z".into(),
        })
        .unwrap();
        fs::write(&path, &stale).unwrap();
        let lock = FileRunLock::new(path.clone(), Duration::from_secs(1));
        assert!(lock.marker_is_stale(&stale));

        // Another contender reclaims first and a new live holder writes a
        // fresh marker before this contender gets to the delete.
        let fresh = serde_json::to_string(&LockHolder {
            pid: std::process::id(),
            token: "fresh".into(),
            acquired_at: crate::utc_now(),
        })
        .unwrap();
        fs::write(&path, &fresh).unwrap();

        lock.remove_if_unchanged(&stale).unwrap();
        assert!(path.exists(), "live holder's marker must survive");
        assert_eq!(fs::read_to_string(&path).unwrap(), fresh);
    }

    #[test]
    fn unreadable_marker_is_reclaimed_only_by_age() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runtime.lock");
        fs::write(&path, "not json").unwrap();
        let fresh = FileRunLock::new(path.clone(), Duration::from_secs(3600));
        assert!(matches!(fresh.acquire(Duration::ZERO), Err(LockError::Busy)));
        let impatient = FileRunLock::new(path, Duration::ZERO);
        impatient.acquire(Duration::ZERO).unwrap();
    }
}
