//! OS-filesystem advisory lock backend, via exclusive file creation.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use gait_error::{ErrorCode, GaitError};

use crate::{LockGuard, LockManager};

/// Lock backend using exclusively-created `<key>.lock` files under a base
/// directory. A lock file older than `stale_after` is treated as
/// abandoned and reclaimed.
#[derive(Debug, Clone)]
pub struct FsLockManager {
    base_dir: PathBuf,
    stale_after: Duration,
}

impl FsLockManager {
    /// Create a lock manager rooted at `base_dir`, with a 5 minute
    /// default staleness window.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), stale_after: Duration::from_secs(300) }
    }

    /// Override the staleness window.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.lock"))
    }

    fn is_stale(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|elapsed| elapsed > self.stale_after)
            .unwrap_or(false)
    }
}

struct FsGuard {
    path: PathBuf,
}

impl LockGuard for FsGuard {}

impl Drop for FsGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl LockManager for FsLockManager {
    fn acquire(&self, key: &str, timeout: Duration) -> Result<Box<dyn LockGuard>, GaitError> {
        std::fs::create_dir_all(&self.base_dir)?;
        let path = self.lock_path(key);
        let deadline = Instant::now() + timeout;
        loop {
            match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    use std::io::Write as _;
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Box::new(FsGuard { path }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.is_stale(&path) {
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(GaitError::new(
                            ErrorCode::LockContention,
                            format!("timed out acquiring lock file for {key}"),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
