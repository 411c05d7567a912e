//! ID allocation and identifier helpers
//!
//! `IdAllocator` hands out strictly increasing integers backed by a counter
//! file. Writers in different processes coordinate through a lock marker
//! created with `create_new`; this is a spinlock over one shared filesystem,
//! not a distributed lock.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SubsecRound, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::{DevlogError, Result};

const COUNTER_FILE: &str = "id-counter";
const LOCK_FILE: &str = "id-counter.lock";

const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

/// Current time, UTC, truncated to milliseconds
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Render an integer id for humans: `#12`
pub fn format_for_display(id: u64) -> String {
    format!("#{}", id)
}

/// Parse `#12` or `12` back into an integer id
pub fn parse_display(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
    digits
        .parse::<u64>()
        .map_err(|_| DevlogError::InvalidId(format!("'{}' is not a devlog id", value)))
}

/// Filesystem-locked monotonic counter shared by every process pointed at
/// the same directory.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    dir: PathBuf,
    max_attempts: u32,
    retry_delay: Duration,
    stale_after: Duration,
}

/// Removes the lock marker when dropped, whatever happened while it was held.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release id lock");
        }
    }
}

impl IdAllocator {
    /// Create an allocator whose counter and lock live in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Override the lock retry budget. The delay grows linearly per attempt.
    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Locks older than this are considered abandoned and broken.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn counter_path(&self) -> PathBuf {
        self.dir.join(COUNTER_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Allocate the next id.
    pub async fn next(&self) -> Result<u64> {
        let _guard = self.acquire().await?;
        let next = self.read_counter().await? + 1;
        self.write_counter(next).await?;
        tracing::debug!(id = next, dir = %self.dir.display(), "Allocated id");
        Ok(next)
    }

    /// Last id handed out (0 when nothing has been allocated).
    pub async fn current_value(&self) -> Result<u64> {
        self.read_counter().await
    }

    /// Force the counter to `value`; the next allocation returns `value + 1`.
    pub async fn reset(&self, value: u64) -> Result<()> {
        let _guard = self.acquire().await?;
        self.write_counter(value).await
    }

    async fn acquire(&self) -> Result<LockGuard> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let lock_path = self.lock_path();

        for attempt in 1..=self.max_attempts {
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await;

            match opened {
                Ok(mut file) => {
                    let guard = LockGuard {
                        path: lock_path.clone(),
                    };
                    file.write_all(std::process::id().to_string().as_bytes()).await?;
                    return Ok(guard);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.is_stale(&lock_path).await {
                        self.break_stale(&lock_path).await;
                        continue;
                    }
                    tracing::debug!(attempt, path = %lock_path.display(), "Id lock busy, retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(DevlogError::LockTimeout {
            path: lock_path.display().to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Move a stale lock aside under a unique name. Only the waiter whose
    /// rename succeeds gets to delete it; a lock that turns out to be fresh
    /// (another waiter broke the stale one first) is linked back in place.
    async fn break_stale(&self, lock_path: &Path) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let tombstone = lock_path.with_extension(format!("lock.stale-{}-{}", std::process::id(), nanos));
        if let Err(e) = tokio::fs::rename(lock_path, &tombstone).await {
            tracing::debug!(path = %lock_path.display(), error = %e, "Stale id lock already broken");
            return;
        }

        if self.is_stale(&tombstone).await {
            tracing::warn!(path = %lock_path.display(), "Broke stale id lock");
        } else if let Err(e) = tokio::fs::hard_link(&tombstone, lock_path).await {
            tracing::warn!(path = %lock_path.display(), error = %e, "Failed to restore live id lock");
        }

        if let Err(e) = tokio::fs::remove_file(&tombstone).await {
            tracing::warn!(path = %tombstone.display(), error = %e, "Failed to remove stale id lock");
        }
    }

    async fn is_stale(&self, lock_path: &Path) -> bool {
        let modified = match tokio::fs::metadata(lock_path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.stale_after)
            .unwrap_or(false)
    }

    async fn read_counter(&self) -> Result<u64> {
        match tokio::fs::read_to_string(self.counter_path()).await {
            Ok(content) => match content.trim().parse::<u64>() {
                Ok(value) => Ok(value),
                Err(_) => {
                    // Lenient recovery: corrupt counter restarts from zero.
                    tracing::warn!(path = %self.counter_path().display(), "Counter file unparsable, restarting at 0");
                    Ok(0)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_counter(&self, value: u64) -> Result<()> {
        let tmp = self.dir.join(format!("{}.tmp", COUNTER_FILE));
        tokio::fs::write(&tmp, value.to_string()).await?;
        tokio::fs::rename(&tmp, self.counter_path()).await?;
        Ok(())
    }
}
