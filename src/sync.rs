//! Named locks with lease expiry
//!
//! Serializes capture requests per tab and throttles the shared encode
//! worker. A lock is a named lease: whoever holds the key owns it until
//! they release it or the lease expires, so an abandoned lock from a
//! crashed task never disables a tab permanently.
//!
//! The table is injected as a collaborator (`Arc<LockTable>`), never a
//! module-level singleton.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use pagestitch::sync::LockTable;
//!
//! #[tokio::main]
//! async fn main() {
//!     let locks = LockTable::new();
//!     assert!(locks.try_acquire("capture:1", Duration::from_secs(300)).await);
//!     assert!(!locks.try_acquire("capture:1", Duration::from_secs(300)).await);
//!     locks.release("capture:1").await;
//!     assert!(locks.try_acquire("capture:1", Duration::from_secs(300)).await);
//! }
//! ```

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{
    sync::{Mutex, Notify},
    time::Instant,
};

use crate::{
    error::{StitchError, StitchResult},
    model::TabId,
};

/// Lease on a tab's capture lock; long enough for the slowest stitched
/// capture, short enough to recover a tab after a crash.
pub const TAB_CAPTURE_LEASE: Duration = Duration::from_secs(5 * 60);

/// Lease on the shared encode worker; raw-buffer encodes of very large
/// regions can legitimately take minutes.
pub const ENCODE_WORKER_LEASE: Duration = Duration::from_secs(15 * 60);

/// Key of the single shared encode-worker lock
pub const ENCODE_WORKER_KEY: &str = "encode-worker";

/// Key of the per-tab capture lock
pub fn tab_capture_key(tab: TabId) -> String {
    format!("capture:{tab}")
}

#[derive(Debug)]
struct LockEntry {
    holder:     u64,
    expires_at: Instant,
}

impl LockEntry {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Table of named leases.
///
/// At most one holder per key at any instant; an expired lease counts as
/// released, so a new acquirer may take over even if the old holder never
/// called [`release`](LockTable::release).
#[derive(Debug, Default)]
pub struct LockTable {
    entries:     Mutex<HashMap<String, LockEntry>>,
    freed:       Notify,
    next_holder: AtomicU64,
}

impl LockTable {
    /// Creates an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquire.
    ///
    /// Returns true iff the key was free (or its lease had expired) and is
    /// now held by the caller.
    pub async fn try_acquire(&self, key: &str, lease: Duration) -> bool {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if !entry.expired(now) => false,
            stale => {
                if let Some(entry) = stale {
                    tracing::warn!(key, holder = entry.holder, "reclaiming expired lock lease");
                }
                let holder = self.next_holder.fetch_add(1, Ordering::Relaxed);
                entries.insert(key.to_string(), LockEntry {
                    holder,
                    expires_at: now + lease,
                });
                true
            }
        }
    }

    /// Blocking acquire.
    ///
    /// Waits, without busy-spinning, until the key becomes free or the
    /// current holder's lease expires, then takes the lock.
    ///
    /// # Errors
    ///
    /// [`StitchError::LockTimeout`] if `timeout` elapses first.
    pub async fn acquire(&self, key: &str, lease: Duration, timeout: Duration) -> StitchResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before re-checking so a release between
            // the check and the wait is not missed.
            let notified = self.freed.notified();

            let holder_expiry = {
                let mut entries = self.entries.lock().await;
                let now = Instant::now();
                match entries.get(key) {
                    Some(entry) if !entry.expired(now) => Some(entry.expires_at),
                    _ => {
                        let holder = self.next_holder.fetch_add(1, Ordering::Relaxed);
                        entries.insert(key.to_string(), LockEntry {
                            holder,
                            expires_at: now + lease,
                        });
                        None
                    }
                }
            };

            let Some(expires_at) = holder_expiry else {
                return Ok(());
            };

            let wake_at = expires_at.min(deadline);
            if Instant::now() >= deadline {
                return Err(StitchError::LockTimeout {
                    key:         key.to_string(),
                    duration_ms: timeout.as_millis() as u64,
                });
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }

            if Instant::now() >= deadline {
                return Err(StitchError::LockTimeout {
                    key:         key.to_string(),
                    duration_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Clears ownership of `key` unconditionally.
    ///
    /// Idempotent: releasing an unheld key is a no-op.
    pub async fn release(&self, key: &str) {
        let removed = self.entries.lock().await.remove(key);
        if removed.is_some() {
            tracing::debug!(key, "lock released");
        }
        self.freed.notify_waiters();
    }

    /// True if the key currently has an unexpired holder
    pub async fn is_held(&self, key: &str) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .is_some_and(|entry| !entry.expired(Instant::now()))
    }
}
