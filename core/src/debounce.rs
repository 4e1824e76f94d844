//! Duplicate-submission suppression.
//!
//! # Design
//! Each request is fingerprinted by [`checksum`] (method, URL, body). The
//! first request with a given checksum is admitted and its timestamp
//! recorded; a repeat within the debounce window is refused. Lookup and
//! record happen under one lock, so two near-simultaneous identical calls
//! cannot both pass.
//!
//! Expired entries are removed by a sweep task spawned on the first
//! [`Debouncer::admit`]. The task holds only a weak reference to the table,
//! keeps ticking until [`Debouncer::stop`] is called or the debouncer is
//! dropped, and never restarts after a stop. Timestamps use
//! `tokio::time::Instant`, so paused-clock tests drive it deterministically.
//!
//! # Fingerprint bounds
//! Bodies up to [`FULL_FINGERPRINT_LIMIT`] bytes are hashed whole. Larger
//! bodies hash only [`SAMPLE_LEN`] bytes from the head, middle and tail plus
//! the total length. Two different large payloads that agree on those three
//! samples and on length produce the same checksum and one of them will be
//! debounced. That collision is accepted in exchange for constant-cost
//! fingerprinting of large uploads.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::http::HttpMethod;

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(400);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(1000);

/// Bodies at or below this size are fingerprinted in full.
pub const FULL_FINGERPRINT_LIMIT: usize = 8 * 1024;
/// Bytes taken from each of head, middle and tail of larger bodies.
pub const SAMPLE_LEN: usize = 1024;
/// Shorter sweep intervals are raised to this; tokio intervals cannot be zero.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Hex SHA-256 over method, URL and a bounded body fingerprint.
pub fn checksum(method: HttpMethod, url: &str, body: Option<&[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(url.as_bytes());
    hasher.update([0u8]);
    if let Some(body) = body {
        let len = body.len();
        if len <= FULL_FINGERPRINT_LIMIT {
            hasher.update(body);
        } else {
            let mid = len / 2 - SAMPLE_LEN / 2;
            hasher.update(&body[..SAMPLE_LEN]);
            hasher.update(&body[mid..mid + SAMPLE_LEN]);
            hasher.update(&body[len - SAMPLE_LEN..]);
            hasher.update((len as u64).to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug)]
struct Table {
    window: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl Table {
    fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, seen| now.saturating_duration_since(*seen) < self.window);
        before - entries.len()
    }
}

#[derive(Debug)]
enum Sweeper {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

/// Table of recently admitted checksums, owned by one client.
#[derive(Debug)]
pub struct Debouncer {
    table: Arc<Table>,
    interval: Duration,
    sweeper: Mutex<Sweeper>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_SWEEP_INTERVAL)
    }
}

impl Debouncer {
    pub fn new(window: Duration, interval: Duration) -> Self {
        Self {
            table: Arc::new(Table {
                window,
                entries: Mutex::new(HashMap::new()),
            }),
            interval: interval.max(MIN_SWEEP_INTERVAL),
            sweeper: Mutex::new(Sweeper::Idle),
        }
    }

    pub fn window(&self) -> Duration {
        self.table.window
    }

    /// Admit `checksum` unless it was admitted less than one window ago.
    pub fn admit(&self, checksum: &str) -> bool {
        self.ensure_sweeper();
        let now = Instant::now();
        let mut entries = self.table.entries.lock();
        match entries.get(checksum) {
            Some(seen) if now.saturating_duration_since(*seen) < self.table.window => false,
            _ => {
                entries.insert(checksum.to_owned(), now);
                true
            }
        }
    }

    /// Remove expired entries now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.table.sweep(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.table.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the sweep task is alive.
    pub fn is_sweeping(&self) -> bool {
        matches!(&*self.sweeper.lock(), Sweeper::Running(handle) if !handle.is_finished())
    }

    /// Stop the sweep task for good. Admission keeps working; expired
    /// entries are then only replaced on their next admission.
    pub fn stop(&self) {
        let mut sweeper = self.sweeper.lock();
        if let Sweeper::Running(handle) = std::mem::replace(&mut *sweeper, Sweeper::Stopped) {
            handle.abort();
            tracing::debug!("debounce sweep stopped");
        }
    }

    fn ensure_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        match &*sweeper {
            Sweeper::Idle => {}
            Sweeper::Running(handle) if handle.is_finished() => {
                tracing::warn!("debounce sweep exited unexpectedly, restarting");
            }
            Sweeper::Running(_) | Sweeper::Stopped => return,
        }
        // Outside a runtime there is nothing to spawn on; try again next time.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let table = Arc::downgrade(&self.table);
        let interval = self.interval;
        *sweeper = Sweeper::Running(runtime.spawn(sweep_loop(table, interval)));
        tracing::debug!(interval_ms = interval.as_millis() as u64, "debounce sweep started");
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(table: Weak<Table>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        let now = ticker.tick().await;
        let Some(table) = table.upgrade() else {
            break;
        };
        let removed = table.sweep(now);
        if removed > 0 {
            tracing::debug!(removed, "swept expired debounce entries");
        }
    }
}
