//! Sliding-window request throttle keyed by client
//!
//! Each client key owns the timestamps of its requests inside the window.
//! Records live in an [`LruMap`] capped at `max_entries`: a new key at
//! capacity evicts the oldest record, and every check on an existing key
//! moves it to the newest position. A background sweeper drops timestamps
//! that left the window and removes records that became empty.

use crate::config::RateLimitConfig;
use crate::lru::LruMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;

/// Source of the current time in milliseconds since the epoch
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the next request would be accepted; set when rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    fn reject(retry_after: u64) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }
}

/// Derived per-key state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClientState {
    Absent,
    Active { count: usize },
    Throttled { retry_after: u64 },
}

/// Store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub tracked_clients: usize,
    pub max_entries: usize,
    pub window_ms: i64,
    pub max_requests: usize,
    pub rejected: u64,
    pub evicted: u64,
}

#[derive(Default)]
struct Store {
    records: LruMap<String, VecDeque<i64>>,
    rejected: u64,
    evicted: u64,
}

/// Per-client sliding-window limiter
pub struct RateLimiter {
    store: Mutex<Store>,
    clock: Arc<dyn Clock>,
    window_ms: i64,
    max_requests: usize,
    max_entries: usize,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(Store {
                records: LruMap::with_capacity(config.max_entries.min(1024)),
                ..Default::default()
            }),
            clock,
            window_ms: config.window_ms,
            max_requests: config.max_requests,
            max_entries: config.max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a request for `key` if it is under the limit
    pub fn check(&self, key: &str) -> RateDecision {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        let store = &mut *guard;
        let key = key.to_string();

        if let Some(timestamps) = store.records.get_mut(&key) {
            prune(timestamps, now, self.window_ms);
            if timestamps.len() >= self.max_requests {
                let retry_after = self.retry_after(timestamps, now);
                store.rejected += 1;
                tracing::warn!(client = %key, retry_after, "rate limit exceeded");
                return RateDecision::reject(retry_after);
            }
            timestamps.push_back(now);
            return RateDecision::allow();
        }

        if self.max_requests == 0 {
            store.rejected += 1;
            return RateDecision::reject(self.retry_after(&VecDeque::new(), now));
        }

        while store.records.len() >= self.max_entries.max(1) {
            match store.records.pop_front() {
                Some((evicted, _)) => {
                    store.evicted += 1;
                    tracing::warn!(client = %evicted, "rate limit store full, evicting oldest record");
                }
                None => break,
            }
        }

        store.records.push_back(key, VecDeque::from([now]));
        RateDecision::allow()
    }

    fn retry_after(&self, timestamps: &VecDeque<i64>, now: i64) -> u64 {
        let oldest = timestamps.front().copied().unwrap_or(now);
        let wait_ms = (oldest + self.window_ms - now).max(0);
        let secs = (wait_ms as u64).div_ceil(1000);
        secs.max(1)
    }

    /// Current state of `key` without recording a request or touching it
    pub fn state(&self, key: &str) -> ClientState {
        let now = self.clock.now_millis();
        let store = self.lock();
        let Some(timestamps) = store.records.peek(&key.to_string()) else {
            return ClientState::Absent;
        };

        let live: VecDeque<i64> = timestamps
            .iter()
            .copied()
            .filter(|&t| t > now - self.window_ms)
            .collect();
        if live.is_empty() {
            ClientState::Absent
        } else if live.len() >= self.max_requests {
            ClientState::Throttled {
                retry_after: self.retry_after(&live, now),
            }
        } else {
            ClientState::Active { count: live.len() }
        }
    }

    /// Drop expired timestamps and remove records left empty.
    /// Returns the number of removed records.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut store = self.lock();
        let before = store.records.len();
        store.records.retain(|_, timestamps| {
            prune(timestamps, now, self.window_ms);
            !timestamps.is_empty()
        });
        let removed = before - store.records.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = store.records.len(), "rate limit sweep");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RateLimitStats {
        let store = self.lock();
        RateLimitStats {
            tracked_clients: store.records.len(),
            max_entries: self.max_entries,
            window_ms: self.window_ms,
            max_requests: self.max_requests,
            rejected: store.rejected,
            evicted: store.evicted,
        }
    }

    /// Start the periodic sweep. The task runs until the returned handle is
    /// shut down or dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let limiter = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sweeper(limiter, interval, shutdown_rx).await;
        });

        SweeperHandle {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

/// Timestamps at or before `now - window_ms` are out of the window
fn prune(timestamps: &mut VecDeque<i64>, now: i64, window_ms: i64) {
    let cutoff = now - window_ms;
    while timestamps.front().is_some_and(|&t| t <= cutoff) {
        timestamps.pop_front();
    }
}

async fn sweeper(limiter: Arc<RateLimiter>, interval: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut timer = time::interval(interval);
    // the first tick completes immediately
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                limiter.sweep();
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
    tracing::debug!("rate limit sweeper stopped");
}

/// Owns the sweeper task
pub struct SweeperHandle {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to finish
    pub async fn shutdown(mut self) {
        // dropping the sender wakes the task as well
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}
