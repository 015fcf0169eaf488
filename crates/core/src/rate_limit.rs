// Fixed-window call limiter keyed by arbitrary strings

use crate::hashing::fast_u64;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SHARD_COUNT: usize = 16;

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Length of a window in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Minimum spacing between expired-window sweeps
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_cleanup_interval_ms() -> u64 {
    300_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

impl Window {
    fn is_live(&self, now: Instant) -> bool {
        now <= self.reset_at
    }
}

/// Per-key call limiter.
///
/// Windows live in sharded maps so unrelated keys rarely contend. Expired
/// windows are swept lazily from [`RateLimiter::check`]; there is no
/// background task.
pub struct RateLimiter {
    shards: Vec<Mutex<HashMap<String, Window>>>,
    window: Duration,
    cleanup_interval: Duration,
    last_cleanup: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            window: Duration::from_millis(config.window_ms),
            cleanup_interval: Duration::from_millis(config.cleanup_interval_ms),
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, Window>> {
        &self.shards[(fast_u64(key) % SHARD_COUNT as u64) as usize]
    }

    /// Record a call against `key`. Returns `false` once `max_per_window`
    /// calls have been allowed in the current window; a denied call does not
    /// count.
    pub fn check(&self, key: &str, max_per_window: u32) -> bool {
        let now = Instant::now();
        self.maybe_cleanup(now);

        if max_per_window == 0 {
            return false;
        }

        let mut shard = self.shard(key).lock();
        match shard.get_mut(key) {
            Some(window) if window.is_live(now) => {
                if window.count < max_per_window {
                    window.count += 1;
                    true
                } else {
                    false
                }
            }
            _ => {
                shard.insert(
                    key.to_string(),
                    Window {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                true
            }
        }
    }

    /// Calls left for `key` in its current window
    pub fn remaining(&self, key: &str, max_per_window: u32) -> u32 {
        let now = Instant::now();
        match self.shard(key).lock().get(key) {
            Some(window) if window.is_live(now) => max_per_window.saturating_sub(window.count),
            _ => max_per_window,
        }
    }

    /// Time until the current window for `key` resets, if one is open
    pub fn reset_after(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        match self.shard(key).lock().get(key) {
            Some(window) if window.is_live(now) => Some(window.reset_at.saturating_duration_since(now)),
            _ => None,
        }
    }

    pub fn reset(&self, key: &str) {
        self.shard(key).lock().remove(key);
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Number of tracked windows, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maybe_cleanup(&self, now: Instant) {
        // Another caller is already sweeping.
        let Some(mut last) = self.last_cleanup.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last) < self.cleanup_interval {
            return;
        }
        *last = now;
        drop(last);

        let mut purged = 0usize;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|_, window| window.is_live(now));
            purged += before - shard.len();
        }
        if purged > 0 {
            tracing::debug!("Purged {} expired rate limit windows", purged);
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Build a limiter for the composition root to own and share.
pub fn create_rate_limiter(config: RateLimitConfig) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(config))
}
