//! Per-IP request rate guard
//!
//! Fixed-window counters keyed by client address. Windows reset lazily
//! on the next request after expiry, so the map never needs a sweeper
//! for correctness; `prune` keeps it from growing with one-shot clients.

use chrono::{DateTime, Duration, Utc};
use std::net::IpAddr;

struct Window {
    started: DateTime<Utc>,
    count: u32,
}

pub struct RateGuard {
    max_requests: u32,
    window: Duration,
    windows: dashmap::DashMap<IpAddr, Window>,
}

impl RateGuard {
    pub fn new(max_requests: u32, window_sec: u64) -> Self {
        Self {
            max_requests,
            window: Duration::seconds(window_sec as i64),
            windows: dashmap::DashMap::new(),
        }
    }

    /// Returns false when the client is over its window budget.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Utc::now();
        let mut entry = self.windows.entry(ip).or_insert_with(|| Window {
            started: now,
            count: 0,
        });
        if now - entry.started > self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.max_requests
    }

    /// Drop windows that expired before the last full period.
    pub fn prune(&self) {
        let horizon = Utc::now() - self.window;
        self.windows.retain(|_, w| w.started >= horizon);
    }
}
