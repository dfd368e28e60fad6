//! Store failure guard.
//!
//! After `threshold` consecutive store failures the guard opens and the
//! service stops calling the store for `cooldown`, answering from the
//! cascade alone. The first call after the cooldown is let through as a
//! probe; success closes the guard again.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug)]
pub struct StoreGuard {
    threshold: u32,
    cooldown: Duration,
    /// Consecutive failures (reset on success)
    consecutive_failures: AtomicU32,
    /// When the guard opened
    tripped_at: RwLock<Option<Instant>>,
}

impl StoreGuard {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            tripped_at: RwLock::new(None),
        }
    }

    /// Whether the store may be called now.
    pub fn allow(&self) -> bool {
        match *self.tripped_at.read() {
            None => true,
            Some(tripped) => tripped.elapsed() >= self.cooldown,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.allow()
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        if self.tripped_at.write().take().is_some() {
            info!("Mapping store recovered, guard closed");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            let mut tripped = self.tripped_at.write();
            if tripped.map_or(true, |t| t.elapsed() >= self.cooldown) {
                warn!(
                    "Mapping store failed {} times in a row, bypassing it for {:?}",
                    failures, self.cooldown
                );
                *tripped = Some(Instant::now());
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
}
