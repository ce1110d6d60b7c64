// src/dedup.rs
//! Pending registry: at-most-one concurrent execution per fingerprint.
//!
//! The first caller with a novel fingerprint is admitted and triggers an
//! actual transport execution; everyone who arrives before it settles joins
//! the same outcome. The entry is removed on settlement, on every exit path,
//! so a fingerprint can run again afterwards.

use crate::error::OptimizerError;
use crate::queue::Priority;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use serde_json::Value;
use std::time::Instant;
use tokio::sync::oneshot;

/// Terminal result fanned out to every caller of a deduplicated request.
pub type Outcome = Result<Value, OptimizerError>;

/// What `join_or_admit` decided for a caller.
pub enum Admission {
    /// Novel fingerprint; the caller's engine must enqueue the request.
    Admitted(oneshot::Receiver<Outcome>),
    /// Identical request already in flight; just await its settlement.
    Joined(oneshot::Receiver<Outcome>),
}

struct PendingEntry {
    waiters: Vec<oneshot::Sender<Outcome>>,
    started_at: Instant,
    priority: Priority,
    retry_count: u32,
}

/// Tracks in-flight requests by fingerprint.
pub struct PendingRegistry {
    inflight: DashMap<String, PendingEntry>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Atomically join an existing in-flight request or register a new one.
    pub fn join_or_admit(&self, fingerprint: &str, priority: Priority) -> Admission {
        let (tx, rx) = oneshot::channel();
        match self.inflight.entry(fingerprint.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().waiters.push(tx);
                debug!(
                    "joined in-flight request {} ({} waiters)",
                    fingerprint,
                    occupied.get().waiters.len()
                );
                Admission::Joined(rx)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    waiters: vec![tx],
                    started_at: Instant::now(),
                    priority,
                    retry_count: 0,
                });
                Admission::Admitted(rx)
            }
        }
    }

    /// Remove the entry and deliver the outcome to every waiter. Settling a
    /// fingerprint that is no longer registered is a no-op, which makes the
    /// cancellation and completion paths safe to race.
    pub fn settle(&self, fingerprint: &str, outcome: Outcome) {
        if let Some((_, entry)) = self.inflight.remove(fingerprint) {
            debug!(
                "settling {} for {} waiter(s) after {:?} ({} priority, {} retries)",
                fingerprint,
                entry.waiters.len(),
                entry.started_at.elapsed(),
                entry.priority,
                entry.retry_count,
            );
            for waiter in entry.waiters {
                // A dropped receiver just means that caller went away
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    /// Record a retry attempt against the in-flight entry.
    pub fn bump_retry(&self, fingerprint: &str) {
        if let Some(mut entry) = self.inflight.get_mut(fingerprint) {
            entry.retry_count += 1;
        }
    }

    /// Settle every pending request with a cancellation error.
    pub fn cancel_all(&self) {
        let fingerprints: Vec<String> = self.inflight.iter().map(|e| e.key().clone()).collect();
        for fingerprint in fingerprints {
            self.settle(&fingerprint, Err(OptimizerError::Cancelled));
        }
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn joiners_share_the_admitted_settlement() {
        let registry = PendingRegistry::new();

        let first = registry.join_or_admit("GET:/users::medium", Priority::Medium);
        let second = registry.join_or_admit("GET:/users::medium", Priority::Medium);
        assert!(matches!(first, Admission::Admitted(_)));
        assert!(matches!(second, Admission::Joined(_)));
        assert_eq!(registry.len(), 1);

        registry.settle("GET:/users::medium", Ok(json!({"count": 2})));
        assert!(registry.is_empty());

        for admission in [first, second] {
            let rx = match admission {
                Admission::Admitted(rx) | Admission::Joined(rx) => rx,
            };
            assert_eq!(rx.await.unwrap().unwrap(), json!({"count": 2}));
        }
    }

    #[tokio::test]
    async fn settled_fingerprint_can_run_again() {
        let registry = PendingRegistry::new();
        let first = registry.join_or_admit("GET:/a::low", Priority::Low);
        registry.settle("GET:/a::low", Err(OptimizerError::Cancelled));
        drop(first);

        // Fresh admission after settlement, not a join
        let again = registry.join_or_admit("GET:/a::low", Priority::Low);
        assert!(matches!(again, Admission::Admitted(_)));
    }

    #[tokio::test]
    async fn cancel_all_rejects_every_waiter() {
        let registry = PendingRegistry::new();
        let a = registry.join_or_admit("GET:/a::medium", Priority::Medium);
        let b = registry.join_or_admit("GET:/b::medium", Priority::Medium);
        registry.cancel_all();
        assert!(registry.is_empty());

        for admission in [a, b] {
            let rx = match admission {
                Admission::Admitted(rx) | Admission::Joined(rx) => rx,
            };
            assert!(matches!(rx.await.unwrap(), Err(OptimizerError::Cancelled)));
        }
    }
}
