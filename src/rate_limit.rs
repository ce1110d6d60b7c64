// src/rate_limit.rs
//! Adaptive rate limiter.
//!
//! Two mechanisms work together: a hard request-count cap per sliding window,
//! and soft pacing that keeps a minimum interval between consecutive
//! requests. The interval is scaled by a backoff multiplier that doubles on
//! every server-signaled throttle (cap 8x) and halves back down once the
//! throttle window has passed, so a single 429 does not permanently degrade
//! throughput.

use crate::config::RateLimitConfig;
use log::{debug, warn};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

struct LimiterState {
    window_start: Instant,
    requests_in_window: u32,
    last_request_at: Option<Instant>,
    backoff_multiplier: f64,
    throttled_until: Option<Instant>,
}

/// Point-in-time view of the limiter, for stats reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSnapshot {
    pub throttled: bool,
    pub requests_in_window: u32,
    pub backoff_multiplier: f64,
}

/// Process-wide request pacing gate. One instance per engine.
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                window_start: Instant::now(),
                requests_in_window: 0,
                last_request_at: None,
                backoff_multiplier: 1.0,
                throttled_until: None,
            }),
        }
    }

    /// Roll the window forward and decay an expired throttle. Must be called
    /// with the state lock held.
    fn normalize(&self, state: &mut LimiterState, now: Instant) {
        if let Some(until) = state.throttled_until {
            if now >= until {
                state.throttled_until = None;
                state.backoff_multiplier = (state.backoff_multiplier / 2.0).max(1.0);
                debug!(
                    "throttle window passed, backoff multiplier decayed to {:.1}x",
                    state.backoff_multiplier
                );
            }
        }
        if now.duration_since(state.window_start) >= self.config.window {
            state.window_start = now;
            state.requests_in_window = 0;
        }
    }

    /// Suspend until a request slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                self.normalize(&mut state, now);

                if let Some(until) = state.throttled_until {
                    until.duration_since(now)
                } else if state.requests_in_window >= self.config.max_requests_per_window {
                    // Window exhausted, wait for it to roll over
                    self.config.window
                        .saturating_sub(now.duration_since(state.window_start))
                } else {
                    let pace = self.config.min_interval.mul_f64(state.backoff_multiplier);
                    let since_last = state
                        .last_request_at
                        .map(|last| now.duration_since(last));
                    match since_last {
                        Some(elapsed) if elapsed < pace => pace - elapsed,
                        _ => {
                            state.requests_in_window += 1;
                            state.last_request_at = Some(now);
                            return;
                        }
                    }
                }
            };
            sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// React to a server-signaled rate limit (HTTP 429 or equivalent).
    pub async fn on_throttle_signal(&self, retry_after: Option<Duration>) {
        let mut state = self.state.lock().await;
        let hold = retry_after.unwrap_or(self.config.throttle_cooldown);
        state.throttled_until = Some(Instant::now() + hold);
        state.backoff_multiplier =
            (state.backoff_multiplier * 2.0).min(self.config.max_backoff_multiplier);
        warn!(
            "server throttle signal: holding {:?}, backoff multiplier now {:.1}x",
            hold, state.backoff_multiplier
        );
    }

    /// Whether the processor should skip this tick entirely.
    pub async fn is_throttled(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        self.normalize(&mut state, now);
        state.throttled_until.is_some()
            || state.requests_in_window >= self.config.max_requests_per_window
    }

    pub async fn snapshot(&self) -> RateLimitSnapshot {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        self.normalize(&mut state, now);
        RateLimitSnapshot {
            throttled: state.throttled_until.is_some()
                || state.requests_in_window >= self.config.max_requests_per_window,
            requests_in_window: state.requests_in_window,
            backoff_multiplier: state.backoff_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn fast_config() -> RateLimitConfig {
        RateLimitConfig {
            window: Duration::from_millis(200),
            max_requests_per_window: 3,
            min_interval: Duration::from_millis(1),
            throttle_cooldown: Duration::from_millis(30),
            max_backoff_multiplier: 8.0,
        }
    }

    #[tokio::test]
    async fn window_cap_delays_the_excess_request() {
        let limiter = RateLimiter::new(fast_config());
        let started = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(100));

        // Fourth slot only opens once the 200ms window rolls over
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(150));

        let snapshot = limiter.snapshot().await;
        assert!(snapshot.requests_in_window <= 3);
    }

    #[tokio::test]
    async fn throttle_signal_escalates_and_decays() {
        let limiter = RateLimiter::new(fast_config());

        limiter.on_throttle_signal(None).await;
        limiter.on_throttle_signal(None).await;
        let snapshot = limiter.snapshot().await;
        assert!(snapshot.throttled);
        assert_approx_eq!(snapshot.backoff_multiplier, 4.0);

        // After the cooldown the flag clears and the multiplier halves
        sleep(Duration::from_millis(50)).await;
        let snapshot = limiter.snapshot().await;
        assert!(!snapshot.throttled);
        assert_approx_eq!(snapshot.backoff_multiplier, 2.0);
    }

    #[tokio::test]
    async fn multiplier_is_capped() {
        let limiter = RateLimiter::new(fast_config());
        for _ in 0..10 {
            limiter.on_throttle_signal(None).await;
        }
        let snapshot = limiter.snapshot().await;
        assert_approx_eq!(snapshot.backoff_multiplier, 8.0);
    }

    #[tokio::test]
    async fn retry_after_hint_overrides_the_default_cooldown() {
        let limiter = RateLimiter::new(fast_config());
        limiter
            .on_throttle_signal(Some(Duration::from_millis(10)))
            .await;
        assert!(limiter.is_throttled().await);
        sleep(Duration::from_millis(25)).await;
        assert!(!limiter.is_throttled().await);
    }
}
