// src/processor.rs
//! Tick-driven queue processor.
//!
//! A recurring timer pulls at most one item off the priority queue per tick,
//! bounded by `max_concurrency` in-flight executions and gated on the rate
//! limiter. Each execution runs as its own task: await a limiter slot, issue
//! the transport call under a per-request timeout, then either write through
//! to the cache, schedule a retry with exponential backoff, or settle the
//! terminal failure. Every suspension point also listens on the cancellation
//! broadcast so teardown rejects work promptly.

use crate::cache::ResponseCache;
use crate::config::EngineConfig;
use crate::dedup::PendingRegistry;
use crate::error::OptimizerError;
use crate::queue::{QueueItem, RequestQueue};
use crate::rate_limit::RateLimiter;
use crate::transport::Transport;
use log::{debug, error, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};

pub struct QueueProcessor {
    queue: Arc<RequestQueue>,
    pending: Arc<PendingRegistry>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    transport: Arc<dyn Transport>,
    cancel: broadcast::Sender<()>,
    active: AtomicUsize,
    config: EngineConfig,
}

impl QueueProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<RequestQueue>,
        pending: Arc<PendingRegistry>,
        cache: Arc<ResponseCache>,
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
        cancel: broadcast::Sender<()>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            pending,
            cache,
            limiter,
            transport,
            cancel,
            active: AtomicUsize::new(0),
            config,
        })
    }

    /// Number of executions currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Start the scheduling loop. The engine owns the returned handle and
    /// aborts it on destroy.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.tick_interval);
            loop {
                ticker.tick().await;

                if self.active.load(Ordering::SeqCst) >= self.config.max_concurrency {
                    continue;
                }
                if self.limiter.is_throttled().await {
                    continue;
                }
                let Some(item) = self.queue.pop().await else {
                    continue;
                };

                self.active.fetch_add(1, Ordering::SeqCst);
                let processor = Arc::clone(&self);
                tokio::spawn(async move {
                    processor.execute(item).await;
                });
            }
        })
    }

    async fn execute(&self, item: QueueItem) {
        let mut cancel_rx = self.cancel.subscribe();

        // The limiter wait is itself a cancellation point: teardown must not
        // leave a task parked on a slot that will never matter.
        tokio::select! {
            _ = cancel_rx.recv() => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                self.pending.settle(&item.fingerprint, Err(OptimizerError::Cancelled));
                return;
            }
            _ = self.limiter.acquire() => {}
        }

        debug!(
            "executing {} {} (priority {}, attempt {}, waited {:?})",
            item.spec.method,
            item.url,
            item.priority,
            item.retry_count + 1,
            item.enqueued_at.elapsed(),
        );

        let attempt = tokio::select! {
            _ = cancel_rx.recv() => Err(OptimizerError::Cancelled),
            outcome = timeout(item.timeout, self.transport.issue(&item.url, &item.spec)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(OptimizerError::Timeout(format!(
                        "no response from {} within {:?}", item.url, item.timeout
                    ))),
                }
            }
        };
        self.active.fetch_sub(1, Ordering::SeqCst);

        match attempt {
            Ok(response) => {
                self.cache
                    .put(&item.fingerprint, response.body.clone(), item.cache_ttl, item.priority)
                    .await;
                self.pending.settle(&item.fingerprint, Ok(response.body));
            }
            Err(OptimizerError::Cancelled) => {
                self.pending.settle(&item.fingerprint, Err(OptimizerError::Cancelled));
            }
            Err(err) => {
                if let OptimizerError::RateLimited { retry_after_ms } = &err {
                    self.limiter
                        .on_throttle_signal(retry_after_ms.map(Duration::from_millis))
                        .await;
                }
                self.handle_failure(item, err).await;
            }
        }
    }

    async fn handle_failure(&self, mut item: QueueItem, err: OptimizerError) {
        if err.is_retryable() && item.retry_count < item.max_retries {
            item.retry_count += 1;
            self.pending.bump_retry(&item.fingerprint);
            let delay = self.retry_delay(item.retry_count);
            warn!(
                "request {} ({}) failed: {}; retry {}/{} in {:?}",
                item.id, item.url, err, item.retry_count, item.max_retries, delay
            );

            let queue = Arc::clone(&self.queue);
            let pending = Arc::clone(&self.pending);
            let mut cancel_rx = self.cancel.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel_rx.recv() => {
                        pending.settle(&item.fingerprint, Err(OptimizerError::Cancelled));
                    }
                    _ = sleep(delay) => {
                        // Front of the whole queue: retries outrank fresh work
                        queue.push_front(item).await;
                    }
                }
            });
        } else {
            error!(
                "request {} ({}) failed terminally after {} attempt(s): {}",
                item.id,
                item.url,
                item.retry_count + 1,
                err
            );
            self.pending.settle(&item.fingerprint, Err(err));
        }
    }

    /// Exponential backoff with up to 10% jitter, capped at `retry_max_delay`.
    fn retry_delay(&self, retry_count: u32) -> Duration {
        let exponential = self
            .config
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(retry_count.min(16)));
        let capped = exponential.min(self.config.retry_max_delay);
        capped + capped.mul_f64(fastrand::f64() * 0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn processor_with_base(base_ms: u64) -> Arc<QueueProcessor> {
        let config = EngineConfig {
            retry_base_delay: Duration::from_millis(base_ms),
            retry_max_delay: Duration::from_millis(base_ms * 8),
            ..EngineConfig::default()
        };
        let (cancel, _) = broadcast::channel(4);
        QueueProcessor::new(
            Arc::new(RequestQueue::new()),
            Arc::new(PendingRegistry::new()),
            Arc::new(ResponseCache::new(config.cache.clone())),
            Arc::new(RateLimiter::new(config.rate_limit.clone())),
            Arc::new(NoopTransport),
            cancel,
            config,
        )
    }

    struct NoopTransport;

    #[async_trait::async_trait]
    impl Transport for NoopTransport {
        async fn issue(
            &self,
            _url: &str,
            _spec: &crate::transport::RequestSpec,
        ) -> Result<crate::transport::TransportResponse, OptimizerError> {
            Err(OptimizerError::NetworkError("noop".to_string()))
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let processor = processor_with_base(100);

        let first = processor.retry_delay(1);
        assert!(first >= Duration::from_millis(200) && first <= Duration::from_millis(220));

        let second = processor.retry_delay(2);
        assert!(second >= Duration::from_millis(400) && second <= Duration::from_millis(440));

        // 2^5 * 100ms would be 3.2s, capped at 800ms plus jitter
        let capped = processor.retry_delay(5);
        assert!(capped <= Duration::from_millis(880));
    }
}
