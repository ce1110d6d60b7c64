// src/engine.rs
//! Request optimization engine.
//!
//! One `RequestEngine` instance is constructed at application startup with an
//! injected transport and an explicit lifecycle: `start()` launches the queue
//! processor and the cache sweeper, `destroy()` cancels all work and stops
//! them. Consumers receive the engine by reference (usually `Arc`) rather
//! than through global state.
//!
//! Request path: cache lookup -> pending-registry join/admit -> priority
//! queue -> processor tick -> rate limiter -> transport -> cache write +
//! settlement back to every caller.

use crate::cache::{CacheStats, ResponseCache};
use crate::config::EngineConfig;
use crate::dedup::{Admission, PendingRegistry};
use crate::error::OptimizerError;
use crate::fingerprint::fingerprint;
use crate::processor::QueueProcessor;
use crate::queue::{Priority, QueueItem, RequestQueue};
use crate::rate_limit::{RateLimitSnapshot, RateLimiter};
use crate::transport::{HttpMethod, RequestSpec, Transport};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use url::Url;
use uuid::Uuid;

/// Per-request knobs. `None` fields fall back to the engine defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub priority: Priority,
    pub cache_ttl: Option<Duration>,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    /// Skip the cache lookup (the response is still written through).
    pub bypass_cache: bool,
    /// Marks non-interactive traffic; batch fan-out sets this automatically.
    pub background: bool,
}

/// One element of a batch fan-out.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub url: String,
    pub options: RequestOptions,
}

impl BatchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: RequestOptions::default(),
        }
    }
}

/// Batch pacing knobs.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Chunk size; each chunk runs concurrently through the single-request path.
    pub max_concurrency: usize,
    /// Pause between chunks so a batch cannot trip the rate limiter by itself.
    pub delay_between_batches: Duration,
    /// Priority applied to every request in the batch.
    pub priority: Priority,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            delay_between_batches: Duration::from_secs(1),
            priority: Priority::Low,
        }
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub cache: CacheStats,
    pub requests: RequestStats,
    pub rate_limit: RateLimitSnapshot,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestStats {
    /// In-flight or queued fingerprints in the pending registry.
    pub pending: usize,
    /// Items waiting in the priority queue.
    pub queued: usize,
    /// Transport executions currently running.
    pub active: usize,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache: {} entries, {:.0}% hit rate | requests: {} pending, {} queued, {} active | \
             rate: {} in window, {:.1}x backoff{}",
            self.cache.size,
            self.cache.hit_rate * 100.0,
            self.requests.pending,
            self.requests.queued,
            self.requests.active,
            self.rate_limit.requests_in_window,
            self.rate_limit.backoff_multiplier,
            if self.rate_limit.throttled { " (throttled)" } else { "" },
        )
    }
}

/// Client-side request optimization engine.
pub struct RequestEngine {
    config: EngineConfig,
    cache: Arc<ResponseCache>,
    pending: Arc<PendingRegistry>,
    limiter: Arc<RateLimiter>,
    queue: Arc<RequestQueue>,
    processor: Arc<QueueProcessor>,
    cancel: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    destroyed: AtomicBool,
}

impl RequestEngine {
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        let cache = Arc::new(ResponseCache::new(config.cache.clone()));
        let pending = Arc::new(PendingRegistry::new());
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let queue = Arc::new(RequestQueue::new());
        let (cancel, _) = broadcast::channel(16);

        let processor = QueueProcessor::new(
            Arc::clone(&queue),
            Arc::clone(&pending),
            Arc::clone(&cache),
            Arc::clone(&limiter),
            transport,
            cancel.clone(),
            config.clone(),
        );

        Self {
            config,
            cache,
            pending,
            limiter,
            queue,
            processor,
            cancel,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Launch the background tasks (queue processor, cache sweeper).
    /// Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        tasks.push(Arc::clone(&self.processor).spawn());
        tasks.push(Arc::clone(&self.cache).spawn_sweeper());
        info!("request engine started");
    }

    /// Issue a request through the optimization path. Resolves with the JSON
    /// body on success; duplicate concurrent callers share one execution and
    /// one settlement.
    pub async fn request(&self, url: &str, options: RequestOptions) -> Result<Value, OptimizerError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(OptimizerError::Cancelled);
        }
        Url::parse(url)
            .map_err(|e| OptimizerError::InvalidRequest(format!("invalid url '{}': {}", url, e)))?;

        let spec = RequestSpec {
            method: options.method,
            headers: options.headers,
            body: options.body,
        };
        let key = fingerprint(spec.method, url, spec.body.as_ref(), options.priority);

        if !options.bypass_cache {
            if let Some(value) = self.cache.get(&key).await {
                debug!("cache hit for {}", key);
                return Ok(value);
            }
        }

        let receiver = match self.pending.join_or_admit(&key, options.priority) {
            Admission::Joined(rx) => rx,
            Admission::Admitted(rx) => {
                let item = QueueItem {
                    id: Uuid::new_v4(),
                    fingerprint: key,
                    url: url.to_string(),
                    spec,
                    priority: options.priority,
                    cache_ttl: options.cache_ttl.unwrap_or(self.config.default_cache_ttl),
                    max_retries: options.max_retries.unwrap_or(self.config.default_max_retries),
                    timeout: options.timeout.unwrap_or(self.config.default_timeout),
                    background: options.background,
                    enqueued_at: Instant::now(),
                    retry_count: 0,
                };
                self.queue.push(item).await;
                rx
            }
        };

        // A dropped sender only happens when the registry is torn down
        receiver.await.map_err(|_| OptimizerError::Cancelled)?
    }

    /// Typed convenience over [`request`](Self::request).
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<T, OptimizerError> {
        let value = self.request(url, options).await?;
        serde_json::from_value(value)
            .map_err(|e| OptimizerError::Internal(format!("response decode failed: {}", e)))
    }

    /// Fan a list of requests out in bounded chunks with inter-chunk pacing.
    /// The result vector matches the input in length and order; one item's
    /// failure never affects its siblings.
    pub async fn batch_requests(
        &self,
        requests: Vec<BatchRequest>,
        options: BatchOptions,
    ) -> Vec<Result<Value, OptimizerError>> {
        let chunk_size = options.max_concurrency.max(1);
        let mut results = Vec::with_capacity(requests.len());

        for (index, chunk) in requests.chunks(chunk_size).enumerate() {
            if index > 0 {
                sleep(options.delay_between_batches).await;
            }
            let futures = chunk.iter().map(|request| {
                let mut opts = request.options.clone();
                opts.priority = options.priority;
                opts.background = true;
                self.request(&request.url, opts)
            });
            results.extend(join_all(futures).await);
        }

        debug!(
            "batch of {} finished: {} ok, {} failed",
            results.len(),
            results.iter().filter(|r| r.is_ok()).count(),
            results.iter().filter(|r| r.is_err()).count(),
        );
        results
    }

    /// Abort every in-flight transport call, drain the queue, and reject all
    /// outstanding callers with a cancellation error.
    pub async fn cancel_all_requests(&self) {
        let _ = self.cancel.send(());
        let drained = self.queue.drain().await;
        for item in &drained {
            self.pending.settle(&item.fingerprint, Err(OptimizerError::Cancelled));
        }
        self.pending.cancel_all();
        info!("cancelled {} queued items and all in-flight requests", drained.len());
    }

    /// Drop cache entries matching `pattern`, or all of them. Returns the
    /// removed count.
    pub async fn clear_cache(&self, pattern: Option<&str>) -> usize {
        self.cache.invalidate(pattern).await
    }

    pub async fn get_stats(&self) -> EngineStats {
        EngineStats {
            cache: self.cache.stats().await,
            requests: RequestStats {
                pending: self.pending.len(),
                queued: self.queue.len().await,
                active: self.processor.active_count(),
            },
            rate_limit: self.limiter.snapshot().await,
            generated_at: Utc::now(),
        }
    }

    /// Cancel all work and stop the background tasks. After this the engine
    /// rejects new requests. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_all_requests().await;
        for task in self.tasks.lock().expect("task list lock poisoned").drain(..) {
            task.abort();
        }
        info!("request engine destroyed");
    }
}

impl Drop for RequestEngine {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
