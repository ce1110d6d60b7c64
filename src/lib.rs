//! api-optimizer: client-side HTTP request optimization engine.
//!
//! Sits between application code and an HTTP API, providing request
//! deduplication, TTL caching with priority-aware eviction, a priority
//! queue with bounded concurrency, adaptive rate limiting with exponential
//! backoff, retry-with-backoff, and batch fan-out with inter-batch pacing.

pub mod cache;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod processor;
pub mod queue;
pub mod rate_limit;
pub mod transport;

pub use cache::CacheStats;
pub use config::{CacheConfig, EngineConfig, RateLimitConfig};
pub use engine::{
    BatchOptions, BatchRequest, EngineStats, RequestEngine, RequestOptions, RequestStats,
};
pub use error::OptimizerError;
pub use queue::Priority;
pub use rate_limit::{RateLimitSnapshot, RateLimiter};
pub use transport::{HttpMethod, HttpTransport, RequestSpec, Transport, TransportResponse};
