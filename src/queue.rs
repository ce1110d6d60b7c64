// src/queue.rs
//! Priority-ordered request queue.
//!
//! Ordering contract: within a priority tier requests drain FIFO; across
//! tiers higher priority always drains first. Retried items re-enter at the
//! front of the whole queue regardless of tier so a request that already
//! waited through a failed attempt is not starved by fresh traffic.

use crate::transport::RequestSpec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Request priority. Declaration order gives `Low < Medium < High` for the
/// derived `Ord`, matching the weights low=1, medium=2, high=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Priority {
    /// Stable lowercase tag used inside request fingerprints.
    pub fn tag(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}' (expected low|medium|high)", other)),
        }
    }
}

/// A not-yet-executed request waiting in the queue.
#[derive(Debug)]
pub struct QueueItem {
    pub id: Uuid,
    pub fingerprint: String,
    pub url: String,
    pub spec: RequestSpec,
    pub priority: Priority,
    pub cache_ttl: Duration,
    pub max_retries: u32,
    pub timeout: Duration,
    pub background: bool,
    pub enqueued_at: Instant,
    pub retry_count: u32,
}

/// FIFO-within-tier priority queue shared between callers and the processor.
pub struct RequestQueue {
    items: Mutex<VecDeque<QueueItem>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Insert before the first strictly-lower-priority item, so equal-priority
    /// items that were already queued keep their relative order.
    pub async fn push(&self, item: QueueItem) {
        let mut items = self.items.lock().await;
        let pos = items
            .iter()
            .position(|queued| queued.priority < item.priority)
            .unwrap_or(items.len());
        items.insert(pos, item);
    }

    /// Re-insert a retried item at the head of the whole queue.
    pub async fn push_front(&self, item: QueueItem) {
        self.items.lock().await.push_front(item);
    }

    pub async fn pop(&self) -> Option<QueueItem> {
        self.items.lock().await.pop_front()
    }

    /// Remove and return everything, used on cancellation.
    pub async fn drain(&self) -> Vec<QueueItem> {
        self.items.lock().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RequestSpec;

    fn item(url: &str, priority: Priority) -> QueueItem {
        QueueItem {
            id: Uuid::new_v4(),
            fingerprint: format!("GET:{}::{}", url, priority.tag()),
            url: url.to_string(),
            spec: RequestSpec::default(),
            priority,
            cache_ttl: Duration::from_secs(300),
            max_retries: 3,
            timeout: Duration::from_secs(30),
            background: false,
            enqueued_at: Instant::now(),
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn drains_by_priority_then_fifo() {
        let queue = RequestQueue::new();
        queue.push(item("/first-low", Priority::Low)).await;
        queue.push(item("/first-high", Priority::High)).await;
        queue.push(item("/only-medium", Priority::Medium)).await;
        queue.push(item("/second-high", Priority::High)).await;

        let order: Vec<String> = {
            let mut urls = Vec::new();
            while let Some(popped) = queue.pop().await {
                urls.push(popped.url);
            }
            urls
        };
        assert_eq!(order, vec!["/first-high", "/second-high", "/only-medium", "/first-low"]);
    }

    #[tokio::test]
    async fn retry_reinsertion_jumps_the_whole_queue() {
        let queue = RequestQueue::new();
        queue.push(item("/fresh-high", Priority::High)).await;

        let mut retried = item("/retried-low", Priority::Low);
        retried.retry_count = 1;
        queue.push_front(retried).await;

        assert_eq!(queue.pop().await.unwrap().url, "/retried-low");
        assert_eq!(queue.pop().await.unwrap().url, "/fresh-high");
    }

    #[test]
    fn priority_parsing() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
