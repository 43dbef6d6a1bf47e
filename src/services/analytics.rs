//! Streaming request analytics over a bounded circular buffer.
//!
//! The buffer holds the last 10,000 completed requests (~2 MB). Appends are
//! amortized O(1); snapshot reads copy the ordered contents under the lock
//! and aggregate outside it so writers are never blocked on computation.

use crate::models::record::RequestRecord;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Fixed buffer capacity. Oldest records are overwritten past this point.
pub const LOG_CAPACITY: usize = 10_000;

/// An endpoint and how many buffered requests hit it.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EndpointCount {
    pub path: String,
    pub count: u64,
}

/// Point-in-time view derived from the buffer.
///
/// `error_rate` and `avg_response_time` aggregate the entire buffer
/// (historical), not the last minute; dashboard consumers rely on that.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub total_requests: u64,
    pub requests_per_minute: u64,
    pub top_endpoints: Vec<EndpointCount>,
    pub error_rate: f64,
    pub avg_response_time: f64,
    pub active_clients: u64,
    pub active_key_uses: u64,
    pub rate_limit_hits: u64,
}

/// Fixed-capacity circular log buffer.
///
/// `head` is the insert index of the oldest entry once full; `count` grows
/// monotonically until it clamps at capacity. Chronological order when full
/// is `[head..] ++ [..head]`.
struct CircularBuffer {
    entries: Vec<RequestRecord>,
    head: usize,
    count: usize,
    capacity: usize,
}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            head: 0,
            count: 0,
            capacity,
        }
    }

    fn push(&mut self, record: RequestRecord) {
        if self.count < self.capacity {
            self.entries.push(record);
            self.count += 1;
        } else {
            self.entries[self.head] = record;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Oldest-first copy of the live entries.
    fn ordered(&self) -> Vec<RequestRecord> {
        if self.count < self.capacity {
            self.entries.clone()
        } else {
            let mut out = Vec::with_capacity(self.count);
            out.extend_from_slice(&self.entries[self.head..]);
            out.extend_from_slice(&self.entries[..self.head]);
            out
        }
    }
}

/// Analytics engine: append path, ordered reads, snapshot aggregation, and
/// the rejection counter the limiter feeds.
#[derive(Clone)]
pub struct AnalyticsEngine {
    inner: Arc<AnalyticsInner>,
}

struct AnalyticsInner {
    buffer: RwLock<CircularBuffer>,
    rate_limit_hits: Arc<AtomicU64>,
}

impl AnalyticsEngine {
    pub fn new() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(AnalyticsInner {
                buffer: RwLock::new(CircularBuffer::new(capacity)),
                rate_limit_hits: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Handle to the rejection counter, shared with the rate limiter.
    pub fn hits_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.inner.rate_limit_hits)
    }

    /// Appends a completed request. Amortized O(1); overwrites the oldest
    /// entry once the buffer is full.
    pub fn add_log(&self, record: RequestRecord) {
        let mut buffer = match self.inner.buffer.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffer.push(record);
    }

    /// Newest-first view of the buffered records.
    pub fn recent_logs(&self) -> Vec<RequestRecord> {
        let buffer = match self.inner.buffer.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ordered = buffer.ordered();
        drop(buffer);
        ordered.reverse();
        ordered
    }

    /// Computes the derived view from a single consistent copy of the
    /// buffer plus the live rejection counter.
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let logs = {
            let buffer = match self.inner.buffer.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            buffer.ordered()
        };

        let now = Utc::now();
        let minute_ago = now - Duration::milliseconds(60_000);
        let five_minutes_ago = now - Duration::milliseconds(300_000);
        let total = logs.len() as u64;

        let requests_per_minute = logs.iter().filter(|l| l.timestamp > minute_ago).count() as u64;

        let mut by_path: HashMap<&str, u64> = HashMap::new();
        for log in &logs {
            *by_path.entry(log.path.as_str()).or_insert(0) += 1;
        }
        let mut top_endpoints: Vec<EndpointCount> = by_path
            .into_iter()
            .map(|(path, count)| EndpointCount {
                path: path.to_string(),
                count,
            })
            .collect();
        top_endpoints.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
        top_endpoints.truncate(5);

        let (error_rate, avg_response_time) = if total == 0 {
            (0.0, 0.0)
        } else {
            let errors = logs.iter().filter(|l| l.status_code >= 400).count() as f64;
            let sum_ms: u64 = logs.iter().map(|l| l.response_time_ms).sum();
            (
                round2(errors * 100.0 / total as f64),
                round2(sum_ms as f64 / total as f64),
            )
        };

        let active_clients = logs
            .iter()
            .filter(|l| l.timestamp > five_minutes_ago)
            .map(|l| l.ip.as_str())
            .collect::<HashSet<_>>()
            .len() as u64;

        let active_key_uses = logs
            .iter()
            .filter(|l| l.timestamp > five_minutes_ago)
            .filter_map(|l| l.api_key.as_deref().map(|key| (l.ip.as_str(), key)))
            .collect::<HashSet<_>>()
            .len() as u64;

        AnalyticsSnapshot {
            total_requests: total,
            requests_per_minute,
            top_endpoints,
            error_rate,
            avg_response_time,
            active_clients,
            active_key_uses,
            rate_limit_hits: self.inner.rate_limit_hits.load(Ordering::Relaxed),
        }
    }

    /// Distinct `(ip, apiKey)` pairs seen in the last five minutes.
    pub fn active_key_uses(&self) -> u64 {
        self.snapshot().active_key_uses
    }
}

impl Default for AnalyticsEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
