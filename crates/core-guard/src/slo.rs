//! Service-level indicators: a latency ring, one-minute error and
//! breaker-hit windows, and per-route mini-metrics for the status document.
//!
//! The recorder is sampled by the SLO monitor; it holds no thresholds of its
//! own.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::time::epoch_ms;

const RING_SIZE: usize = 256;
const ROUTE_RING_SIZE: usize = 128;
const WINDOW_MS: u64 = 60_000;

/// Point-in-time SLO reading.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SloSnapshot {
    pub p95_ms: f64,
    pub error_count_1m: usize,
    pub breaker_hits_1m: usize,
}

/// Per-route latency/error reading.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RouteSnapshot {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub error_count_1m: usize,
}

#[derive(Debug)]
struct Ring {
    latencies: Vec<f64>,
    head: usize,
    filled: usize,
}

impl Ring {
    fn new(size: usize) -> Self {
        Self {
            latencies: vec![0.0; size],
            head: 0,
            filled: 0,
        }
    }

    fn push(&mut self, ms: f64) {
        let head = self.head;
        self.latencies[head] = ms;
        self.head = (head + 1) % self.latencies.len();
        self.filled = (self.filled + 1).min(self.latencies.len());
    }

    fn sorted_samples(&self) -> Vec<f64> {
        let mut samples = self.latencies[..self.filled].to_vec();
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        samples
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * q).floor() as usize;
    sorted[idx]
}

fn prune(timestamps: &mut Vec<u64>, now_ms: u64) {
    timestamps.retain(|&ts| now_ms.saturating_sub(ts) < WINDOW_MS);
}

#[derive(Debug)]
struct RouteRing {
    ring: Ring,
    error_ts: Vec<u64>,
}

#[derive(Debug)]
struct SloInner {
    ring: Ring,
    error_ts: Vec<u64>,
    breaker_ts: Vec<u64>,
    routes: HashMap<String, RouteRing>,
}

/// Accumulates request latencies and failure timestamps.
#[derive(Debug)]
pub struct SloRecorder {
    inner: Mutex<SloInner>,
}

impl Default for SloRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl SloRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SloInner {
                ring: Ring::new(RING_SIZE),
                error_ts: Vec::new(),
                breaker_ts: Vec::new(),
                routes: HashMap::new(),
            }),
        }
    }

    /// Record one request latency sample.
    pub fn record_latency(&self, ms: f64) {
        self.inner.lock().unwrap().ring.push(ms);
    }

    /// Record a failed upstream call.
    pub fn record_error(&self) {
        self.record_error_at(epoch_ms());
    }

    pub fn record_error_at(&self, now_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.error_ts.push(now_ms);
        prune(&mut inner.error_ts, now_ms);
    }

    /// Record a fast-fail on an open breaker.
    pub fn record_breaker_hit(&self) {
        self.record_breaker_hit_at(epoch_ms());
    }

    pub fn record_breaker_hit_at(&self, now_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.breaker_ts.push(now_ms);
        prune(&mut inner.breaker_ts, now_ms);
    }

    /// Record a routed request for the per-route stats.
    pub fn record_route(&self, route: &str, ms: f64, is_error: bool) {
        self.record_route_at(route, ms, is_error, epoch_ms());
    }

    pub fn record_route_at(&self, route: &str, ms: f64, is_error: bool, now_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .routes
            .entry(route.to_string())
            .or_insert_with(|| RouteRing {
                ring: Ring::new(ROUTE_RING_SIZE),
                error_ts: Vec::new(),
            });
        entry.ring.push(ms);
        if is_error {
            entry.error_ts.push(now_ms);
            prune(&mut entry.error_ts, now_ms);
        }
    }

    pub fn snapshot(&self) -> SloSnapshot {
        self.snapshot_at(epoch_ms())
    }

    pub fn snapshot_at(&self, now_ms: u64) -> SloSnapshot {
        let mut inner = self.inner.lock().unwrap();
        prune(&mut inner.error_ts, now_ms);
        prune(&mut inner.breaker_ts, now_ms);
        let sorted = inner.ring.sorted_samples();
        SloSnapshot {
            p95_ms: percentile(&sorted, 0.95),
            error_count_1m: inner.error_ts.len(),
            breaker_hits_1m: inner.breaker_ts.len(),
        }
    }

    pub fn route_snapshot(&self) -> HashMap<String, RouteSnapshot> {
        self.route_snapshot_at(epoch_ms())
    }

    pub fn route_snapshot_at(&self, now_ms: u64) -> HashMap<String, RouteSnapshot> {
        let mut inner = self.inner.lock().unwrap();
        let mut out = HashMap::new();
        for (route, entry) in inner.routes.iter_mut() {
            prune(&mut entry.error_ts, now_ms);
            let sorted = entry.ring.sorted_samples();
            out.insert(
                route.clone(),
                RouteSnapshot {
                    p50_ms: percentile(&sorted, 0.50),
                    p95_ms: percentile(&sorted, 0.95),
                    error_count_1m: entry.error_ts.len(),
                },
            );
        }
        out
    }
}
