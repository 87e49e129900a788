//! In-memory request latency histograms, overall and per route.
//! Recorded by the router middleware, read by `/stats/latency`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use hdrhistogram::Histogram;
use serde::Serialize;

use crate::config::latency_bounds;

/// Shared latency stats. Middleware records, API reads.
/// Values stored in microseconds.
pub struct LatencyStats {
    overall: Mutex<Histogram<u64>>,
    /// "METHOD /route/:template" → histogram
    by_route: DashMap<String, Histogram<u64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteLatency {
    pub route: String,
    #[serde(flatten)]
    pub summary: LatencySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub overall: LatencySummary,
    /// Sorted by route.
    pub routes: Vec<RouteLatency>,
}

fn new_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(
        latency_bounds::LOW_US,
        latency_bounds::HIGH_US,
        latency_bounds::SIGFIG,
    )
    .expect("valid histogram bounds")
}

fn summarize(h: &Histogram<u64>) -> LatencySummary {
    if h.len() == 0 {
        return LatencySummary { samples: 0, p50_us: None, p95_us: None, p99_us: None };
    }
    LatencySummary {
        samples: h.len(),
        p50_us: Some(h.value_at_quantile(0.5)),
        p95_us: Some(h.value_at_quantile(0.95)),
        p99_us: Some(h.value_at_quantile(0.99)),
    }
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            overall: Mutex::new(new_histogram()),
            by_route: DashMap::new(),
        }
    }

    /// Record one request. Values beyond the histogram bounds are clamped.
    pub fn record(&self, route: &str, d: Duration) {
        let us = d.as_micros().min(u128::from(u64::MAX)) as u64;
        if let Ok(mut h) = self.overall.lock() {
            h.saturating_record(us);
        }
        self.by_route
            .entry(route.to_string())
            .or_insert_with(new_histogram)
            .saturating_record(us);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let overall = match self.overall.lock() {
            Ok(h) => summarize(&h),
            Err(_) => LatencySummary { samples: 0, p50_us: None, p95_us: None, p99_us: None },
        };
        let mut routes: Vec<RouteLatency> = self
            .by_route
            .iter()
            .map(|e| RouteLatency { route: e.key().clone(), summary: summarize(e.value()) })
            .collect();
        routes.sort_by(|a, b| a.route.cmp(&b.route));
        LatencySnapshot { overall, routes }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Router middleware: times every matched request under its route template.
pub async fn track_latency(
    State(stats): State<Arc<LatencyStats>>,
    req: Request,
    next: Next,
) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let key = format!("{} {}", req.method(), route);

    let started = Instant::now();
    let response = next.run(req).await;
    stats.record(&key, started.elapsed());
    response
}
