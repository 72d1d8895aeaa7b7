//! Per-instance and aggregate traffic statistics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::validation::{analytics_errors, ensure_valid};
use crate::config::AnalyticsConfig;
use crate::error::BalancerResult;
use crate::observability::metrics;

/// A single completed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    pub instance_id: String,
    pub timestamp: SystemTime,
    pub success: bool,
    pub response_time_ms: f64,
}

/// Counters for one instance. Response times are kept in microseconds so
/// min/max can use integer atomics.
#[derive(Debug)]
struct InstanceTraffic {
    total: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    response_us_sum: AtomicU64,
    response_us_min: AtomicU64,
    response_us_max: AtomicU64,
    window: Mutex<VecDeque<f64>>,
}

impl InstanceTraffic {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            response_us_sum: AtomicU64::new(0),
            response_us_min: AtomicU64::new(u64::MAX),
            response_us_max: AtomicU64::new(0),
            window: Mutex::new(VecDeque::new()),
        }
    }

    fn window(&self) -> MutexGuard<'_, VecDeque<f64>> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Statistics for a single instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStats {
    pub instance: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate_percent: f64,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: Option<f64>,
    pub max_response_time_ms: Option<f64>,
}

/// Statistics across all instances.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate_percent: f64,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: Option<f64>,
    pub max_response_time_ms: Option<f64>,
    pub uptime_secs: f64,
    pub requests_per_second: f64,
}

/// One instance's share of traffic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceShare {
    pub instance: String,
    pub requests: u64,
    pub percentage: f64,
}

/// Traffic split across instances.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrafficDistribution {
    /// No request has been recorded yet.
    NoData,
    Shares {
        total_requests: u64,
        instances: Vec<InstanceShare>,
    },
}

impl TrafficDistribution {
    pub fn share_of(&self, instance: &str) -> Option<f64> {
        match self {
            TrafficDistribution::NoData => None,
            TrafficDistribution::Shares { instances, .. } => instances
                .iter()
                .find(|s| s.instance == instance)
                .map(|s| s.percentage),
        }
    }

    pub fn total_percentage(&self) -> Option<f64> {
        match self {
            TrafficDistribution::NoData => None,
            TrafficDistribution::Shares { instances, .. } => {
                Some(instances.iter().map(|s| s.percentage).sum())
            }
        }
    }
}

/// Traffic analytics shared by the request path and selection.
#[derive(Debug)]
pub struct TrafficAnalytics {
    per_instance: DashMap<String, Arc<InstanceTraffic>>,
    history: Mutex<VecDeque<RequestRecord>>,
    history_capacity: usize,
    response_window: usize,
    started_at: Mutex<Instant>,
}

impl TrafficAnalytics {
    pub fn new(config: &AnalyticsConfig) -> BalancerResult<Self> {
        ensure_valid(analytics_errors(config))?;
        Ok(Self {
            per_instance: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
            history_capacity: config.history_capacity,
            response_window: config.response_window,
            started_at: Mutex::new(Instant::now()),
        })
    }

    fn traffic_for(&self, instance_id: &str) -> Arc<InstanceTraffic> {
        if let Some(entry) = self.per_instance.get(instance_id) {
            return entry.value().clone();
        }
        self.per_instance
            .entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(InstanceTraffic::new()))
            .value()
            .clone()
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<RequestRecord>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a completed request.
    pub fn record_request(&self, instance_id: &str, success: bool, response_time_ms: f64) {
        let response_time_ms = if response_time_ms.is_finite() {
            response_time_ms.max(0.0)
        } else {
            0.0
        };
        let micros = (response_time_ms * 1000.0).round() as u64;

        let traffic = self.traffic_for(instance_id);
        traffic.total.fetch_add(1, Ordering::Relaxed);
        if success {
            traffic.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            traffic.errors.fetch_add(1, Ordering::Relaxed);
        }
        traffic.response_us_sum.fetch_add(micros, Ordering::Relaxed);
        traffic.response_us_min.fetch_min(micros, Ordering::Relaxed);
        traffic.response_us_max.fetch_max(micros, Ordering::Relaxed);

        {
            let mut window = traffic.window();
            window.push_back(response_time_ms);
            while window.len() > self.response_window {
                window.pop_front();
            }
        }

        {
            let mut history = self.history();
            if history.len() == self.history_capacity {
                history.pop_front();
            }
            history.push_back(RequestRecord {
                instance_id: instance_id.to_string(),
                timestamp: SystemTime::now(),
                success,
                response_time_ms,
            });
        }

        metrics::record_request(instance_id, success, response_time_ms);
    }

    /// Average over the most recent samples, `None` before the first sample.
    pub fn recent_average(&self, instance_id: &str) -> Option<f64> {
        let traffic = self.per_instance.get(instance_id)?.value().clone();
        let window = traffic.window();
        if window.is_empty() {
            return None;
        }
        Some(window.iter().sum::<f64>() / window.len() as f64)
    }

    /// Drop the latency samples of `instance_id`; counters are untouched.
    pub fn clear_response_window(&self, instance_id: &str) {
        if let Some(entry) = self.per_instance.get(instance_id) {
            entry.value().window().clear();
        }
    }

    pub fn get_instance_stats(&self, instance_id: &str) -> Option<InstanceStats> {
        let traffic = self.per_instance.get(instance_id)?.value().clone();
        Some(instance_stats(instance_id, &traffic))
    }

    /// Stats for every instance that has received traffic, sorted by name.
    pub fn get_all_instance_stats(&self) -> Vec<InstanceStats> {
        let mut stats: Vec<_> = self
            .per_instance
            .iter()
            .map(|entry| instance_stats(entry.key(), entry.value()))
            .collect();
        stats.sort_by(|a, b| a.instance.cmp(&b.instance));
        stats
    }

    pub fn get_overall_stats(&self) -> OverallStats {
        let mut total = 0;
        let mut successes = 0;
        let mut errors = 0;
        let mut sum_us = 0;
        let mut min_us = u64::MAX;
        let mut max_us = 0;

        for entry in self.per_instance.iter() {
            let t = entry.value();
            total += t.total.load(Ordering::Relaxed);
            successes += t.successes.load(Ordering::Relaxed);
            errors += t.errors.load(Ordering::Relaxed);
            sum_us += t.response_us_sum.load(Ordering::Relaxed);
            min_us = min_us.min(t.response_us_min.load(Ordering::Relaxed));
            max_us = max_us.max(t.response_us_max.load(Ordering::Relaxed));
        }

        let uptime_secs = self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            .as_secs_f64();

        OverallStats {
            total_requests: total,
            successful_requests: successes,
            failed_requests: errors,
            error_rate_percent: percentage(errors, total),
            avg_response_time_ms: average_ms(sum_us, total),
            min_response_time_ms: (total > 0).then(|| min_us as f64 / 1000.0),
            max_response_time_ms: (total > 0).then(|| max_us as f64 / 1000.0),
            uptime_secs,
            requests_per_second: if uptime_secs > 0.0 {
                total as f64 / uptime_secs
            } else {
                0.0
            },
        }
    }

    /// Share of total requests per instance.
    pub fn get_traffic_distribution(&self) -> TrafficDistribution {
        let mut counts: Vec<(String, u64)> = self
            .per_instance
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().total.load(Ordering::Relaxed)))
            .filter(|(_, count)| *count > 0)
            .collect();
        let total: u64 = counts.iter().map(|(_, count)| count).sum();
        if total == 0 {
            return TrafficDistribution::NoData;
        }

        counts.sort_by(|a, b| a.0.cmp(&b.0));
        TrafficDistribution::Shares {
            total_requests: total,
            instances: counts
                .into_iter()
                .map(|(instance, requests)| InstanceShare {
                    instance,
                    requests,
                    percentage: percentage(requests, total),
                })
                .collect(),
        }
    }

    /// The `n` most recent records, oldest first.
    pub fn get_recent_history(&self, n: usize) -> Vec<RequestRecord> {
        let history = self.history();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    /// Clear all counters and history.
    pub fn reset(&self) {
        self.per_instance.clear();
        self.history().clear();
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        tracing::info!("Analytics reset");
    }
}

fn instance_stats(instance: &str, t: &InstanceTraffic) -> InstanceStats {
    let total = t.total.load(Ordering::Relaxed);
    let errors = t.errors.load(Ordering::Relaxed);
    InstanceStats {
        instance: instance.to_string(),
        total_requests: total,
        successful_requests: t.successes.load(Ordering::Relaxed),
        failed_requests: errors,
        error_rate_percent: percentage(errors, total),
        avg_response_time_ms: average_ms(t.response_us_sum.load(Ordering::Relaxed), total),
        min_response_time_ms: (total > 0)
            .then(|| t.response_us_min.load(Ordering::Relaxed) as f64 / 1000.0),
        max_response_time_ms: (total > 0)
            .then(|| t.response_us_max.load(Ordering::Relaxed) as f64 / 1000.0),
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn average_ms(sum_us: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum_us as f64 / count as f64 / 1000.0
    }
}
