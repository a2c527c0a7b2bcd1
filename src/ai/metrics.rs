//! Pipeline Metrics Collection
//!
//! Centralized aggregation of provider usage, spend, and latency across one
//! generation run. Thread-safe for concurrent stage execution.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::ai::provider::{LlmResponse, TokenUsage};

/// Thread-safe metrics collector for one generation run.
///
/// Counters are atomics; per-stage records sit behind an RwLock. Cost is
/// stored as microdollars so it can be accumulated atomically.
pub struct MetricsCollector {
    run_id: String,
    start_time: Instant,
    api_calls: AtomicU32,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    total_latency_ms: AtomicU64,
    total_cost_micros: AtomicU64,
    stage_metrics: RwLock<Vec<StageMetrics>>,
}

/// Metrics for one completed pipeline stage
#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub name: String,
    pub api_calls: u32,
    pub duration_ms: u64,
    pub cost_usd: f64,
}

/// Summary statistics for one generation run
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub run_id: String,
    pub total_duration_ms: u64,
    pub api_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub avg_latency_ms: f64,
    pub total_cost_usd: f64,
    pub stages: Vec<StageMetrics>,
}

impl MetricsCollector {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            start_time: Instant::now(),
            api_calls: AtomicU32::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
            stage_metrics: RwLock::new(Vec::new()),
        }
    }

    /// Record a chat response and its computed cost
    pub fn record_response(&self, response: &LlmResponse, cost_usd: f64) {
        self.record_usage(&response.usage, cost_usd, response.timing.total_ms);
    }

    /// Record usage directly (embedding and flat-rate calls)
    pub fn record_usage(&self, usage: &TokenUsage, cost_usd: f64, latency_ms: u64) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(usage.input_tokens as u64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens as u64, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.total_cost_micros
            .fetch_add((cost_usd * 1_000_000.0) as u64, Ordering::Relaxed);
    }

    /// Record a flat-rate provider call with no token usage
    pub fn record_flat_cost(&self, cost_usd: f64) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        self.total_cost_micros
            .fetch_add((cost_usd * 1_000_000.0) as u64, Ordering::Relaxed);
    }

    /// Record a completed stage
    pub fn complete_stage(&self, stage: StageMetrics) {
        let mut stages = self.stage_metrics.write().unwrap_or_else(|poisoned| {
            tracing::error!("Metrics stage RwLock poisoned, recovering");
            poisoned.into_inner()
        });
        stages.push(stage);
    }

    pub fn summary(&self) -> MetricsSummary {
        let api_calls = self.api_calls.load(Ordering::Relaxed);
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);
        let total_cost_micros = self.total_cost_micros.load(Ordering::Relaxed);

        let avg_latency = if api_calls > 0 {
            total_latency as f64 / api_calls as f64
        } else {
            0.0
        };

        let stages = self
            .stage_metrics
            .read()
            .unwrap_or_else(|poisoned| {
                tracing::error!("Metrics stage RwLock poisoned on read, recovering");
                poisoned.into_inner()
            })
            .clone();

        MetricsSummary {
            run_id: self.run_id.clone(),
            total_duration_ms: self.start_time.elapsed().as_millis() as u64,
            api_calls,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            avg_latency_ms: avg_latency,
            total_cost_usd: total_cost_micros as f64 / 1_000_000.0,
            stages,
        }
    }
}

impl MetricsSummary {
    /// Human-readable summary for CLI output
    pub fn display(&self) -> String {
        let mut out = format!(
            "Run: {}\n\
             Duration: {:.1}s\n\
             API Calls: {}\n\
             Tokens: {} (input: {}, output: {})\n\
             Avg Latency: {:.0}ms\n\
             Estimated Cost: ${:.4}",
            self.run_id,
            self.total_duration_ms as f64 / 1000.0,
            self.api_calls,
            self.total_tokens,
            self.input_tokens,
            self.output_tokens,
            self.avg_latency_ms,
            self.total_cost_usd
        );
        for stage in &self.stages {
            out.push_str(&format!(
                "\n  {}: {} calls, {:.1}s, ${:.4}",
                stage.name,
                stage.api_calls,
                stage.duration_ms as f64 / 1000.0,
                stage.cost_usd
            ));
        }
        out
    }
}

/// Shared metrics collector for pipeline stages
pub type SharedMetrics = Arc<MetricsCollector>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_usage() {
        let metrics = MetricsCollector::new("run-1");
        metrics.record_usage(
            &TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            0.0125,
            500,
        );

        let summary = metrics.summary();
        assert_eq!(summary.api_calls, 1);
        assert_eq!(summary.total_tokens, 150);
        assert!((summary.total_cost_usd - 0.0125).abs() < 0.0001);
    }

    #[test]
    fn test_concurrent_recording() {
        use std::thread;

        let metrics = Arc::new(MetricsCollector::new("run-2"));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_usage(
                            &TokenUsage {
                                input_tokens: 10,
                                output_tokens: 5,
                            },
                            0.001,
                            50,
                        );
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let summary = metrics.summary();
        assert_eq!(summary.api_calls, 1000);
        assert_eq!(summary.input_tokens, 10_000);
        assert!((summary.total_cost_usd - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_flat_cost_calls() {
        let metrics = MetricsCollector::new("run-3");
        metrics.record_flat_cost(0.005);
        metrics.record_flat_cost(0.005);

        let summary = metrics.summary();
        assert_eq!(summary.api_calls, 2);
        assert_eq!(summary.total_tokens, 0);
        assert!((summary.total_cost_usd - 0.01).abs() < 1e-9);
    }
}
