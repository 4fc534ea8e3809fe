//! Statistical summaries for flood samples.
//!
//! A completed flood step hands its raw per-request latencies and
//! throughputs to [`compute_perf`], which reduces each axis to the
//! mean, the 50th/90th/99th percentiles and the extremes. No filtering or
//! trimming is applied; the flood loop itself is responsible for producing
//! a usable sample distribution.

use serde::{Deserialize, Serialize};

/// Latency summary in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Latency {
    /// Arithmetic mean
    #[serde(rename = "avg_secs", default, skip_serializing_if = "is_zero")]
    pub avg: f64,
    /// 50th percentile
    #[serde(rename = "percentile50_secs", default, skip_serializing_if = "is_zero")]
    pub p50: f64,
    /// 90th percentile
    #[serde(rename = "percentile90_secs", default, skip_serializing_if = "is_zero")]
    pub p90: f64,
    /// 99th percentile
    #[serde(rename = "percentile99_secs", default, skip_serializing_if = "is_zero")]
    pub p99: f64,
    /// Fastest observed request
    #[serde(rename = "min_secs", default, skip_serializing_if = "is_zero")]
    pub min: f64,
    /// Slowest observed request
    #[serde(rename = "max_secs", default, skip_serializing_if = "is_zero")]
    pub max: f64,
}

/// Throughput summary in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    /// Arithmetic mean
    #[serde(rename = "avg_bytes_per_sec", default, skip_serializing_if = "is_zero")]
    pub avg: f64,
    /// 50th percentile
    #[serde(
        rename = "percentile50_bytes_per_sec",
        default,
        skip_serializing_if = "is_zero"
    )]
    pub p50: f64,
    /// 90th percentile
    #[serde(
        rename = "percentile90_bytes_per_sec",
        default,
        skip_serializing_if = "is_zero"
    )]
    pub p90: f64,
    /// 99th percentile
    #[serde(
        rename = "percentile99_bytes_per_sec",
        default,
        skip_serializing_if = "is_zero"
    )]
    pub p99: f64,
    /// Slowest observed request
    #[serde(rename = "min_bytes_per_sec", default, skip_serializing_if = "is_zero")]
    pub min: f64,
    /// Fastest observed request
    #[serde(rename = "max_bytes_per_sec", default, skip_serializing_if = "is_zero")]
    pub max: f64,
}

/// Combined latency and throughput summary for one measured edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfSample {
    /// Per-request latency distribution
    #[serde(rename = "Latency", default)]
    pub latency: Latency,
    /// Per-request throughput distribution
    #[serde(rename = "Throughput", default)]
    pub throughput: Throughput,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

/// Reduce raw flood samples to a [`PerfSample`].
///
/// Returns the zero sample when either input is empty, so callers can
/// serialize an untouched edge without a special case.
pub fn compute_perf(latencies: &[f64], throughputs: &[f64]) -> PerfSample {
    if latencies.is_empty() || throughputs.is_empty() {
        return PerfSample::default();
    }
    PerfSample {
        latency: Latency {
            avg: mean(latencies),
            p50: percentile(latencies, 50.0),
            p90: percentile(latencies, 90.0),
            p99: percentile(latencies, 99.0),
            min: fold_min(latencies),
            max: fold_max(latencies),
        },
        throughput: Throughput {
            avg: mean(throughputs),
            p50: percentile(throughputs, 50.0),
            p90: percentile(throughputs, 90.0),
            p99: percentile(throughputs, 99.0),
            min: fold_min(throughputs),
            max: fold_max(throughputs),
        },
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn fold_min(samples: &[f64]) -> f64 {
    samples.iter().copied().fold(f64::INFINITY, f64::min)
}

fn fold_max(samples: &[f64]) -> f64 {
    samples.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Percentile over the sample multiset, linearly interpolated between the
/// closest ranks.
///
/// Interpolation keeps the summaries monotonic in the requested
/// percentile, so `p50 <= p90 <= p99` holds for any sample count.
fn percentile(samples: &[f64], pct: f64) -> f64 {
    match samples.len() {
        0 => 0.0,
        1 => samples[0],
        n => {
            let mut sorted = samples.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let rank = pct / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let weight = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * weight
        }
    }
}
