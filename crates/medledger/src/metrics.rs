//! Operation latency and ciphertext size metrics.
//!
//! The engine times every public operation, successful or not. Latency
//! samples stay in memory and are bounded per operation; size statistics
//! are recomputed from the stored envelopes on each call to
//! [`Engine::metrics`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use medledger_core::{ReportId, VersionId};
use medledger_store::Store;

use crate::engine::Engine;
use crate::error::Result;

/// Latency samples kept per operation. Older samples are dropped first.
pub const MAX_SAMPLES_PER_OPERATION: usize = 4096;

// =============================================================================
// Types
// =============================================================================

/// Latency summary for one operation, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub count: usize,
    pub avg_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

/// Ciphertext size summary, in bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeStats {
    pub count: usize,
    pub avg_bytes: f64,
    pub min_bytes: usize,
    pub max_bytes: usize,
}

/// Ciphertext size of one stored version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSize {
    pub report_id: ReportId,
    pub version_id: VersionId,
    pub bytes: usize,
}

/// Everything [`Engine::metrics`] reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    /// Per-operation latency, keyed by operation name.
    pub operations: BTreeMap<String, LatencyStats>,
    /// `None` when nothing is stored.
    pub ciphertext_overall: Option<SizeStats>,
    /// Versions in chain creation order.
    pub ciphertext_by_version: Vec<VersionSize>,
}

// =============================================================================
// Recording
// =============================================================================

/// Bounded latency samples per operation.
#[derive(Debug, Default)]
pub struct OperationTimings {
    samples: Mutex<BTreeMap<&'static str, VecDeque<f64>>>,
}

impl OperationTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `op`. The sample is recorded when the timer drops.
    pub fn start(&self, op: &'static str) -> OperationTimer<'_> {
        OperationTimer {
            timings: self,
            op,
            started: Instant::now(),
        }
    }

    pub fn record(&self, op: &'static str, elapsed: Duration) {
        // A poisoned table still holds valid samples.
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let op_samples = samples.entry(op).or_default();
        if op_samples.len() == MAX_SAMPLES_PER_OPERATION {
            op_samples.pop_front();
        }
        op_samples.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    /// Summaries of every operation recorded so far.
    pub fn summary(&self) -> BTreeMap<String, LatencyStats> {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples
            .iter()
            .map(|(op, values)| {
                let values: Vec<f64> = values.iter().copied().collect();
                (op.to_string(), latency_stats(&values))
            })
            .collect()
    }
}

/// Records one latency sample on drop.
#[must_use = "the sample is recorded when the timer drops"]
pub struct OperationTimer<'a> {
    timings: &'a OperationTimings,
    op: &'static str,
    started: Instant,
}

impl Drop for OperationTimer<'_> {
    fn drop(&mut self) {
        self.timings.record(self.op, self.started.elapsed());
    }
}

// =============================================================================
// Computation
// =============================================================================

/// Summarize latency samples.
#[allow(clippy::cast_precision_loss)]
pub fn latency_stats(values: &[f64]) -> LatencyStats {
    if values.is_empty() {
        return LatencyStats::default();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    LatencyStats {
        count: sorted.len(),
        avg_ms: Some(sorted.iter().sum::<f64>() / sorted.len() as f64),
        p50_ms: Some(percentile(&sorted, 0.50)),
        p95_ms: Some(percentile(&sorted, 0.95)),
        max_ms: sorted.last().copied(),
    }
}

/// Summarize ciphertext sizes. `None` for an empty slice.
#[allow(clippy::cast_precision_loss)]
pub fn size_stats(sizes: &[usize]) -> Option<SizeStats> {
    let min_bytes = *sizes.iter().min()?;
    let max_bytes = *sizes.iter().max()?;
    Some(SizeStats {
        count: sizes.len(),
        avg_bytes: sizes.iter().sum::<usize>() as f64 / sizes.len() as f64,
        min_bytes,
        max_bytes,
    })
}

/// Linear interpolation between closest ranks. `sorted` must be non-empty
/// and ascending; `p` is in `[0, 1]`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    if lower == upper {
        return sorted[lower];
    }
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

impl<S: Store> Engine<S> {
    /// Operation latencies and ciphertext sizes.
    pub async fn metrics(&self) -> Result<MetricsReport> {
        let mut by_version = Vec::new();
        for report_id in self.store().list_chains().await? {
            let ledger = self.load(&report_id).await?;
            by_version.extend(ledger.envelopes.iter().map(|envelope| VersionSize {
                report_id: report_id.clone(),
                version_id: envelope.version_id.clone(),
                bytes: envelope.cipher_len(),
            }));
        }
        let sizes: Vec<usize> = by_version.iter().map(|v| v.bytes).collect();

        Ok(MetricsReport {
            operations: self.timings().summary(),
            ciphertext_overall: size_stats(&sizes),
            ciphertext_by_version: by_version,
        })
    }
}
