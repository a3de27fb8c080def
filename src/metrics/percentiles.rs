use hdrhistogram::Histogram;
use serde::Serialize;

/// Percentile reported for every series.
pub const P90: u64 = 90;

/// Nearest-rank percentile over an already sorted slice.
///
/// Picks index `floor((len - 1) * p / 100)`, clamped to the last element.
/// Integer arithmetic keeps the rank exact (no `8.1` vs `8.0999` surprises).
pub fn nearest_rank(sorted: &[i64], percentile: u64) -> Option<i64> {
    let last = sorted.len().checked_sub(1)?;
    let index = (last as u64 * percentile / 100) as usize;
    sorted.get(index.min(last)).copied()
}

/// Percentile breakdown of the pipeline lag histogram.
/// Serialized straight into the status JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileSet {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: u64,
}

impl PercentileSet {
    /// Returns zeroed values if the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::empty();
        }

        Self {
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_percentile(50.0),
            p95: hist.value_at_percentile(95.0),
            p99: hist.value_at_percentile(99.0),
            p999: hist.value_at_percentile(99.9),
            count: hist.len(),
        }
    }

    pub fn empty() -> Self {
        Self {
            min: 0,
            max: 0,
            mean: 0.0,
            p50: 0,
            p95: 0,
            p99: 0,
            p999: 0,
            count: 0,
        }
    }
}
