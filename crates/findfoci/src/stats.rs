//! Region statistics and background estimation.

use crate::histogram::Histogram;
use crate::threshold::{auto_threshold, AutoThresholdMethod};

/// Which side of the inclusion mask feeds background statistics.
///
/// Without a mask both scopes read the whole stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsScope {
    /// Statistics from the analysed (inside-mask) region.
    #[default]
    Inside,
    /// Statistics from the excluded (outside-mask) region.
    Outside,
}

/// Background estimation method.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMethod {
    /// Fixed background level.
    Absolute(f64),
    /// Mean of the statistics region.
    Mean,
    /// Mean plus `k` standard deviations of the statistics region.
    StdDevAboveMean(f64),
    /// Histogram auto-threshold over the statistics region.
    AutoThreshold(AutoThresholdMethod),
    /// Minimum of the statistics region.
    MinRoi,
    /// No background: the stack minimum, so negative-valued images keep
    /// every sample eligible.
    None,
}

impl Default for BackgroundMethod {
    fn default() -> Self {
        Self::AutoThreshold(AutoThresholdMethod::Otsu)
    }
}

/// Statistics vector for one analysis region.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StackStats {
    /// Smallest sample in the statistics region.
    pub min: f64,
    /// Largest sample in the statistics region.
    pub max: f64,
    /// Mean sample value.
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Sum of sample values.
    pub sum: f64,
    /// Resolved background level.
    pub background: f64,
    /// Sum of `value - background` over analysed voxels above background.
    pub total_above_background: f64,
    /// Region the statistics were computed from.
    pub scope: StatsScope,
}

impl StackStats {
    /// Moment statistics of a histogram; background fields are filled later
    /// by [`resolve_background`].
    pub(crate) fn from_histogram(hist: &Histogram, scope: StatsScope) -> Self {
        let n = hist.total_count() as f64;
        if n == 0.0 {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std_dev: 0.0,
                sum: 0.0,
                background: 0.0,
                total_above_background: 0.0,
                scope,
            };
        }
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for bin in 0..hist.n_bins() {
            let v = hist.value(bin);
            let c = f64::from(hist.count(bin));
            sum += v * c;
            sum_sq += v * v * c;
        }
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        Self {
            min: hist.min_value().unwrap_or(0.0),
            max: hist.max_value().unwrap_or(0.0),
            mean,
            std_dev: variance.sqrt(),
            sum,
            background: 0.0,
            total_above_background: 0.0,
            scope,
        }
    }
}

/// Background level for `method` given the statistics region's moments and
/// histogram.
pub(crate) fn resolve_background(
    method: BackgroundMethod,
    stats: &StackStats,
    stats_hist: &Histogram,
) -> f64 {
    match method {
        BackgroundMethod::Absolute(value) => value,
        BackgroundMethod::Mean => stats.mean,
        BackgroundMethod::StdDevAboveMean(k) => stats.mean + k * stats.std_dev,
        BackgroundMethod::AutoThreshold(m) => auto_threshold(stats_hist, m),
        BackgroundMethod::MinRoi => stats.min,
        BackgroundMethod::None => stats.min,
    }
}

/// Sum of `value - background` over histogram voxels above `background`.
pub(crate) fn total_above(hist: &Histogram, background: f64) -> f64 {
    let mut total = 0.0;
    for bin in (0..hist.n_bins()).rev() {
        let v = hist.value(bin);
        if v <= background {
            break;
        }
        total += (v - background) * f64::from(hist.count(bin));
    }
    total
}
