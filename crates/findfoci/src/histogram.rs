//! Sorted unique-value histogram with a per-voxel bin cache.
//!
//! The search engine processes voxels in descending intensity order by
//! walking histogram bins, so every voxel's bin index is cached once at
//! build time instead of re-resolved by binary search.

use crate::error::FindFociError;
use crate::stack::{ImageStack, Sample};

/// Bin cache entry for voxels outside the analysed region.
pub(crate) const EXCLUDED_BIN: u32 = u32::MAX;

/// Intensity histogram over the analysed region.
///
/// In the canonical form every bin holds one distinct sample value and all
/// bins are non-empty; `compact` produces an equal-width re-binned form for
/// display where empty edge bins may appear.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Histogram {
    values: Vec<f64>,
    counts: Vec<u32>,
    min_bin: usize,
    max_bin: usize,
}

impl Histogram {
    /// Build the unique-value form from an unordered value list.
    pub(crate) fn from_values(mut values: Vec<f64>) -> Self {
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mut out_values: Vec<f64> = Vec::new();
        let mut counts: Vec<u32> = Vec::new();
        for v in values {
            if out_values.last() == Some(&v) {
                if let Some(c) = counts.last_mut() {
                    *c += 1;
                }
            } else {
                out_values.push(v);
                counts.push(1);
            }
        }
        let max_bin = out_values.len().saturating_sub(1);
        Self {
            values: out_values,
            counts,
            min_bin: 0,
            max_bin,
        }
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.values.len()
    }

    /// True when the analysed region was empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sample value of a bin (bin centre for the compacted form).
    pub fn value(&self, bin: usize) -> f64 {
        self.values[bin]
    }

    /// Voxel count of a bin.
    pub fn count(&self, bin: usize) -> u32 {
        self.counts[bin]
    }

    /// First non-empty bin.
    pub fn min_bin(&self) -> usize {
        self.min_bin
    }

    /// Last non-empty bin.
    pub fn max_bin(&self) -> usize {
        self.max_bin
    }

    /// Smallest sample value, if any.
    pub fn min_value(&self) -> Option<f64> {
        self.values.get(self.min_bin).copied()
    }

    /// Largest sample value, if any.
    pub fn max_value(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values[self.max_bin])
        }
    }

    /// Total voxel count over all bins.
    pub fn total_count(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    /// Re-bin onto `n` equal-width bins for display. Not used by the
    /// algorithm path.
    pub fn compact(&self, n: usize) -> Histogram {
        if self.values.is_empty() || n == 0 {
            return Histogram {
                values: Vec::new(),
                counts: Vec::new(),
                min_bin: 0,
                max_bin: 0,
            };
        }
        let lo = self.values[self.min_bin];
        let hi = self.values[self.max_bin];
        let width = (hi - lo) / n as f64;
        let mut counts = vec![0u32; n];
        for (bin, &v) in self.values.iter().enumerate() {
            let slot = if width > 0.0 {
                (((v - lo) / width) as usize).min(n - 1)
            } else {
                0
            };
            counts[slot] += self.counts[bin];
        }
        let values = (0..n).map(|i| lo + width * (i as f64 + 0.5)).collect();
        let min_bin = counts.iter().position(|&c| c > 0).unwrap_or(0);
        let max_bin = counts.iter().rposition(|&c| c > 0).unwrap_or(0);
        Histogram {
            values,
            counts,
            min_bin,
            max_bin,
        }
    }
}

/// Histogram plus the per-voxel bin cache over the same region.
pub(crate) struct HistogramBuild {
    pub histogram: Histogram,
    /// Bin index per voxel; `EXCLUDED_BIN` for voxels outside the region.
    pub bins: Vec<u32>,
}

/// Build the unique-value histogram of `stack` over the voxels where
/// `included` is true (all voxels when `None`).
pub(crate) fn build_histogram<T: Sample>(
    stack: &ImageStack<T>,
    included: Option<&[bool]>,
) -> Result<HistogramBuild, FindFociError> {
    let data = stack.data();
    let is_included = |idx: usize| included.map_or(true, |inc| inc[idx]);
    let n_included = match included {
        Some(inc) => inc.iter().filter(|&&i| i).count() as u64,
        None => data.len() as u64,
    };

    let build = if T::DISCRETE {
        build_discrete(data, &is_included)
    } else {
        build_sorted(data, &is_included)
    };

    if build.histogram.total_count() != n_included {
        return Err(FindFociError::HistogramMismatch);
    }
    Ok(build)
}

fn build_discrete<T: Sample>(data: &[T], is_included: &dyn Fn(usize) -> bool) -> HistogramBuild {
    let mut buckets = vec![0u32; T::BUCKETS];
    for (idx, v) in data.iter().enumerate() {
        if is_included(idx) {
            buckets[v.bucket()] += 1;
        }
    }

    let mut bucket_to_bin = vec![EXCLUDED_BIN; T::BUCKETS];
    let mut values = Vec::new();
    let mut counts = Vec::new();
    for (bucket, &c) in buckets.iter().enumerate() {
        if c > 0 {
            bucket_to_bin[bucket] = values.len() as u32;
            values.push(bucket as f64);
            counts.push(c);
        }
    }

    let mut bins = vec![EXCLUDED_BIN; data.len()];
    for (idx, v) in data.iter().enumerate() {
        if is_included(idx) {
            bins[idx] = bucket_to_bin[v.bucket()];
        }
    }

    let max_bin = values.len().saturating_sub(1);
    HistogramBuild {
        histogram: Histogram {
            values,
            counts,
            min_bin: 0,
            max_bin,
        },
        bins,
    }
}

fn build_sorted<T: Sample>(data: &[T], is_included: &dyn Fn(usize) -> bool) -> HistogramBuild {
    let mut pairs: Vec<(f64, u32)> = data
        .iter()
        .enumerate()
        .filter(|&(idx, _)| is_included(idx))
        .map(|(idx, v)| (v.to_f64(), idx as u32))
        .collect();
    // Samples are validated finite at init, so the ordering is total.
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut values: Vec<f64> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    let mut bins = vec![EXCLUDED_BIN; data.len()];
    for (v, idx) in pairs {
        if values.last() == Some(&v) {
            if let Some(c) = counts.last_mut() {
                *c += 1;
            }
        } else {
            values.push(v);
            counts.push(1);
        }
        bins[idx as usize] = (values.len() - 1) as u32;
    }

    let max_bin = values.len().saturating_sub(1);
    HistogramBuild {
        histogram: Histogram {
            values,
            counts,
            min_bin: 0,
            max_bin,
        },
        bins,
    }
}
