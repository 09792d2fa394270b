//! Label-mask construction from the final results.

use crate::error::FindFociError;
use crate::histogram::Histogram;
use crate::stack::{ImageStack, Sample};
use crate::threshold::{auto_threshold, AutoThresholdMethod};

use super::types::FociResult;

/// Label image variant written by the mask stage.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskMode {
    /// No mask output.
    #[default]
    None,
    /// Plain peak id labels over the full region.
    Peaks,
    /// Keep voxels strictly above a per-peak auto-threshold computed over
    /// the peak's own voxel values.
    Thresholded(AutoThresholdMethod),
    /// Keep the brightest voxels accumulating the given fraction of the
    /// peak's total intensity.
    FractionOfIntensity(f64),
    /// Keep voxels within the given fraction of the peak height above
    /// background.
    FractionOfHeight(f64),
}

/// Mask stage options.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct MaskOptions {
    pub mode: MaskMode,
    /// Restrict labels to voxels strictly above each peak's highest saddle.
    /// Combines with any mode; with `Peaks` this is the plain above-saddle
    /// mask.
    pub above_saddle: bool,
    /// Additionally paint each seed voxel with the brightest label `k + 1`.
    pub seed_dot: bool,
}

/// Build the label mask. Labels are the final renumbered ids; fraction
/// cutoffs keep equal values, thresholded mode keeps strictly-above values.
pub(crate) fn build_mask<T: Sample>(
    search: &ImageStack<T>,
    background: f64,
    labels: &[u32],
    results: &[FociResult],
    options: &MaskOptions,
) -> Result<Option<ImageStack<u16>>, FindFociError> {
    if matches!(options.mode, MaskMode::None) {
        return Ok(None);
    }
    let k = results.len();
    if k + usize::from(options.seed_dot) > u16::MAX as usize {
        return Err(FindFociError::TooManyPeaksForMask);
    }

    let dims = search.dims();
    let data = search.data();

    let mut cutoff = vec![f64::NEG_INFINITY; k];
    let mut strict = false;
    match options.mode {
        MaskMode::None | MaskMode::Peaks => {}
        MaskMode::Thresholded(method) => {
            strict = true;
            for (i, vals) in peak_values(data, labels, k).into_iter().enumerate() {
                if !vals.is_empty() {
                    let hist = Histogram::from_values(vals);
                    cutoff[i] = auto_threshold(&hist, method);
                }
            }
        }
        MaskMode::FractionOfIntensity(f) => {
            let f = f.clamp(0.0, 1.0);
            for (i, mut vals) in peak_values(data, labels, k).into_iter().enumerate() {
                vals.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
                let target = f * vals.iter().sum::<f64>();
                let mut acc = 0.0;
                for &v in &vals {
                    acc += v;
                    cutoff[i] = v;
                    if acc >= target {
                        break;
                    }
                }
            }
        }
        MaskMode::FractionOfHeight(f) => {
            let f = f.clamp(0.0, 1.0);
            for (i, r) in results.iter().enumerate() {
                cutoff[i] = r.max_value - f * (r.max_value - background);
            }
        }
    }

    let saddle: Vec<f64> = results
        .iter()
        .map(|r| r.highest_saddle_value.unwrap_or(f64::NEG_INFINITY))
        .collect();

    let mut out = vec![0u16; data.len()];
    for (idx, &l) in labels.iter().enumerate() {
        if l == 0 {
            continue;
        }
        let i = (l - 1) as usize;
        let v = data[idx].to_f64();
        let keep = if strict { v > cutoff[i] } else { v >= cutoff[i] };
        if !keep || (options.above_saddle && v <= saddle[i]) {
            continue;
        }
        out[idx] = l as u16;
    }
    if options.seed_dot {
        let dot = (k + 1) as u16;
        for r in results {
            out[dims.index(r.x, r.y, r.z)] = dot;
        }
    }
    ImageStack::new(dims, out).map(Some)
}

/// Voxel values per final peak label.
fn peak_values<T: Sample>(data: &[T], labels: &[u32], k: usize) -> Vec<Vec<f64>> {
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); k];
    for (idx, &l) in labels.iter().enumerate() {
        if l != 0 {
            values[(l - 1) as usize].push(data[idx].to_f64());
        }
    }
    values
}
