//! Final statistics, centres, ordering and renumbering of surviving peaks.

use crate::grid::{Connectivity, Neighbourhood};
use crate::stack::{ImageStack, Sample};

use super::centre::{compute_centre, CentreMethod};
use super::merge::{best_saddle, PeakRemap};
use super::objects::ObjectLabels;
use super::saddle::SaddleList;
use super::types::FociResult;

/// Result ordering. Magnitude-like keys sort descending, coordinate keys
/// ascending; the sort is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Count,
    #[default]
    TotalIntensity,
    MaxValue,
    AverageIntensity,
    IntensityMinusBackground,
    AverageIntensityMinusBackground,
    X,
    Y,
    Z,
    SaddleHeight,
    CountAboveSaddle,
    IntensityAboveSaddle,
    /// Height above the highest saddle (above background when saddle-less).
    AbsoluteHeight,
    /// Absolute height as a fraction of the maximum above background.
    RelativeHeightAboveBackground,
    /// Pre-sort peak id, ascending.
    Id,
    /// Lexicographic x, then y, then z.
    Xyz,
}

/// Inputs shared by every peak during finalisation.
pub(crate) struct FinaliseInputs<'a, T: Sample> {
    pub search: &'a ImageStack<T>,
    pub original: &'a ImageStack<T>,
    pub background: f64,
    /// Voxel labels as produced by region growth (pre-merge ids).
    pub peak_ids: &'a [u32],
    pub connectivity: Connectivity,
    pub centre: CentreMethod,
    pub contiguous_above_saddle: bool,
    pub sort: SortKey,
    /// 0 keeps every peak.
    pub max_peaks: usize,
    pub objects: Option<&'a ObjectLabels>,
}

/// Ordered, renumbered results plus the matching voxel label array.
pub(crate) struct FinalResults {
    pub results: Vec<FociResult>,
    pub labels: Vec<u32>,
}

/// Fill per-peak statistics and centres, then sort, truncate and renumber.
/// Voxels of truncated peaks are relabelled to 0.
pub(crate) fn finalise_results<T: Sample>(
    inputs: &FinaliseInputs<'_, T>,
    results: &[FociResult],
    saddles: &[SaddleList],
    remap: &mut PeakRemap,
) -> FinalResults {
    let dims = inputs.search.dims();
    let data = inputs.search.data();
    let nh = Neighbourhood::new(inputs.connectivity, dims);

    let resolved: Vec<u32> = inputs
        .peak_ids
        .iter()
        .map(|&raw| if raw == 0 { 0 } else { remap.resolve(raw) })
        .collect();
    let live = remap.live_ids();

    let mut dense = vec![usize::MAX; results.len() + 1];
    for (k, &id) in live.iter().enumerate() {
        dense[id as usize] = k;
    }
    let mut voxel_lists: Vec<Vec<u32>> = vec![Vec::new(); live.len()];
    for (idx, &id) in resolved.iter().enumerate() {
        if id != 0 {
            voxel_lists[dense[id as usize]].push(idx as u32);
        }
    }

    let mut finals = Vec::with_capacity(live.len());
    for &id in &live {
        let voxels = &voxel_lists[dense[id as usize]];
        let mut r = results[(id - 1) as usize].clone();
        let saddle = best_saddle(&saddles[(id - 1) as usize], remap, id, results);
        let cutoff = saddle.map(|(_, s)| s).unwrap_or(f64::NEG_INFINITY);
        let seed = dims.index(r.x, r.y, r.z);
        let above = above_saddle_voxels(
            inputs.search,
            voxels,
            &resolved,
            id,
            seed,
            cutoff,
            inputs.contiguous_above_saddle,
            &nh,
        );

        r.highest_saddle_value = saddle.map(|(_, s)| s);
        r.saddle_neighbour_id = saddle.map(|(nid, _)| nid);
        r.count_above_saddle = above.len();
        r.intensity_above_saddle = above.iter().map(|&i| data[i as usize].to_f64()).sum();
        r.average_intensity = r.total_intensity / r.count as f64;
        r.intensity_above_background = r.total_intensity - r.count as f64 * inputs.background;
        r.centre = compute_centre(inputs.centre, inputs.search, inputs.original, voxels, &above);
        r.object_id = inputs.objects.map(|o| o.labels[seed]);
        finals.push(r);
    }

    sort_results(&mut finals, inputs.sort, inputs.background);
    if inputs.max_peaks > 0 && finals.len() > inputs.max_peaks {
        finals.truncate(inputs.max_peaks);
    }

    let mut final_of_old = vec![0u32; results.len() + 1];
    for (k, r) in finals.iter_mut().enumerate() {
        final_of_old[r.id as usize] = k as u32 + 1;
        r.id = k as u32 + 1;
    }
    for r in &mut finals {
        if let Some(nid) = r.saddle_neighbour_id {
            let f = final_of_old[nid as usize];
            r.saddle_neighbour_id = if f == 0 { None } else { Some(f) };
        }
    }
    let labels: Vec<u32> = resolved
        .iter()
        .map(|&id| if id == 0 { 0 } else { final_of_old[id as usize] })
        .collect();

    FinalResults {
        results: finals,
        labels,
    }
}

/// Region voxels strictly above `cutoff`, optionally restricted to the
/// seed's connected component. Ascending flat index.
#[allow(clippy::too_many_arguments)]
fn above_saddle_voxels<T: Sample>(
    stack: &ImageStack<T>,
    voxels: &[u32],
    resolved: &[u32],
    id: u32,
    seed: usize,
    cutoff: f64,
    contiguous: bool,
    nh: &Neighbourhood,
) -> Vec<u32> {
    let data = stack.data();
    if !contiguous {
        return voxels
            .iter()
            .copied()
            .filter(|&i| data[i as usize].to_f64() > cutoff)
            .collect();
    }

    if resolved[seed] != id || data[seed].to_f64() <= cutoff {
        return Vec::new();
    }
    let dims = stack.dims();
    let mut visited = vec![false; data.len()];
    let mut out: Vec<u32> = vec![seed as u32];
    visited[seed] = true;
    let mut qi = 0usize;
    while qi < out.len() {
        let idx = out[qi] as usize;
        qi += 1;
        let (x, y, z) = dims.coords(idx);
        nh.for_each(x, y, z, |nidx| {
            if !visited[nidx] && resolved[nidx] == id && data[nidx].to_f64() > cutoff {
                visited[nidx] = true;
                out.push(nidx as u32);
            }
        });
    }
    out.sort_unstable();
    out
}

pub(crate) fn absolute_height(r: &FociResult, background: f64) -> f64 {
    match r.highest_saddle_value {
        Some(s) => r.max_value - s,
        None => r.max_value - background,
    }
}

fn key_value(r: &FociResult, background: f64, key: SortKey) -> f64 {
    match key {
        SortKey::Count => r.count as f64,
        SortKey::TotalIntensity => r.total_intensity,
        SortKey::MaxValue => r.max_value,
        SortKey::AverageIntensity => r.average_intensity,
        SortKey::IntensityMinusBackground => r.intensity_above_background,
        SortKey::AverageIntensityMinusBackground => {
            r.intensity_above_background / r.count as f64
        }
        SortKey::X => r.centre[0],
        SortKey::Y => r.centre[1],
        SortKey::Z => r.centre[2],
        SortKey::SaddleHeight => r.highest_saddle_value.unwrap_or(f64::NEG_INFINITY),
        SortKey::CountAboveSaddle => r.count_above_saddle as f64,
        SortKey::IntensityAboveSaddle => r.intensity_above_saddle,
        SortKey::AbsoluteHeight => absolute_height(r, background),
        SortKey::Id => r.id as f64,
        SortKey::RelativeHeightAboveBackground => {
            let h = absolute_height(r, background);
            let d = r.max_value - background;
            if d != 0.0 {
                h / d
            } else {
                0.0
            }
        }
        SortKey::Xyz => 0.0,
    }
}

fn sort_results(finals: &mut [FociResult], key: SortKey, background: f64) {
    use std::cmp::Ordering;
    match key {
        SortKey::Xyz => finals.sort_by(|a, b| {
            a.centre[0]
                .partial_cmp(&b.centre[0])
                .unwrap_or(Ordering::Equal)
                .then(
                    a.centre[1]
                        .partial_cmp(&b.centre[1])
                        .unwrap_or(Ordering::Equal),
                )
                .then(
                    a.centre[2]
                        .partial_cmp(&b.centre[2])
                        .unwrap_or(Ordering::Equal),
                )
        }),
        SortKey::X | SortKey::Y | SortKey::Z | SortKey::Id => finals.sort_by(|a, b| {
            key_value(a, background, key)
                .partial_cmp(&key_value(b, background, key))
                .unwrap_or(Ordering::Equal)
        }),
        _ => finals.sort_by(|a, b| {
            key_value(b, background, key)
                .partial_cmp(&key_value(a, background, key))
                .unwrap_or(Ordering::Equal)
        }),
    }
}
