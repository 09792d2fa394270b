//! Maxima detection and histogram-ordered region growth.
//!
//! Voxels are processed in descending intensity by walking the bin cache,
//! never by re-sorting samples. Growth assigns each voxel to the peak of
//! its highest already-assigned neighbour; equal-steepness contests between
//! distinct peaks leave the voxel unassigned as a saddle pixel.

use crate::cancel::CancelToken;
use crate::error::FindFociError;
use crate::grid::{Connectivity, Neighbourhood};
use crate::histogram::{Histogram, EXCLUDED_BIN};
use crate::stack::{ImageStack, Sample};

use super::saddle::SaddleList;
use super::types::{
    FociResult, FLAG_EDGE, FLAG_EXCLUDED, FLAG_LISTED, FLAG_MAXIMUM, FLAG_PLATEAU, FLAG_PROCESSED,
    FLAG_SADDLE,
};

/// Region-growth stopping rule.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    /// Claim voxels down to the background level.
    #[default]
    AboveBackground,
    /// Claim voxels down to `background + fraction * (peak - background)`.
    FractionOfPeak(f64),
    /// Claim voxels down to half the peak height above background.
    HalfPeakValue,
}

/// Lowest value a peak with maximum `peak_value` may claim.
pub(crate) fn search_threshold(method: SearchMethod, background: f64, peak_value: f64) -> f64 {
    match method {
        SearchMethod::AboveBackground => background,
        SearchMethod::FractionOfPeak(f) => {
            background + f.clamp(0.0, 1.0) * (peak_value - background)
        }
        SearchMethod::HalfPeakValue => background + 0.5 * (peak_value - background),
    }
}

/// Included voxel indices ordered by descending histogram bin, ascending
/// index inside a bin (counting sort over the bin cache).
pub(crate) fn descending_order(bins: &[u32], n_bins: usize) -> Vec<u32> {
    let mut counts = vec![0usize; n_bins];
    for &b in bins {
        if b != EXCLUDED_BIN {
            counts[b as usize] += 1;
        }
    }
    let mut cursor = vec![0usize; n_bins];
    let mut acc = 0usize;
    for bin in (0..n_bins).rev() {
        cursor[bin] = acc;
        acc += counts[bin];
    }
    let mut order = vec![0u32; acc];
    for (idx, &b) in bins.iter().enumerate() {
        if b == EXCLUDED_BIN {
            continue;
        }
        order[cursor[b as usize]] = idx as u32;
        cursor[b as usize] += 1;
    }
    order
}

/// Borrowed inputs shared by the maxima and growth passes.
pub(crate) struct SearchInputs<'a, T: Sample> {
    pub stack: &'a ImageStack<T>,
    pub include: &'a [bool],
    pub bins: &'a [u32],
    pub hist: &'a Histogram,
    pub order: &'a [u32],
    pub connectivity: Connectivity,
}

/// Output of the maxima pass: flag array plus one result stub per peak.
#[derive(Debug)]
pub(crate) struct MaximaOutput {
    pub flags: Vec<u8>,
    pub results: Vec<FociResult>,
}

/// Output of the growth pass.
pub(crate) struct GrownRegions {
    pub peak_ids: Vec<u32>,
    pub flags: Vec<u8>,
    pub results: Vec<FociResult>,
    pub saddles: Vec<SaddleList>,
    /// Per peak: region touches an x/y border.
    pub edge: Vec<bool>,
}

/// Find peak seeds: strict local maxima and qualifying plateaus among
/// included voxels strictly above `background`.
///
/// Peak ids are handed out in descending value order, ascending seed index
/// on ties. A plateau qualifies when no member has a strictly-higher
/// included neighbour and at least one member has a strictly-lower one; its
/// seed is the member closest to the plateau centroid, lowest index on
/// ties.
pub(crate) fn find_maxima<T: Sample>(
    inputs: &SearchInputs<'_, T>,
    background: f64,
    cancel: &CancelToken,
) -> Result<MaximaOutput, FindFociError> {
    let dims = inputs.stack.dims();
    let data = inputs.stack.data();
    let nh = Neighbourhood::new(inputs.connectivity, dims);

    let mut flags = vec![0u8; data.len()];
    for (idx, inc) in inputs.include.iter().enumerate() {
        if !inc {
            flags[idx] |= FLAG_EXCLUDED;
        }
    }
    for idx in 0..data.len() {
        let (x, y, _) = dims.coords(idx);
        if x == 0 || x + 1 == dims.width || y == 0 || y + 1 == dims.height {
            flags[idx] |= FLAG_EDGE;
        }
    }

    let mut results: Vec<FociResult> = Vec::new();
    let mut plateau: Vec<u32> = Vec::new();

    let mut i = 0usize;
    while i < inputs.order.len() {
        let level_bin = inputs.bins[inputs.order[i] as usize];
        if inputs.hist.value(level_bin as usize) <= background {
            break;
        }
        let start = i;
        while i < inputs.order.len() && inputs.bins[inputs.order[i] as usize] == level_bin {
            i += 1;
        }
        if cancel.is_cancelled() {
            return Err(FindFociError::Cancelled);
        }

        for &idx_u32 in &inputs.order[start..i] {
            let idx = idx_u32 as usize;
            if flags[idx] & FLAG_PROCESSED != 0 {
                continue;
            }
            flags[idx] |= FLAG_PROCESSED;

            let v = data[idx];
            let (x, y, z) = dims.coords(idx);
            let mut higher = false;
            let mut equal = false;
            nh.for_each(x, y, z, |nidx| {
                if flags[nidx] & FLAG_EXCLUDED != 0 {
                    return;
                }
                let nv = data[nidx];
                if nv > v {
                    higher = true;
                } else if nv == v {
                    equal = true;
                }
            });
            if higher {
                continue;
            }

            if !equal {
                let id = results.len() as u32 + 1;
                flags[idx] |= FLAG_MAXIMUM;
                results.push(FociResult::stub(id, x, y, z, v.to_f64()));
                continue;
            }

            if let Some(seed) = expand_plateau(&nh, dims, data, &mut flags, idx, &mut plateau) {
                let id = results.len() as u32 + 1;
                flags[seed] |= FLAG_MAXIMUM;
                let (sx, sy, sz) = dims.coords(seed);
                results.push(FociResult::stub(id, sx, sy, sz, v.to_f64()));
            }
        }
    }

    Ok(MaximaOutput { flags, results })
}

/// Breadth-first expansion of the equal-value plateau containing `seed_idx`.
/// Returns the chosen seed when the plateau is a maximum.
fn expand_plateau<T: Sample>(
    nh: &Neighbourhood,
    dims: crate::stack::StackDims,
    data: &[T],
    flags: &mut [u8],
    seed_idx: usize,
    members: &mut Vec<u32>,
) -> Option<usize> {
    let v = data[seed_idx];
    members.clear();
    members.push(seed_idx as u32);
    flags[seed_idx] |= FLAG_LISTED;

    let mut has_higher = false;
    let mut has_lower = false;
    let mut sum = [0.0f64; 3];

    let mut qi = 0usize;
    while qi < members.len() {
        let idx = members[qi] as usize;
        qi += 1;
        let (x, y, z) = dims.coords(idx);
        sum[0] += x as f64;
        sum[1] += y as f64;
        sum[2] += z as f64;
        nh.for_each(x, y, z, |nidx| {
            if flags[nidx] & FLAG_EXCLUDED != 0 {
                return;
            }
            let nv = data[nidx];
            if nv > v {
                has_higher = true;
            } else if nv < v {
                has_lower = true;
            } else if flags[nidx] & FLAG_LISTED == 0 {
                flags[nidx] |= FLAG_LISTED;
                members.push(nidx as u32);
            }
        });
    }

    let n = members.len() as f64;
    let centroid = [sum[0] / n, sum[1] / n, sum[2] / n];
    let mut seed = None;
    let mut best_d2 = f64::INFINITY;
    for &m in members.iter() {
        let idx = m as usize;
        flags[idx] &= !FLAG_LISTED;
        flags[idx] |= FLAG_PLATEAU | FLAG_PROCESSED;
        let (x, y, z) = dims.coords(idx);
        let dx = x as f64 - centroid[0];
        let dy = y as f64 - centroid[1];
        let dz = z as f64 - centroid[2];
        let d2 = dx * dx + dy * dy + dz * dz;
        if d2 < best_d2 || (d2 == best_d2 && Some(idx) < seed) {
            best_d2 = d2;
            seed = Some(idx);
        }
    }

    if has_higher || !has_lower {
        return None;
    }
    seed
}

/// Grow labelled regions from the seeded maxima.
///
/// `flags` and `results` are the maxima-pass outputs (the caller clones
/// them; growth mutates both).
pub(crate) fn grow_regions<T: Sample>(
    inputs: &SearchInputs<'_, T>,
    background: f64,
    method: SearchMethod,
    mut flags: Vec<u8>,
    mut results: Vec<FociResult>,
    cancel: &CancelToken,
) -> Result<GrownRegions, FindFociError> {
    let dims = inputs.stack.dims();
    let data = inputs.stack.data();
    let nh = Neighbourhood::new(inputs.connectivity, dims);

    let thresholds: Vec<f64> = results
        .iter()
        .map(|r| search_threshold(method, background, r.max_value))
        .collect();

    let mut peak_ids = vec![0u32; data.len()];
    for r in &mut results {
        let idx = dims.index(r.x, r.y, r.z);
        peak_ids[idx] = r.id;
        r.count = 1;
        r.total_intensity = r.max_value;
    }

    let mut i = 0usize;
    while i < inputs.order.len() {
        let level_bin = inputs.bins[inputs.order[i] as usize];
        let start = i;
        while i < inputs.order.len() && inputs.bins[inputs.order[i] as usize] == level_bin {
            i += 1;
        }
        if cancel.is_cancelled() {
            return Err(FindFociError::Cancelled);
        }
        let level = &inputs.order[start..i];

        // Chains of equal-valued voxels resolve over repeated sweeps.
        loop {
            let mut changed = false;
            for &idx_u32 in level {
                let idx = idx_u32 as usize;
                if peak_ids[idx] != 0 || flags[idx] & FLAG_SADDLE != 0 {
                    continue;
                }
                let v = data[idx].to_f64();
                let (x, y, z) = dims.coords(idx);

                let mut best_v = f64::NEG_INFINITY;
                let mut best_id = 0u32;
                let mut tie = false;
                nh.for_each(x, y, z, |nidx| {
                    let nid = peak_ids[nidx];
                    if nid == 0 {
                        return;
                    }
                    if v < thresholds[(nid - 1) as usize] {
                        return;
                    }
                    let nv = data[nidx].to_f64();
                    if nv > best_v {
                        best_v = nv;
                        best_id = nid;
                        tie = false;
                    } else if nv == best_v && nid != best_id {
                        tie = true;
                    }
                });

                if best_id == 0 {
                    continue;
                }
                if tie {
                    flags[idx] |= FLAG_SADDLE;
                } else {
                    peak_ids[idx] = best_id;
                    let r = &mut results[(best_id - 1) as usize];
                    r.count += 1;
                    r.total_intensity += v;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    let mut edge = vec![false; results.len()];
    let mut saddles = vec![SaddleList::default(); results.len()];
    let mut contact_ids: Vec<u32> = Vec::new();

    for idx in 0..data.len() {
        let pid = peak_ids[idx];
        if pid != 0 {
            if flags[idx] & FLAG_EDGE != 0 {
                edge[(pid - 1) as usize] = true;
            }
            let v = data[idx].to_f64();
            let (x, y, z) = dims.coords(idx);
            nh.for_each(x, y, z, |nidx| {
                let qid = peak_ids[nidx];
                if qid != 0 && qid != pid && nidx > idx {
                    let s = v.min(data[nidx].to_f64());
                    saddles[(pid - 1) as usize].push(qid, s);
                    saddles[(qid - 1) as usize].push(pid, s);
                }
            });
        } else if flags[idx] & FLAG_SADDLE != 0 {
            let vs = data[idx].to_f64();
            let (x, y, z) = dims.coords(idx);
            contact_ids.clear();
            nh.for_each(x, y, z, |nidx| {
                let qid = peak_ids[nidx];
                if qid != 0 && !contact_ids.contains(&qid) {
                    contact_ids.push(qid);
                }
            });
            for a in 0..contact_ids.len() {
                for b in a + 1..contact_ids.len() {
                    saddles[(contact_ids[a] - 1) as usize].push(contact_ids[b], vs);
                    saddles[(contact_ids[b] - 1) as usize].push(contact_ids[a], vs);
                }
            }
        }
    }
    for list in &mut saddles {
        list.remove_duplicates();
    }

    Ok(GrownRegions {
        peak_ids,
        flags,
        results,
        saddles,
        edge,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::build_histogram;
    use crate::stack::StackDims;

    fn run_search<T: Sample>(
        stack: &ImageStack<T>,
        background: f64,
        method: SearchMethod,
        connectivity: Connectivity,
    ) -> GrownRegions {
        let include = vec![true; stack.dims().len()];
        let build = build_histogram(stack, None).unwrap();
        let order = descending_order(&build.bins, build.histogram.n_bins());
        let inputs = SearchInputs {
            stack,
            include: &include,
            bins: &build.bins,
            hist: &build.histogram,
            order: &order,
            connectivity,
        };
        let cancel = CancelToken::new();
        let maxima = find_maxima(&inputs, background, &cancel).unwrap();
        grow_regions(
            &inputs,
            background,
            method,
            maxima.flags,
            maxima.results,
            &cancel,
        )
        .unwrap()
    }

    fn profile_stack() -> ImageStack<u8> {
        ImageStack::new(StackDims::single(8, 1), vec![0u8, 0, 5, 0, 0, 8, 0, 0]).unwrap()
    }

    #[test]
    fn descending_order_ranks_by_bin_then_index() {
        let stack = profile_stack();
        let build = build_histogram(&stack, None).unwrap();
        let order = descending_order(&build.bins, build.histogram.n_bins());
        assert_eq!(order, vec![5, 2, 0, 1, 3, 4, 6, 7]);
    }

    #[test]
    fn flat_image_has_no_maxima() {
        let dims = StackDims::single(5, 5);
        let stack = ImageStack::new(dims, vec![10u8; dims.len()]).unwrap();
        let grown = run_search(&stack, 0.0, SearchMethod::AboveBackground, Connectivity::Full);
        assert!(grown.results.is_empty(), "a flat image has no strict maximum");
        assert!(grown.peak_ids.iter().all(|&id| id == 0));
    }

    #[test]
    fn profile_splits_into_two_peaks_with_zero_saddle() {
        let grown = run_search(
            &profile_stack(),
            0.0,
            SearchMethod::AboveBackground,
            Connectivity::Full,
        );
        assert_eq!(grown.results.len(), 2);
        // Ids are handed out in descending value order.
        assert_eq!(grown.results[0].x, 5);
        assert_eq!(grown.results[0].max_value, 8.0);
        assert_eq!(grown.results[1].x, 2);
        assert_eq!(grown.results[1].max_value, 5.0);
        // Background-valued voxels are claimed: four each.
        assert_eq!(grown.results[0].count, 4);
        assert_eq!(grown.results[1].count, 4);
        assert_eq!(grown.peak_ids, vec![2, 2, 2, 2, 1, 1, 1, 1]);

        // Contact between the regions records a symmetric zero saddle.
        let s0 = grown.saddles[0].entries();
        let s1 = grown.saddles[1].entries();
        assert_eq!(s0.len(), 1);
        assert_eq!((s0[0].neighbour_id, s0[0].value), (2, 0.0));
        assert_eq!((s1[0].neighbour_id, s1[0].value), (1, 0.0));
    }

    #[test]
    fn region_totals_accumulate_search_intensity() {
        let grown = run_search(
            &profile_stack(),
            0.0,
            SearchMethod::AboveBackground,
            Connectivity::Full,
        );
        assert_eq!(grown.results[0].total_intensity, 8.0);
        assert_eq!(grown.results[1].total_intensity, 5.0);
    }

    #[test]
    fn plateau_seed_prefers_centroid() {
        let dims = StackDims::single(5, 3);
        let mut data = vec![0u8; dims.len()];
        for x in 1..4 {
            data[dims.index(x, 1, 0)] = 9;
        }
        let stack = ImageStack::new(dims, data).unwrap();
        let grown = run_search(&stack, 5.0, SearchMethod::AboveBackground, Connectivity::Full);

        assert_eq!(grown.results.len(), 1);
        assert_eq!((grown.results[0].x, grown.results[0].y), (2, 1));
        assert_eq!(grown.results[0].count, 3, "whole plateau joins the peak");
    }

    #[test]
    fn growth_respects_per_peak_thresholds() {
        let stack =
            ImageStack::new(StackDims::single(3, 1), vec![10u8, 3, 4]).unwrap();
        let grown = run_search(
            &stack,
            0.0,
            SearchMethod::FractionOfPeak(0.5),
            Connectivity::Full,
        );

        // Peak at value 10 may not claim below 5, so the valley voxel joins
        // the shallower peak whose threshold is 2.
        assert_eq!(grown.results.len(), 2);
        assert_eq!(grown.peak_ids, vec![1, 2, 2]);
    }

    #[test]
    fn equal_steepness_contest_leaves_a_saddle_pixel() {
        let stack =
            ImageStack::new(StackDims::single(5, 1), vec![7u8, 6, 2, 6, 7]).unwrap();
        let grown = run_search(&stack, 0.0, SearchMethod::AboveBackground, Connectivity::Full);

        assert_eq!(grown.results.len(), 2);
        assert_eq!(grown.peak_ids[2], 0, "contested voxel stays unassigned");
        assert_ne!(grown.flags[2] & FLAG_SADDLE, 0);
        // Both peaks record the contested value against each other.
        assert_eq!(grown.saddles[0].entries()[0].value, 2.0);
        assert_eq!(grown.saddles[1].entries()[0].value, 2.0);
    }

    #[test]
    fn border_regions_are_flagged_as_edge() {
        let grown = run_search(
            &profile_stack(),
            0.0,
            SearchMethod::AboveBackground,
            Connectivity::Full,
        );
        assert!(grown.edge[0] && grown.edge[1], "1-high stacks touch the border");

        let dims = StackDims::single(7, 7);
        let mut data = vec![0u8; dims.len()];
        data[dims.index(3, 3, 0)] = 9;
        let interior = ImageStack::new(dims, data).unwrap();
        let grown = run_search(&interior, 0.0, SearchMethod::HalfPeakValue, Connectivity::Full);
        assert_eq!(grown.edge, vec![false]);
    }

    #[test]
    fn cancelled_token_aborts_before_processing() {
        let stack = profile_stack();
        let include = vec![true; stack.dims().len()];
        let build = build_histogram(&stack, None).unwrap();
        let order = descending_order(&build.bins, build.histogram.n_bins());
        let inputs = SearchInputs {
            stack: &stack,
            include: &include,
            bins: &build.bins,
            hist: &build.histogram,
            order: &order,
            connectivity: Connectivity::Full,
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = find_maxima(&inputs, 0.0, &cancel);
        assert_eq!(err.unwrap_err(), FindFociError::Cancelled);
    }
}
