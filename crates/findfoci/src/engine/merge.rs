//! Peak merging: height, size, and edge/saddle passes over the grown
//! regions.
//!
//! Voxel labels are never rewritten here. Merges record `B -> A` in a
//! union-find remap table and fold B's result record and saddle list into
//! A's; the voxel array is relabelled once, after sorting.

use crate::cancel::CancelToken;
use crate::error::FindFociError;
use crate::grid::{Connectivity, Neighbourhood};
use crate::stack::{ImageStack, Sample};

use super::saddle::SaddleList;
use super::types::FociResult;

/// Minimum-height rule deciding whether a peak survives the height pass.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakMethod {
    /// Minimum absolute height above the highest saddle.
    Absolute(f64),
    /// Minimum height as a fraction of the peak maximum.
    Relative(f64),
    /// Minimum height as a fraction of the maximum above background.
    RelativeAboveBackground(f64),
}

impl Default for PeakMethod {
    fn default() -> Self {
        PeakMethod::RelativeAboveBackground(0.5)
    }
}

/// Height a peak of maximum `v0` must rise above its highest saddle.
/// Floored at a minimal positive height so degenerate parameters still
/// merge peaks that barely rise above their saddle.
pub(crate) fn required_height(method: PeakMethod, background: f64, v0: f64) -> f64 {
    let h = match method {
        PeakMethod::Absolute(h) => h.abs(),
        PeakMethod::Relative(f) => v0 * f,
        PeakMethod::RelativeAboveBackground(f) => (v0 - background) * f,
    };
    h.max((v0 - background) * 1e-6)
}

/// Union-find table from original peak ids to surviving roots.
///
/// Index 0 is the background sentinel; a chain ending at 0 marks a deleted
/// peak. `resolve` compresses paths as it walks.
#[derive(Debug, Clone)]
pub(crate) struct PeakRemap {
    parent: Vec<u32>,
}

impl PeakRemap {
    pub(crate) fn identity(n_peaks: usize) -> Self {
        Self {
            parent: (0..=n_peaks as u32).collect(),
        }
    }

    /// Surviving root for `id`, or 0 when the chain was deleted.
    pub(crate) fn resolve(&mut self, id: u32) -> u32 {
        let mut root = id;
        while root != 0 {
            let p = self.parent[root as usize];
            if p == root {
                break;
            }
            root = p;
        }
        let mut cur = id;
        while cur != 0 && cur != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    pub(crate) fn merge(&mut self, from: u32, into: u32) {
        let f = self.resolve(from);
        let t = self.resolve(into);
        if f != 0 && t != 0 && f != t {
            self.parent[f as usize] = t;
        }
    }

    pub(crate) fn delete(&mut self, id: u32) {
        let r = self.resolve(id);
        if r != 0 {
            self.parent[r as usize] = 0;
        }
    }

    /// Ids that still resolve to themselves, ascending.
    pub(crate) fn live_ids(&mut self) -> Vec<u32> {
        let mut out = Vec::new();
        for id in 1..self.parent.len() as u32 {
            if self.resolve(id) == id {
                out.push(id);
            }
        }
        out
    }
}

fn slot(id: u32) -> usize {
    (id - 1) as usize
}

/// Ascending peak maximum, ascending id on ties.
fn weakest_first(ids: &mut [u32], results: &[FociResult]) {
    ids.sort_by(|&a, &b| {
        let va = results[slot(a)].max_value;
        let vb = results[slot(b)].max_value;
        va.partial_cmp(&vb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
}

/// Highest saddle of `self_id` after resolving neighbour ids. Equal values
/// prefer the neighbour with the larger current count, then the lower id.
pub(crate) fn best_saddle(
    list: &SaddleList,
    remap: &mut PeakRemap,
    self_id: u32,
    results: &[FociResult],
) -> Option<(u32, f64)> {
    let mut best: Option<(u32, f64)> = None;
    for s in list.entries() {
        let nid = remap.resolve(s.neighbour_id);
        if nid == 0 || nid == self_id {
            continue;
        }
        best = Some(match best {
            None => (nid, s.value),
            Some((bid, bv)) => {
                if s.value > bv {
                    (nid, s.value)
                } else if s.value == bv && nid != bid {
                    let nc = results[slot(nid)].count;
                    let bc = results[slot(bid)].count;
                    if nc > bc || (nc == bc && nid < bid) {
                        (nid, s.value)
                    } else {
                        (bid, bv)
                    }
                } else {
                    (bid, bv)
                }
            }
        });
    }
    best
}

/// Fold `from` into `into`: counts and intensity add, the higher maximum
/// wins and carries its seed position, saddle lists union with
/// self-references dropped.
fn merge_pair(
    results: &mut [FociResult],
    saddles: &mut [SaddleList],
    remap: &mut PeakRemap,
    from: u32,
    into: u32,
) {
    let moved = std::mem::take(&mut saddles[slot(from)]);
    saddles[slot(into)].extend_from(&moved);
    remap.merge(from, into);
    saddles[slot(into)].remap(|id| remap.resolve(id), into);
    saddles[slot(into)].remove_duplicates();

    let (count, total, max, x, y, z) = {
        let f = &results[slot(from)];
        (f.count, f.total_intensity, f.max_value, f.x, f.y, f.z)
    };
    let t = &mut results[slot(into)];
    t.count += count;
    t.total_intensity += total;
    if max > t.max_value {
        t.max_value = max;
        t.x = x;
        t.y = y;
        t.z = z;
    }
}

/// Merge peaks that rise less than the required height above their highest
/// saddle. Saddle-less peaks are kept: there is nothing to merge into.
pub(crate) fn merge_by_height(
    results: &mut [FociResult],
    saddles: &mut [SaddleList],
    remap: &mut PeakRemap,
    background: f64,
    method: PeakMethod,
    cancel: &CancelToken,
) -> Result<u32, FindFociError> {
    let mut merges = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(FindFociError::Cancelled);
        }
        let mut ids = remap.live_ids();
        weakest_first(&mut ids, results);
        let mut changed = false;
        for id in ids {
            if remap.resolve(id) != id {
                continue;
            }
            let v0 = results[slot(id)].max_value;
            if let Some((nid, s)) = best_saddle(&saddles[slot(id)], remap, id, results) {
                if v0 - s < required_height(method, background, v0) {
                    merge_pair(results, saddles, remap, id, nid);
                    merges += 1;
                    changed = true;
                }
            }
        }
        if !changed {
            return Ok(merges);
        }
    }
}

/// Merge peaks whose voxel count is below `min_size`; delete them when no
/// saddle neighbour remains.
pub(crate) fn merge_by_size(
    results: &mut [FociResult],
    saddles: &mut [SaddleList],
    remap: &mut PeakRemap,
    min_size: usize,
    cancel: &CancelToken,
) -> Result<u32, FindFociError> {
    let mut merges = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(FindFociError::Cancelled);
        }
        let mut ids = remap.live_ids();
        weakest_first(&mut ids, results);
        let mut changed = false;
        for id in ids {
            if remap.resolve(id) != id {
                continue;
            }
            if results[slot(id)].count >= min_size {
                continue;
            }
            match best_saddle(&saddles[slot(id)], remap, id, results) {
                Some((nid, _)) => merge_pair(results, saddles, remap, id, nid),
                None => remap.delete(id),
            }
            merges += 1;
            changed = true;
        }
        if !changed {
            return Ok(merges);
        }
    }
}

/// Stack-dependent inputs for the above-saddle size rule.
pub(crate) struct AboveSaddleCtx<'a, T: Sample> {
    pub stack: &'a ImageStack<T>,
    /// Voxel labels as produced by region growth (pre-merge ids).
    pub peak_ids: &'a [u32],
    pub connectivity: Connectivity,
    pub min_size: usize,
    /// Restrict the measure to the seed's connected component.
    pub contiguous: bool,
}

/// Size pass variant measuring voxels strictly above the highest saddle.
/// Counts go stale on every merge, so each merge restarts the sweep with
/// fresh counts.
pub(crate) fn merge_by_above_saddle_size<T: Sample>(
    results: &mut [FociResult],
    saddles: &mut [SaddleList],
    remap: &mut PeakRemap,
    ctx: &AboveSaddleCtx<'_, T>,
    cancel: &CancelToken,
) -> Result<u32, FindFociError> {
    let mut merges = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(FindFociError::Cancelled);
        }
        let counts = above_saddle_counts(results, saddles, remap, ctx);
        let mut ids = remap.live_ids();
        weakest_first(&mut ids, results);
        let mut changed = false;
        for id in ids {
            if counts[slot(id)] >= ctx.min_size {
                continue;
            }
            match best_saddle(&saddles[slot(id)], remap, id, results) {
                Some((nid, _)) => merge_pair(results, saddles, remap, id, nid),
                None => remap.delete(id),
            }
            merges += 1;
            changed = true;
            break;
        }
        if !changed {
            return Ok(merges);
        }
    }
}

/// Merge every border-touching peak into its best saddle neighbour; delete
/// those with none.
pub(crate) fn merge_edge_peaks(
    results: &mut [FociResult],
    saddles: &mut [SaddleList],
    remap: &mut PeakRemap,
    edge: &[bool],
    cancel: &CancelToken,
) -> Result<u32, FindFociError> {
    let mut merges = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(FindFociError::Cancelled);
        }
        let mut ids = remap.live_ids();
        weakest_first(&mut ids, results);
        let mut changed = false;
        for id in ids {
            if remap.resolve(id) != id || !edge[slot(id)] {
                continue;
            }
            match best_saddle(&saddles[slot(id)], remap, id, results) {
                Some((nid, _)) => merge_pair(results, saddles, remap, id, nid),
                None => remap.delete(id),
            }
            merges += 1;
            changed = true;
        }
        if !changed {
            return Ok(merges);
        }
    }
}

/// Per-peak count of region voxels strictly above the highest saddle
/// (whole region when saddle-less), indexed by `id - 1`.
fn above_saddle_counts<T: Sample>(
    results: &[FociResult],
    saddles: &[SaddleList],
    remap: &mut PeakRemap,
    ctx: &AboveSaddleCtx<'_, T>,
) -> Vec<usize> {
    let n = results.len();
    let mut cutoff = vec![f64::NEG_INFINITY; n];
    let live = remap.live_ids();
    for &id in &live {
        if let Some((_, s)) = best_saddle(&saddles[slot(id)], remap, id, results) {
            cutoff[slot(id)] = s;
        }
    }

    let resolved: Vec<u32> = ctx
        .peak_ids
        .iter()
        .map(|&raw| if raw == 0 { 0 } else { remap.resolve(raw) })
        .collect();
    let data = ctx.stack.data();
    let mut counts = vec![0usize; n];

    if !ctx.contiguous {
        for (idx, &id) in resolved.iter().enumerate() {
            if id != 0 && data[idx].to_f64() > cutoff[slot(id)] {
                counts[slot(id)] += 1;
            }
        }
        return counts;
    }

    let dims = ctx.stack.dims();
    let nh = Neighbourhood::new(ctx.connectivity, dims);
    let mut visited = vec![false; data.len()];
    let mut queue: Vec<u32> = Vec::new();
    for &id in &live {
        let r = &results[slot(id)];
        let seed = dims.index(r.x, r.y, r.z);
        let cut = cutoff[slot(id)];
        if resolved[seed] != id || data[seed].to_f64() <= cut {
            continue;
        }
        queue.clear();
        queue.push(seed as u32);
        visited[seed] = true;
        let mut qi = 0usize;
        while qi < queue.len() {
            let idx = queue[qi] as usize;
            qi += 1;
            counts[slot(id)] += 1;
            let (x, y, z) = dims.coords(idx);
            nh.for_each(x, y, z, |nidx| {
                if !visited[nidx] && resolved[nidx] == id && data[nidx].to_f64() > cut {
                    visited[nidx] = true;
                    queue.push(nidx as u32);
                }
            });
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackDims;

    fn peak(id: u32, x: usize, max: f64, count: usize, total: f64) -> FociResult {
        let mut r = FociResult::stub(id, x, 0, 0, max);
        r.count = count;
        r.total_intensity = total;
        r
    }

    #[test]
    fn remap_resolves_chains_and_deletions() {
        let mut remap = PeakRemap::identity(4);
        remap.merge(2, 1);
        remap.merge(3, 2);
        assert_eq!(remap.resolve(3), 1);
        assert_eq!(remap.live_ids(), vec![1, 4]);
        remap.delete(1);
        assert_eq!(remap.resolve(3), 0);
        assert_eq!(remap.resolve(2), 0);
        assert_eq!(remap.resolve(4), 4);
        assert_eq!(remap.live_ids(), vec![4]);
    }

    #[test]
    fn saddle_tie_prefers_larger_neighbour() {
        let results = vec![
            peak(1, 0, 10.0, 3, 30.0),
            peak(2, 5, 10.0, 7, 70.0),
            peak(3, 9, 6.0, 4, 20.0),
        ];
        let mut list = SaddleList::default();
        list.push(1, 5.0);
        list.push(2, 5.0);
        let mut remap = PeakRemap::identity(3);

        let best = best_saddle(&list, &mut remap, 3, &results);
        assert_eq!(best, Some((2, 5.0)), "equal saddles pick the larger peak");

        let tied = vec![
            peak(1, 0, 10.0, 7, 70.0),
            peak(2, 5, 10.0, 7, 70.0),
            peak(3, 9, 6.0, 4, 20.0),
        ];
        let best = best_saddle(&list, &mut remap, 3, &tied);
        assert_eq!(best, Some((1, 5.0)), "equal counts pick the lower id");
    }

    #[test]
    fn height_pass_merges_shallow_peak_into_tall_neighbour() {
        let mut results = vec![peak(1, 0, 100.0, 10, 500.0), peak(2, 8, 20.0, 5, 60.0)];
        let mut saddles = vec![SaddleList::default(), SaddleList::default()];
        saddles[0].push(2, 15.0);
        saddles[1].push(1, 15.0);
        let mut remap = PeakRemap::identity(2);
        let cancel = CancelToken::new();

        let merges = merge_by_height(
            &mut results,
            &mut saddles,
            &mut remap,
            0.0,
            PeakMethod::Absolute(10.0),
            &cancel,
        )
        .unwrap();

        assert_eq!(merges, 1);
        assert_eq!(remap.live_ids(), vec![1]);
        assert_eq!(results[0].count, 15);
        assert_eq!(results[0].total_intensity, 560.0);
        assert_eq!(results[0].max_value, 100.0);
        assert!(saddles[0].is_empty(), "self-references are dropped");
    }

    #[test]
    fn height_pass_keeps_saddleless_peaks() {
        let mut results = vec![peak(1, 0, 10.0, 3, 25.0)];
        let mut saddles = vec![SaddleList::default()];
        let mut remap = PeakRemap::identity(1);
        let cancel = CancelToken::new();

        let merges = merge_by_height(
            &mut results,
            &mut saddles,
            &mut remap,
            0.0,
            PeakMethod::Absolute(1e6),
            &cancel,
        )
        .unwrap();
        assert_eq!(merges, 0);
        assert_eq!(remap.live_ids(), vec![1]);
    }

    #[test]
    fn size_pass_merges_or_deletes_small_peaks() {
        let mut results = vec![
            peak(1, 0, 50.0, 20, 800.0),
            peak(2, 8, 30.0, 2, 55.0),
            peak(3, 20, 40.0, 3, 110.0),
        ];
        let mut saddles = vec![
            SaddleList::default(),
            SaddleList::default(),
            SaddleList::default(),
        ];
        saddles[0].push(2, 10.0);
        saddles[1].push(1, 10.0);
        // Peak 3 touches nothing.
        let mut remap = PeakRemap::identity(3);
        let cancel = CancelToken::new();

        merge_by_size(&mut results, &mut saddles, &mut remap, 5, &cancel).unwrap();

        assert_eq!(remap.live_ids(), vec![1], "small isolated peak is deleted");
        assert_eq!(results[0].count, 22);
    }

    #[test]
    fn merged_maximum_propagates_to_the_survivor() {
        let mut results = vec![peak(1, 0, 50.0, 4, 120.0), peak(2, 8, 80.0, 2, 90.0)];
        let mut saddles = vec![SaddleList::default(), SaddleList::default()];
        saddles[0].push(2, 49.5);
        saddles[1].push(1, 49.5);
        let mut remap = PeakRemap::identity(2);
        let cancel = CancelToken::new();

        // Peak 2 rises 30.5 above the saddle, peak 1 only 0.5.
        merge_by_height(
            &mut results,
            &mut saddles,
            &mut remap,
            0.0,
            PeakMethod::Absolute(10.0),
            &cancel,
        )
        .unwrap();

        assert_eq!(remap.live_ids(), vec![2]);
        assert_eq!(results[1].max_value, 80.0);
        assert_eq!(results[1].count, 6);
    }

    #[test]
    fn absorbed_higher_maximum_moves_the_seed() {
        // The tall narrow peak fails the size rule and folds into the wide
        // low one; the survivor must report the taller maximum's position.
        let mut results = vec![peak(1, 0, 50.0, 20, 800.0), peak(2, 8, 80.0, 2, 150.0)];
        let mut saddles = vec![SaddleList::default(), SaddleList::default()];
        saddles[0].push(2, 40.0);
        saddles[1].push(1, 40.0);
        let mut remap = PeakRemap::identity(2);
        let cancel = CancelToken::new();

        merge_by_size(&mut results, &mut saddles, &mut remap, 5, &cancel).unwrap();

        assert_eq!(remap.live_ids(), vec![1]);
        assert_eq!(results[0].max_value, 80.0);
        assert_eq!(results[0].x, 8);
        assert_eq!(results[0].count, 22);
    }

    #[test]
    fn edge_pass_merges_flagged_peaks_and_deletes_isolated_ones() {
        let mut results = vec![
            peak(1, 0, 50.0, 10, 400.0),
            peak(2, 8, 30.0, 6, 150.0),
            peak(3, 20, 25.0, 4, 80.0),
        ];
        let mut saddles = vec![
            SaddleList::default(),
            SaddleList::default(),
            SaddleList::default(),
        ];
        saddles[0].push(2, 12.0);
        saddles[1].push(1, 12.0);
        let mut remap = PeakRemap::identity(3);
        let cancel = CancelToken::new();
        let edge = vec![false, true, true];

        merge_edge_peaks(&mut results, &mut saddles, &mut remap, &edge, &cancel).unwrap();

        assert_eq!(remap.live_ids(), vec![1]);
        assert_eq!(results[0].count, 16, "edge peak folds into its neighbour");
        assert_eq!(remap.resolve(3), 0, "saddle-less edge peak is deleted");
    }

    #[test]
    fn above_saddle_counts_respect_contiguity() {
        let dims = StackDims::single(7, 1);
        let stack = ImageStack::new(dims, vec![9u8, 5, 1, 5, 2, 2, 2]).unwrap();
        let peak_ids = vec![1u32, 1, 1, 1, 2, 2, 2];
        let results = vec![peak(1, 0, 9.0, 4, 20.0), peak(2, 4, 2.0, 3, 6.0)];
        let mut saddles = vec![SaddleList::default(), SaddleList::default()];
        saddles[0].push(2, 4.0);
        saddles[1].push(1, 4.0);
        let mut remap = PeakRemap::identity(2);

        let ctx = AboveSaddleCtx {
            stack: &stack,
            peak_ids: &peak_ids,
            connectivity: Connectivity::Full,
            min_size: 0,
            contiguous: false,
        };
        let counts = above_saddle_counts(&results, &saddles, &mut remap, &ctx);
        assert_eq!(counts, vec![3, 0]);

        let ctx = AboveSaddleCtx {
            contiguous: true,
            ..ctx
        };
        let counts = above_saddle_counts(&results, &saddles, &mut remap, &ctx);
        assert_eq!(counts, vec![2, 0], "the far shoulder is cut off at the dip");
    }

    #[test]
    fn above_saddle_size_rule_merges_shallow_overlaps() {
        let dims = StackDims::single(8, 1);
        let stack = ImageStack::new(dims, vec![0u8, 0, 5, 0, 0, 8, 0, 0]).unwrap();
        let peak_ids = vec![2u32, 2, 2, 2, 1, 1, 1, 1];
        let mut results = vec![peak(1, 5, 8.0, 4, 8.0), peak(2, 2, 5.0, 4, 5.0)];
        let mut saddles = vec![SaddleList::default(), SaddleList::default()];
        saddles[0].push(2, 0.0);
        saddles[1].push(1, 0.0);
        let mut remap = PeakRemap::identity(2);
        let cancel = CancelToken::new();

        let ctx = AboveSaddleCtx {
            stack: &stack,
            peak_ids: &peak_ids,
            connectivity: Connectivity::Full,
            min_size: 2,
            contiguous: false,
        };
        // Only one voxel per peak rises above the zero saddle.
        let merges =
            merge_by_above_saddle_size(&mut results, &mut saddles, &mut remap, &ctx, &cancel)
                .unwrap();

        assert_eq!(merges, 1);
        assert_eq!(remap.live_ids(), vec![1]);
        assert_eq!(results[0].count, 8);
        assert_eq!(results[0].total_intensity, 13.0);
    }
}
