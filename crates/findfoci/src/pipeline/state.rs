//! Cached artifacts carried between stages.
//!
//! Each struct is the complete output of one stage. The runner stores them
//! in `Option`s so a config diff can drop any suffix of the cache chain;
//! stages that mutate shared data (merge passes) receive deep clones, which
//! keeps the cached originals valid for later re-entry.

use crate::engine::merge::PeakRemap;
use crate::engine::saddle::SaddleList;
use crate::engine::types::FociResult;
use crate::histogram::Histogram;
use crate::stack::{ImageStack, Sample};
use crate::stats::StackStats;

/// Initial stage: search copy, inclusion, histograms, base statistics.
#[derive(Debug, Clone)]
pub(crate) struct InitArtifacts<T: Sample> {
    /// Blurred search copy; `None` when sigma is not positive (the original
    /// stack is searched directly).
    pub blurred: Option<ImageStack<T>>,
    /// Per-voxel inclusion derived from the analysis mask.
    pub include: Vec<bool>,
    /// Unique-value histogram of the analysed region of the search image.
    pub search_hist: Histogram,
    /// Histogram bin per voxel of the search image.
    pub bins: Vec<u32>,
    /// Voxel indices in descending-value processing order.
    pub order: Vec<u32>,
    /// Statistics histogram when it differs from `search_hist` (outside
    /// scope with a mask present).
    pub stats_hist: Option<Histogram>,
    /// Moments of the statistics region. Background fields are resolved by
    /// the maxima stage, which depends on the background method.
    pub base_stats: StackStats,
}

/// Maxima stage: resolved background plus the seeded peak stubs.
#[derive(Debug, Clone)]
pub(crate) struct MaximaArtifacts {
    /// Statistics with `background` and `total_above_background` filled.
    pub stats: StackStats,
    /// Per-voxel state flags after the maxima scan.
    pub flags: Vec<u8>,
    /// One stub per peak, ids 1..=n in discovery order.
    pub results: Vec<FociResult>,
}

/// Search stage: grown regions and their saddle bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct SearchArtifacts {
    /// Peak id per voxel, 0 where unclaimed.
    pub peak_ids: Vec<u32>,
    /// Results with count and total intensity accumulated by growth.
    pub results: Vec<FociResult>,
    /// Saddle list per peak, indexed by `id - 1`.
    pub saddles: Vec<SaddleList>,
    /// Per peak: region touches an x/y border. Frozen at growth time.
    pub edge: Vec<bool>,
}

/// One merge pass: updated results, saddle lists and the remap table.
/// Stored once per merge stage so later stages re-run from the right point.
#[derive(Debug, Clone)]
pub(crate) struct MergeArtifacts {
    pub results: Vec<FociResult>,
    pub saddles: Vec<SaddleList>,
    pub remap: PeakRemap,
}

/// Results stage: finalised records plus the relabelled voxel array.
#[derive(Debug, Clone)]
pub(crate) struct ResultArtifacts {
    /// Surviving peaks in final rank order.
    pub results: Vec<FociResult>,
    /// Final 1-based label per voxel, 0 outside every surviving peak.
    pub labels: Vec<u32>,
    /// Mask object count, when object analysis ran.
    pub n_objects: Option<u32>,
}
