//! Stage identifiers and configuration-diff invalidation.

use crate::config::FindFociConfig;

/// Pipeline stages in execution order.
///
/// The `Ord` impl follows that order. A configuration change maps to the
/// earliest stage whose output it affects; everything from that stage on
/// is recomputed and everything before it is reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Blur, inclusion mask, histograms and base statistics.
    Initial,
    /// Background resolution and peak seeding.
    FindMaxima,
    /// Region growth and saddle assembly.
    Search,
    /// Height-based merge pass.
    MergeHeight,
    /// Size-based merge pass.
    MergeSize,
    /// Edge-peak removal plus the above-saddle re-check.
    MergeSaddle,
    /// Per-peak statistics, centres, sorting and renumbering.
    CalculateResults,
    /// Label mask construction.
    CalculateOutputMask,
    /// Result snapshot persistence.
    ShowResults,
    /// Nothing left to recompute.
    Complete,
}

impl Stage {
    /// The stage that runs after this one. `Complete` is terminal.
    pub(crate) fn next(self) -> Stage {
        match self {
            Stage::Initial => Stage::FindMaxima,
            Stage::FindMaxima => Stage::Search,
            Stage::Search => Stage::MergeHeight,
            Stage::MergeHeight => Stage::MergeSize,
            Stage::MergeSize => Stage::MergeSaddle,
            Stage::MergeSaddle => Stage::CalculateResults,
            Stage::CalculateResults => Stage::CalculateOutputMask,
            Stage::CalculateOutputMask => Stage::ShowResults,
            Stage::ShowResults => Stage::Complete,
            Stage::Complete => Stage::Complete,
        }
    }
}

/// Earliest stage whose output differs between two configurations.
/// `Complete` when the configurations are interchangeable.
pub(crate) fn earliest_invalidated(prev: &FindFociConfig, next: &FindFociConfig) -> Stage {
    if prev.blur_sigma != next.blur_sigma || prev.stats_scope != next.stats_scope {
        return Stage::Initial;
    }
    // Connectivity also feeds growth, merging and object labelling, but a
    // rewind here recomputes all of those anyway.
    if prev.connectivity != next.connectivity || prev.background != next.background {
        return Stage::FindMaxima;
    }
    if prev.search != next.search {
        return Stage::Search;
    }
    if prev.peak != next.peak {
        return Stage::MergeHeight;
    }
    if prev.min_size != next.min_size
        || prev.minimum_above_saddle != next.minimum_above_saddle
        || prev.contiguous_above_saddle != next.contiguous_above_saddle
    {
        return Stage::MergeSize;
    }
    if prev.remove_edge_maxima != next.remove_edge_maxima {
        return Stage::MergeSaddle;
    }
    if prev.sort != next.sort
        || prev.max_peaks != next.max_peaks
        || prev.centre != next.centre
        || prev.object_analysis != next.object_analysis
    {
        return Stage::CalculateResults;
    }
    if prev.mask != next.mask {
        return Stage::CalculateOutputMask;
    }
    if prev.save_results != next.save_results {
        return Stage::ShowResults;
    }
    Stage::Complete
}
