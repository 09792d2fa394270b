//! Run configuration.

use crate::engine::{CentreMethod, MaskOptions, PeakMethod, SearchMethod, SortKey};
use crate::grid::Connectivity;
use crate::stats::{BackgroundMethod, StatsScope};
use crate::threshold::AutoThresholdMethod;

/// Full parameter set for one run.
///
/// Field groups map onto pipeline stages; the runner diffs consecutive
/// configs field by field to decide the earliest stage that must re-run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FindFociConfig {
    /// Gaussian pre-blur sigma in pixels, applied per z-slice. 0 disables
    /// blurring.
    pub blur_sigma: f64,
    /// Neighbourhood used for maxima detection, growth and object
    /// labelling.
    pub connectivity: Connectivity,
    /// Which voxels feed the background statistics when a mask is set.
    pub stats_scope: StatsScope,
    /// Background estimation method.
    pub background: BackgroundMethod,
    /// Region-growth stopping rule.
    pub search: SearchMethod,
    /// Minimum-height rule for the merge height pass.
    pub peak: PeakMethod,
    /// Minimum voxel count for the merge size pass.
    pub min_size: usize,
    /// Measure the size pass on voxels above the highest saddle.
    pub minimum_above_saddle: bool,
    /// Restrict the above-saddle measure to the seed's connected component.
    pub contiguous_above_saddle: bool,
    /// Merge away peaks whose region touches an x/y border.
    pub remove_edge_maxima: bool,
    /// How the reported centre is derived.
    pub centre: CentreMethod,
    /// Result ordering.
    pub sort: SortKey,
    /// Keep at most this many results; 0 keeps all.
    pub max_peaks: usize,
    /// Label mask objects and attach an object id to each result.
    pub object_analysis: bool,
    /// Output label mask options.
    pub mask: MaskOptions,
    /// Retain a snapshot of the final results inside the runner.
    pub save_results: bool,
}

impl Default for FindFociConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 0.0,
            connectivity: Connectivity::Full,
            stats_scope: StatsScope::Inside,
            background: BackgroundMethod::AutoThreshold(AutoThresholdMethod::Otsu),
            search: SearchMethod::AboveBackground,
            peak: PeakMethod::RelativeAboveBackground(0.5),
            min_size: 5,
            minimum_above_saddle: true,
            contiguous_above_saddle: false,
            remove_edge_maxima: false,
            centre: CentreMethod::MaxValueSearch,
            sort: SortKey::TotalIntensity,
            max_peaks: 0,
            object_analysis: false,
            mask: MaskOptions::default(),
            save_results: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MaskMode;

    #[test]
    fn defaults_are_pinned() {
        let cfg = FindFociConfig::default();
        assert_eq!(cfg.blur_sigma, 0.0);
        assert_eq!(cfg.connectivity, Connectivity::Full);
        assert_eq!(cfg.stats_scope, StatsScope::Inside);
        assert_eq!(
            cfg.background,
            BackgroundMethod::AutoThreshold(AutoThresholdMethod::Otsu)
        );
        assert_eq!(cfg.search, SearchMethod::AboveBackground);
        assert_eq!(cfg.peak, PeakMethod::RelativeAboveBackground(0.5));
        assert_eq!(cfg.min_size, 5);
        assert!(cfg.minimum_above_saddle);
        assert!(!cfg.contiguous_above_saddle);
        assert!(!cfg.remove_edge_maxima);
        assert_eq!(cfg.centre, CentreMethod::MaxValueSearch);
        assert_eq!(cfg.sort, SortKey::TotalIntensity);
        assert_eq!(cfg.max_peaks, 0);
        assert!(!cfg.object_analysis);
        assert_eq!(cfg.mask.mode, MaskMode::None);
        assert!(!cfg.save_results);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = FindFociConfig {
            blur_sigma: 1.5,
            background: BackgroundMethod::StdDevAboveMean(3.0),
            search: SearchMethod::FractionOfPeak(0.25),
            min_size: 9,
            max_peaks: 40,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: FindFociConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
