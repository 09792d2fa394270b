//! The staged runner: config diffing, cache invalidation, stage execution.

use crate::blur::blur_stack;
use crate::cancel::CancelToken;
use crate::config::FindFociConfig;
use crate::engine::mask::build_mask;
use crate::engine::merge::{
    merge_by_above_saddle_size, merge_by_height, merge_by_size, merge_edge_peaks, AboveSaddleCtx,
    PeakRemap,
};
use crate::engine::objects::label_objects;
use crate::engine::results::{finalise_results, FinaliseInputs};
use crate::engine::search::{descending_order, find_maxima, grow_regions, SearchInputs};
use crate::engine::types::FLAG_SADDLE;
use crate::engine::FociResult;
use crate::error::FindFociError;
use crate::histogram::build_histogram;
use crate::stack::{ImageStack, Sample};
use crate::stats::{resolve_background, total_above, StackStats, StatsScope};

use super::result::FindFociOutput;
use super::stage::{earliest_invalidated, Stage};
use super::state::{
    InitArtifacts, MaximaArtifacts, MergeArtifacts, ResultArtifacts, SearchArtifacts,
};

/// Run the full pipeline once and discard the stage caches.
pub fn find_foci<T: Sample>(
    image: &ImageStack<T>,
    mask: Option<&ImageStack<u8>>,
    config: &FindFociConfig,
) -> Result<FindFociOutput, FindFociError> {
    let mut finder = FociFinder::new(image.clone(), mask.cloned())?;
    finder.run(config, &CancelToken::new())
}

/// Staged runner owning the image, the optional inclusion mask and the
/// per-stage caches.
///
/// `run` diffs the configuration against the previous call, rewinds to the
/// earliest affected stage and recomputes only from there; everything
/// before that point is served from cache. A failed or cancelled run keeps
/// the caches of the stages that completed, so the next call resumes where
/// the previous one stopped.
#[derive(Debug, Clone)]
pub struct FociFinder<T: Sample> {
    image: ImageStack<T>,
    mask: Option<ImageStack<u8>>,
    stage: Stage,
    last_config: Option<FindFociConfig>,
    init: Option<InitArtifacts<T>>,
    maxima: Option<MaximaArtifacts>,
    search: Option<SearchArtifacts>,
    merge_height: Option<MergeArtifacts>,
    merge_size: Option<MergeArtifacts>,
    merge_saddle: Option<MergeArtifacts>,
    results: Option<ResultArtifacts>,
    output: Option<FindFociOutput>,
    saved: Option<Vec<FociResult>>,
}

impl<T: Sample> FociFinder<T> {
    /// Wrap an image and optional inclusion mask.
    pub fn new(image: ImageStack<T>, mask: Option<ImageStack<u8>>) -> Result<Self, FindFociError> {
        validate(&image, mask.as_ref())?;
        Ok(Self {
            image,
            mask,
            stage: Stage::Initial,
            last_config: None,
            init: None,
            maxima: None,
            search: None,
            merge_height: None,
            merge_size: None,
            merge_saddle: None,
            results: None,
            output: None,
            saved: None,
        })
    }

    /// Next stage the runner will execute. `Complete` after a full run.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Replace the analysed image. Invalidates every cached stage.
    pub fn set_image(&mut self, image: ImageStack<T>) -> Result<(), FindFociError> {
        validate(&image, self.mask.as_ref())?;
        self.image = image;
        self.stage = Stage::Initial;
        self.invalidate_from(Stage::Initial);
        Ok(())
    }

    /// Replace or clear the inclusion mask. Invalidates every cached stage.
    pub fn set_mask(&mut self, mask: Option<ImageStack<u8>>) -> Result<(), FindFociError> {
        validate(&self.image, mask.as_ref())?;
        self.mask = mask;
        self.stage = Stage::Initial;
        self.invalidate_from(Stage::Initial);
        Ok(())
    }

    /// Snapshot retained by the last run with result saving enabled. The
    /// snapshot outlives config changes until a saving run overwrites it.
    pub fn saved_results(&self) -> Option<&[FociResult]> {
        self.saved.as_deref()
    }

    /// Run the pipeline to completion and return the (cached) output.
    pub fn run(
        &mut self,
        config: &FindFociConfig,
        cancel: &CancelToken,
    ) -> Result<FindFociOutput, FindFociError> {
        self.apply_config(config);
        loop {
            if cancel.is_cancelled() {
                return Err(FindFociError::Cancelled);
            }
            if self.stage == Stage::Complete {
                match &self.output {
                    Some(out) => return Ok(out.clone()),
                    None => {
                        self.stage = Stage::CalculateOutputMask;
                        continue;
                    }
                }
            }
            self.advance(config, cancel)?;
        }
    }

    /// Run stages until `target` is the next to execute, without going
    /// further. Useful to stop after a specific stage and inspect timing or
    /// logs; `run` is `run_until(Stage::Complete)` plus the output lookup.
    pub fn run_until(
        &mut self,
        target: Stage,
        config: &FindFociConfig,
        cancel: &CancelToken,
    ) -> Result<Stage, FindFociError> {
        self.apply_config(config);
        while self.stage < target {
            if cancel.is_cancelled() {
                return Err(FindFociError::Cancelled);
            }
            self.advance(config, cancel)?;
        }
        Ok(self.stage)
    }

    /// Diff against the previous configuration and rewind the stage cursor
    /// to the earliest stage the change affects.
    fn apply_config(&mut self, config: &FindFociConfig) {
        let rewind = match &self.last_config {
            Some(prev) => earliest_invalidated(prev, config),
            None => Stage::Initial,
        };
        if rewind < self.stage {
            tracing::debug!(from = ?self.stage, to = ?rewind, "configuration change rewinds the pipeline");
            self.stage = rewind;
        }
        self.invalidate_from(self.stage);
        self.last_config = Some(config.clone());
    }

    /// Drop cached artifacts of `stage` and everything after it. The saved
    /// snapshot is caller-visible state and is never dropped here.
    fn invalidate_from(&mut self, stage: Stage) {
        if stage <= Stage::Initial {
            self.init = None;
        }
        if stage <= Stage::FindMaxima {
            self.maxima = None;
        }
        if stage <= Stage::Search {
            self.search = None;
        }
        if stage <= Stage::MergeHeight {
            self.merge_height = None;
        }
        if stage <= Stage::MergeSize {
            self.merge_size = None;
        }
        if stage <= Stage::MergeSaddle {
            self.merge_saddle = None;
        }
        if stage <= Stage::CalculateResults {
            self.results = None;
        }
        if stage <= Stage::CalculateOutputMask {
            self.output = None;
        }
    }

    /// Execute the current stage and move the cursor forward. A missing
    /// upstream cache rewinds to `Initial` instead of failing.
    fn advance(
        &mut self,
        config: &FindFociConfig,
        cancel: &CancelToken,
    ) -> Result<(), FindFociError> {
        match self.stage {
            Stage::Initial => {
                let init = stage_initial(&self.image, self.mask.as_ref(), config)?;
                self.init = Some(init);
                self.stage = self.stage.next();
            }
            Stage::FindMaxima => {
                let maxima = match &self.init {
                    Some(init) => stage_find_maxima(&self.image, init, config, cancel)?,
                    None => {
                        self.stage = Stage::Initial;
                        return Ok(());
                    }
                };
                self.maxima = Some(maxima);
                self.stage = self.stage.next();
            }
            Stage::Search => {
                let search = match (&self.init, &self.maxima) {
                    (Some(init), Some(maxima)) => {
                        stage_search(&self.image, init, maxima, config, cancel)?
                    }
                    _ => {
                        self.stage = Stage::Initial;
                        return Ok(());
                    }
                };
                self.search = Some(search);
                self.stage = self.stage.next();
            }
            Stage::MergeHeight => {
                let merged = match (&self.maxima, &self.search) {
                    (Some(maxima), Some(search)) => {
                        stage_merge_height(search, &maxima.stats, config, cancel)?
                    }
                    _ => {
                        self.stage = Stage::Initial;
                        return Ok(());
                    }
                };
                self.merge_height = Some(merged);
                self.stage = self.stage.next();
            }
            Stage::MergeSize => {
                let merged = match (&self.init, &self.search, &self.merge_height) {
                    (Some(init), Some(search), Some(prev)) => stage_merge_size(
                        search_stack(&self.image, init),
                        search,
                        prev,
                        config,
                        cancel,
                    )?,
                    _ => {
                        self.stage = Stage::Initial;
                        return Ok(());
                    }
                };
                self.merge_size = Some(merged);
                self.stage = self.stage.next();
            }
            Stage::MergeSaddle => {
                let merged = match (&self.init, &self.search, &self.merge_size) {
                    (Some(init), Some(search), Some(prev)) => stage_merge_saddle(
                        search_stack(&self.image, init),
                        search,
                        prev,
                        config,
                        cancel,
                    )?,
                    _ => {
                        self.stage = Stage::Initial;
                        return Ok(());
                    }
                };
                self.merge_saddle = Some(merged);
                self.stage = self.stage.next();
            }
            Stage::CalculateResults => {
                let results = match (&self.init, &self.maxima, &self.search, &self.merge_saddle) {
                    (Some(init), Some(maxima), Some(search), Some(merged)) => stage_results(
                        &self.image,
                        init,
                        maxima.stats.background,
                        search,
                        merged,
                        self.mask.as_ref(),
                        config,
                    ),
                    _ => {
                        self.stage = Stage::Initial;
                        return Ok(());
                    }
                };
                self.results = Some(results);
                self.stage = self.stage.next();
            }
            Stage::CalculateOutputMask => {
                let output = match (&self.init, &self.maxima, &self.results) {
                    (Some(init), Some(maxima), Some(results)) => stage_output_mask(
                        search_stack(&self.image, init),
                        &maxima.stats,
                        results,
                        config,
                    )?,
                    _ => {
                        self.stage = Stage::Initial;
                        return Ok(());
                    }
                };
                self.output = Some(output);
                self.stage = self.stage.next();
            }
            Stage::ShowResults => {
                if config.save_results {
                    let snapshot = match &self.output {
                        Some(out) => out.results.clone(),
                        None => {
                        self.stage = Stage::Initial;
                        return Ok(());
                    }
                    };
                    tracing::debug!(n_saved = snapshot.len(), "results snapshot retained");
                    self.saved = Some(snapshot);
                }
                self.stage = self.stage.next();
            }
            Stage::Complete => {}
        }
        Ok(())
    }
}

fn validate<T: Sample>(
    image: &ImageStack<T>,
    mask: Option<&ImageStack<u8>>,
) -> Result<(), FindFociError> {
    if !image.all_valid() {
        return Err(FindFociError::NonFiniteSample);
    }
    if let Some(m) = mask {
        if m.dims() != image.dims() {
            return Err(FindFociError::MaskDimensionMismatch);
        }
    }
    Ok(())
}

/// The stack the search operates on: the blurred copy when one exists.
fn search_stack<'a, T: Sample>(
    image: &'a ImageStack<T>,
    init: &'a InitArtifacts<T>,
) -> &'a ImageStack<T> {
    init.blurred.as_ref().unwrap_or(image)
}

fn stage_initial<T: Sample>(
    image: &ImageStack<T>,
    mask: Option<&ImageStack<u8>>,
    config: &FindFociConfig,
) -> Result<InitArtifacts<T>, FindFociError> {
    let blurred = (config.blur_sigma > 0.0).then(|| blur_stack(image, config.blur_sigma));
    let search = blurred.as_ref().unwrap_or(image);

    let include: Vec<bool> = match mask {
        Some(m) => m.data().iter().map(|&v| v != 0).collect(),
        None => vec![true; image.dims().len()],
    };

    let build = build_histogram(search, Some(&include))?;
    let order = descending_order(&build.bins, build.histogram.n_bins());

    // Outside scope reads the excluded region, which needs its own
    // histogram; otherwise the search histogram doubles as the stats one.
    let stats_hist = match (mask, config.stats_scope) {
        (Some(_), StatsScope::Outside) => {
            let outside: Vec<bool> = include.iter().map(|&i| !i).collect();
            Some(build_histogram(search, Some(&outside))?.histogram)
        }
        _ => None,
    };
    let base_stats = StackStats::from_histogram(
        stats_hist.as_ref().unwrap_or(&build.histogram),
        config.stats_scope,
    );

    tracing::debug!(
        n_bins = build.histogram.n_bins(),
        blurred = blurred.is_some(),
        "histograms built"
    );

    Ok(InitArtifacts {
        blurred,
        include,
        search_hist: build.histogram,
        bins: build.bins,
        order,
        stats_hist,
        base_stats,
    })
}

fn stage_find_maxima<T: Sample>(
    image: &ImageStack<T>,
    init: &InitArtifacts<T>,
    config: &FindFociConfig,
    cancel: &CancelToken,
) -> Result<MaximaArtifacts, FindFociError> {
    let mut stats = init.base_stats.clone();
    stats.background = resolve_background(
        config.background,
        &stats,
        init.stats_hist.as_ref().unwrap_or(&init.search_hist),
    );
    stats.total_above_background = total_above(&init.search_hist, stats.background);

    let inputs = SearchInputs {
        stack: search_stack(image, init),
        include: &init.include,
        bins: &init.bins,
        hist: &init.search_hist,
        order: &init.order,
        connectivity: config.connectivity,
    };
    let out = find_maxima(&inputs, stats.background, cancel)?;
    tracing::info!(background = stats.background, "{} maxima found", out.results.len());

    Ok(MaximaArtifacts {
        stats,
        flags: out.flags,
        results: out.results,
    })
}

fn stage_search<T: Sample>(
    image: &ImageStack<T>,
    init: &InitArtifacts<T>,
    maxima: &MaximaArtifacts,
    config: &FindFociConfig,
    cancel: &CancelToken,
) -> Result<SearchArtifacts, FindFociError> {
    let inputs = SearchInputs {
        stack: search_stack(image, init),
        include: &init.include,
        bins: &init.bins,
        hist: &init.search_hist,
        order: &init.order,
        connectivity: config.connectivity,
    };
    let grown = grow_regions(
        &inputs,
        maxima.stats.background,
        config.search,
        maxima.flags.clone(),
        maxima.results.clone(),
        cancel,
    )?;

    let n_saddle_voxels = grown
        .flags
        .iter()
        .filter(|&&f| f & FLAG_SADDLE != 0)
        .count();
    tracing::debug!(n_saddle_voxels, "regions grown");

    Ok(SearchArtifacts {
        peak_ids: grown.peak_ids,
        results: grown.results,
        saddles: grown.saddles,
        edge: grown.edge,
    })
}

fn stage_merge_height(
    search: &SearchArtifacts,
    stats: &StackStats,
    config: &FindFociConfig,
    cancel: &CancelToken,
) -> Result<MergeArtifacts, FindFociError> {
    let mut results = search.results.clone();
    let mut saddles = search.saddles.clone();
    let mut remap = PeakRemap::identity(results.len());
    let merges = merge_by_height(
        &mut results,
        &mut saddles,
        &mut remap,
        stats.background,
        config.peak,
        cancel,
    )?;
    tracing::debug!(merges, "height merge complete");
    Ok(MergeArtifacts {
        results,
        saddles,
        remap,
    })
}

fn stage_merge_size<T: Sample>(
    stack: &ImageStack<T>,
    search: &SearchArtifacts,
    prev: &MergeArtifacts,
    config: &FindFociConfig,
    cancel: &CancelToken,
) -> Result<MergeArtifacts, FindFociError> {
    let mut results = prev.results.clone();
    let mut saddles = prev.saddles.clone();
    let mut remap = prev.remap.clone();
    let merges = if config.minimum_above_saddle {
        let ctx = AboveSaddleCtx {
            stack,
            peak_ids: &search.peak_ids,
            connectivity: config.connectivity,
            min_size: config.min_size,
            contiguous: config.contiguous_above_saddle,
        };
        merge_by_above_saddle_size(&mut results, &mut saddles, &mut remap, &ctx, cancel)?
    } else {
        merge_by_size(&mut results, &mut saddles, &mut remap, config.min_size, cancel)?
    };
    tracing::debug!(
        merges,
        above_saddle = config.minimum_above_saddle,
        "size merge complete"
    );
    Ok(MergeArtifacts {
        results,
        saddles,
        remap,
    })
}

fn stage_merge_saddle<T: Sample>(
    stack: &ImageStack<T>,
    search: &SearchArtifacts,
    prev: &MergeArtifacts,
    config: &FindFociConfig,
    cancel: &CancelToken,
) -> Result<MergeArtifacts, FindFociError> {
    let mut results = prev.results.clone();
    let mut saddles = prev.saddles.clone();
    let mut remap = prev.remap.clone();
    if config.remove_edge_maxima {
        let removed = merge_edge_peaks(&mut results, &mut saddles, &mut remap, &search.edge, cancel)?;
        tracing::debug!(removed, "edge peaks merged");
        // Edge merges can push survivors below the above-saddle size rule.
        if config.minimum_above_saddle && removed > 0 {
            let ctx = AboveSaddleCtx {
                stack,
                peak_ids: &search.peak_ids,
                connectivity: config.connectivity,
                min_size: config.min_size,
                contiguous: config.contiguous_above_saddle,
            };
            merge_by_above_saddle_size(&mut results, &mut saddles, &mut remap, &ctx, cancel)?;
        }
    }
    Ok(MergeArtifacts {
        results,
        saddles,
        remap,
    })
}

fn stage_results<T: Sample>(
    image: &ImageStack<T>,
    init: &InitArtifacts<T>,
    background: f64,
    search: &SearchArtifacts,
    merged: &MergeArtifacts,
    mask: Option<&ImageStack<u8>>,
    config: &FindFociConfig,
) -> ResultArtifacts {
    let objects = config
        .object_analysis
        .then(|| label_objects(mask, image.dims(), config.connectivity));
    let mut remap = merged.remap.clone();
    let inputs = FinaliseInputs {
        search: search_stack(image, init),
        original: image,
        background,
        peak_ids: &search.peak_ids,
        connectivity: config.connectivity,
        centre: config.centre,
        contiguous_above_saddle: config.contiguous_above_saddle,
        sort: config.sort,
        max_peaks: config.max_peaks,
        objects: objects.as_ref(),
    };
    let out = finalise_results(&inputs, &merged.results, &merged.saddles, &mut remap);
    tracing::info!("{} peaks finalised", out.results.len());

    ResultArtifacts {
        results: out.results,
        labels: out.labels,
        n_objects: objects.map(|o| o.count),
    }
}

fn stage_output_mask<T: Sample>(
    stack: &ImageStack<T>,
    stats: &StackStats,
    results: &ResultArtifacts,
    config: &FindFociConfig,
) -> Result<FindFociOutput, FindFociError> {
    let mask = build_mask(
        stack,
        stats.background,
        &results.labels,
        &results.results,
        &config.mask,
    )?;
    Ok(FindFociOutput {
        results: results.results.clone(),
        stats: stats.clone(),
        mask,
        n_objects: results.n_objects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MaskMode, PeakMethod, SortKey};
    use crate::stack::StackDims;
    use crate::stats::BackgroundMethod;
    use crate::test_utils::spot_field;

    /// Permissive merge settings so every grown maximum survives.
    fn permissive() -> FindFociConfig {
        FindFociConfig {
            background: BackgroundMethod::Absolute(0.0),
            min_size: 1,
            minimum_above_saddle: false,
            ..FindFociConfig::default()
        }
    }

    fn profile_stack() -> ImageStack<u8> {
        let dims = StackDims::single(8, 1);
        ImageStack::new(dims, vec![0u8, 0, 5, 0, 0, 8, 0, 0]).unwrap()
    }

    #[test]
    fn flat_image_yields_no_peaks() {
        let stack = ImageStack::filled(StackDims::single(5, 5), 7u8);
        let out = find_foci(&stack, None, &FindFociConfig::default()).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.stats.background, 7.0);
        assert_eq!(out.n_objects, None);
    }

    #[test]
    fn profile_splits_into_two_peaks_with_a_zero_saddle() {
        let config = FindFociConfig {
            mask: crate::engine::MaskOptions {
                mode: MaskMode::Peaks,
                ..Default::default()
            },
            ..permissive()
        };
        let out = find_foci(&profile_stack(), None, &config).unwrap();

        assert_eq!(out.len(), 2);
        let tall = &out.results[0];
        let short = &out.results[1];
        assert_eq!((tall.id, tall.max_value, tall.count), (1, 8.0, 4));
        assert_eq!((short.id, short.max_value, short.count), (2, 5.0, 4));
        assert_eq!(tall.highest_saddle_value, Some(0.0));
        assert_eq!(short.highest_saddle_value, Some(0.0));
        assert_eq!(tall.saddle_neighbour_id, Some(2));
        assert_eq!(short.saddle_neighbour_id, Some(1));

        let mask = out.mask.expect("peaks mode emits a mask");
        assert_eq!(mask.data(), &[2, 2, 2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn shallow_peak_merges_into_its_tall_neighbour() {
        // Heights 100 and 20 over a saddle of 15: 20 - 15 < 10 merges the
        // shallow peak, 100 - 15 >= 10 keeps the tall one.
        let dims = StackDims::single(5, 1);
        let stack = ImageStack::new(dims, vec![2u8, 100, 15, 20, 2]).unwrap();
        let config = FindFociConfig {
            peak: PeakMethod::Absolute(10.0),
            ..permissive()
        };
        let out = find_foci(&stack, None, &config).unwrap();

        assert_eq!(out.len(), 1);
        let peak = &out.results[0];
        assert_eq!(peak.id, 1);
        assert_eq!(peak.max_value, 100.0);
        assert_eq!(peak.count, 5, "merged peak owns every claimed voxel");
        assert_eq!(peak.total_intensity, 139.0, "2 + 100 + 15 + 20 + 2");
        assert_eq!(peak.highest_saddle_value, None, "sole survivor has no saddle");
    }

    #[test]
    fn rerun_with_the_same_config_returns_the_same_output() {
        let stack = spot_field(24, 24, 3);
        let mut finder = FociFinder::new(stack, None).unwrap();
        let cancel = CancelToken::new();
        let config = permissive();

        let first = finder.run(&config, &cancel).unwrap();
        assert_eq!(finder.stage(), Stage::Complete);
        let second = finder.run(&config, &cancel).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn staged_rerun_matches_a_fresh_run() {
        let stack = spot_field(24, 24, 7);
        let mut finder = FociFinder::new(stack.clone(), None).unwrap();
        let cancel = CancelToken::new();

        finder.run(&permissive(), &cancel).unwrap();

        // Late-stage change: only sorting and truncation re-run.
        let reordered = FindFociConfig {
            sort: SortKey::MaxValue,
            max_peaks: 2,
            ..permissive()
        };
        let staged = finder.run(&reordered, &cancel).unwrap();
        let fresh = find_foci(&stack, None, &reordered).unwrap();
        assert_eq!(staged, fresh);

        // Mid-stage change: merging re-runs from the size pass.
        let stricter = FindFociConfig {
            min_size: 3,
            ..reordered
        };
        let staged = finder.run(&stricter, &cancel).unwrap();
        let fresh = find_foci(&stack, None, &stricter).unwrap();
        assert_eq!(staged, fresh);
    }

    #[test]
    fn run_until_stops_at_the_requested_stage() {
        let mut finder = FociFinder::new(profile_stack(), None).unwrap();
        let cancel = CancelToken::new();
        let config = permissive();

        let reached = finder.run_until(Stage::MergeHeight, &config, &cancel).unwrap();
        assert_eq!(reached, Stage::MergeHeight);
        assert_eq!(finder.stage(), Stage::MergeHeight);

        let out = finder.run(&config, &cancel).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(finder.stage(), Stage::Complete);
    }

    #[test]
    fn pre_cancelled_token_fails_and_keeps_caches() {
        let mut finder = FociFinder::new(profile_stack(), None).unwrap();
        let config = permissive();
        let first = finder.run(&config, &CancelToken::new()).unwrap();

        let cancelled = CancelToken::new();
        cancelled.cancel();
        let err = finder.run(&config, &cancelled).unwrap_err();
        assert_eq!(err, FindFociError::Cancelled);

        let again = finder.run(&config, &CancelToken::new()).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn stricter_merging_never_increases_the_peak_count() {
        let stack = spot_field(32, 32, 11);
        let cancel = CancelToken::new();
        let mut finder = FociFinder::new(stack, None).unwrap();

        let all = finder.run(&permissive(), &cancel).unwrap().len();
        assert!(all > 0, "fixture must contain peaks");
        let mut previous = all;
        for min_size in [2usize, 4, 8, 16] {
            let config = FindFociConfig {
                min_size,
                ..permissive()
            };
            let n = finder.run(&config, &cancel).unwrap().len();
            assert!(n <= previous, "min_size {min_size} grew the count {previous} -> {n}");
            previous = n;
        }
    }

    #[test]
    fn every_mask_label_has_a_result_and_vice_versa() {
        let stack = spot_field(24, 24, 5);
        let config = FindFociConfig {
            mask: crate::engine::MaskOptions {
                mode: MaskMode::Peaks,
                ..Default::default()
            },
            ..permissive()
        };
        let out = find_foci(&stack, None, &config).unwrap();
        let mask = out.mask.as_ref().expect("peaks mode emits a mask");

        let mut seen = vec![false; out.len() + 1];
        for &label in mask.data() {
            assert!(
                (label as usize) < seen.len(),
                "label {label} beyond the result range"
            );
            seen[label as usize] = true;
        }
        for (k, r) in out.results.iter().enumerate() {
            assert_eq!(r.id as usize, k + 1, "ids are the final rank order");
            assert!(seen[r.id as usize], "peak {} owns no voxel", r.id);
        }
    }

    #[test]
    fn saved_snapshot_persists_until_overwritten() {
        let mut finder = FociFinder::new(profile_stack(), None).unwrap();
        let cancel = CancelToken::new();
        let config = permissive();

        finder.run(&config, &cancel).unwrap();
        assert!(finder.saved_results().is_none());

        let saving = FindFociConfig {
            save_results: true,
            ..config.clone()
        };
        let out = finder.run(&saving, &cancel).unwrap();
        assert_eq!(finder.saved_results(), Some(&out.results[..]));

        // Turning saving back off re-runs the stage but keeps the snapshot.
        finder.run(&config, &cancel).unwrap();
        assert_eq!(finder.saved_results(), Some(&out.results[..]));
    }

    #[test]
    fn objects_are_assigned_from_the_mask() {
        let dims = StackDims::single(8, 1);
        let stack = ImageStack::new(dims, vec![0u8, 0, 5, 0, 0, 8, 0, 0]).unwrap();
        let mask = ImageStack::new(dims, vec![1u8, 1, 1, 0, 1, 1, 1, 1]).unwrap();
        let config = FindFociConfig {
            object_analysis: true,
            ..permissive()
        };
        let out = find_foci(&stack, Some(&mask), &config).unwrap();

        assert_eq!(out.n_objects, Some(2));
        assert_eq!(out.len(), 2);
        assert_eq!(out.results[0].max_value, 8.0);
        assert_eq!(out.results[0].object_id, Some(2));
        assert_eq!(out.results[1].object_id, Some(1));
    }

    #[test]
    fn new_image_resets_the_pipeline() {
        let mut finder = FociFinder::new(profile_stack(), None).unwrap();
        let cancel = CancelToken::new();
        let config = permissive();
        assert_eq!(finder.run(&config, &cancel).unwrap().len(), 2);

        let flat = ImageStack::filled(StackDims::single(8, 1), 3u8);
        finder.set_image(flat).unwrap();
        assert_eq!(finder.stage(), Stage::Initial);
        assert!(finder.run(&config, &cancel).unwrap().is_empty());
    }

    #[test]
    fn construction_validates_inputs() {
        let image = ImageStack::filled(StackDims::single(4, 4), 0u8);
        let mask = ImageStack::filled(StackDims::single(5, 4), 1u8);
        let err = FociFinder::new(image, Some(mask)).unwrap_err();
        assert_eq!(err, FindFociError::MaskDimensionMismatch);

        let dims = StackDims::single(2, 2);
        let bad = ImageStack::new(dims, vec![1.0f32, f32::NAN, 0.0, 0.0]).unwrap();
        let err = FociFinder::new(bad, None).unwrap_err();
        assert_eq!(err, FindFociError::NonFiniteSample);
    }
}
