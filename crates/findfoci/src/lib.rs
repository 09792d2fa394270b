//! findfoci: local-maxima detection and peak analysis for 2D/3D greyscale
//! stacks.
//!
//! Given an intensity stack, the pipeline finds every local maximum, grows
//! a labelled region around each by descending intensity, and merges
//! insignificant peaks into their strongest neighbours. The stages are:
//!
//! 1. **Initial** – optional Gaussian pre-blur, inclusion mask, unique-value
//!    histogram, base statistics.
//! 2. **FindMaxima** – background resolution, strict-maximum and plateau
//!    seed detection.
//! 3. **Search** – histogram-ordered region growth with saddle capture.
//! 4. **Merge** – height, size and edge criteria collapse peaks across
//!    their highest saddles (three ordered passes).
//! 5. **Results** – per-peak statistics, centre refinement, sorting,
//!    renumbering and truncation.
//! 6. **Mask** – optional label-mask rendering of the surviving peaks.
//!
//! Re-running with a changed configuration recomputes only the affected
//! suffix of this chain; see [`FociFinder`].
//!
//! # Public API
//! - [`find_foci`] for one-shot runs
//! - [`FociFinder`] for staged re-runs with configuration diffing
//! - [`FindFociConfig`] and its enums for tuning
//! - [`ImageStack`] over `u8`, `u16` or `f32` samples as the input type
//!
//! Algorithm internals (histograms, region growth, merge bookkeeping) are
//! not part of the public surface.

mod blur;
mod cancel;
mod config;
mod engine;
mod error;
mod grid;
mod histogram;
mod pipeline;
mod stack;
mod stats;
mod threshold;

#[cfg(test)]
mod test_utils;

pub use cancel::CancelToken;
pub use config::FindFociConfig;
pub use engine::{
    CentreMethod, FociResult, MaskMode, MaskOptions, PeakMethod, SearchMethod, SortKey,
};
pub use error::FindFociError;
pub use grid::Connectivity;
pub use histogram::Histogram;
pub use pipeline::{find_foci, FindFociOutput, FociFinder, Stage};
pub use stack::{ImageStack, Sample, StackDims};
pub use stats::{BackgroundMethod, StackStats, StatsScope};
pub use threshold::AutoThresholdMethod;
