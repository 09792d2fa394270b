//! Staged orchestration of the peak-finding run.
//!
//! Algorithmic primitives live in `crate::engine`; this layer owns stage
//! boundaries, cached artifacts and the re-entry rules. A configuration
//! diff maps to the earliest stage it affects and only the suffix re-runs.
//!
//! Entry points:
//! - `find_foci`: one-shot run over an image without keeping caches
//! - `FociFinder::run`: staged run with config diffing and cache reuse
//! - `FociFinder::run_until`: stop after a chosen stage

mod result;
mod run;
mod stage;
mod state;

pub use result::FindFociOutput;
pub use run::{find_foci, FociFinder};
pub use stage::Stage;
