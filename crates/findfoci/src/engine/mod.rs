//! Algorithmic core: maxima detection, region growth, merging and
//! finalisation over flat voxel buffers. The pipeline module wires these
//! stages together; nothing here performs I/O or owns cached state.

pub(crate) mod centre;
pub(crate) mod mask;
pub(crate) mod merge;
pub(crate) mod objects;
pub(crate) mod results;
pub(crate) mod saddle;
pub(crate) mod search;
pub(crate) mod types;

pub use centre::CentreMethod;
pub use mask::{MaskMode, MaskOptions};
pub use merge::PeakMethod;
pub use results::SortKey;
pub use search::SearchMethod;
pub use types::FociResult;
