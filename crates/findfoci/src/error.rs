/// Errors returned by the segmentation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindFociError {
    /// A stack axis is zero or the buffer length disagrees with the dimensions.
    InvalidDimensions,
    /// Mask dimensions differ from the image dimensions.
    MaskDimensionMismatch,
    /// Floating-point input contains NaN or infinite samples.
    NonFiniteSample,
    /// Histogram voxel accounting disagrees with the inclusion predicate.
    HistogramMismatch,
    /// More surviving peaks than the output mask label range can hold.
    TooManyPeaksForMask,
    /// The run was cancelled before completion.
    Cancelled,
}

impl std::fmt::Display for FindFociError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDimensions => write!(f, "invalid stack dimensions"),
            Self::MaskDimensionMismatch => write!(f, "mask dimensions do not match the image"),
            Self::NonFiniteSample => write!(f, "non-finite sample in floating-point input"),
            Self::HistogramMismatch => write!(f, "histogram count does not match included voxels"),
            Self::TooManyPeaksForMask => write!(f, "too many peaks for the output mask label range"),
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}

impl std::error::Error for FindFociError {}
