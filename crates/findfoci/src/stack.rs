//! Flattened voxel buffers and the numeric sample abstraction.
//!
//! A stack stores one sample per voxel in z-y-x order: slice `z` occupies
//! `z * width * height ..`, row `y` inside it occupies `y * width ..`. The
//! whole pipeline indexes voxels by their flat offset in this layout.

use crate::error::FindFociError;

/// Numeric sample type a stack can hold.
///
/// The pipeline is generic over the bit depth of the input; this trait
/// provides the few capabilities it needs: ordering, float conversion for
/// statistics, a float round-trip for the blur path, and a bucket-count
/// hint for the integer histogram fast path.
pub trait Sample: Copy + PartialOrd {
    /// True when the type has a small finite value set suitable for direct
    /// bucket counting.
    const DISCRETE: bool;
    /// Number of representable values for the discrete fast path
    /// (0 for floating-point types).
    const BUCKETS: usize;

    /// Widen to `f64` for statistics and thresholds.
    fn to_f64(self) -> f64;
    /// Widen to `f32` for the blur path.
    fn to_f32(self) -> f32;
    /// Narrow from `f32`, clamping and rounding as the type requires.
    fn from_f32(v: f32) -> Self;
    /// Bucket index for the discrete fast path. Unused for float types.
    fn bucket(self) -> usize;
    /// False for NaN/infinite float samples; always true for integers.
    fn is_valid(self) -> bool {
        true
    }
}

impl Sample for u8 {
    const DISCRETE: bool = true;
    const BUCKETS: usize = 1 << 8;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn to_f32(self) -> f32 {
        f32::from(self)
    }

    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, 255.0) as u8
    }

    fn bucket(self) -> usize {
        self as usize
    }
}

impl Sample for u16 {
    const DISCRETE: bool = true;
    const BUCKETS: usize = 1 << 16;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn to_f32(self) -> f32 {
        f32::from(self)
    }

    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, 65535.0) as u16
    }

    fn bucket(self) -> usize {
        self as usize
    }
}

impl Sample for f32 {
    const DISCRETE: bool = false;
    const BUCKETS: usize = 0;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(v: f32) -> Self {
        v
    }

    fn bucket(self) -> usize {
        0
    }

    fn is_valid(self) -> bool {
        self.is_finite()
    }
}

/// Stack dimensions. A 2D image is a stack of depth 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StackDims {
    /// Voxels along x.
    pub width: usize,
    /// Voxels along y.
    pub height: usize,
    /// Voxels along z (slices).
    pub depth: usize,
}

impl StackDims {
    /// 3D stack dimensions.
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Single-slice (2D) dimensions.
    pub fn single(width: usize, height: usize) -> Self {
        Self::new(width, height, 1)
    }

    /// Total voxel count.
    pub fn len(self) -> usize {
        self.width * self.height * self.depth
    }

    /// True when any axis is zero.
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// True for single-slice stacks.
    pub fn is_2d(self) -> bool {
        self.depth == 1
    }

    /// Flat offset of voxel (x, y, z).
    #[inline]
    pub fn index(self, x: usize, y: usize, z: usize) -> usize {
        (z * self.height + y) * self.width + x
    }

    /// Voxel (x, y, z) of a flat offset.
    #[inline]
    pub fn coords(self, index: usize) -> (usize, usize, usize) {
        let plane = self.width * self.height;
        let z = index / plane;
        let rem = index % plane;
        (rem % self.width, rem / self.width, z)
    }
}

/// A 2D or 3D greyscale voxel buffer in flat z-y-x layout.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImageStack<T> {
    dims: StackDims,
    data: Vec<T>,
}

impl<T: Sample> ImageStack<T> {
    /// Wrap an existing buffer. Fails when an axis is zero or the buffer
    /// length does not match the dimensions.
    pub fn new(dims: StackDims, data: Vec<T>) -> Result<Self, FindFociError> {
        if dims.is_empty() || data.len() != dims.len() {
            return Err(FindFociError::InvalidDimensions);
        }
        Ok(Self { dims, data })
    }

    /// A stack filled with one value.
    pub fn filled(dims: StackDims, value: T) -> Self {
        Self {
            dims,
            data: vec![value; dims.len()],
        }
    }

    /// Stack dimensions.
    pub fn dims(&self) -> StackDims {
        self.dims
    }

    /// Flat sample buffer in z-y-x order.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Mutable flat sample buffer.
    pub(crate) fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Sample at (x, y, z).
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.data[self.dims.index(x, y, z)]
    }

    /// True when every sample is an orderable finite value.
    pub(crate) fn all_valid(&self) -> bool {
        self.data.iter().all(|v| v.is_valid())
    }
}
