//! Shared synthetic-stack builders for unit tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::stack::{ImageStack, StackDims};

/// Deterministic single-slice field: three bright Gaussian spots jittered
/// around fixed anchors over a low-amplitude noise floor. The same seed
/// always renders the same stack.
pub(crate) fn spot_field(width: usize, height: usize, seed: u64) -> ImageStack<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dims = StackDims::single(width, height);
    let mut field = vec![0.0f64; dims.len()];

    let anchors = [(0.25, 0.25), (0.75, 0.3), (0.5, 0.75)];
    for &(fx, fy) in &anchors {
        let cx = fx * width as f64 + rng.gen_range(-1.5..1.5);
        let cy = fy * height as f64 + rng.gen_range(-1.5..1.5);
        let amplitude = rng.gen_range(120.0..220.0);
        let sigma = rng.gen_range(1.5..2.5);
        for y in 0..height {
            for x in 0..width {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                let r2 = dx * dx + dy * dy;
                field[dims.index(x, y, 0)] += amplitude * (-r2 / (2.0 * sigma * sigma)).exp();
            }
        }
    }

    let samples: Vec<u8> = field
        .iter()
        .map(|&v| (v + rng.gen_range(0.0..6.0)).round().clamp(0.0, 255.0) as u8)
        .collect();
    ImageStack::new(dims, samples).unwrap()
}
