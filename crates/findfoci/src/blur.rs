//! Gaussian pre-blur of the search copy.

use image::{ImageBuffer, Luma};

use crate::stack::{ImageStack, Sample};

/// Blur each z-slice with a Gaussian of the given sigma, keeping the stack's
/// sample type. Blurring is 2D per slice; slices never mix.
pub(crate) fn blur_stack<T: Sample>(stack: &ImageStack<T>, sigma: f64) -> ImageStack<T> {
    let dims = stack.dims();
    let (w, h) = (dims.width as u32, dims.height as u32);
    let mut out = stack.clone();
    let data = stack.data();

    for z in 0..dims.depth {
        let base = dims.index(0, 0, z);
        let plane = &data[base..base + dims.width * dims.height];

        let mut f = ImageBuffer::<Luma<f32>, Vec<f32>>::new(w, h);
        for (i, px) in f.pixels_mut().enumerate() {
            *px = Luma([plane[i].to_f32()]);
        }
        let blurred = imageproc::filter::gaussian_blur_f32(&f, sigma as f32);

        let out_plane = &mut out.data_mut()[base..base + dims.width * dims.height];
        for (i, px) in blurred.pixels().enumerate() {
            out_plane[i] = T::from_f32(px[0]);
        }
    }

    out
}
