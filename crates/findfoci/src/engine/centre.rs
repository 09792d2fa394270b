//! Peak centre refinement.
//!
//! Every method degrades to the max-value rule when its own inputs are
//! unusable (empty above-saddle set, non-positive weights, rejected fit),
//! so a centre is always produced.

use nalgebra::{DMatrix, DVector};

use crate::stack::{ImageStack, Sample};

/// How the reported peak centre is derived from the region voxels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CentreMethod {
    /// Position of the maximum in the searched (blurred) image.
    #[default]
    MaxValueSearch,
    /// Position of the maximum in the unblurred image.
    MaxValueOriginal,
    /// Intensity centroid over a window of the given radius around the
    /// maximum, searched image.
    CentreOfMassSearch(usize),
    /// Intensity centroid over a window of the given radius around the
    /// maximum, unblurred image.
    CentreOfMassOriginal(usize),
    /// 2D Gaussian fit on the z-projection, searched image.
    GaussianSearch,
    /// 2D Gaussian fit on the z-projection, unblurred image.
    GaussianOriginal,
}

/// Centre of one peak. `voxels` is the full region (ascending flat index);
/// `above_saddle` the subset above the peak's highest saddle.
pub(crate) fn compute_centre<T: Sample>(
    method: CentreMethod,
    search: &ImageStack<T>,
    original: &ImageStack<T>,
    voxels: &[u32],
    above_saddle: &[u32],
) -> [f64; 3] {
    match method {
        CentreMethod::MaxValueSearch => max_value_centre(search, voxels),
        CentreMethod::MaxValueOriginal => max_value_centre(original, voxels),
        CentreMethod::CentreOfMassSearch(r) => centre_of_mass(search, voxels, above_saddle, r),
        CentreMethod::CentreOfMassOriginal(r) => {
            centre_of_mass(original, voxels, above_saddle, r)
        }
        CentreMethod::GaussianSearch => gaussian_centre(search, voxels, above_saddle),
        CentreMethod::GaussianOriginal => gaussian_centre(original, voxels, above_saddle),
    }
}

/// Highest-valued voxel of the region. Ties pick the voxel closest to the
/// centroid of the tied set, lowest flat index when equidistant.
pub(crate) fn max_voxel<T: Sample>(stack: &ImageStack<T>, voxels: &[u32]) -> usize {
    let data = stack.data();
    let dims = stack.dims();

    let mut max_v = f64::NEG_INFINITY;
    let mut first = 0usize;
    let mut tied = 0usize;
    for &i in voxels {
        let v = data[i as usize].to_f64();
        if v > max_v {
            max_v = v;
            first = i as usize;
            tied = 1;
        } else if v == max_v {
            tied += 1;
        }
    }
    if tied <= 1 {
        return first;
    }

    let mut sum = [0.0f64; 3];
    for &i in voxels {
        if data[i as usize].to_f64() == max_v {
            let (x, y, z) = dims.coords(i as usize);
            sum[0] += x as f64;
            sum[1] += y as f64;
            sum[2] += z as f64;
        }
    }
    let n = tied as f64;
    let c = [sum[0] / n, sum[1] / n, sum[2] / n];

    let mut best = first;
    let mut best_d2 = f64::INFINITY;
    for &i in voxels {
        if data[i as usize].to_f64() != max_v {
            continue;
        }
        let (x, y, z) = dims.coords(i as usize);
        let dx = x as f64 - c[0];
        let dy = y as f64 - c[1];
        let dz = z as f64 - c[2];
        let d2 = dx * dx + dy * dy + dz * dz;
        if d2 < best_d2 {
            best_d2 = d2;
            best = i as usize;
        }
    }
    best
}

fn max_value_centre<T: Sample>(stack: &ImageStack<T>, voxels: &[u32]) -> [f64; 3] {
    let (x, y, z) = stack.dims().coords(max_voxel(stack, voxels));
    [x as f64, y as f64, z as f64]
}

/// Intensity centroid over the `(2r+1)`-wide window around the maximum,
/// restricted to above-saddle voxels. Non-positive weights are skipped;
/// an empty or weightless window falls back to the max-value rule.
fn centre_of_mass<T: Sample>(
    stack: &ImageStack<T>,
    voxels: &[u32],
    above_saddle: &[u32],
    radius: usize,
) -> [f64; 3] {
    if above_saddle.is_empty() {
        return max_value_centre(stack, voxels);
    }
    let dims = stack.dims();
    let data = stack.data();
    let (mx, my, mz) = dims.coords(max_voxel(stack, voxels));
    let x0 = mx.saturating_sub(radius);
    let x1 = (mx + radius).min(dims.width - 1);
    let y0 = my.saturating_sub(radius);
    let y1 = (my + radius).min(dims.height - 1);
    let z0 = mz.saturating_sub(radius);
    let z1 = (mz + radius).min(dims.depth - 1);

    let mut w_sum = 0.0f64;
    let mut acc = [0.0f64; 3];
    for &i in above_saddle {
        let (x, y, z) = dims.coords(i as usize);
        if x < x0 || x > x1 || y < y0 || y > y1 || z < z0 || z > z1 {
            continue;
        }
        let w = data[i as usize].to_f64();
        if w <= 0.0 {
            continue;
        }
        w_sum += w;
        acc[0] += w * x as f64;
        acc[1] += w * y as f64;
        acc[2] += w * z as f64;
    }
    if w_sum <= 0.0 {
        return max_value_centre(stack, voxels);
    }
    [acc[0] / w_sum, acc[1] / w_sum, acc[2] / w_sum]
}

/// Linearised 2D Gaussian fit on the maximum-intensity z-projection of the
/// above-saddle voxels: `ln v = c0 + c1 x + c2 y + c3 (x² + y²)` solved by
/// intensity-weighted least squares. The fit is rejected (max-value
/// fallback) when fewer than five usable samples exist, the curvature is
/// not negative, or the centre leaves the projection bounding box.
fn gaussian_centre<T: Sample>(
    stack: &ImageStack<T>,
    voxels: &[u32],
    above_saddle: &[u32],
) -> [f64; 3] {
    if above_saddle.is_empty() {
        return max_value_centre(stack, voxels);
    }
    let dims = stack.dims();
    let data = stack.data();

    let mut x0 = usize::MAX;
    let mut x1 = 0usize;
    let mut y0 = usize::MAX;
    let mut y1 = 0usize;
    for &i in above_saddle {
        let (x, y, _) = dims.coords(i as usize);
        x0 = x0.min(x);
        x1 = x1.max(x);
        y0 = y0.min(y);
        y1 = y1.max(y);
    }
    let bw = x1 - x0 + 1;
    let bh = y1 - y0 + 1;
    let mut proj = vec![f64::NEG_INFINITY; bw * bh];
    for &i in above_saddle {
        let (x, y, _) = dims.coords(i as usize);
        let v = data[i as usize].to_f64();
        let cell = &mut proj[(y - y0) * bw + (x - x0)];
        if v > *cell {
            *cell = v;
        }
    }

    let mut rows: Vec<[f64; 3]> = Vec::new();
    for yy in 0..bh {
        for xx in 0..bw {
            let v = proj[yy * bw + xx];
            if v.is_finite() && v > 0.0 {
                rows.push([(x0 + xx) as f64, (y0 + yy) as f64, v]);
            }
        }
    }
    if rows.len() < 5 {
        return max_value_centre(stack, voxels);
    }

    let mut a = DMatrix::<f64>::zeros(rows.len(), 4);
    let mut b = DVector::<f64>::zeros(rows.len());
    for (r, row) in rows.iter().enumerate() {
        let [x, y, v] = *row;
        a[(r, 0)] = v;
        a[(r, 1)] = v * x;
        a[(r, 2)] = v * y;
        a[(r, 3)] = v * (x * x + y * y);
        b[r] = v * v.ln();
    }
    let svd = a.svd(true, true);
    let sol = match svd.solve(&b, 1e-12) {
        Ok(s) => s,
        Err(_) => return max_value_centre(stack, voxels),
    };
    let c3 = sol[3];
    if !(c3 < 0.0) {
        return max_value_centre(stack, voxels);
    }
    let cx = -sol[1] / (2.0 * c3);
    let cy = -sol[2] / (2.0 * c3);
    if !cx.is_finite()
        || !cy.is_finite()
        || cx < x0 as f64
        || cx > x1 as f64
        || cy < y0 as f64
        || cy > y1 as f64
    {
        return max_value_centre(stack, voxels);
    }

    let mut w_sum = 0.0f64;
    let mut z_acc = 0.0f64;
    for &i in above_saddle {
        let v = data[i as usize].to_f64();
        if v > 0.0 {
            let (_, _, z) = dims.coords(i as usize);
            w_sum += v;
            z_acc += v * z as f64;
        }
    }
    let cz = if w_sum > 0.0 {
        z_acc / w_sum
    } else {
        dims.coords(max_voxel(stack, voxels)).2 as f64
    };
    [cx, cy, cz]
}
