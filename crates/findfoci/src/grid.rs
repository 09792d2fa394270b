//! Voxel neighbourhood iteration.

use crate::stack::StackDims;

/// Neighbourhood used for maxima detection, region growth, and labelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Face-adjacent neighbours only: 4 in 2D, 6 in 3D.
    Face,
    /// Full neighbourhood including diagonals: 8 in 2D, 26 in 3D.
    #[default]
    Full,
}

impl Connectivity {
    /// Neighbour count for the given dimensionality.
    pub fn degree(self, is_2d: bool) -> usize {
        match (self, is_2d) {
            (Self::Face, true) => 4,
            (Self::Full, true) => 8,
            (Self::Face, false) => 6,
            (Self::Full, false) => 26,
        }
    }
}

/// Precomputed neighbour offsets for one stack shape.
///
/// Offsets carry both the coordinate delta (for border tests) and the flat
/// delta (for the interior fast path).
pub(crate) struct Neighbourhood {
    dims: StackDims,
    deltas: Vec<(i32, i32, i32, isize)>,
}

impl Neighbourhood {
    pub(crate) fn new(connectivity: Connectivity, dims: StackDims) -> Self {
        let zs: &[i32] = if dims.is_2d() { &[0] } else { &[-1, 0, 1] };
        let mut deltas = Vec::with_capacity(connectivity.degree(dims.is_2d()));
        for &dz in zs {
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    if connectivity == Connectivity::Face && dx.abs() + dy.abs() + dz.abs() != 1 {
                        continue;
                    }
                    let flat = dz as isize * (dims.width * dims.height) as isize
                        + dy as isize * dims.width as isize
                        + dx as isize;
                    deltas.push((dx, dy, dz, flat));
                }
            }
        }
        Self { dims, deltas }
    }

    /// True when (x, y, z) has all neighbours in bounds.
    #[inline]
    fn is_interior(&self, x: usize, y: usize, z: usize) -> bool {
        let d = self.dims;
        x > 0
            && x + 1 < d.width
            && y > 0
            && y + 1 < d.height
            && (d.is_2d() || (z > 0 && z + 1 < d.depth))
    }

    /// Visit the flat index of every in-bounds neighbour of (x, y, z).
    #[inline]
    pub(crate) fn for_each<F: FnMut(usize)>(&self, x: usize, y: usize, z: usize, mut visit: F) {
        let idx = self.dims.index(x, y, z) as isize;
        if self.is_interior(x, y, z) {
            for &(_, _, _, flat) in &self.deltas {
                visit((idx + flat) as usize);
            }
            return;
        }
        for &(dx, dy, dz, flat) in &self.deltas {
            let nx = x as i32 + dx;
            let ny = y as i32 + dy;
            let nz = z as i32 + dz;
            if nx < 0
                || ny < 0
                || nz < 0
                || nx as usize >= self.dims.width
                || ny as usize >= self.dims.height
                || nz as usize >= self.dims.depth
            {
                continue;
            }
            visit((idx + flat) as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(n: &Neighbourhood, x: usize, y: usize, z: usize) -> Vec<usize> {
        let mut out = Vec::new();
        n.for_each(x, y, z, |idx| out.push(idx));
        out.sort_unstable();
        out
    }

    #[test]
    fn degree_matches_connectivity() {
        assert_eq!(Connectivity::Face.degree(true), 4);
        assert_eq!(Connectivity::Full.degree(true), 8);
        assert_eq!(Connectivity::Face.degree(false), 6);
        assert_eq!(Connectivity::Full.degree(false), 26);
    }

    #[test]
    fn interior_voxel_sees_full_neighbourhood() {
        let dims = StackDims::new(4, 4, 4);
        let n = Neighbourhood::new(Connectivity::Full, dims);
        assert_eq!(collect(&n, 1, 1, 1).len(), 26);
        let n = Neighbourhood::new(Connectivity::Face, dims);
        assert_eq!(collect(&n, 2, 2, 2).len(), 6);
    }

    #[test]
    fn corner_voxel_is_border_clipped() {
        let dims = StackDims::single(3, 3);
        let n = Neighbourhood::new(Connectivity::Full, dims);
        assert_eq!(collect(&n, 0, 0, 0), vec![1, 3, 4]);
        let n = Neighbourhood::new(Connectivity::Face, dims);
        assert_eq!(collect(&n, 2, 2, 0), vec![5, 7]);
    }

    #[test]
    fn single_row_stack_has_linear_neighbours() {
        let dims = StackDims::single(8, 1);
        let n = Neighbourhood::new(Connectivity::Full, dims);
        assert_eq!(collect(&n, 0, 0, 0), vec![1]);
        assert_eq!(collect(&n, 3, 0, 0), vec![2, 4]);
        assert_eq!(collect(&n, 7, 0, 0), vec![6]);
    }
}
