//! Connected-component labelling of the inclusion mask.

use crate::grid::{Connectivity, Neighbourhood};
use crate::stack::{ImageStack, StackDims};

pub(crate) struct ObjectLabels {
    /// Object id per voxel, 0 outside every object.
    pub labels: Vec<u32>,
    pub count: u32,
}

/// Label mask components: voxels join an object when adjacent, nonzero and
/// of equal mask value. Without a mask the whole stack is one object.
pub(crate) fn label_objects(
    mask: Option<&ImageStack<u8>>,
    dims: StackDims,
    connectivity: Connectivity,
) -> ObjectLabels {
    let m = match mask {
        Some(m) => m,
        None => {
            return ObjectLabels {
                labels: vec![1; dims.len()],
                count: 1,
            }
        }
    };

    let data = m.data();
    let nh = Neighbourhood::new(connectivity, dims);
    let mut labels = vec![0u32; data.len()];
    let mut count = 0u32;
    let mut queue: Vec<u32> = Vec::new();

    for start in 0..data.len() {
        if data[start] == 0 || labels[start] != 0 {
            continue;
        }
        count += 1;
        let value = data[start];
        labels[start] = count;
        queue.clear();
        queue.push(start as u32);
        let mut qi = 0usize;
        while qi < queue.len() {
            let idx = queue[qi] as usize;
            qi += 1;
            let (x, y, z) = dims.coords(idx);
            nh.for_each(x, y, z, |nidx| {
                if labels[nidx] == 0 && data[nidx] == value {
                    labels[nidx] = count;
                    queue.push(nidx as u32);
                }
            });
        }
    }
    ObjectLabels { labels, count }
}
