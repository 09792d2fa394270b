//! Per-peak saddle bookkeeping.

/// Boundary record towards one neighbouring peak.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Saddle {
    /// Search-time id of the peak across the boundary.
    pub neighbour_id: u32,
    /// Highest pass value between the two peaks.
    pub value: f64,
}

/// Growable saddle list of one peak.
///
/// Invariant after [`SaddleList::remove_duplicates`]: at most one entry per
/// neighbour id, holding the maximum value seen for that pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaddleList {
    entries: Vec<Saddle>,
}

impl SaddleList {
    pub(crate) fn push(&mut self, neighbour_id: u32, value: f64) {
        self.entries.push(Saddle {
            neighbour_id,
            value,
        });
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[Saddle] {
        &self.entries
    }

    /// Append every entry of `other`.
    pub(crate) fn extend_from(&mut self, other: &SaddleList) {
        self.entries.extend_from_slice(&other.entries);
    }

    /// Rewrite neighbour ids through `map`, dropping entries mapped to
    /// `drop_id` (self-references after a merge, deleted peaks).
    pub(crate) fn remap<F: FnMut(u32) -> u32>(&mut self, mut map: F, drop_id: u32) {
        for s in &mut self.entries {
            s.neighbour_id = map(s.neighbour_id);
        }
        self.entries.retain(|s| s.neighbour_id != 0 && s.neighbour_id != drop_id);
    }

    /// Descending by value, ascending neighbour id on ties.
    pub(crate) fn sort_by_value(&mut self) {
        self.entries.sort_by(|a, b| {
            b.value
                .partial_cmp(&a.value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.neighbour_id.cmp(&b.neighbour_id))
        });
    }

    /// Ascending neighbour id.
    #[cfg(test)]
    pub(crate) fn sort_by_id(&mut self) {
        self.entries.sort_by_key(|s| s.neighbour_id);
    }

    /// Collapse to one entry per neighbour id keeping the maximum value.
    /// Leaves the list sorted descending by value.
    pub(crate) fn remove_duplicates(&mut self) {
        self.sort_by_value();
        let mut seen = Vec::with_capacity(self.entries.len());
        self.entries.retain(|s| {
            if seen.contains(&s.neighbour_id) {
                false
            } else {
                seen.push(s.neighbour_id);
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_duplicates_keeps_the_highest_value() {
        let mut list = SaddleList::default();
        list.push(3, 1.0);
        list.push(2, 5.0);
        list.push(3, 4.0);
        list.push(2, 2.0);
        list.remove_duplicates();

        assert_eq!(list.entries().len(), 2);
        assert_eq!(list.entries()[0], Saddle { neighbour_id: 2, value: 5.0 });
        assert_eq!(list.entries()[1], Saddle { neighbour_id: 3, value: 4.0 });
    }

    #[test]
    fn value_sort_breaks_ties_by_id() {
        let mut list = SaddleList::default();
        list.push(9, 2.0);
        list.push(4, 2.0);
        list.sort_by_value();
        assert_eq!(list.entries()[0].neighbour_id, 4);

        list.sort_by_id();
        assert_eq!(list.entries()[0].neighbour_id, 4);
        assert_eq!(list.entries()[1].neighbour_id, 9);
    }

    #[test]
    fn remap_drops_self_and_deleted_references() {
        let mut list = SaddleList::default();
        list.push(1, 3.0);
        list.push(2, 4.0);
        list.push(3, 5.0);
        // 1 resolves to 7 (kept), 2 to the owner (dropped), 3 deleted.
        list.remap(|id| match id {
            1 => 7,
            2 => 4,
            _ => 0,
        }, 4);

        assert_eq!(list.entries().len(), 1);
        assert_eq!(list.entries()[0], Saddle { neighbour_id: 7, value: 3.0 });
    }
}
