//! Per-voxel state flags and the peak result record.

/// Seed of a peak (single maximum or plateau representative).
pub(crate) const FLAG_MAXIMUM: u8 = 1 << 0;
/// Queued during a plateau/component expansion.
pub(crate) const FLAG_LISTED: u8 = 1 << 1;
/// Visited by the maxima scan.
pub(crate) const FLAG_PROCESSED: u8 = 1 << 2;
/// Member of an examined equal-value plateau.
pub(crate) const FLAG_PLATEAU: u8 = 1 << 3;
/// Contested between peaks at equal steepness; stays unassigned.
pub(crate) const FLAG_SADDLE: u8 = 1 << 4;
/// Lies on an x/y stack border.
pub(crate) const FLAG_EDGE: u8 = 1 << 5;
/// Outside the analysis mask.
pub(crate) const FLAG_EXCLUDED: u8 = 1 << 6;

/// One detected peak.
///
/// Created as a stub during the search stage, accumulated through the merge
/// passes, and finalised (centre, derived statistics, renumbered id) by the
/// result assembler.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FociResult {
    /// Peak id. After assembly this is the 1-based rank-order id; before, the
    /// search-time id.
    pub id: u32,
    /// Seed voxel x coordinate.
    pub x: usize,
    /// Seed voxel y coordinate.
    pub y: usize,
    /// Seed voxel z coordinate.
    pub z: usize,
    /// Voxels in the peak region.
    pub count: usize,
    /// Sum of search-image values over the region.
    pub total_intensity: f64,
    /// Maximum search-image value in the region.
    pub max_value: f64,
    /// Value of the highest saddle, if the peak borders another peak.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_saddle_value: Option<f64>,
    /// Final id of the neighbour across the highest saddle. `None` when the
    /// peak has no saddle or the neighbour was truncated from the results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saddle_neighbour_id: Option<u32>,
    /// Voxels strictly above the highest saddle.
    pub count_above_saddle: usize,
    /// Sum of search-image values over voxels above the highest saddle.
    pub intensity_above_saddle: f64,
    /// Mean region intensity.
    pub average_intensity: f64,
    /// `total_intensity - count * background`.
    pub intensity_above_background: f64,
    /// Reported centre as fractional [x, y, z].
    pub centre: [f64; 3],
    /// Containing mask object, when object analysis ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<u32>,
}

impl FociResult {
    /// Search-stage stub: seed position and maximum only.
    pub(crate) fn stub(id: u32, x: usize, y: usize, z: usize, max_value: f64) -> Self {
        Self {
            id,
            x,
            y,
            z,
            count: 0,
            total_intensity: 0.0,
            max_value,
            highest_saddle_value: None,
            saddle_neighbour_id: None,
            count_above_saddle: 0,
            intensity_above_saddle: 0.0,
            average_intensity: 0.0,
            intensity_above_background: 0.0,
            centre: [x as f64, y as f64, z as f64],
            object_id: None,
        }
    }
}
