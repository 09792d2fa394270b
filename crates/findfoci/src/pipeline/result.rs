use crate::engine::FociResult;
use crate::stack::ImageStack;
use crate::stats::StackStats;

/// Full output of one pipeline run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FindFociOutput {
    /// Surviving peaks in final rank order; ids are 1-based ranks.
    pub results: Vec<FociResult>,
    /// Statistics of the analysed region with the resolved background.
    pub stats: StackStats,
    /// Label mask, when a mask mode is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<ImageStack<u16>>,
    /// Mask object count, when object analysis ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_objects: Option<u32>,
}

impl FindFociOutput {
    /// Number of surviving peaks.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True when no peak survived.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
