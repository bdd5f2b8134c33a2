use crate::error::{ExpandError, Result};

/// Discovers how many segments the cluster currently has.
pub trait Topology: Send + Sync {
    fn current_segment_count(&self) -> Result<u32>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FixedTopology(pub u32);

impl Topology for FixedTopology {
    fn current_segment_count(&self) -> Result<u32> {
        if self.0 == 0 {
            return Err(ExpandError::UnexpectedCatalogState(
                "cluster reports zero segments".to_string(),
            ));
        }
        Ok(self.0)
    }
}
