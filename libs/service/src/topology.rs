use std::sync::Arc;

use expand_core::{ExpandError, Topology};

use crate::storage::{catalog_error, Storage};

/// Segment count recorded in the catalog, unless the configuration pins one.
pub struct ClusterTopology {
    storage: Arc<Storage>,
    segment_count: Option<u32>,
}

impl ClusterTopology {
    pub fn new(storage: Arc<Storage>, segment_count: Option<u32>) -> Self {
        Self {
            storage,
            segment_count,
        }
    }
}

impl Topology for ClusterTopology {
    fn current_segment_count(&self) -> expand_core::Result<u32> {
        let segment_count = match self.segment_count {
            Some(segment_count) => Some(segment_count),
            None => self.storage.segment_count().map_err(catalog_error)?,
        };
        match segment_count {
            Some(segment_count) if segment_count > 0 => Ok(segment_count),
            _ => Err(ExpandError::UnexpectedCatalogState(
                "cluster segment count is not configured".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_segment_count() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());

        let topology = ClusterTopology::new(storage.clone(), None);
        assert!(topology.current_segment_count().is_err());

        storage.set_segment_count(6).unwrap();
        assert_eq!(topology.current_segment_count().unwrap(), 6);

        let pinned = ClusterTopology::new(storage, Some(12));
        assert_eq!(pinned.current_segment_count().unwrap(), 12);
    }
}
