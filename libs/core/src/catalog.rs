use crate::error::Result;
use crate::hierarchy::{PartitionHierarchy, RelationId};
use crate::policy::DistributionPolicy;

/// The relational catalog that owns distribution policies and the
/// partition-inheritance tree.
pub trait Catalog: Send + Sync {
    fn fetch_policy(&self, relation: RelationId) -> Result<DistributionPolicy>;

    /// Writes the policy of one relation atomically.
    fn replace_policy(&self, relation: RelationId, policy: &DistributionPolicy) -> Result<()>;

    /// Every table below `root`, root excluded, in discovery order.
    fn fetch_hierarchy(&self, root: RelationId) -> Result<PartitionHierarchy>;

    fn resolve_display_name(&self, relation: RelationId) -> Result<String>;

    /// Renders the `DISTRIBUTED ...` clause of a relation.
    fn fetch_distribution_clause(&self, relation: RelationId) -> Result<String> {
        Ok(self.fetch_policy(relation)?.to_string())
    }
}
