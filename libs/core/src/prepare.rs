use crate::catalog::Catalog;
use crate::error::{ExpandError, Result};
use crate::hierarchy::{PartitionKind, PartitionNode, RelationId};
use crate::lock::{LockManager, LockMode};
use crate::policy::DistributionPolicy;
use crate::topology::Topology;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Release locks on skipped partitions and rewritten internal partitions
    /// as soon as their policy is written. Only safe when the caller knows no
    /// second expansion can run concurrently.
    pub release_early_locks: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareReport {
    pub root: RelationId,
    pub segment_count: u32,
    pub rewritten: Vec<RelationId>,
    pub skipped: Vec<RelationId>,
    pub released: Vec<RelationId>,
    pub root_rewritten: bool,
}

impl PrepareReport {
    fn new(root: RelationId, segment_count: u32) -> Self {
        Self {
            root,
            segment_count,
            rewritten: Vec::new(),
            skipped: Vec::new(),
            released: Vec::new(),
            root_rewritten: false,
        }
    }

    /// `true` if nothing had to be written.
    pub fn is_noop(&self) -> bool {
        self.rewritten.is_empty() && !self.root_rewritten
    }

    pub fn status_code(&self) -> i32 {
        0
    }
}

/// Rewrites the distribution policies of a partition hierarchy for a new
/// segment count.
///
/// Descendants are processed first and the root last, so an interrupted run
/// leaves the root still pending and a re-run only touches the nodes that are
/// not yet correct.
pub struct Preparer<'a> {
    catalog: &'a dyn Catalog,
    locks: &'a dyn LockManager,
    topology: &'a dyn Topology,
    options: PrepareOptions,
}

impl<'a> Preparer<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        locks: &'a dyn LockManager,
        topology: &'a dyn Topology,
    ) -> Self {
        Self {
            catalog,
            locks,
            topology,
            options: PrepareOptions::default(),
        }
    }

    pub fn with_options(self, options: PrepareOptions) -> Self {
        Self { options, ..self }
    }

    /// Locks held at return are left to the caller's transaction.
    pub fn prepare(&self, root: RelationId) -> Result<PrepareReport> {
        self.locks.acquire(root, LockMode::Exclusive)?;
        let root_policy = self.catalog.fetch_policy(root)?;
        if !root_policy.is_partitioned() {
            return Err(ExpandError::PolicyNotPartitioned {
                relation: root,
                policy: root_policy.to_string(),
            });
        }

        let hierarchy = self.catalog.fetch_hierarchy(root)?;
        if hierarchy.root() != root {
            return Err(ExpandError::UnexpectedCatalogState(format!(
                "requested hierarchy of {}, got {}",
                root,
                hierarchy.root()
            )));
        }
        hierarchy.validate()?;
        for node in hierarchy.descendants() {
            self.locks.acquire(node.id, LockMode::Exclusive)?;
        }

        let segment_count = self.topology.current_segment_count()?;
        if segment_count == 0 {
            return Err(ExpandError::UnexpectedCatalogState(
                "cluster reports zero segments".to_string(),
            ));
        }

        let mut report = PrepareReport::new(root, segment_count);
        for node in hierarchy.descendants() {
            self.prepare_partition(node, segment_count, &mut report)?;
        }

        let mut root_policy = self.catalog.fetch_policy(root)?;
        if !root_policy.is_expanded(segment_count) {
            root_policy.set_num_segments(segment_count);
            self.catalog.replace_policy(root, &root_policy)?;
            report.root_rewritten = true;
        }

        tracing::info!(
            root = %root,
            segments = segment_count,
            rewritten = report.rewritten.len(),
            skipped = report.skipped.len(),
            root_rewritten = report.root_rewritten,
            "partition hierarchy prepared for expansion"
        );
        Ok(report)
    }

    fn prepare_partition(
        &self,
        node: &PartitionNode,
        segment_count: u32,
        report: &mut PrepareReport,
    ) -> Result<()> {
        let current = self.catalog.fetch_policy(node.id)?;

        match expanded_policy(node.kind, &current, segment_count) {
            Some(policy) => {
                tracing::debug!(
                    partition = %node.id,
                    kind = %node.kind,
                    from = %current,
                    to = %policy,
                    segments = segment_count,
                    "rewrite partition policy"
                );
                self.catalog.replace_policy(node.id, &policy)?;
                report.rewritten.push(node.id);

                // Leaves keep their lock until their rows have been moved.
                if node.kind == PartitionKind::Internal && self.options.release_early_locks {
                    self.release(node.id, report);
                }
            }
            None => {
                tracing::debug!(partition = %node.id, kind = %node.kind, "partition already expanded");
                report.skipped.push(node.id);
                if self.options.release_early_locks {
                    self.release(node.id, report);
                }
            }
        }
        Ok(())
    }

    fn release(&self, relation: RelationId, report: &mut PrepareReport) {
        self.locks.release(relation, LockMode::Exclusive);
        report.released.push(relation);
    }
}

/// The policy a partition must carry after expansion, or `None` if it already does.
fn expanded_policy(
    kind: PartitionKind,
    current: &DistributionPolicy,
    segment_count: u32,
) -> Option<DistributionPolicy> {
    match kind {
        PartitionKind::Leaf if current.is_expanded(segment_count) && !current.is_hash() => None,
        PartitionKind::Leaf => Some(DistributionPolicy::random(segment_count)),
        PartitionKind::Internal if current.is_expanded(segment_count) => None,
        PartitionKind::Internal => Some(current.clone().with_num_segments(segment_count)),
    }
}
