use std::sync::Arc;

use anyhow::Result;
use expand_core::{
    status_code, Catalog, LockManager, LockMode, LockOwner, LockTable, PrepareOptions,
    PrepareReport, Preparer, RedistributionFailure, RedistributionOutcome, Redistributor,
    RelationId, Topology,
};
use itertools::Itertools;

use crate::config::ExpandConfig;
use crate::driver::{ExpandDriver, ExpandReport};
use crate::executor::LocalExecutor;
use crate::output::Output;
use crate::sql::{
    Stmt, StmtCreatePartition, StmtCreateTable, StmtDropTable, StmtExpand, StmtPrepare,
    StmtRedistribute, StmtSetSegments, StmtShow,
};
use crate::storage::{RelationDefinition, Storage};
use crate::topology::ClusterTopology;

struct ServiceInner {
    config: ExpandConfig,
    storage: Arc<Storage>,
    topology: Arc<ClusterTopology>,
    executor: LocalExecutor,
    locks: LockTable,
}

#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    pub fn open(config: ExpandConfig) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(Storage::open(&config.data_dir)?);
        let topology = Arc::new(ClusterTopology::new(storage.clone(), config.segment_count));
        let executor = LocalExecutor::new(storage.clone(), topology.clone(), config.max_sessions);

        tracing::info!(data_dir = %config.data_dir.display(), "catalog opened");
        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                storage,
                topology,
                executor,
                locks: LockTable::new(),
            }),
        })
    }

    pub fn config(&self) -> &ExpandConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn locks(&self) -> &LockTable {
        &self.inner.locks
    }

    pub fn resolve(&self, name: &str) -> Result<RelationDefinition> {
        self.inner
            .storage
            .relation_by_name(name)?
            .ok_or_else(|| anyhow::anyhow!("relation '{}' does not exist", name))
    }

    fn display_name(&self, id: RelationId) -> String {
        match self.inner.storage.get_relation(id) {
            Ok(Some(relation)) => relation.name,
            _ => id.to_string(),
        }
    }

    /// Rewrites the catalog policies of `root` and its partitions for the
    /// current segment count. Every lock taken is released when the call
    /// returns.
    pub async fn prepare_report(&self, root: RelationId) -> Result<PrepareReport> {
        let inner = self.inner.clone();
        let report = tokio::task::spawn_blocking(move || {
            let locks = inner.locks.owner();
            let report = Preparer::new(&*inner.storage, &locks, &*inner.topology)
                .with_options(PrepareOptions {
                    release_early_locks: inner.config.release_early_locks,
                })
                .prepare(root);
            report
        })
        .await??;
        Ok(report)
    }

    pub async fn prepare(&self, root: RelationId) -> Result<i32> {
        Ok(self.prepare_report(root).await?.status_code())
    }

    pub async fn redistribute_outcome(
        &self,
        root: RelationId,
        partition: RelationId,
    ) -> RedistributionOutcome {
        let inner = self.inner.clone();
        let res = tokio::task::spawn_blocking(move || {
            let locks = inner.locks.owner();
            let outcome = Redistributor::new(&*inner.storage, &locks, &inner.executor)
                .redistribute(root, partition);
            outcome
        })
        .await;

        match res {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    root = %root,
                    partition = %partition,
                    error = %err,
                    "redistribute task aborted"
                );
                Err(RedistributionFailure {
                    partition,
                    code: 3,
                    message: format!("redistribute task aborted: {}", err),
                })
            }
        }
    }

    /// `0` on success, non-zero otherwise. Never fails.
    pub async fn redistribute(&self, root: RelationId, partition: RelationId) -> i32 {
        status_code(&self.redistribute_outcome(root, partition).await)
    }

    /// Partitions that hold rows: the leaves of `root`, or `root` itself when
    /// it has no partitions.
    pub fn leaf_partitions(&self, root: RelationId) -> Result<Vec<RelationId>> {
        let hierarchy = self.inner.storage.fetch_hierarchy(root)?;
        let leaves = hierarchy.leaves().map(|node| node.id).collect_vec();
        if leaves.is_empty() && hierarchy.is_empty() {
            Ok(vec![root])
        } else {
            Ok(leaves)
        }
    }

    pub async fn expand(&self, root: RelationId) -> Result<ExpandReport> {
        ExpandDriver::new(self.clone()).run(root).await
    }

    pub async fn execute(&self, sql: &str) -> Result<Output> {
        let (_, stmt) = crate::sql::stmt(sql).map_err(|err| anyhow::anyhow!("{}", err))?;

        match stmt {
            Stmt::CreateTable(stmt) => self.execute_create_table(stmt),
            Stmt::CreatePartition(stmt) => self.execute_create_partition(stmt),
            Stmt::DropTable(stmt) => self.execute_drop_table(stmt),
            Stmt::SetSegments(stmt) => self.execute_set_segments(stmt),
            Stmt::Prepare(stmt) => self.execute_prepare(stmt).await,
            Stmt::Redistribute(stmt) => self.execute_redistribute(stmt).await,
            Stmt::Expand(stmt) => self.execute_expand(stmt).await,
            Stmt::Show(stmt) => self.execute_show(stmt),
        }
    }

    fn execute_create_table(&self, stmt: StmtCreateTable) -> Result<Output> {
        let segment_count = self.inner.topology.current_segment_count()?;
        self.inner.storage.create_relation(
            &stmt.name,
            None,
            stmt.partitioned,
            stmt.policy.into_policy(segment_count),
        )?;
        Ok(Output::action("Create Table", true))
    }

    /// Locks `name` exclusively for the rest of the statement and returns its
    /// definition as read under the lock.
    fn lock_relation(&self, locks: &LockOwner, name: &str) -> Result<RelationDefinition> {
        let id = self.resolve(name)?.id;
        locks.acquire(id, LockMode::Exclusive)?;
        self.inner
            .storage
            .get_relation(id)?
            .ok_or_else(|| anyhow::anyhow!("relation '{}' does not exist", name))
    }

    fn execute_create_partition(&self, stmt: StmtCreatePartition) -> Result<Output> {
        let locks = self.inner.locks.owner();
        let parent = self.lock_relation(&locks, &stmt.parent)?;
        self.inner.storage.create_relation(
            &stmt.name,
            Some(parent.id),
            stmt.partitioned,
            parent.policy,
        )?;
        Ok(Output::action("Create Partition", true))
    }

    fn execute_drop_table(&self, stmt: StmtDropTable) -> Result<Output> {
        let locks = self.inner.locks.owner();
        let relation = self.lock_relation(&locks, &stmt.name)?;
        if let Some(parent) = relation.parent {
            locks.acquire(parent, LockMode::Exclusive)?;
        }
        self.inner.storage.drop_relation(relation.id)?;
        Ok(Output::action("Drop Table", true))
    }

    fn execute_set_segments(&self, stmt: StmtSetSegments) -> Result<Output> {
        self.inner.storage.set_segment_count(stmt.segment_count)?;
        if let Some(pinned) = self.inner.config.segment_count {
            tracing::warn!(
                pinned = pinned,
                recorded = stmt.segment_count,
                "segment count is pinned by configuration, recorded value is ignored"
            );
        }
        Ok(Output::action("Set Segments", true))
    }

    async fn execute_prepare(&self, stmt: StmtPrepare) -> Result<Output> {
        let root = self.resolve(&stmt.root)?;
        let report = self.prepare_report(root.id).await?;

        let mut output = Output::new(vec!["relation", "result", "policy"]);
        let rows = report
            .rewritten
            .iter()
            .map(|id| (*id, "rewritten"))
            .chain(report.skipped.iter().map(|id| (*id, "skipped")))
            .chain(std::iter::once((
                root.id,
                if report.root_rewritten {
                    "rewritten"
                } else {
                    "skipped"
                },
            )));
        for (id, result) in rows {
            let policy = self.inner.storage.fetch_policy(id)?;
            output.push_row(vec![
                self.display_name(id),
                result.to_string(),
                format!("{} ({} segments)", policy, policy.num_segments()),
            ]);
        }
        Ok(output)
    }

    async fn execute_redistribute(&self, stmt: StmtRedistribute) -> Result<Output> {
        let root = self.resolve(&stmt.root)?;
        let partition = self.resolve(&stmt.partition)?;
        let outcome = self.redistribute_outcome(root.id, partition.id).await;

        let mut output = Output::new(vec!["partition", "status", "message"]);
        output.push_row(vec![
            partition.name,
            status_code(&outcome).to_string(),
            match outcome {
                Ok(redistributed) => redistributed.command.to_string(),
                Err(failure) => failure.message,
            },
        ]);
        Ok(output)
    }

    async fn execute_expand(&self, stmt: StmtExpand) -> Result<Output> {
        let root = self.resolve(&stmt.root)?;
        let report = self.expand(root.id).await?;

        let mut output = Output::new(vec!["partition", "status", "attempts"]);
        for partition in &report.partitions {
            output.push_row(vec![
                self.display_name(partition.partition),
                partition.status.to_string(),
                partition.attempts.to_string(),
            ]);
        }
        Ok(output)
    }

    fn execute_show(&self, stmt: StmtShow) -> Result<Output> {
        let root = self.resolve(&stmt.root)?;
        let hierarchy = self.inner.storage.fetch_hierarchy(root.id)?;

        let mut output = Output::new(vec!["relation", "kind", "parent", "policy", "segments"]);
        output.push_row(vec![
            root.name.clone(),
            "root".to_string(),
            String::new(),
            root.policy.to_string(),
            root.policy.num_segments().to_string(),
        ]);
        for node in hierarchy.descendants() {
            let policy = self.inner.storage.fetch_policy(node.id)?;
            output.push_row(vec![
                self.display_name(node.id),
                node.kind.to_string(),
                self.display_name(node.parent),
                policy.to_string(),
                policy.num_segments().to_string(),
            ]);
        }
        Ok(output)
    }
}
