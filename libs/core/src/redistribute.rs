use thiserror::Error;

use crate::catalog::Catalog;
use crate::command::RedistributeCommand;
use crate::error::{ExpandError, Result};
use crate::hierarchy::RelationId;
use crate::lock::{LockGuard, LockManager, LockMode};
use crate::policy::DistributionPolicy;
use crate::session::{ExecutionResult, Executor, ScopedSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redistributed {
    pub partition: RelationId,
    pub command: RedistributeCommand,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RedistributionFailure {
    pub partition: RelationId,
    pub code: i32,
    pub message: String,
}

impl From<(RelationId, ExpandError)> for RedistributionFailure {
    fn from((partition, err): (RelationId, ExpandError)) -> Self {
        Self {
            partition,
            code: err.status_code(),
            message: err.to_string(),
        }
    }
}

pub type RedistributionOutcome = std::result::Result<Redistributed, RedistributionFailure>;

/// `0` on success, the failure's non-zero code otherwise.
pub fn status_code(outcome: &RedistributionOutcome) -> i32 {
    match outcome {
        Ok(_) => 0,
        Err(failure) => failure.code,
    }
}

/// Moves the rows of one partition so they match the root's distribution.
///
/// Failures never escape: they are logged and handed back as a
/// [`RedistributionFailure`], so one bad partition does not stop a driver
/// working through the rest of the hierarchy.
pub struct Redistributor<'a> {
    catalog: &'a dyn Catalog,
    locks: &'a dyn LockManager,
    executor: &'a dyn Executor,
}

impl<'a> Redistributor<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        locks: &'a dyn LockManager,
        executor: &'a dyn Executor,
    ) -> Self {
        Self {
            catalog,
            locks,
            executor,
        }
    }

    pub fn redistribute(&self, root: RelationId, partition: RelationId) -> RedistributionOutcome {
        match self.try_redistribute(root, partition) {
            Ok(command) => {
                tracing::info!(root = %root, partition = %command.display_name, "partition redistributed");
                Ok(Redistributed { partition, command })
            }
            Err(err) => {
                tracing::error!(
                    root = %root,
                    partition = %partition,
                    error = %err,
                    "failed to redistribute partition"
                );
                Err((partition, err).into())
            }
        }
    }

    fn try_redistribute(
        &self,
        root: RelationId,
        partition: RelationId,
    ) -> Result<RedistributeCommand> {
        let mut session = ScopedSession::open(self.executor)?;
        let _root_lock = LockGuard::acquire(self.locks, root, LockMode::Shared)?;

        let root_policy = self.catalog.fetch_policy(root)?;
        let display_name = self.catalog.resolve_display_name(partition)?;

        let command = match root_policy {
            DistributionPolicy::Hash { keys, .. } => {
                let clause = self.catalog.fetch_distribution_clause(root)?;
                tracing::debug!(root = %root, clause = %clause, "reapply root distribution key");
                RedistributeCommand::set_distributed_by(partition, display_name, keys)
            }
            DistributionPolicy::Random { .. } => {
                RedistributeCommand::reshuffle(partition, display_name)
            }
            policy => {
                return Err(ExpandError::PolicyNotPartitioned {
                    relation: root,
                    policy: policy.to_string(),
                })
            }
        };

        match session.execute(&command)? {
            ExecutionResult::Utility => Ok(command),
            result => Err(ExpandError::CommandExecutionError {
                partition: command.display_name,
                cause: format!("unexpected {}", result),
            }),
        }
    }
}
