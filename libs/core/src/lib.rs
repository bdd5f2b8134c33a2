mod catalog;
mod command;
mod error;
mod hierarchy;
mod lock;
mod policy;
mod prepare;
mod redistribute;
mod session;
mod topology;

#[cfg(test)]
mod test_harness;

pub use catalog::Catalog;
pub use command::{RedistributeAction, RedistributeCommand};
pub use error::{ExpandError, Result};
pub use hierarchy::{PartitionHierarchy, PartitionKind, PartitionNode, RelationId};
pub use lock::{LockGuard, LockManager, LockMode, LockOwner, LockTable};
pub use policy::DistributionPolicy;
pub use prepare::{PrepareOptions, PrepareReport, Preparer};
pub use redistribute::{
    status_code, Redistributed, RedistributionFailure, RedistributionOutcome, Redistributor,
};
pub use session::{ExecutionResult, Executor, ScopedSession, Session};
pub use topology::{FixedTopology, Topology};
