use thiserror::Error;

use crate::hierarchy::RelationId;
use crate::lock::LockMode;

pub type Result<T, E = ExpandError> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    #[error("could not obtain {requested} lock on relation {relation}, {held} lock is held by another operation")]
    LockConflict {
        relation: RelationId,
        requested: LockMode,
        held: LockMode,
    },

    #[error("relation {relation} is not partitioned by hash or randomly: {policy}")]
    PolicyNotPartitioned {
        relation: RelationId,
        policy: String,
    },

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("redistribute partition {partition} failed: {cause}")]
    CommandExecutionError { partition: String, cause: String },

    #[error("unexpected catalog state: {0}")]
    UnexpectedCatalogState(String),
}

impl ExpandError {
    /// Non-zero status reported to callers that only see an integer.
    pub fn status_code(&self) -> i32 {
        match self {
            ExpandError::ConnectionError(_) => 1,
            ExpandError::CommandExecutionError { .. } => 2,
            _ => 3,
        }
    }
}
