use std::fmt::{self, Display, Formatter};

use itertools::Itertools;

use crate::hierarchy::RelationId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedistributeAction {
    /// Re-declare the hash key, so every row is placed again under the new segment count.
    SetDistributedBy { keys: Vec<String> },

    /// Move rows without any key semantics.
    Reshuffle,
}

/// Data-movement command for a single partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedistributeCommand {
    pub partition: RelationId,
    pub display_name: String,
    pub action: RedistributeAction,
}

impl RedistributeCommand {
    pub fn set_distributed_by(
        partition: RelationId,
        display_name: impl Into<String>,
        keys: Vec<String>,
    ) -> Self {
        Self {
            partition,
            display_name: display_name.into(),
            action: RedistributeAction::SetDistributedBy { keys },
        }
    }

    pub fn reshuffle(partition: RelationId, display_name: impl Into<String>) -> Self {
        Self {
            partition,
            display_name: display_name.into(),
            action: RedistributeAction::Reshuffle,
        }
    }
}

impl Display for RedistributeCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.action {
            RedistributeAction::SetDistributedBy { keys } => write!(
                f,
                "ALTER TABLE {} SET DISTRIBUTED BY ({})",
                self.display_name,
                keys.iter().join(", ")
            ),
            RedistributeAction::Reshuffle => {
                write!(f, "ALTER TABLE {} EXPAND TABLE", self.display_name)
            }
        }
    }
}
