use std::fmt::{self, Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// How the rows of a table are assigned to segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionPolicy {
    Random { num_segments: u32 },
    Hash { keys: Vec<String>, num_segments: u32 },
    Replicated { num_segments: u32 },
}

impl DistributionPolicy {
    pub fn random(num_segments: u32) -> Self {
        DistributionPolicy::Random { num_segments }
    }

    pub fn hash<I, S>(keys: I, num_segments: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DistributionPolicy::Hash {
            keys: keys.into_iter().map(Into::into).collect(),
            num_segments,
        }
    }

    pub fn replicated(num_segments: u32) -> Self {
        DistributionPolicy::Replicated { num_segments }
    }

    pub fn num_segments(&self) -> u32 {
        match self {
            DistributionPolicy::Random { num_segments }
            | DistributionPolicy::Hash { num_segments, .. }
            | DistributionPolicy::Replicated { num_segments } => *num_segments,
        }
    }

    pub fn set_num_segments(&mut self, value: u32) {
        match self {
            DistributionPolicy::Random { num_segments }
            | DistributionPolicy::Hash { num_segments, .. }
            | DistributionPolicy::Replicated { num_segments } => *num_segments = value,
        }
    }

    pub fn with_num_segments(mut self, num_segments: u32) -> Self {
        self.set_num_segments(num_segments);
        self
    }

    /// Returns `true` if rows are spread across segments, either by hash or randomly.
    pub fn is_partitioned(&self) -> bool {
        matches!(
            self,
            DistributionPolicy::Random { .. } | DistributionPolicy::Hash { .. }
        )
    }

    pub fn is_hash(&self) -> bool {
        matches!(self, DistributionPolicy::Hash { .. })
    }

    pub fn hash_keys(&self) -> Option<&[String]> {
        match self {
            DistributionPolicy::Hash { keys, .. } => Some(keys),
            _ => None,
        }
    }

    /// A policy whose segment count lags behind the cluster is pending expansion.
    pub fn is_expanded(&self, segment_count: u32) -> bool {
        self.num_segments() == segment_count
    }
}

impl Display for DistributionPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DistributionPolicy::Random { .. } => write!(f, "DISTRIBUTED RANDOMLY"),
            DistributionPolicy::Hash { keys, .. } => {
                write!(f, "DISTRIBUTED BY ({})", keys.iter().join(", "))
            }
            DistributionPolicy::Replicated { .. } => write!(f, "DISTRIBUTED REPLICATED"),
        }
    }
}
