mod config;
mod driver;
mod executor;
mod output;
mod service;
mod sql;
mod storage;
mod topology;

pub use config::ExpandConfig;
pub use driver::{ExpandDriver, ExpandReport, PartitionReport, PartitionStatus};
pub use executor::LocalExecutor;
pub use output::Output;
pub use service::Service;
pub use storage::{RelationDefinition, Storage};
pub use topology::ClusterTopology;
