use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use expand_core::{
    DistributionPolicy, ExecutionResult, ExpandError, Executor, RedistributeAction,
    RedistributeCommand, Session, Topology,
};

use crate::storage::{catalog_error, Storage};
use crate::topology::ClusterTopology;

/// Runs data-movement commands against the local catalog.
pub struct LocalExecutor {
    storage: Arc<Storage>,
    topology: Arc<ClusterTopology>,
    max_sessions: usize,
    open_sessions: Arc<AtomicUsize>,
}

impl LocalExecutor {
    pub fn new(storage: Arc<Storage>, topology: Arc<ClusterTopology>, max_sessions: usize) -> Self {
        Self {
            storage,
            topology,
            max_sessions,
            open_sessions: Default::default(),
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

impl Executor for LocalExecutor {
    fn open(&self) -> expand_core::Result<Box<dyn Session>> {
        let max_sessions = self.max_sessions;
        self.open_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < max_sessions {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .map_err(|_| {
                ExpandError::ConnectionError(format!(
                    "too many execution sessions, limit is {}",
                    max_sessions
                ))
            })?;

        Ok(Box::new(LocalSession {
            storage: self.storage.clone(),
            topology: self.topology.clone(),
            open_sessions: self.open_sessions.clone(),
            closed: false,
        }))
    }
}

struct LocalSession {
    storage: Arc<Storage>,
    topology: Arc<ClusterTopology>,
    open_sessions: Arc<AtomicUsize>,
    closed: bool,
}

impl Session for LocalSession {
    fn execute(
        &mut self,
        command: &RedistributeCommand,
    ) -> expand_core::Result<ExecutionResult> {
        if self.closed {
            return Err(ExpandError::ConnectionError(
                "session is closed".to_string(),
            ));
        }
        tracing::debug!(command = %command, "execute");

        if !self
            .storage
            .relation_exists(command.partition)
            .map_err(catalog_error)?
        {
            return Err(ExpandError::CommandExecutionError {
                partition: command.display_name.clone(),
                cause: "relation does not exist".to_string(),
            });
        }

        let segment_count = self.topology.current_segment_count()?;
        let policy = match &command.action {
            RedistributeAction::SetDistributedBy { keys } => {
                DistributionPolicy::hash(keys.clone(), segment_count)
            }
            RedistributeAction::Reshuffle => DistributionPolicy::random(segment_count),
        };
        self.storage
            .set_policy(command.partition, &policy)
            .map_err(|err| ExpandError::CommandExecutionError {
                partition: command.display_name.clone(),
                cause: format!("{:#}", err),
            })?;
        Ok(ExecutionResult::Utility)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
