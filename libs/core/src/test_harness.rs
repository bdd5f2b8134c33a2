use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    Catalog, DistributionPolicy, ExecutionResult, ExpandError, Executor, PartitionHierarchy,
    PartitionKind, RedistributeAction, RedistributeCommand, RelationId, Result, Session,
};

struct Entry {
    name: String,
    parent: Option<RelationId>,
    partitioned: bool,
    policy: DistributionPolicy,
}

#[derive(Default)]
pub struct MemoryCatalog {
    relations: Mutex<BTreeMap<RelationId, Entry>>,
    writes: AtomicUsize,
    clause_unavailable: AtomicBool,
}

impl MemoryCatalog {
    pub fn add_table(&self, id: u32, name: &str, partitioned: bool, policy: DistributionPolicy) {
        self.relations.lock().insert(
            RelationId(id),
            Entry {
                name: name.to_string(),
                parent: None,
                partitioned,
                policy,
            },
        );
    }

    pub fn add_partition(
        &self,
        id: u32,
        name: &str,
        parent: u32,
        partitioned: bool,
        policy: DistributionPolicy,
    ) {
        self.relations.lock().insert(
            RelationId(id),
            Entry {
                name: name.to_string(),
                parent: Some(RelationId(parent)),
                partitioned,
                policy,
            },
        );
    }

    pub fn policy(&self, id: u32) -> DistributionPolicy {
        self.relations.lock()[&RelationId(id)].policy.clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every later `fetch_distribution_clause` call fail.
    pub fn fail_clause_lookup(&self) {
        self.clause_unavailable.store(true, Ordering::SeqCst);
    }
}

impl Catalog for MemoryCatalog {
    fn fetch_policy(&self, relation: RelationId) -> Result<DistributionPolicy> {
        self.relations
            .lock()
            .get(&relation)
            .map(|entry| entry.policy.clone())
            .ok_or_else(|| {
                ExpandError::UnexpectedCatalogState(format!("relation {} not found", relation))
            })
    }

    fn replace_policy(&self, relation: RelationId, policy: &DistributionPolicy) -> Result<()> {
        let mut relations = self.relations.lock();
        let entry = relations.get_mut(&relation).ok_or_else(|| {
            ExpandError::UnexpectedCatalogState(format!("relation {} not found", relation))
        })?;
        entry.policy = policy.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fetch_hierarchy(&self, root: RelationId) -> Result<PartitionHierarchy> {
        let relations = self.relations.lock();
        let mut hierarchy = PartitionHierarchy::new(root);
        let mut queue = VecDeque::from(vec![root]);

        while let Some(parent) = queue.pop_front() {
            for (id, entry) in relations.iter() {
                if entry.parent == Some(parent) {
                    let kind = if entry.partitioned {
                        PartitionKind::Internal
                    } else {
                        PartitionKind::Leaf
                    };
                    hierarchy.push(*id, parent, kind);
                    queue.push_back(*id);
                }
            }
        }
        Ok(hierarchy)
    }

    fn fetch_distribution_clause(&self, relation: RelationId) -> Result<String> {
        if self.clause_unavailable.load(Ordering::SeqCst) {
            return Err(ExpandError::UnexpectedCatalogState(format!(
                "distribution clause of relation {} is unavailable",
                relation
            )));
        }
        Ok(self.fetch_policy(relation)?.to_string())
    }

    fn resolve_display_name(&self, relation: RelationId) -> Result<String> {
        self.relations
            .lock()
            .get(&relation)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| {
                ExpandError::UnexpectedCatalogState(format!("relation {} not found", relation))
            })
    }
}

pub enum MockFailure {
    Connect,
    Execute(String),
    Result(i32),
}

#[derive(Default)]
struct MockState {
    failures: VecDeque<MockFailure>,
    commands: Vec<RedistributeCommand>,
    opened: usize,
    closed: usize,
}

/// Executes commands by rewriting the partition policy in a [`MemoryCatalog`].
pub struct MockExecutor {
    catalog: Arc<MemoryCatalog>,
    segment_count: u32,
    state: Arc<Mutex<MockState>>,
}

impl MockExecutor {
    pub fn new(catalog: Arc<MemoryCatalog>, segment_count: u32) -> Self {
        Self {
            catalog,
            segment_count,
            state: Default::default(),
        }
    }

    pub fn fail_next(&self, failure: MockFailure) {
        self.state.lock().failures.push_back(failure);
    }

    pub fn commands(&self) -> Vec<RedistributeCommand> {
        self.state.lock().commands.clone()
    }

    pub fn open_sessions(&self) -> usize {
        let state = self.state.lock();
        state.opened - state.closed
    }
}

impl Executor for MockExecutor {
    fn open(&self) -> Result<Box<dyn Session>> {
        let mut state = self.state.lock();
        if let Some(MockFailure::Connect) = state.failures.front() {
            state.failures.pop_front();
            return Err(ExpandError::ConnectionError(
                "too many sessions".to_string(),
            ));
        }
        state.opened += 1;
        Ok(Box::new(MockSession {
            catalog: self.catalog.clone(),
            segment_count: self.segment_count,
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    catalog: Arc<MemoryCatalog>,
    segment_count: u32,
    state: Arc<Mutex<MockState>>,
}

impl Session for MockSession {
    fn execute(&mut self, command: &RedistributeCommand) -> Result<ExecutionResult> {
        let failure = {
            let mut state = self.state.lock();
            state.commands.push(command.clone());
            match state.failures.front() {
                Some(MockFailure::Execute(_)) | Some(MockFailure::Result(_)) => {
                    state.failures.pop_front()
                }
                _ => None,
            }
        };

        match failure {
            Some(MockFailure::Execute(cause)) => Err(ExpandError::CommandExecutionError {
                partition: command.display_name.clone(),
                cause,
            }),
            Some(MockFailure::Result(code)) => Ok(ExecutionResult::Other(code)),
            _ => {
                let policy = match &command.action {
                    RedistributeAction::SetDistributedBy { keys } => {
                        DistributionPolicy::hash(keys.clone(), self.segment_count)
                    }
                    RedistributeAction::Reshuffle => {
                        DistributionPolicy::random(self.segment_count)
                    }
                };
                self.catalog.replace_policy(command.partition, &policy)?;
                Ok(ExecutionResult::Utility)
            }
        }
    }

    fn close(&mut self) {
        self.state.lock().closed += 1;
    }
}
