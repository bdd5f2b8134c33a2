use std::collections::HashMap;
use std::sync::Arc;

use derive_more::Display;
use parking_lot::Mutex;

use crate::error::{ExpandError, Result};
use crate::hierarchy::RelationId;

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LockMode {
    #[display(fmt = "share")]
    Shared,

    #[display(fmt = "exclusive")]
    Exclusive,
}

impl LockMode {
    pub fn conflicts_with(self, other: LockMode) -> bool {
        !matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

/// Relation-level locks as seen by one operation.
pub trait LockManager: Send + Sync {
    /// Fails with [`ExpandError::LockConflict`] instead of waiting.
    fn acquire(&self, relation: RelationId, mode: LockMode) -> Result<()>;

    fn release(&self, relation: RelationId, mode: LockMode);
}

/// Releases a lock when dropped.
pub struct LockGuard<'a> {
    locks: &'a dyn LockManager,
    relation: RelationId,
    mode: LockMode,
}

impl<'a> LockGuard<'a> {
    pub fn acquire(
        locks: &'a dyn LockManager,
        relation: RelationId,
        mode: LockMode,
    ) -> Result<Self> {
        locks.acquire(relation, mode)?;
        Ok(Self {
            locks,
            relation,
            mode,
        })
    }
}

impl<'a> Drop for LockGuard<'a> {
    fn drop(&mut self) {
        self.locks.release(self.relation, self.mode);
    }
}

#[derive(Debug, Default, Copy, Clone)]
struct Holding {
    shared: usize,
    exclusive: usize,
}

impl Holding {
    fn strongest(&self) -> Option<LockMode> {
        if self.exclusive > 0 {
            Some(LockMode::Exclusive)
        } else if self.shared > 0 {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    fn is_empty(&self) -> bool {
        self.shared == 0 && self.exclusive == 0
    }
}

#[derive(Default)]
struct LockState {
    next_owner: u64,
    relations: HashMap<RelationId, HashMap<u64, Holding>>,
}

/// Process-wide table of relation locks shared by all operations.
#[derive(Clone, Default)]
pub struct LockTable {
    state: Arc<Mutex<LockState>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new lock scope. Everything it still holds is released when
    /// the owner is dropped, which ends the surrounding transaction.
    pub fn owner(&self) -> LockOwner {
        let mut state = self.state.lock();
        state.next_owner += 1;
        LockOwner {
            id: state.next_owner,
            table: self.clone(),
        }
    }

    /// Strongest mode any owner currently holds on `relation`.
    pub fn held(&self, relation: RelationId) -> Option<LockMode> {
        let state = self.state.lock();
        state.relations.get(&relation).and_then(|holders| {
            holders
                .values()
                .filter_map(Holding::strongest)
                .max_by_key(|mode| *mode == LockMode::Exclusive)
        })
    }
}

pub struct LockOwner {
    id: u64,
    table: LockTable,
}

impl LockOwner {
    /// Relations this owner holds, with the strongest mode on each.
    pub fn held(&self) -> Vec<(RelationId, LockMode)> {
        let state = self.table.state.lock();
        let mut held = state
            .relations
            .iter()
            .filter_map(|(relation, holders)| {
                holders
                    .get(&self.id)
                    .and_then(Holding::strongest)
                    .map(|mode| (*relation, mode))
            })
            .collect::<Vec<_>>();
        held.sort_by_key(|(relation, _)| *relation);
        held
    }

    pub fn release_all(&self) {
        let mut state = self.table.state.lock();
        let id = self.id;
        state.relations.retain(|_, holders| {
            holders.remove(&id);
            !holders.is_empty()
        });
    }
}

impl LockManager for LockOwner {
    fn acquire(&self, relation: RelationId, mode: LockMode) -> Result<()> {
        let mut state = self.table.state.lock();

        if let Some(holders) = state.relations.get(&relation) {
            let conflict = holders
                .iter()
                .filter(|(owner, _)| **owner != self.id)
                .filter_map(|(_, holding)| holding.strongest())
                .find(|held| mode.conflicts_with(*held));
            if let Some(held) = conflict {
                return Err(ExpandError::LockConflict {
                    relation,
                    requested: mode,
                    held,
                });
            }
        }

        let holding = state
            .relations
            .entry(relation)
            .or_default()
            .entry(self.id)
            .or_default();
        match mode {
            LockMode::Shared => holding.shared += 1,
            LockMode::Exclusive => holding.exclusive += 1,
        }
        Ok(())
    }

    fn release(&self, relation: RelationId, mode: LockMode) {
        let mut state = self.table.state.lock();
        let holders = match state.relations.get_mut(&relation) {
            Some(holders) => holders,
            None => return,
        };

        if let Some(holding) = holders.get_mut(&self.id) {
            match mode {
                LockMode::Shared => holding.shared = holding.shared.saturating_sub(1),
                LockMode::Exclusive => holding.exclusive = holding.exclusive.saturating_sub(1),
            }
            if holding.is_empty() {
                holders.remove(&self.id);
            }
        }
        if holders.is_empty() {
            state.relations.remove(&relation);
        }
    }
}

impl Drop for LockOwner {
    fn drop(&mut self) {
        self.release_all();
    }
}
