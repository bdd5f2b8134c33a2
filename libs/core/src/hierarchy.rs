use std::collections::HashSet;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

use crate::error::{ExpandError, Result};

/// Catalog object identifier of a table.
#[derive(
    Debug, Display, From, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RelationId(pub u32);

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionKind {
    /// Further partitioned, holds no rows of its own.
    #[display(fmt = "internal")]
    Internal,

    #[display(fmt = "leaf")]
    Leaf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNode {
    pub id: RelationId,
    pub kind: PartitionKind,
    pub parent: RelationId,
    pub root: RelationId,
}

impl PartitionNode {
    pub fn is_leaf(&self) -> bool {
        self.kind == PartitionKind::Leaf
    }
}

/// All tables below a root, in the order they were discovered.
///
/// The root itself is not part of `descendants`; every node records its
/// parent, so the tree shape can be rebuilt from the flat list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionHierarchy {
    root: RelationId,
    nodes: Vec<PartitionNode>,
}

impl PartitionHierarchy {
    pub fn new(root: RelationId) -> Self {
        Self {
            root,
            nodes: Vec::new(),
        }
    }

    pub fn with_node(mut self, id: u32, parent: u32, kind: PartitionKind) -> Self {
        self.push(RelationId(id), RelationId(parent), kind);
        self
    }

    pub fn push(&mut self, id: RelationId, parent: RelationId, kind: PartitionKind) {
        let root = self.root;
        self.nodes.push(PartitionNode {
            id,
            kind,
            parent,
            root,
        });
    }

    pub fn root(&self) -> RelationId {
        self.root
    }

    pub fn descendants(&self) -> &[PartitionNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: RelationId) -> Option<&PartitionNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn children(&self, parent: RelationId) -> impl Iterator<Item = &PartitionNode> {
        self.nodes.iter().filter(move |node| node.parent == parent)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &PartitionNode> {
        self.nodes.iter().filter(|node| node.is_leaf())
    }

    /// Checks that the list really describes a tree under `root`.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        seen.insert(self.root);

        for node in &self.nodes {
            if node.root != self.root {
                return Err(ExpandError::UnexpectedCatalogState(format!(
                    "partition {} belongs to root {}, expected {}",
                    node.id, node.root, self.root
                )));
            }
            if !seen.contains(&node.parent) {
                return Err(ExpandError::UnexpectedCatalogState(format!(
                    "partition {} refers to unknown parent {}",
                    node.id, node.parent
                )));
            }
            if !seen.insert(node.id) {
                return Err(ExpandError::UnexpectedCatalogState(format!(
                    "partition {} appears twice in the hierarchy of {}",
                    node.id, self.root
                )));
            }
        }

        for node in &self.nodes {
            if node.is_leaf() && self.children(node.id).next().is_some() {
                return Err(ExpandError::UnexpectedCatalogState(format!(
                    "leaf partition {} has partitions of its own",
                    node.id
                )));
            }
        }

        Ok(())
    }
}
