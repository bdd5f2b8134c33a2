use std::collections::VecDeque;
use std::path::Path;

use anyhow::Result;
use expand_core::{
    Catalog, DistributionPolicy, ExpandError, PartitionHierarchy, PartitionKind, RelationId,
};
use parking_lot::Mutex;
use rocksdb::{DBCompressionType, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};

/// Object ids below this are reserved for the system catalog.
const FIRST_RELATION_ID: u32 = 16384;

const NEXT_RELATION_ID_KEY: &str = "cluster/next_relation_id";
const SEGMENT_COUNT_KEY: &str = "cluster/segments";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub id: RelationId,
    pub name: String,
    pub parent: Option<RelationId>,
    pub partitioned: bool,
    pub policy: DistributionPolicy,
}

impl RelationDefinition {
    pub fn kind(&self) -> PartitionKind {
        if self.partitioned {
            PartitionKind::Internal
        } else {
            PartitionKind::Leaf
        }
    }
}

fn relation_key(id: RelationId) -> String {
    format!("relation/{:010}", id.0)
}

fn name_key(name: &str) -> String {
    format!("name/{}", name)
}

pub struct Storage {
    db: DB,
    ddl: Mutex<()>,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(DBCompressionType::Zstd);

        let db = Storage {
            db: DB::open(&opts, path)?,
            ddl: Mutex::new(()),
        };
        Ok(db)
    }

    pub fn create_relation(
        &self,
        name: &str,
        parent: Option<RelationId>,
        partitioned: bool,
        policy: DistributionPolicy,
    ) -> Result<RelationId> {
        let _ddl = self.ddl.lock();
        anyhow::ensure!(
            self.db.get_pinned(name_key(name))?.is_none(),
            "relation '{}' already exists",
            name
        );
        if let Some(parent) = parent {
            let parent = self
                .get_relation(parent)?
                .ok_or_else(|| anyhow::anyhow!("parent relation {} does not exist", parent))?;
            anyhow::ensure!(
                parent.partitioned,
                "relation '{}' is not partitioned",
                parent.name
            );
        }

        let id = match self.db.get_pinned(NEXT_RELATION_ID_KEY)? {
            Some(data) => bincode::deserialize(&data)?,
            None => FIRST_RELATION_ID,
        };
        let id = RelationId(id);
        let definition = RelationDefinition {
            id,
            name: name.to_string(),
            parent,
            partitioned,
            policy,
        };

        let mut batch = WriteBatch::default();
        batch.put(relation_key(id), bincode::serialize(&definition)?);
        batch.put(name_key(name), bincode::serialize(&id)?);
        batch.put(NEXT_RELATION_ID_KEY, bincode::serialize(&(id.0 + 1))?);
        self.db.write(batch)?;
        Ok(id)
    }

    pub fn get_relation(&self, id: RelationId) -> Result<Option<RelationDefinition>> {
        match self.db.get_pinned(relation_key(id))? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    pub fn relation_by_name(&self, name: &str) -> Result<Option<RelationDefinition>> {
        match self.db.get_pinned(name_key(name))? {
            Some(data) => self.get_relation(bincode::deserialize(&data)?),
            None => Ok(None),
        }
    }

    pub fn relation_exists(&self, id: RelationId) -> Result<bool> {
        Ok(self.db.get_pinned(relation_key(id))?.is_some())
    }

    pub fn relation_list(&self) -> Result<Vec<RelationDefinition>> {
        let mut relations = Vec::new();

        for (key, value) in self.db.prefix_iterator("relation/") {
            if !key.starts_with(b"relation/") {
                break;
            }
            relations.push(bincode::deserialize(&value)?);
        }

        Ok(relations)
    }

    pub fn children(&self, parent: RelationId) -> Result<Vec<RelationDefinition>> {
        Ok(self
            .relation_list()?
            .into_iter()
            .filter(|relation| relation.parent == Some(parent))
            .collect())
    }

    pub fn drop_relation(&self, id: RelationId) -> Result<()> {
        let _ddl = self.ddl.lock();
        let relation = self
            .get_relation(id)?
            .ok_or_else(|| anyhow::anyhow!("relation {} does not exist", id))?;
        anyhow::ensure!(
            self.children(id)?.is_empty(),
            "relation '{}' still has partitions",
            relation.name
        );

        let mut batch = WriteBatch::default();
        batch.delete(relation_key(id));
        batch.delete(name_key(&relation.name));
        self.db.write(batch)?;
        Ok(())
    }

    pub fn set_policy(&self, id: RelationId, policy: &DistributionPolicy) -> Result<()> {
        let _ddl = self.ddl.lock();
        let mut relation = self
            .get_relation(id)?
            .ok_or_else(|| anyhow::anyhow!("relation {} does not exist", id))?;
        relation.policy = policy.clone();
        self.db.put(relation_key(id), bincode::serialize(&relation)?)?;
        Ok(())
    }

    pub fn segment_count(&self) -> Result<Option<u32>> {
        match self.db.get_pinned(SEGMENT_COUNT_KEY)? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    pub fn set_segment_count(&self, segment_count: u32) -> Result<()> {
        anyhow::ensure!(segment_count > 0, "segment count must be positive");
        self.db
            .put(SEGMENT_COUNT_KEY, bincode::serialize(&segment_count)?)?;
        Ok(())
    }
}

pub(crate) fn catalog_error(err: anyhow::Error) -> ExpandError {
    ExpandError::UnexpectedCatalogState(format!("{:#}", err))
}

fn not_found(id: RelationId) -> ExpandError {
    ExpandError::UnexpectedCatalogState(format!("relation {} does not exist", id))
}

impl Catalog for Storage {
    fn fetch_policy(&self, relation: RelationId) -> expand_core::Result<DistributionPolicy> {
        self.get_relation(relation)
            .map_err(catalog_error)?
            .map(|relation| relation.policy)
            .ok_or_else(|| not_found(relation))
    }

    fn replace_policy(
        &self,
        relation: RelationId,
        policy: &DistributionPolicy,
    ) -> expand_core::Result<()> {
        self.set_policy(relation, policy).map_err(catalog_error)
    }

    fn fetch_hierarchy(&self, root: RelationId) -> expand_core::Result<PartitionHierarchy> {
        if !self.relation_exists(root).map_err(catalog_error)? {
            return Err(not_found(root));
        }

        let relations = self.relation_list().map_err(catalog_error)?;
        let mut hierarchy = PartitionHierarchy::new(root);
        let mut queue = VecDeque::from(vec![root]);

        while let Some(parent) = queue.pop_front() {
            for relation in relations
                .iter()
                .filter(|relation| relation.parent == Some(parent))
            {
                hierarchy.push(relation.id, parent, relation.kind());
                queue.push_back(relation.id);
            }
        }
        Ok(hierarchy)
    }

    fn resolve_display_name(&self, relation: RelationId) -> expand_core::Result<String> {
        self.get_relation(relation)
            .map_err(catalog_error)?
            .map(|relation| relation.name)
            .ok_or_else(|| not_found(relation))
    }
}
