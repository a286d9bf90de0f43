//! Embedded Store Sink
//!
//! Each node is an entity in a sled tree, keyed by its big-endian pre value
//! so that key order is document order. Out-of-line values are stored with
//! the entity itself; the record's value reference then points back at the
//! entity. Size and value patches are transactional read-modify-writes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use tracing::{debug, trace};

use super::{AttrEntry, ElementEntry, NodeSink, SizePolicy};
use crate::core::value::{inline_ref, ValueRef};
use crate::data::{Catalog, NodeKind, NodeRecord};
use crate::error::{BuildError, Result};
use crate::table::{NodeTable, TableHandle};

const NODES_TREE: &str = "nodes";
const META_TREE: &str = "meta";
const CATALOG_KEY: &str = "catalog";

/// A node entity as stored in the key-store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredNode {
    record: NodeRecord,
    /// Value bytes when they are not inlined
    value: Option<Vec<u8>>,
}

impl StoredNode {
    fn new(pre: u32, mut record: NodeRecord, value: Option<&[u8]>) -> Self {
        let value = match value.map(|v| (inline_ref(v), v)) {
            Some((Some(inline), _)) => {
                record.value = inline;
                None
            }
            Some((None, bytes)) => {
                record.value = ValueRef::Offset(pre as u64);
                Some(bytes.to_vec())
            }
            None => None,
        };
        StoredNode { record, value }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(pre: u32, bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| BuildError::Corrupt(format!("node entity {pre}: {e}")))
    }
}

#[inline]
fn key(pre: u32) -> [u8; 4] {
    pre.to_be_bytes()
}

pub struct StoreSink {
    db: sled::Db,
    nodes: sled::Tree,
    size: u32,
}

impl StoreSink {
    /// Open (or create) the store in `path` and clear any previous nodes
    pub fn create(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        let nodes = db.open_tree(NODES_TREE)?;
        nodes.clear()?;
        db.open_tree(META_TREE)?.remove(CATALOG_KEY)?;
        Ok(StoreSink { db, nodes, size: 0 })
    }

    fn insert(&mut self, node: StoredNode) -> Result<u32> {
        let pre = self.size;
        self.nodes.insert(&key(pre)[..], node.encode()?)?;
        self.size += 1;
        trace!(pre, kind = node.record.kind.label(), "stored node");
        Ok(pre)
    }

    /// Read-modify-write of one entity
    fn update<F>(&mut self, pre: u32, patch: F) -> Result<()>
    where
        F: Fn(u32, &mut StoredNode) -> Result<()>,
    {
        if pre >= self.size {
            return Err(BuildError::InvalidPosition {
                pre,
                size: self.size,
            });
        }
        let k = key(pre);
        let result: TransactionResult<(), BuildError> = self.nodes.transaction(|tx| {
            let bytes = tx.get(&k[..])?.ok_or_else(|| {
                ConflictableTransactionError::Abort(BuildError::Corrupt(format!(
                    "node entity {pre} is missing"
                )))
            })?;
            let mut node =
                StoredNode::decode(pre, &bytes).map_err(ConflictableTransactionError::Abort)?;
            patch(pre, &mut node).map_err(ConflictableTransactionError::Abort)?;
            let encoded = node.encode().map_err(ConflictableTransactionError::Abort)?;
            tx.insert(&k[..], encoded)?;
            Ok(())
        });
        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(BuildError::Store(e)),
        }
    }
}

impl NodeSink for StoreSink {
    fn backend(&self) -> &'static str {
        "store"
    }

    fn size_policy(&self) -> SizePolicy {
        SizePolicy::Immediate
    }

    fn len(&self) -> u32 {
        self.size
    }

    fn add_document(&mut self, name: &[u8]) -> Result<u32> {
        let node = StoredNode::new(
            self.size,
            NodeRecord::document(ValueRef::Offset(0), 1),
            Some(name),
        );
        self.insert(node)
    }

    fn add_node(&mut self, elem: ElementEntry, attrs: &[AttrEntry<'_>]) -> Result<u32> {
        let pre = self.size;
        let attr_size = attrs.len() as u32 + 1;
        let mut batch = sled::Batch::default();

        let record = NodeRecord::element(
            elem.name_id,
            elem.uri_id,
            elem.ns_flag,
            elem.dist,
            attr_size,
            attr_size,
        );
        batch.insert(&key(pre)[..], StoredNode::new(pre, record, None).encode()?);
        for (i, attr) in attrs.iter().enumerate() {
            let apre = pre + i as u32 + 1;
            let record =
                NodeRecord::attribute(attr.name_id, attr.uri_id, i as u32 + 1, ValueRef::Offset(0));
            batch.insert(
                &key(apre)[..],
                StoredNode::new(apre, record, Some(attr.value)).encode()?,
            );
        }
        self.nodes.apply_batch(batch)?;
        self.size += attr_size;
        trace!(pre, attributes = attrs.len(), "stored element");
        Ok(pre)
    }

    fn add_text(&mut self, value: &[u8], dist: u32, kind: NodeKind) -> Result<u32> {
        let node = StoredNode::new(
            self.size,
            NodeRecord::content(kind, dist, ValueRef::Offset(0)),
            Some(value),
        );
        self.insert(node)
    }

    fn set_size(&mut self, pre: u32, size: u32) -> Result<()> {
        self.update(pre, |pre, node| {
            if !node.record.kind.has_size() {
                return Err(BuildError::Corrupt(format!(
                    "size patch for {} at pre {pre}",
                    node.record.kind.label()
                )));
            }
            node.record.size = size;
            Ok(())
        })
    }

    fn set_attr_value(&mut self, pre: u32, value: &[u8]) -> Result<()> {
        self.update(pre, |pre, node| {
            if node.record.kind != NodeKind::Attribute {
                return Err(BuildError::NotAnAttribute { pre });
            }
            *node = StoredNode::new(pre, node.record, Some(value));
            Ok(())
        })
    }

    fn finish(self: Box<Self>, catalog: Catalog) -> Result<TableHandle> {
        let StoreSink { db, nodes, size } = *self;
        db.open_tree(META_TREE)?
            .insert(CATALOG_KEY, catalog.encode()?)?;
        db.flush()?;
        debug!(records = size, "persisted catalog");

        Ok(TableHandle::new(
            catalog,
            Box::new(StoreTable {
                nodes,
                records: size,
            }),
        ))
    }
}

/// Reopen a finished store
pub fn open(path: &Path) -> Result<TableHandle> {
    let db = sled::open(path)?;
    let bytes = db
        .open_tree(META_TREE)?
        .get(CATALOG_KEY)?
        .ok_or_else(|| BuildError::Corrupt(format!("{} has no catalog", path.display())))?;
    let catalog = Catalog::decode(&bytes)?;
    let nodes = db.open_tree(NODES_TREE)?;
    if nodes.len() != catalog.meta.size as usize {
        return Err(BuildError::Corrupt(format!(
            "store holds {} nodes, expected {}",
            nodes.len(),
            catalog.meta.size
        )));
    }
    let records = catalog.meta.size;
    Ok(TableHandle::new(catalog, Box::new(StoreTable { nodes, records })))
}

struct StoreTable {
    nodes: sled::Tree,
    records: u32,
}

impl StoreTable {
    fn node(&self, pre: u32) -> Result<StoredNode> {
        let bytes = self
            .nodes
            .get(key(pre))?
            .ok_or_else(|| BuildError::Corrupt(format!("node entity {pre} is missing")))?;
        StoredNode::decode(pre, &bytes)
    }
}

impl NodeTable for StoreTable {
    fn backend(&self) -> &'static str {
        "store"
    }

    fn len(&self) -> u32 {
        self.records
    }

    fn record(&self, pre: u32) -> Result<NodeRecord> {
        Ok(self.node(pre)?.record)
    }

    fn heap_value(&self, pre: u32, _rec: &NodeRecord) -> Result<Vec<u8>> {
        self.node(pre)?
            .value
            .ok_or_else(|| BuildError::Corrupt(format!("node entity {pre} has no value")))
    }
}
