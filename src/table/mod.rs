//! Finished Tables
//!
//! A build hands over a [`TableHandle`]: the node records behind a
//! [`NodeTable`] reader, plus the metadata, name dictionaries and namespace
//! index gathered while building. Handles are read-only.

pub mod disk;

use memchr::memchr;
use rayon::prelude::*;

use crate::core::value::ValueRef;
use crate::data::{Catalog, MetaData, Names, Namespaces, NodeKind, NodeRecord};
use crate::error::{BuildError, Result};

/// Random read access to the records of a finished table
pub trait NodeTable: Send + Sync {
    /// Backend label
    fn backend(&self) -> &'static str;

    /// Number of records
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record at `pre`; callers guarantee `pre < len()`
    fn record(&self, pre: u32) -> Result<NodeRecord>;

    /// Out-of-line value of the record at `pre`
    fn heap_value(&self, pre: u32, rec: &NodeRecord) -> Result<Vec<u8>>;
}

/// Records and value slots held in memory
#[derive(Debug, Default)]
pub struct MemTable {
    records: Vec<NodeRecord>,
    texts: Vec<Vec<u8>>,
    attrs: Vec<Vec<u8>>,
}

impl MemTable {
    /// Table over records and value slots collected by a memory sink
    pub fn new(records: Vec<NodeRecord>, texts: Vec<Vec<u8>>, attrs: Vec<Vec<u8>>) -> Self {
        MemTable {
            records,
            texts,
            attrs,
        }
    }
}

impl NodeTable for MemTable {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn len(&self) -> u32 {
        self.records.len() as u32
    }

    fn record(&self, pre: u32) -> Result<NodeRecord> {
        self.records.get(pre as usize).copied().ok_or(BuildError::InvalidPosition {
            pre,
            size: self.len(),
        })
    }

    fn heap_value(&self, pre: u32, rec: &NodeRecord) -> Result<Vec<u8>> {
        let slots = match rec.kind {
            NodeKind::Attribute => &self.attrs,
            _ => &self.texts,
        };
        let slot = match rec.value {
            ValueRef::Offset(slot) => slot as usize,
            ValueRef::Inline(_) => {
                return Err(BuildError::Corrupt(format!("pre {pre} has an inline value")))
            }
        };
        slots
            .get(slot)
            .cloned()
            .ok_or_else(|| BuildError::Corrupt(format!("pre {pre}: value slot {slot} is missing")))
    }
}

/// A finished node table
pub struct TableHandle {
    pub meta: MetaData,
    pub elem_names: Names,
    pub attr_names: Names,
    pub namespaces: Namespaces,
    table: Box<dyn NodeTable>,
}

impl std::fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandle")
            .field("name", &self.meta.name)
            .field("backend", &self.table.backend())
            .field("size", &self.table.len())
            .finish()
    }
}

impl TableHandle {
    /// Wrap a backend table with its catalog
    pub fn new(catalog: Catalog, table: Box<dyn NodeTable>) -> Self {
        let Catalog {
            meta,
            elem_names,
            attr_names,
            namespaces,
        } = catalog;
        TableHandle {
            meta,
            elem_names,
            attr_names,
            namespaces,
            table,
        }
    }

    /// Label of the backend holding the records
    pub fn backend(&self) -> &'static str {
        self.table.backend()
    }

    /// Number of records, document node included
    pub fn size(&self) -> u32 {
        self.table.len()
    }

    /// Record at `pre`, bounds-checked
    pub fn record(&self, pre: u32) -> Result<NodeRecord> {
        let size = self.table.len();
        if pre >= size {
            return Err(BuildError::InvalidPosition { pre, size });
        }
        self.table.record(pre)
    }

    /// Node kind at `pre`
    pub fn kind(&self, pre: u32) -> Result<NodeKind> {
        Ok(self.record(pre)?.kind)
    }

    /// Distance from `pre` to its parent
    pub fn dist(&self, pre: u32) -> Result<u32> {
        Ok(self.record(pre)?.dist)
    }

    /// Pre value of the parent; `None` for the document node
    pub fn parent(&self, pre: u32) -> Result<Option<u32>> {
        let rec = self.record(pre)?;
        if rec.kind == NodeKind::Document {
            return Ok(None);
        }
        match pre.checked_sub(rec.dist) {
            Some(parent) if rec.dist > 0 => Ok(Some(parent)),
            _ => Err(BuildError::Corrupt(format!(
                "pre {pre}: invalid distance {}",
                rec.dist
            ))),
        }
    }

    /// Number of records in the subtree rooted at `pre`
    pub fn node_size(&self, pre: u32) -> Result<u32> {
        Ok(self.record(pre)?.size)
    }

    /// Number of attributes plus one
    pub fn attr_size(&self, pre: u32) -> Result<u32> {
        Ok(self.record(pre)?.attr_size)
    }

    /// Name of an element, attribute or processing instruction (its target)
    pub fn name(&self, pre: u32) -> Result<Option<Vec<u8>>> {
        let rec = self.record(pre)?;
        Ok(match rec.kind {
            NodeKind::Element => self.elem_names.key(rec.name_id).map(<[u8]>::to_vec),
            NodeKind::Attribute => self.attr_names.key(rec.name_id).map(<[u8]>::to_vec),
            NodeKind::ProcessingInstruction => {
                let mut value = self.value_of(pre, &rec)?;
                if let Some(space) = memchr(b' ', &value) {
                    value.truncate(space);
                }
                Some(value)
            }
            _ => None,
        })
    }

    /// Value of a document, attribute or text-class node
    pub fn value(&self, pre: u32) -> Result<Option<Vec<u8>>> {
        let rec = self.record(pre)?;
        if !rec.kind.has_value() {
            return Ok(None);
        }
        self.value_of(pre, &rec).map(Some)
    }

    fn value_of(&self, pre: u32, rec: &NodeRecord) -> Result<Vec<u8>> {
        match rec.value.inline_bytes() {
            Some(bytes) => Ok(bytes),
            None => self.table.heap_value(pre, rec),
        }
    }

    /// The node's value is stored inside its record
    pub fn is_inlined(&self, pre: u32) -> Result<bool> {
        let rec = self.record(pre)?;
        Ok(rec.kind.has_value() && rec.value.is_inline())
    }

    /// All records in pre order
    pub fn records(&self) -> Result<Vec<NodeRecord>> {
        (0..self.table.len()).map(|pre| self.table.record(pre)).collect()
    }

    /// Check the structural invariants of every record
    ///
    /// Parent distances must point inside the parent's range, and the
    /// children of every document or element must tile its range exactly.
    pub fn verify(&self) -> Result<()> {
        let records = self.records()?;
        check_root(&records)?;
        (0..records.len() as u32)
            .into_par_iter()
            .try_for_each(|pre| check_node(&records, pre))
            .map_err(BuildError::Corrupt)
    }
}

fn check_root(records: &[NodeRecord]) -> Result<()> {
    let Some(root) = records.first() else {
        return Err(BuildError::Corrupt("table has no document node".into()));
    };
    if root.kind != NodeKind::Document {
        return Err(BuildError::Corrupt(format!(
            "pre 0 is a {}, not the document",
            root.kind.label()
        )));
    }
    if root.size as usize != records.len() {
        return Err(BuildError::Corrupt(format!(
            "document size {} does not match {} records",
            root.size,
            records.len()
        )));
    }
    Ok(())
}

fn check_node(records: &[NodeRecord], pre: u32) -> std::result::Result<(), String> {
    let rec = &records[pre as usize];
    let end = pre as u64 + rec.size as u64;
    if rec.size == 0 || end > records.len() as u64 {
        return Err(format!("pre {pre}: size {} out of range", rec.size));
    }

    if pre > 0 {
        if rec.kind == NodeKind::Document {
            return Err(format!("pre {pre}: nested document node"));
        }
        if rec.dist == 0 || rec.dist > pre {
            return Err(format!("pre {pre}: invalid distance {}", rec.dist));
        }
        let parent_pre = pre - rec.dist;
        let parent = &records[parent_pre as usize];
        if !parent.kind.has_size() {
            return Err(format!(
                "pre {pre}: parent {parent_pre} is a {}",
                parent.kind.label()
            ));
        }
        let limit = match rec.kind {
            NodeKind::Attribute => parent_pre as u64 + parent.attr_size as u64,
            _ => parent_pre as u64 + parent.size as u64,
        };
        if pre as u64 >= limit {
            return Err(format!("pre {pre}: outside parent {parent_pre}"));
        }
    }

    if !rec.kind.has_size() {
        return if rec.size == 1 {
            Ok(())
        } else {
            Err(format!("pre {pre}: leaf with size {}", rec.size))
        };
    }

    // Children start after the attributes and must end exactly at `end`
    let mut child = pre as u64 + rec.attr_size as u64;
    while child < end {
        let c = &records[child as usize];
        if c.kind == NodeKind::Attribute || c.dist as u64 != child - pre as u64 {
            return Err(format!("pre {pre}: child {child} does not point back"));
        }
        child += c.size.max(1) as u64;
    }
    if child != end {
        return Err(format!("pre {pre}: children overrun the subtree"));
    }
    Ok(())
}
