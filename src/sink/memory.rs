//! In-memory Sink
//!
//! Records live in a growable array and values in two slot arrays (content
//! and attribute values). Random access is cheap, so size and value patches
//! are applied in place as they arrive.

use tracing::trace;

use super::{AttrEntry, ElementEntry, NodeSink, SizePolicy};
use crate::core::value::{inline_ref, ValueRef};
use crate::data::{Catalog, NodeKind, NodeRecord};
use crate::error::{BuildError, Result};
use crate::table::{MemTable, TableHandle};

#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<NodeRecord>,
    texts: Vec<Vec<u8>>,
    attrs: Vec<Vec<u8>>,
}

/// Store a value in a slot array unless it can be inlined
fn store(slots: &mut Vec<Vec<u8>>, value: &[u8]) -> ValueRef {
    if let Some(inline) = inline_ref(value) {
        return inline;
    }
    slots.push(value.to_vec());
    ValueRef::Offset(slots.len() as u64 - 1)
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, record: NodeRecord) -> u32 {
        let pre = self.records.len() as u32;
        trace!(pre, kind = record.kind.label(), "pushed record");
        self.records.push(record);
        pre
    }

    fn slot(&mut self, pre: u32) -> Result<&mut NodeRecord> {
        let size = self.records.len() as u32;
        self.records
            .get_mut(pre as usize)
            .ok_or(BuildError::InvalidPosition { pre, size })
    }
}

impl NodeSink for MemorySink {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn size_policy(&self) -> SizePolicy {
        SizePolicy::Immediate
    }

    fn len(&self) -> u32 {
        self.records.len() as u32
    }

    fn add_document(&mut self, name: &[u8]) -> Result<u32> {
        let value = store(&mut self.texts, name);
        Ok(self.push(NodeRecord::document(value, 1)))
    }

    fn add_node(&mut self, elem: ElementEntry, attrs: &[AttrEntry<'_>]) -> Result<u32> {
        let attr_size = attrs.len() as u32 + 1;
        self.records.reserve(attrs.len() + 1);
        let pre = self.push(NodeRecord::element(
            elem.name_id,
            elem.uri_id,
            elem.ns_flag,
            elem.dist,
            attr_size,
            attr_size,
        ));
        for (i, attr) in attrs.iter().enumerate() {
            let value = store(&mut self.attrs, attr.value);
            self.push(NodeRecord::attribute(
                attr.name_id,
                attr.uri_id,
                i as u32 + 1,
                value,
            ));
        }
        Ok(pre)
    }

    fn add_text(&mut self, value: &[u8], dist: u32, kind: NodeKind) -> Result<u32> {
        let value = store(&mut self.texts, value);
        Ok(self.push(NodeRecord::content(kind, dist, value)))
    }

    fn set_size(&mut self, pre: u32, size: u32) -> Result<()> {
        let rec = self.slot(pre)?;
        if !rec.kind.has_size() {
            return Err(BuildError::Corrupt(format!(
                "size patch for {} at pre {pre}",
                rec.kind.label()
            )));
        }
        rec.size = size;
        Ok(())
    }

    fn set_attr_value(&mut self, pre: u32, value: &[u8]) -> Result<()> {
        if self.slot(pre)?.kind != NodeKind::Attribute {
            return Err(BuildError::NotAnAttribute { pre });
        }
        let value = store(&mut self.attrs, value);
        self.slot(pre)?.value = value;
        Ok(())
    }

    fn finish(self: Box<Self>, catalog: Catalog) -> Result<TableHandle> {
        let MemorySink {
            records,
            texts,
            attrs,
        } = *self;
        Ok(TableHandle::new(
            catalog,
            Box::new(MemTable::new(records, texts, attrs)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(dist: u32) -> ElementEntry {
        ElementEntry {
            name_id: 1,
            uri_id: 0,
            ns_flag: false,
            dist,
        }
    }

    #[test]
    fn test_sizes_apply_immediately() {
        let mut sink = MemorySink::new();
        assert_eq!(sink.size_policy(), SizePolicy::Immediate);
        sink.add_document(b"doc").unwrap();
        let pre = sink.add_node(elem(1), &[]).unwrap();
        sink.add_text(b"abc", 1, NodeKind::Text).unwrap();
        sink.set_size(pre, 2).unwrap();
        assert_eq!(sink.records[1].size, 2);
        assert_eq!(sink.texts, vec![b"doc".to_vec(), b"abc".to_vec()]);
    }

    #[test]
    fn test_patch_kind_checks() {
        let mut sink = MemorySink::new();
        sink.add_document(b"doc").unwrap();
        let attrs = [AttrEntry { name_id: 1, uri_id: 0, value: b"7" }];
        sink.add_node(elem(1), &attrs).unwrap();
        sink.add_text(b"t", 2, NodeKind::Comment).unwrap();

        assert!(matches!(sink.set_size(3, 4), Err(BuildError::Corrupt(_))));
        assert!(matches!(
            sink.set_attr_value(1, b"v"),
            Err(BuildError::NotAnAttribute { pre: 1 })
        ));
        assert!(matches!(
            sink.set_size(10, 1),
            Err(BuildError::InvalidPosition { pre: 10, size: 4 })
        ));

        sink.set_attr_value(2, b"replaced").unwrap();
        assert_eq!(sink.records[2].value, ValueRef::Offset(0));
        assert_eq!(sink.attrs[0], b"replaced");
    }

    #[test]
    fn test_inline_values_take_no_slot() {
        let mut sink = MemorySink::new();
        sink.add_document(b"doc").unwrap();
        let attrs = [
            AttrEntry { name_id: 1, uri_id: 0, value: b"12345" },
            AttrEntry { name_id: 2, uri_id: 0, value: b"not-a-short-integer" },
        ];
        sink.add_node(elem(1), &attrs).unwrap();
        assert_eq!(sink.records[2].value, ValueRef::Inline(12345));
        assert_eq!(sink.attrs.len(), 1);
    }
}
