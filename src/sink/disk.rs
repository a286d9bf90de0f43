//! Disk Sink
//!
//! Streams fixed-size records to an append-only table file. Values that
//! cannot be inlined go to one of two append-only heaps (content and
//! attribute values). Size and value patches are deferred to the patch log
//! and applied in `finish`.
//!
//! ## Artifact layout
//!
//! ```text
//! <dir>/nodes.tbl     node records, 16 bytes each, addressed by pre
//! <dir>/texts.heap    document, text, comment and PI values
//! <dir>/attvals.heap  attribute values
//! <dir>/catalog.bin   metadata and dictionaries
//! <dir>/patches.tmp   patch log (only while building)
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::heap::ValueHeap;
use super::patch::{Patch, PatchLog};
use super::{AttrEntry, ElementEntry, NodeSink, SizePolicy};
use crate::data::record::RECORD_SIZE;
use crate::data::{Catalog, NodeKind, NodeRecord};
use crate::error::{BuildError, Result};
use crate::table::{disk::DiskTable, TableHandle};

pub const TABLE_FILE: &str = "nodes.tbl";
pub const TEXT_HEAP: &str = "texts.heap";
pub const ATTR_HEAP: &str = "attvals.heap";
pub const CATALOG_FILE: &str = "catalog.bin";
pub const PATCH_LOG: &str = "patches.tmp";

pub struct DiskSink {
    dir: PathBuf,
    table: Option<BufWriter<File>>,
    texts: ValueHeap,
    attrs: ValueHeap,
    patches: PatchLog,
    /// Records written so far
    size: u32,
}

impl DiskSink {
    /// Create the artifact directory and open all output streams
    ///
    /// Existing artifact files in `dir` are truncated.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let table = File::create(dir.join(TABLE_FILE))?;
        Ok(DiskSink {
            dir: dir.to_path_buf(),
            table: Some(BufWriter::with_capacity(64 * 1024, table)),
            texts: ValueHeap::create(&dir.join(TEXT_HEAP))?,
            attrs: ValueHeap::create(&dir.join(ATTR_HEAP))?,
            patches: PatchLog::create(&dir.join(PATCH_LOG))?,
            size: 0,
        })
    }

    fn write(&mut self, record: &NodeRecord) -> Result<u32> {
        let out = self
            .table
            .as_mut()
            .ok_or_else(|| BuildError::Io(std::io::Error::other("node table is closed")))?;
        out.write_all(&record.encode())?;
        let pre = self.size;
        self.size += 1;
        trace!(pre, kind = record.kind.label(), "wrote record");
        Ok(pre)
    }

    fn check_written(&self, pre: u32) -> Result<()> {
        if pre >= self.size {
            return Err(BuildError::InvalidPosition {
                pre,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Kind of a record that has already been written
    ///
    /// Buffered records are flushed first so the table file can be read back.
    fn kind_at(&mut self, pre: u32) -> Result<NodeKind> {
        self.check_written(pre)?;
        if let Some(table) = self.table.as_mut() {
            table.flush()?;
        }
        let mut file = File::open(self.dir.join(TABLE_FILE))?;
        file.seek(SeekFrom::Start(pre as u64 * RECORD_SIZE as u64))?;
        let mut code = [0u8; 1];
        file.read_exact(&mut code)?;
        NodeKind::from_code(code[0])
            .ok_or_else(|| BuildError::Corrupt(format!("unknown node kind at pre {pre}")))
    }
}

impl NodeSink for DiskSink {
    fn backend(&self) -> &'static str {
        "disk"
    }

    fn size_policy(&self) -> SizePolicy {
        SizePolicy::Deferred
    }

    fn len(&self) -> u32 {
        self.size
    }

    fn add_document(&mut self, name: &[u8]) -> Result<u32> {
        let value = self.texts.store(name)?;
        self.write(&NodeRecord::document(value, 1))
    }

    fn add_node(&mut self, elem: ElementEntry, attrs: &[AttrEntry<'_>]) -> Result<u32> {
        let attr_size = attrs.len() as u32 + 1;
        let pre = self.write(&NodeRecord::element(
            elem.name_id,
            elem.uri_id,
            elem.ns_flag,
            elem.dist,
            attr_size,
            attr_size,
        ))?;
        for (i, attr) in attrs.iter().enumerate() {
            let value = self.attrs.store(attr.value)?;
            self.write(&NodeRecord::attribute(
                attr.name_id,
                attr.uri_id,
                i as u32 + 1,
                value,
            ))?;
        }
        Ok(pre)
    }

    fn add_text(&mut self, value: &[u8], dist: u32, kind: NodeKind) -> Result<u32> {
        let value = self.texts.store(value)?;
        self.write(&NodeRecord::content(kind, dist, value))
    }

    fn set_size(&mut self, pre: u32, size: u32) -> Result<()> {
        self.check_written(pre)?;
        self.patches.push(pre, Patch::Size(size))
    }

    fn set_attr_value(&mut self, pre: u32, value: &[u8]) -> Result<()> {
        if self.kind_at(pre)? != NodeKind::Attribute {
            return Err(BuildError::NotAnAttribute { pre });
        }
        let value = self.attrs.store(value)?;
        self.patches.push(pre, Patch::Value(value))
    }

    fn finish(mut self: Box<Self>, catalog: Catalog) -> Result<TableHandle> {
        if let Some(mut table) = self.table.take() {
            table.flush()?;
        }
        self.texts.finish()?;
        self.attrs.finish()?;

        let table_path = self.dir.join(TABLE_FILE);
        self.patches.replay(&table_path, self.size)?;

        fs::write(self.dir.join(CATALOG_FILE), catalog.encode()?)?;
        debug!(dir = %self.dir.display(), records = self.size, "persisted catalog");

        DiskTable::open_with(&self.dir, catalog)
    }

    fn close(&mut self) {
        self.table = None;
        self.texts.close();
        self.attrs.close();
        self.patches.close();
    }
}
