//! Patch Log
//!
//! The disk table is written strictly forward, but an element's size is only
//! known once its subtree is complete. Such updates are appended to a side
//! log while streaming and replayed in one random-access pass over the
//! finished table.
//!
//! Entry layout (13 bytes): `[0] tag  [1-4] pre  [5-12] value`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::value::ValueRef;
use crate::data::record::{value_bytes, RECORD_SIZE, SIZE_OFFSET, VALUE_OFFSET};
use crate::data::NodeKind;
use crate::error::{BuildError, Result};

const ENTRY_SIZE: usize = 13;
const TAG_SIZE: u8 = 1;
const TAG_VALUE: u8 = 2;

/// Bytes per replay page (256 records)
const PAGE_SIZE: u64 = 4096;

/// A deferred update of one record field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch {
    Size(u32),
    Value(ValueRef),
}

impl Patch {
    fn encode(self, pre: u32) -> [u8; ENTRY_SIZE] {
        let mut b = [0u8; ENTRY_SIZE];
        let (tag, value) = match self {
            Patch::Size(size) => (TAG_SIZE, size as u64),
            Patch::Value(v) => (TAG_VALUE, v.to_bits()),
        };
        b[0] = tag;
        b[1..5].copy_from_slice(&pre.to_be_bytes());
        b[5..13].copy_from_slice(&value.to_be_bytes());
        b
    }

    fn decode(b: &[u8; ENTRY_SIZE]) -> Result<(u32, Patch)> {
        let pre = u32::from_be_bytes([b[1], b[2], b[3], b[4]]);
        let mut v = [0u8; 8];
        v.copy_from_slice(&b[5..13]);
        let value = u64::from_be_bytes(v);
        let patch = match b[0] {
            TAG_SIZE => Patch::Size(value as u32),
            TAG_VALUE => Patch::Value(ValueRef::from_bits(value)),
            tag => return Err(BuildError::Corrupt(format!("unknown patch tag {tag}"))),
        };
        Ok((pre, patch))
    }
}

/// Write-ahead log of record patches
pub struct PatchLog {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    entries: u64,
}

impl PatchLog {
    /// Create an empty log at `path`
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(PatchLog {
            path: path.to_path_buf(),
            out: Some(BufWriter::new(file)),
            entries: 0,
        })
    }

    /// Append one patch entry
    pub fn push(&mut self, pre: u32, patch: Patch) -> Result<()> {
        let out = self.out.as_mut().ok_or_else(|| {
            BuildError::Io(std::io::Error::other("patch log is closed"))
        })?;
        out.write_all(&patch.encode(pre))?;
        self.entries += 1;
        Ok(())
    }

    /// Number of logged patches
    pub fn len(&self) -> u64 {
        self.entries
    }

    /// No patch has been logged
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Apply all patches to the table file in log order, then delete the log
    ///
    /// `table` must be closed for writing; `records` is the number of
    /// records it holds.
    pub fn replay(&mut self, table: &Path, records: u32) -> Result<u64> {
        let Some(mut out) = self.out.take() else {
            return Ok(0);
        };
        out.flush()?;
        drop(out);

        let mut input = BufReader::new(File::open(&self.path)?);
        let file = OpenOptions::new().read(true).write(true).open(table)?;
        let mut pages = PageWriter::new(file, records as u64 * RECORD_SIZE as u64);

        let mut entry = [0u8; ENTRY_SIZE];
        for _ in 0..self.entries {
            input.read_exact(&mut entry)?;
            let (pre, patch) = Patch::decode(&entry)?;
            if pre >= records {
                return Err(BuildError::InvalidPosition { pre, size: records });
            }
            let rec = pages.record(pre)?;
            let kind = NodeKind::from_code(rec[0])
                .ok_or_else(|| BuildError::Corrupt(format!("unknown node kind at pre {pre}")))?;
            match patch {
                Patch::Size(size) => {
                    if !kind.has_size() {
                        return Err(BuildError::Corrupt(format!(
                            "size patch for {} at pre {pre}",
                            kind.label()
                        )));
                    }
                    rec[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&size.to_be_bytes());
                }
                Patch::Value(value) => {
                    if kind != NodeKind::Attribute {
                        return Err(BuildError::NotAnAttribute { pre });
                    }
                    rec[VALUE_OFFSET..VALUE_OFFSET + 5].copy_from_slice(&value_bytes(value));
                }
            }
        }
        pages.flush()?;
        drop(input);

        fs::remove_file(&self.path)?;
        debug!(entries = self.entries, "replayed patch log");
        Ok(self.entries)
    }

    /// Close without replaying; the log file stays behind with the artifact
    pub fn close(&mut self) {
        self.out = None;
    }
}

/// Single-page write-back buffer over the table file
struct PageWriter {
    file: File,
    len: u64,
    page: Option<u64>,
    buf: Vec<u8>,
    dirty: bool,
}

impl PageWriter {
    fn new(file: File, len: u64) -> Self {
        PageWriter {
            file,
            len,
            page: None,
            buf: Vec::with_capacity(PAGE_SIZE as usize),
            dirty: false,
        }
    }

    /// Mutable view of the record at `pre`
    fn record(&mut self, pre: u32) -> Result<&mut [u8]> {
        let pos = pre as u64 * RECORD_SIZE as u64;
        let page = pos / PAGE_SIZE;
        if self.page != Some(page) {
            self.flush()?;
            let start = page * PAGE_SIZE;
            let end = (start + PAGE_SIZE).min(self.len);
            self.buf.resize((end - start) as usize, 0);
            self.file.seek(SeekFrom::Start(start))?;
            self.file.read_exact(&mut self.buf)?;
            self.page = Some(page);
        }
        self.dirty = true;
        let off = (pos % PAGE_SIZE) as usize;
        Ok(&mut self.buf[off..off + RECORD_SIZE])
    }

    fn flush(&mut self) -> Result<()> {
        if let (true, Some(page)) = (self.dirty, self.page) {
            self.file.seek(SeekFrom::Start(page * PAGE_SIZE))?;
            self.file.write_all(&self.buf)?;
            self.dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NodeRecord;

    fn write_table(path: &Path, records: &[NodeRecord]) {
        let bytes: Vec<u8> = records.iter().flat_map(|r| r.encode()).collect();
        fs::write(path, bytes).unwrap();
    }

    fn read_table(path: &Path) -> Vec<NodeRecord> {
        fs::read(path)
            .unwrap()
            .chunks(RECORD_SIZE)
            .map(|c| NodeRecord::decode(c).unwrap())
            .collect()
    }

    #[test]
    fn test_replay_patches_sizes_and_deletes_log() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("t");
        let log_path = dir.path().join("log");

        let mut records = vec![NodeRecord::document(ValueRef::Offset(0), 1)];
        // Enough elements to span several pages
        for pre in 1..600u32 {
            records.push(NodeRecord::element(1, 0, false, pre, 1, 1));
        }
        write_table(&table, &records);

        let mut log = PatchLog::create(&log_path).unwrap();
        log.push(599, Patch::Size(1)).unwrap();
        log.push(1, Patch::Size(599)).unwrap();
        log.push(0, Patch::Size(600)).unwrap();
        log.push(300, Patch::Size(7)).unwrap();
        assert_eq!(log.replay(&table, 600).unwrap(), 4);

        assert!(!log_path.exists());
        let patched = read_table(&table);
        assert_eq!(patched[0].size, 600);
        assert_eq!(patched[1].size, 599);
        assert_eq!(patched[300].size, 7);
        assert_eq!(patched[2].size, 1);
    }

    #[test]
    fn test_value_patch_requires_attribute() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("t");
        write_table(
            &table,
            &[
                NodeRecord::document(ValueRef::Offset(0), 3),
                NodeRecord::element(1, 0, false, 1, 2, 2),
                NodeRecord::attribute(1, 0, 1, ValueRef::Offset(0)),
            ],
        );

        let mut log = PatchLog::create(&dir.path().join("log")).unwrap();
        log.push(2, Patch::Value(ValueRef::Inline(42))).unwrap();
        log.replay(&table, 3).unwrap();
        assert_eq!(read_table(&table)[2].value, ValueRef::Inline(42));

        let mut log = PatchLog::create(&dir.path().join("log")).unwrap();
        log.push(1, Patch::Value(ValueRef::Inline(1))).unwrap();
        assert!(matches!(
            log.replay(&table, 3),
            Err(BuildError::NotAnAttribute { pre: 1 })
        ));
    }

    #[test]
    fn test_entry_encoding() {
        let b = Patch::Size(9).encode(5);
        assert_eq!(Patch::decode(&b).unwrap(), (5, Patch::Size(9)));
        let b = Patch::Value(ValueRef::Offset(1 << 20)).encode(7);
        assert_eq!(Patch::decode(&b).unwrap(), (7, Patch::Value(ValueRef::Offset(1 << 20))));
    }
}
