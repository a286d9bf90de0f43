//! Disk Table Reader
//!
//! Random read access over a finished disk artifact. Records are read in
//! fixed-size pages kept in a small LRU cache; heap values are read on
//! demand.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use super::{NodeTable, TableHandle};
use crate::core::value::{read_token, ValueRef};
use crate::data::record::RECORD_SIZE;
use crate::data::{Catalog, NodeKind, NodeRecord};
use crate::error::{BuildError, Result};
use crate::sink::disk::{ATTR_HEAP, CATALOG_FILE, PATCH_LOG, TABLE_FILE, TEXT_HEAP};

/// Records per cached page
const PAGE_RECORDS: u64 = 256;

/// Number of cached pages
const CACHE_PAGES: usize = 64;

/// Reopen a finished disk artifact
pub fn open(dir: &Path) -> Result<TableHandle> {
    let bytes = fs::read(dir.join(CATALOG_FILE))?;
    let catalog = Catalog::decode(&bytes)?;
    DiskTable::open_with(dir, catalog)
}

struct PageCache {
    file: File,
    /// Table length in bytes
    len: u64,
    pages: LruCache<u64, Vec<u8>>,
}

impl PageCache {
    fn record(&mut self, pre: u32) -> Result<NodeRecord> {
        let page_bytes = PAGE_RECORDS * RECORD_SIZE as u64;
        let pos = pre as u64 * RECORD_SIZE as u64;
        let page = pos / page_bytes;

        if self.pages.get(&page).is_none() {
            let start = page * page_bytes;
            let end = (start + page_bytes).min(self.len);
            let mut buf = vec![0u8; (end - start) as usize];
            self.file.seek(SeekFrom::Start(start))?;
            self.file.read_exact(&mut buf)?;
            self.pages.put(page, buf);
        }

        let buf = self
            .pages
            .get(&page)
            .ok_or_else(|| BuildError::Corrupt(format!("page {page} not cached")))?;
        let off = (pos % page_bytes) as usize;
        NodeRecord::decode(&buf[off..])
    }
}

/// An open value heap and its length in bytes
struct HeapReader {
    reader: BufReader<File>,
    len: u64,
}

impl HeapReader {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(HeapReader {
            reader: BufReader::new(file),
            len,
        })
    }

    fn read(&mut self, pre: u32, offset: u64) -> Result<Vec<u8>> {
        if offset >= self.len {
            return Err(BuildError::Corrupt(format!(
                "pre {pre}: heap offset {offset} beyond {} bytes",
                self.len
            )));
        }
        self.reader.seek(SeekFrom::Start(offset))?;
        read_token(&mut self.reader, self.len - offset)
            .map_err(|e| BuildError::Corrupt(format!("pre {pre}: {e}")))
    }
}

pub struct DiskTable {
    records: u32,
    pages: Mutex<PageCache>,
    texts: Mutex<HeapReader>,
    attrs: Mutex<HeapReader>,
}

impl DiskTable {
    /// Open the artifact in `dir` described by an already loaded catalog
    pub fn open_with(dir: &Path, catalog: Catalog) -> Result<TableHandle> {
        if dir.join(PATCH_LOG).exists() {
            return Err(BuildError::Corrupt(format!(
                "{} holds an unreplayed patch log",
                dir.display()
            )));
        }

        let file = File::open(dir.join(TABLE_FILE))?;
        let len = file.metadata()?.len();
        let records = catalog.meta.size;
        if len != records as u64 * RECORD_SIZE as u64 {
            return Err(BuildError::Corrupt(format!(
                "table holds {len} bytes, expected {records} records"
            )));
        }

        let cache_pages = NonZeroUsize::new(CACHE_PAGES).unwrap_or(NonZeroUsize::MIN);
        let table = DiskTable {
            records,
            pages: Mutex::new(PageCache {
                file,
                len,
                pages: LruCache::new(cache_pages),
            }),
            texts: Mutex::new(HeapReader::open(&dir.join(TEXT_HEAP))?),
            attrs: Mutex::new(HeapReader::open(&dir.join(ATTR_HEAP))?),
        };
        Ok(TableHandle::new(catalog, Box::new(table)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| BuildError::Corrupt("table reader lock poisoned".into()))
}

impl NodeTable for DiskTable {
    fn backend(&self) -> &'static str {
        "disk"
    }

    fn len(&self) -> u32 {
        self.records
    }

    fn record(&self, pre: u32) -> Result<NodeRecord> {
        lock(&self.pages)?.record(pre)
    }

    fn heap_value(&self, pre: u32, rec: &NodeRecord) -> Result<Vec<u8>> {
        let ValueRef::Offset(offset) = rec.value else {
            return Err(BuildError::Corrupt(format!("pre {pre} has an inline value")));
        };
        let heap = match rec.kind {
            NodeKind::Attribute => &self.attrs,
            _ => &self.texts,
        };
        lock(heap)?.read(pre, offset)
    }
}
