//! Value Heap
//!
//! Append-only byte store for values that cannot be inlined into a record.
//! Entries are length-prefixed; a record references its entry by offset.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::value::{inline_ref, write_token, ValueRef, MAX_OFFSET};
use crate::error::{BuildError, Limit, Result};

pub struct ValueHeap {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    /// Bytes written so far (next offset)
    len: u64,
}

impl ValueHeap {
    /// Create or truncate the heap file
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(ValueHeap {
            path: path.to_path_buf(),
            out: Some(BufWriter::with_capacity(64 * 1024, file)),
            len: 0,
        })
    }

    /// Store a value and return the reference to put into its record
    ///
    /// Inlinable values are not written.
    pub fn store(&mut self, value: &[u8]) -> Result<ValueRef> {
        if let Some(inline) = inline_ref(value) {
            return Ok(inline);
        }

        let offset = self.len;
        if offset > MAX_OFFSET {
            return Err(BuildError::LimitExceeded {
                limit: Limit::HeapOffset,
                max: MAX_OFFSET,
            });
        }
        let out = self.out.as_mut().ok_or_else(|| closed(&self.path))?;
        self.len += write_token(out, value)?;
        Ok(ValueRef::Offset(offset))
    }

    /// Bytes written so far
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Nothing has been written to the heap
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Flush and close the heap file
    pub fn finish(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }

    /// Close without reporting flush errors
    pub fn close(&mut self) {
        self.out = None;
    }
}

fn closed(path: &Path) -> BuildError {
    BuildError::Io(std::io::Error::other(format!(
        "value heap {} is closed",
        path.display()
    )))
}
