//! Node Sinks
//!
//! A sink physically realizes the structural events the builder has already
//! validated and addressed. The builder only sees the [`NodeSink`] trait:
//!
//! ```text
//! Builder ──add_node/add_text/set_size──> dyn NodeSink
//!                                           ├── DiskSink    (append-only table + heaps + patch log)
//!                                           ├── MemorySink  (growable arrays)
//!                                           └── StoreSink   (embedded key-store)
//! ```
//!
//! Sinks differ in how they handle [`NodeSink::set_size`], which targets a
//! record written earlier: see [`SizePolicy`].

pub mod disk;
pub mod heap;
pub mod memory;
pub mod patch;
pub mod store;

use crate::config::Backend;
use crate::data::{Catalog, NodeKind};
use crate::error::Result;
use crate::table::TableHandle;

pub use disk::DiskSink;
pub use memory::MemorySink;
pub use store::StoreSink;

/// How a sink applies patches to records it has already written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizePolicy {
    /// Patches are logged and replayed over the finished table
    Deferred,
    /// Patches are applied in place as they arrive
    Immediate,
}

/// Element fields resolved by the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementEntry {
    pub name_id: u16,
    pub uri_id: u8,
    /// Element declares namespaces
    pub ns_flag: bool,
    /// Distance to the parent record
    pub dist: u32,
}

/// Attribute fields resolved by the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrEntry<'a> {
    pub name_id: u16,
    pub uri_id: u8,
    pub value: &'a [u8],
}

/// Backend contract driven by the builder
///
/// Positions are assigned sequentially from 0; every `add_*` call returns
/// the pre value of the record it wrote. A failed write is fatal to the
/// build and is never retried.
pub trait NodeSink {
    /// Backend label, for logging
    fn backend(&self) -> &'static str;

    /// When patches to earlier records take effect
    fn size_policy(&self) -> SizePolicy;

    /// Number of records written so far
    fn len(&self) -> u32;

    /// No record has been written yet
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the document record; its value is the document name
    fn add_document(&mut self, name: &[u8]) -> Result<u32>;

    /// Write an element record followed by one record per attribute
    ///
    /// The element's size is written as a placeholder (its attribute size)
    /// and fixed later through [`NodeSink::set_size`].
    fn add_node(&mut self, elem: ElementEntry, attrs: &[AttrEntry<'_>]) -> Result<u32>;

    /// Write a text, comment or processing-instruction record
    fn add_text(&mut self, value: &[u8], dist: u32, kind: NodeKind) -> Result<u32>;

    /// Set the final size of a document or element record
    fn set_size(&mut self, pre: u32, size: u32) -> Result<()>;

    /// Replace the value of an attribute record
    fn set_attr_value(&mut self, pre: u32, value: &[u8]) -> Result<()>;

    /// Apply outstanding patches, persist the catalog, and hand over the table
    fn finish(self: Box<Self>, catalog: Catalog) -> Result<TableHandle>;

    /// Release open streams after a failed build
    ///
    /// The partial artifact stays in place for the caller to discard.
    fn close(&mut self) {}
}

/// Create the sink selected by `backend`
pub fn open_sink(backend: &Backend) -> Result<Box<dyn NodeSink>> {
    Ok(match backend {
        Backend::Memory => Box::new(MemorySink::new()),
        Backend::Disk { path } => Box::new(DiskSink::create(path)?),
        Backend::Store { path } => Box::new(StoreSink::create(path)?),
    })
}
