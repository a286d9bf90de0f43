//! Namespace Index
//!
//! Prefix -> URI bindings, each recorded at the pre value of the element that
//! declares it. During a build the index keeps a depth-tagged binding stack
//! and resolves names against the currently open ancestor scopes only; the
//! finished index keeps every binding with the pre range it applies to.

use memchr::memchr;
use serde::{Deserialize, Serialize};

use super::names::Names;
use crate::error::{Limit, Result};

/// Well-known namespace URIs
pub mod ns {
    pub const XML: &[u8] = b"http://www.w3.org/XML/1998/namespace";
}

/// Largest namespace URI id (stored in one byte)
pub const MAX_URI_ID: u16 = 0xFF;

const XML_PREFIX: &[u8] = b"xml";
const XMLNS_PREFIX: &[u8] = b"xmlns";

/// A binding as persisted in the finished index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsRecord {
    /// Pre value of the declaring element
    pub pre: u32,
    /// First pre value after the declaring element's subtree
    pub end: u32,
    pub prefix: u16,
    /// URI id; 0 undeclares the prefix
    pub uri: u8,
}

/// Binding on the build-time scope stack
#[derive(Debug, Clone, Copy)]
struct NsBinding {
    prefix: u16,
    uri: u8,
    depth: u32,
    /// Index into `records`
    record: usize,
}

/// Scoped namespace index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespaces {
    prefixes: Names,
    uris: Names,
    records: Vec<NsRecord>,
    #[serde(skip)]
    bindings: Vec<NsBinding>,
    /// Declarations waiting for the next element to open
    #[serde(skip)]
    pending: Vec<(u16, u8, u32)>,
    #[serde(skip)]
    depth: u32,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a qualified name into prefix and local name at the colon
pub fn split_name(name: &[u8]) -> (Option<&[u8]>, &[u8]) {
    match memchr(b':', name) {
        Some(colon) => (Some(&name[..colon]), &name[colon + 1..]),
        None => (None, name),
    }
}

impl Namespaces {
    /// Empty index
    pub fn new() -> Self {
        Namespaces {
            prefixes: Names::with_max(Limit::Namespaces, u16::MAX),
            uris: Names::with_max(Limit::Namespaces, MAX_URI_ID),
            records: Vec::new(),
            bindings: Vec::with_capacity(16),
            pending: Vec::new(),
            depth: 0,
        }
    }

    /// Record a binding that starts applying at `pre`
    ///
    /// The binding takes effect when the element at `pre` is opened. The
    /// `xml` and `xmlns` prefixes cannot be rebound and are ignored.
    pub fn bind(&mut self, prefix: &[u8], uri: &[u8], pre: u32) -> Result<()> {
        if prefix == XML_PREFIX || prefix == XMLNS_PREFIX {
            return Ok(());
        }
        let prefix = self.prefixes.intern(prefix)?;
        let uri = self.uris.intern(uri)? as u8;
        self.pending.push((prefix, uri, pre));
        Ok(())
    }

    /// Open the scope of the element at `pre`
    ///
    /// Returns true if the element declares namespaces.
    pub fn open(&mut self, pre: u32) -> bool {
        self.depth += 1;
        let declares = !self.pending.is_empty();
        for (prefix, uri, at) in self.pending.drain(..) {
            self.records.push(NsRecord {
                pre: at.min(pre),
                end: u32::MAX,
                prefix,
                uri,
            });
            self.bindings.push(NsBinding {
                prefix,
                uri,
                depth: self.depth,
                record: self.records.len() - 1,
            });
        }
        declares
    }

    /// Close the innermost scope; `end` is the first pre after its subtree
    pub fn close(&mut self, end: u32) {
        while let Some(binding) = self.bindings.last() {
            if binding.depth < self.depth {
                break;
            }
            self.records[binding.record].end = end;
            self.bindings.pop();
        }
        self.depth = self.depth.saturating_sub(1);
    }

    /// Resolve an element name against the open scopes
    ///
    /// Unprefixed names take the default namespace.
    pub fn resolve_element(&mut self, name: &[u8]) -> Result<u8> {
        let (prefix, _) = split_name(name);
        self.resolve_prefix(prefix.unwrap_or(b""))
    }

    /// Resolve an attribute name; unprefixed attributes are in no namespace
    pub fn resolve_attribute(&mut self, name: &[u8]) -> Result<u8> {
        match split_name(name).0 {
            Some(prefix) => self.resolve_prefix(prefix),
            None => Ok(0),
        }
    }

    fn resolve_prefix(&mut self, prefix: &[u8]) -> Result<u8> {
        if prefix == XML_PREFIX {
            return Ok(self.uris.intern(ns::XML)? as u8);
        }
        let Some(prefix_id) = self.prefixes.lookup(prefix) else {
            return Ok(0);
        };
        Ok(self
            .bindings
            .iter()
            .rev()
            .find(|b| b.prefix == prefix_id)
            .map_or(0, |b| b.uri))
    }

    /// URI bound to `prefix` at `pre` in the finished index
    pub fn uri_at(&self, prefix: &[u8], pre: u32) -> Option<&[u8]> {
        if prefix == XML_PREFIX {
            return Some(ns::XML);
        }
        let prefix_id = self.prefixes.lookup(prefix)?;
        // Records are in pre order: the last enclosing one is the innermost
        let record = self
            .records
            .iter()
            .rev()
            .find(|r| r.prefix == prefix_id && r.pre <= pre && pre < r.end)?;
        match record.uri {
            0 => None,
            uri => self.uri(uri),
        }
    }

    /// URI for an id
    pub fn uri(&self, id: u8) -> Option<&[u8]> {
        if id == 0 {
            return None;
        }
        self.uris.key(id as u16)
    }

    /// Id of a URI, if it has been seen
    pub fn uri_id(&self, uri: &[u8]) -> Option<u8> {
        self.uris.lookup(uri).map(|id| id as u8)
    }

    /// All recorded bindings in declaration order
    pub fn records(&self) -> &[NsRecord] {
        &self.records
    }

    /// Number of distinct URIs
    pub fn len(&self) -> usize {
        self.uris.len()
    }

    /// No URI has been recorded
    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }
}
