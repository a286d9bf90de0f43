//! Build Options
//!
//! Options are plain data: they can be assembled in code with the `with_*`
//! setters or read from a TOML document.
//!
//! ```toml
//! chop = false
//! max_depth = 256
//! encoding = "utf16-le"
//!
//! [backend]
//! kind = "disk"
//! path = "/var/lib/xmltable/books"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::encoding::TextEncoding;
use crate::error::Result;

/// Default maximum element nesting depth
pub const DEFAULT_MAX_DEPTH: usize = 4096;

/// Default ceiling on the number of table records
pub const DEFAULT_MAX_NODES: u32 = i32::MAX as u32;

/// Physical backend a build writes to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backend {
    /// Growable in-memory arrays
    #[default]
    Memory,
    /// Append-only table file with external value heaps in `path`
    Disk { path: PathBuf },
    /// Embedded key-store in `path`
    Store { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    pub backend: Backend,
    /// Trim text nodes and drop whitespace-only ones
    pub chop: bool,
    /// Maximum number of nested open elements
    pub max_depth: usize,
    /// Maximum number of table records
    pub max_nodes: u32,
    /// Encoding of the bytes the parser delivers
    pub encoding: TextEncoding,
    /// Accept comments and processing instructions outside the root element
    pub allow_prolog_nodes: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            backend: Backend::Memory,
            chop: true,
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
            encoding: TextEncoding::Utf8,
            allow_prolog_nodes: false,
        }
    }
}

impl BuildOptions {
    /// Parse options from a TOML document; missing keys take their defaults
    pub fn from_toml(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Select the backend
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Enable or disable whitespace chopping
    pub fn with_chop(mut self, chop: bool) -> Self {
        self.chop = chop;
        self
    }

    /// Set the element nesting limit
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the record limit
    pub fn with_max_nodes(mut self, max_nodes: u32) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Set the encoding of parser input
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Accept comments and PIs outside the root element
    pub fn with_prolog_nodes(mut self, allow: bool) -> Self {
        self.allow_prolog_nodes = allow;
        self
    }
}
