//! Build Errors
//!
//! Every failure of a build is fatal: nothing is retried internally and the
//! partially written artifact is left for the caller to discard.

use std::fmt;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, BuildError>;

/// Fixed-width id spaces that can run out during a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Distinct element names (15-bit ids)
    ElementNames,
    /// Distinct attribute names (15-bit ids)
    AttributeNames,
    /// Distinct namespace URIs (8-bit ids)
    Namespaces,
    /// Table records
    Nodes,
    /// Offsets into a value heap (39 bits)
    HeapOffset,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Limit::ElementNames => "element names",
            Limit::AttributeNames => "attribute names",
            Limit::Namespaces => "namespace URIs",
            Limit::Nodes => "nodes",
            Limit::HeapOffset => "value heap size",
        };
        f.write_str(s)
    }
}

/// Coarse classification of a [`BuildError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The event stream does not describe a well-formed document
    Structural,
    /// A fixed-width id space was exhausted
    Capacity,
    /// The backend failed, or the build was stopped from outside
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("closing tag mismatch at pre {pre}: expected </{expected}>, found </{found}>")]
    TagMismatch {
        pre: u32,
        expected: String,
        found: String,
    },

    #[error("closing tag </{name}> at pre {pre} has no open element")]
    UnexpectedClose { pre: u32, name: String },

    #[error("element <{name}> opened at pre {pre} was never closed")]
    UnclosedElement { pre: u32, name: String },

    #[error("duplicate attribute \"{attribute}\" on <{element}> at pre {pre}")]
    DuplicateAttribute {
        pre: u32,
        element: String,
        attribute: String,
    },

    #[error("multiple top-level elements: <{name}> at pre {pre} follows the root element")]
    MultipleRoots { pre: u32, name: String },

    #[error("text outside the root element at pre {pre}: \"{text}\"")]
    MisplacedText { pre: u32, text: String },

    #[error("{what} outside the root element at pre {pre}")]
    MisplacedNode { pre: u32, what: &'static str },

    #[error("nesting depth exceeds the maximum of {max} at pre {pre}")]
    DepthExceeded { pre: u32, max: usize },

    #[error("node at pre {pre} is not an attribute")]
    NotAnAttribute { pre: u32 },

    #[error("pre {pre} has not been written (table size {size})")]
    InvalidPosition { pre: u32, size: u32 },

    #[error("invalid {encoding} input: {message}")]
    Encoding {
        encoding: &'static str,
        message: String,
    },

    #[error("too many {limit} (maximum {max})")]
    LimitExceeded { limit: Limit, max: u64 },

    #[error("build interrupted")]
    Interrupted,

    #[error("corrupt table artifact: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("key-store failure: {0}")]
    Store(#[from] sled::Error),

    #[error("catalog encoding failure: {0}")]
    Catalog(#[from] bincode::Error),

    #[error("invalid build options: {0}")]
    Config(#[from] toml::de::Error),
}

impl BuildError {
    /// Classify this error per the build's failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::TagMismatch { .. }
            | BuildError::UnexpectedClose { .. }
            | BuildError::UnclosedElement { .. }
            | BuildError::DuplicateAttribute { .. }
            | BuildError::MultipleRoots { .. }
            | BuildError::MisplacedText { .. }
            | BuildError::MisplacedNode { .. }
            | BuildError::DepthExceeded { .. }
            | BuildError::NotAnAttribute { .. }
            | BuildError::InvalidPosition { .. }
            | BuildError::Encoding { .. } => ErrorKind::Structural,
            BuildError::LimitExceeded { .. } => ErrorKind::Capacity,
            BuildError::Interrupted
            | BuildError::Corrupt(_)
            | BuildError::Io(_)
            | BuildError::Store(_)
            | BuildError::Catalog(_)
            | BuildError::Config(_) => ErrorKind::Io,
        }
    }
}

/// Render raw name or content bytes for an error message
pub(crate) fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
