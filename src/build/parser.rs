//! Parser Side
//!
//! A parser owns the source document and pushes structural events into a
//! [`Builder`]. Format-specific parsers live outside this crate; the
//! [`EventParser`] replays events that are already in memory.

use chrono::{DateTime, Utc};

use super::builder::Builder;
use crate::error::Result;

/// Identity of the document being built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    /// Path, URL or a caller-chosen label
    pub label: String,
    /// Modification time of the source, if known
    pub timestamp: Option<DateTime<Utc>>,
}

impl SourceInfo {
    /// Source with a label and no timestamp
    pub fn new(label: impl Into<String>) -> Self {
        SourceInfo {
            label: label.into(),
            timestamp: None,
        }
    }
}

/// Drives a builder with the events of one document
pub trait Parser {
    /// Push every event of the document into `builder`
    ///
    /// The first error aborts the build.
    fn parse(&mut self, builder: &mut Builder) -> Result<()>;

    fn source(&self) -> SourceInfo {
        SourceInfo::default()
    }
}

/// A structural event, with raw bytes in the source encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// Namespace declaration for the next element
    Namespace { prefix: Vec<u8>, uri: Vec<u8> },
    /// Start tag with its attributes in document order
    Open {
        name: Vec<u8>,
        attributes: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// Empty-element tag
    Empty {
        name: Vec<u8>,
        attributes: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// End tag
    Close { name: Vec<u8> },
    Text(Vec<u8>),
    Comment(Vec<u8>),
    /// Processing instruction content: target, then data after a space
    ProcessingInstruction(Vec<u8>),
    /// Late value for an attribute record that has already been written
    AttributeValue { pre: u32, value: Vec<u8> },
}

impl BuildEvent {
    fn replay(&self, builder: &mut Builder) -> Result<()> {
        match self {
            BuildEvent::Namespace { prefix, uri } => builder.start_namespace(prefix, uri),
            BuildEvent::Open { name, attributes } => builder.open_node(name, &borrow(attributes)),
            BuildEvent::Empty { name, attributes } => {
                builder.open_empty_node(name, &borrow(attributes))
            }
            BuildEvent::Close { name } => builder.close_node(name),
            BuildEvent::Text(value) => builder.text(value),
            BuildEvent::Comment(value) => builder.comment(value),
            BuildEvent::ProcessingInstruction(value) => builder.pi(value),
            BuildEvent::AttributeValue { pre, value } => builder.set_attribute_value(*pre, value),
        }
    }
}

fn borrow(attributes: &[(Vec<u8>, Vec<u8>)]) -> Vec<(&[u8], &[u8])> {
    attributes
        .iter()
        .map(|(n, v)| (n.as_slice(), v.as_slice()))
        .collect()
}

fn owned<N: AsRef<[u8]>, V: AsRef<[u8]>>(attributes: &[(N, V)]) -> Vec<(Vec<u8>, Vec<u8>)> {
    attributes
        .iter()
        .map(|(n, v)| (n.as_ref().to_vec(), v.as_ref().to_vec()))
        .collect()
}

/// Replays a recorded event list
///
/// ```ignore
/// let parser = EventParser::new()
///     .open("XML", &[("id", "1")])
///     .text("abc")
///     .close("XML");
/// ```
#[derive(Debug, Clone, Default)]
pub struct EventParser {
    events: Vec<BuildEvent>,
    source: SourceInfo,
}

impl EventParser {
    /// Parser with no events
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source reported to the builder
    pub fn with_source(mut self, source: SourceInfo) -> Self {
        self.source = source;
        self
    }

    /// Append a prebuilt event
    pub fn event(mut self, event: BuildEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Bind `prefix` to `uri` for the next element
    pub fn namespace(self, prefix: impl AsRef<[u8]>, uri: impl AsRef<[u8]>) -> Self {
        self.event(BuildEvent::Namespace {
            prefix: prefix.as_ref().to_vec(),
            uri: uri.as_ref().to_vec(),
        })
    }

    /// Start tag
    pub fn open<N: AsRef<[u8]>, V: AsRef<[u8]>>(
        self,
        name: impl AsRef<[u8]>,
        attributes: &[(N, V)],
    ) -> Self {
        self.event(BuildEvent::Open {
            name: name.as_ref().to_vec(),
            attributes: owned(attributes),
        })
    }

    /// Empty-element tag
    pub fn empty<N: AsRef<[u8]>, V: AsRef<[u8]>>(
        self,
        name: impl AsRef<[u8]>,
        attributes: &[(N, V)],
    ) -> Self {
        self.event(BuildEvent::Empty {
            name: name.as_ref().to_vec(),
            attributes: owned(attributes),
        })
    }

    /// End tag
    pub fn close(self, name: impl AsRef<[u8]>) -> Self {
        self.event(BuildEvent::Close {
            name: name.as_ref().to_vec(),
        })
    }

    /// Character data
    pub fn text(self, value: impl AsRef<[u8]>) -> Self {
        self.event(BuildEvent::Text(value.as_ref().to_vec()))
    }

    /// Comment content
    pub fn comment(self, value: impl AsRef<[u8]>) -> Self {
        self.event(BuildEvent::Comment(value.as_ref().to_vec()))
    }

    /// Processing instruction, `target data`
    pub fn pi(self, value: impl AsRef<[u8]>) -> Self {
        self.event(BuildEvent::ProcessingInstruction(value.as_ref().to_vec()))
    }

    /// Late value for the attribute at `pre`
    pub fn attribute_value(self, pre: u32, value: impl AsRef<[u8]>) -> Self {
        self.event(BuildEvent::AttributeValue {
            pre,
            value: value.as_ref().to_vec(),
        })
    }

    /// Recorded events
    pub fn events(&self) -> &[BuildEvent] {
        &self.events
    }
}

impl Parser for EventParser {
    fn parse(&mut self, builder: &mut Builder) -> Result<()> {
        for event in &self.events {
            event.replay(builder)?;
        }
        Ok(())
    }

    fn source(&self) -> SourceInfo {
        self.source.clone()
    }
}

/// No attributes, for the fluent constructors
pub const NO_ATTRS: &[(&str, &str)] = &[];
