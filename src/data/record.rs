//! Node Records
//!
//! One fixed-size record per pre value. Each record occupies 16 bytes:
//!
//! ```text
//! DOCUMENT   [0] kind  [3-7] value ref          [8-11] size
//! ELEMENT    [0] kind  [1-2] name (bit 15: ns)  [3] uri  [4-7] dist  [8-11] size  [12-15] attr size
//! TEXT/COMM/PI [0] kind  [3-7] value ref        [8-11] dist
//! ATTRIBUTE  [0] kind  [1-2] name  [3-7] value ref  [8-11] dist  [12] uri
//! ```

use serde::{Deserialize, Serialize};

use crate::core::value::ValueRef;
use crate::error::{BuildError, Result};

/// Bytes per record
pub const RECORD_SIZE: usize = 16;

/// Namespace flag in the name field of an element
const NS_FLAG: u16 = 0x8000;

/// Type of a table node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeKind {
    Document = 0,
    Element = 1,
    Text = 2,
    Attribute = 3,
    Comment = 4,
    ProcessingInstruction = 5,
}

impl NodeKind {
    /// Decode a kind code
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => NodeKind::Document,
            1 => NodeKind::Element,
            2 => NodeKind::Text,
            3 => NodeKind::Attribute,
            4 => NodeKind::Comment,
            5 => NodeKind::ProcessingInstruction,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Kinds whose records reference a value
    #[inline]
    pub fn has_value(self) -> bool {
        !matches!(self, NodeKind::Element)
    }

    /// Kinds with a stored subtree size
    #[inline]
    pub fn has_size(self) -> bool {
        matches!(self, NodeKind::Document | NodeKind::Element)
    }

    /// Lowercase kind name used in messages and logs
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Document => "document",
            NodeKind::Element => "element",
            NodeKind::Text => "text",
            NodeKind::Attribute => "attribute",
            NodeKind::Comment => "comment",
            NodeKind::ProcessingInstruction => "processing instruction",
        }
    }
}

/// A decoded table record
///
/// Fields a kind does not store read back as their neutral value
/// (name 0, dist 0 for the document, size 1 for leaves).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub kind: NodeKind,
    /// Element or attribute name id
    pub name_id: u16,
    /// Element declares namespaces
    pub ns_flag: bool,
    /// Namespace URI id (0 = no namespace)
    pub uri_id: u8,
    /// Distance to the parent record
    pub dist: u32,
    /// Number of records in the subtree, including attributes
    pub size: u32,
    /// Number of attributes + 1 (elements and documents)
    pub attr_size: u32,
    /// Value of documents, attributes and text-class nodes
    pub value: ValueRef,
}

impl NodeRecord {
    /// Document record
    pub fn document(value: ValueRef, size: u32) -> Self {
        NodeRecord {
            kind: NodeKind::Document,
            name_id: 0,
            ns_flag: false,
            uri_id: 0,
            dist: 0,
            size,
            attr_size: 1,
            value,
        }
    }

    /// Element record; `size` is a placeholder until the element closes
    pub fn element(
        name_id: u16,
        uri_id: u8,
        ns_flag: bool,
        dist: u32,
        attr_size: u32,
        size: u32,
    ) -> Self {
        NodeRecord {
            kind: NodeKind::Element,
            name_id,
            ns_flag,
            uri_id,
            dist,
            size,
            attr_size,
            value: ValueRef::Offset(0),
        }
    }

    /// Attribute record
    pub fn attribute(name_id: u16, uri_id: u8, dist: u32, value: ValueRef) -> Self {
        NodeRecord {
            kind: NodeKind::Attribute,
            name_id,
            ns_flag: false,
            uri_id,
            dist,
            size: 1,
            attr_size: 1,
            value,
        }
    }

    /// Text, comment or PI record
    pub fn content(kind: NodeKind, dist: u32, value: ValueRef) -> Self {
        NodeRecord {
            kind,
            name_id: 0,
            ns_flag: false,
            uri_id: 0,
            dist,
            size: 1,
            attr_size: 1,
            value,
        }
    }

    /// Serialize into the fixed record layout
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut b = [0u8; RECORD_SIZE];
        b[0] = self.kind.code();
        match self.kind {
            NodeKind::Document => {
                put_value(&mut b, self.value);
                b[8..12].copy_from_slice(&self.size.to_be_bytes());
            }
            NodeKind::Element => {
                let name = (self.name_id & !NS_FLAG) | if self.ns_flag { NS_FLAG } else { 0 };
                b[1..3].copy_from_slice(&name.to_be_bytes());
                b[3] = self.uri_id;
                b[4..8].copy_from_slice(&self.dist.to_be_bytes());
                b[8..12].copy_from_slice(&self.size.to_be_bytes());
                b[12..16].copy_from_slice(&self.attr_size.to_be_bytes());
            }
            NodeKind::Attribute => {
                b[1..3].copy_from_slice(&self.name_id.to_be_bytes());
                put_value(&mut b, self.value);
                b[8..12].copy_from_slice(&self.dist.to_be_bytes());
                b[12] = self.uri_id;
            }
            NodeKind::Text | NodeKind::Comment | NodeKind::ProcessingInstruction => {
                put_value(&mut b, self.value);
                b[8..12].copy_from_slice(&self.dist.to_be_bytes());
            }
        }
        b
    }

    /// Deserialize from the fixed record layout
    pub fn decode(b: &[u8]) -> Result<Self> {
        if b.len() < RECORD_SIZE {
            return Err(BuildError::Corrupt(format!(
                "record has {} bytes, expected {}",
                b.len(),
                RECORD_SIZE
            )));
        }
        let kind = NodeKind::from_code(b[0])
            .ok_or_else(|| BuildError::Corrupt(format!("unknown node kind {}", b[0])))?;

        let rec = match kind {
            NodeKind::Document => NodeRecord::document(get_value(b), be32(&b[8..12])),
            NodeKind::Element => {
                let name = u16::from_be_bytes([b[1], b[2]]);
                NodeRecord::element(
                    name & !NS_FLAG,
                    b[3],
                    name & NS_FLAG != 0,
                    be32(&b[4..8]),
                    be32(&b[12..16]),
                    be32(&b[8..12]),
                )
            }
            NodeKind::Attribute => NodeRecord::attribute(
                u16::from_be_bytes([b[1], b[2]]),
                b[12],
                be32(&b[8..12]),
                get_value(b),
            ),
            NodeKind::Text | NodeKind::Comment | NodeKind::ProcessingInstruction => {
                NodeRecord::content(kind, be32(&b[8..12]), get_value(b))
            }
        };
        Ok(rec)
    }
}

/// Byte offset of the size field inside a record
pub const SIZE_OFFSET: usize = 8;

/// Byte offset of the value reference inside a record
pub const VALUE_OFFSET: usize = 3;

/// Encode a value reference as the 5 bytes stored at [`VALUE_OFFSET`]
pub fn value_bytes(value: ValueRef) -> [u8; 5] {
    let bits = value.to_bits().to_be_bytes();
    [bits[3], bits[4], bits[5], bits[6], bits[7]]
}

fn put_value(b: &mut [u8; RECORD_SIZE], value: ValueRef) {
    b[VALUE_OFFSET..VALUE_OFFSET + 5].copy_from_slice(&value_bytes(value));
}

fn get_value(b: &[u8]) -> ValueRef {
    let mut bits = [0u8; 8];
    bits[3..8].copy_from_slice(&b[VALUE_OFFSET..VALUE_OFFSET + 5]);
    ValueRef::from_bits(u64::from_be_bytes(bits))
}

#[inline]
fn be32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}
