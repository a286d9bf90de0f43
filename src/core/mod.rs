//! Core primitives shared by the builder and every sink
//!
//! - Encoding: source encodings and conversion to UTF-8
//! - Value: inline-integer detection, value references, heap framing

pub mod encoding;
pub mod value;
