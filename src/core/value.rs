//! Value References
//!
//! Every record that carries a value (document, text, comment, PI,
//! attribute) stores a 40-bit reference. Small canonical integers are
//! inlined into the reference itself; everything else lives out of line.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

/// Flag bit marking an inlined integer
pub const INLINE_FLAG: u64 = 1 << 39;

/// Largest out-of-line offset a reference can address
pub const MAX_OFFSET: u64 = INLINE_FLAG - 1;

/// A value reference as stored in bytes 3-7 of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueRef {
    /// The value is this integer, written in canonical decimal form
    Inline(u32),
    /// Heap offset, slot index, or entity reference, depending on the backend
    Offset(u64),
}

impl ValueRef {
    /// Pack into the 40-bit record representation
    #[inline]
    pub fn to_bits(self) -> u64 {
        match self {
            ValueRef::Inline(v) => INLINE_FLAG | v as u64,
            ValueRef::Offset(off) => off & MAX_OFFSET,
        }
    }

    /// Unpack from the 40-bit record representation
    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        if bits & INLINE_FLAG != 0 {
            ValueRef::Inline(bits as u32)
        } else {
            ValueRef::Offset(bits & MAX_OFFSET)
        }
    }

    #[inline]
    pub fn is_inline(self) -> bool {
        matches!(self, ValueRef::Inline(_))
    }

    /// Materialize an inlined value; `None` for out-of-line references
    pub fn inline_bytes(self) -> Option<Vec<u8>> {
        match self {
            ValueRef::Inline(v) => Some(v.to_string().into_bytes()),
            ValueRef::Offset(_) => None,
        }
    }
}

/// Returns the integer a value can be inlined as
///
/// Only canonical non-negative decimals of at most nine digits qualify, so
/// that formatting the integer reproduces the original bytes exactly.
pub fn inline_int(value: &[u8]) -> Option<u32> {
    if value.is_empty() || value.len() > 9 {
        return None;
    }
    if value[0] == b'0' {
        return if value.len() == 1 { Some(0) } else { None };
    }

    let mut v = 0u32;
    for &c in value {
        if !c.is_ascii_digit() {
            return None;
        }
        v = v * 10 + (c - b'0') as u32;
    }
    Some(v)
}

/// Inline reference for a value, if it qualifies
#[inline]
pub fn inline_ref(value: &[u8]) -> Option<ValueRef> {
    inline_int(value).map(ValueRef::Inline)
}

/// Write an unsigned LEB128 number; returns the number of bytes written
pub fn write_num<W: Write>(out: &mut W, mut v: u64) -> io::Result<usize> {
    let mut buf = [0u8; 10];
    let mut n = 0;
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            buf[n] = byte;
            n += 1;
            break;
        }
        buf[n] = byte | 0x80;
        n += 1;
    }
    out.write_all(&buf[..n])?;
    Ok(n)
}

/// Read an unsigned LEB128 number
pub fn read_num<R: Read>(input: &mut R) -> io::Result<u64> {
    let mut v = 0u64;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        input.read_exact(&mut byte)?;
        if shift >= 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "length prefix overflows 64 bits",
            ));
        }
        v |= ((byte[0] & 0x7F) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
    }
}

/// Write a length-prefixed heap entry; returns the number of bytes written
pub fn write_token<W: Write>(out: &mut W, value: &[u8]) -> io::Result<u64> {
    let n = write_num(out, value.len() as u64)?;
    out.write_all(value)?;
    Ok((n + value.len()) as u64)
}

/// Read a length-prefixed heap entry of at most `max` bytes
pub fn read_token<R: Read>(input: &mut R, max: u64) -> io::Result<Vec<u8>> {
    let len = read_num(input)?;
    if len > max {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("heap entry of {len} bytes exceeds {max}"),
        ));
    }
    let mut value = vec![0u8; len as usize];
    input.read_exact(&mut value)?;
    Ok(value)
}

/// XML whitespace: space, tab, carriage return, line feed
#[inline]
pub fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// Check whether a token consists of whitespace only
#[inline]
pub fn all_ws(value: &[u8]) -> bool {
    value.iter().all(|&b| is_ws(b))
}

/// Strip leading and trailing whitespace
pub fn trim(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|&b| !is_ws(b)).unwrap_or(value.len());
    let end = value.iter().rposition(|&b| !is_ws(b)).map_or(start, |p| p + 1);
    &value[start..end]
}
