//! Text Encodings
//!
//! Parsers hand the builder raw bytes in the source encoding. Everything
//! stored in a table (names, attribute values, content) is UTF-8; conversion
//! happens once, when the node is created.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

/// Encoding of the bytes a parser passes to the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
}

impl TextEncoding {
    /// Canonical name, as recorded in the table metadata
    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
            TextEncoding::Latin1 => "ISO-8859-1",
        }
    }

    /// Convert a token to UTF-8
    ///
    /// Valid UTF-8 input is borrowed unchanged.
    pub fn to_utf8<'a>(self, input: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        match self {
            TextEncoding::Utf8 => match std::str::from_utf8(input) {
                Ok(_) => Ok(Cow::Borrowed(input)),
                Err(e) => Err(self.error(e.to_string())),
            },
            TextEncoding::Utf16Le => self.decode_utf16(input, u16::from_le_bytes),
            TextEncoding::Utf16Be => self.decode_utf16(input, u16::from_be_bytes),
            TextEncoding::Latin1 => {
                if input.is_ascii() {
                    return Ok(Cow::Borrowed(input));
                }
                let s: String = input.iter().map(|&b| b as char).collect();
                Ok(Cow::Owned(s.into_bytes()))
            }
        }
    }

    fn decode_utf16<'a>(
        self,
        input: &'a [u8],
        unit: fn([u8; 2]) -> u16,
    ) -> Result<Cow<'a, [u8]>> {
        if input.len() % 2 != 0 {
            return Err(self.error("odd number of bytes".to_string()));
        }

        let code_units: Vec<u16> = input
            .chunks_exact(2)
            .map(|chunk| unit([chunk[0], chunk[1]]))
            .collect();

        String::from_utf16(&code_units)
            .map(|s| Cow::Owned(s.into_bytes()))
            .map_err(|e| self.error(e.to_string()))
    }

    fn error(self, message: String) -> BuildError {
        BuildError::Encoding {
            encoding: self.name(),
            message,
        }
    }
}
