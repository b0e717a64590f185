//! Character encodings understood by [`ConvertibleContent`](super::ConvertibleContent).
//!
//! Decoding is strict: malformed input is reported, never replaced with
//! U+FFFD, so a wrong charset guess surfaces as a conversion error instead of
//! silently corrupting content that is later written back to the cache.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A character encoding.
///
/// # Examples
///
/// ```
/// use respipe::resources::Charset;
///
/// let latin1 = Charset::parse("ISO-8859-1").unwrap();
/// assert_eq!(latin1, Charset::Iso8859_1);
/// assert_eq!(latin1.encode("größe").unwrap(), b"gr\xf6\xdfe");
/// assert_eq!(latin1.decode(b"gr\xf6\xdfe").unwrap(), "größe");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    /// UTF-8.
    #[default]
    Utf8,
    /// UTF-16, big endian, no byte order mark.
    Utf16Be,
    /// UTF-16, little endian, no byte order mark.
    Utf16Le,
    /// ISO-8859-1 (Latin-1).
    Iso8859_1,
    /// 7-bit US-ASCII.
    UsAscii,
}

impl Charset {
    /// Returns the canonical lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16Be => "utf-16be",
            Self::Utf16Le => "utf-16le",
            Self::Iso8859_1 => "iso-8859-1",
            Self::UsAscii => "us-ascii",
        }
    }

    /// Parses a charset name or common alias, case-insensitively.
    pub fn parse(name: &str) -> Option<Charset> {
        match name.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "utf-16be" | "utf16be" => Some(Self::Utf16Be),
            "utf-16le" | "utf16le" => Some(Self::Utf16Le),
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "latin-1" => {
                Some(Self::Iso8859_1)
            },
            "us-ascii" | "ascii" => Some(Self::UsAscii),
            _ => None,
        }
    }

    /// Decodes `bytes` into a string.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed sequence.
    pub fn decode(self, bytes: &[u8]) -> Result<String, String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| e.to_string()),
            Self::Utf16Be | Self::Utf16Le => {
                if bytes.len() % 2 != 0 {
                    return Err(format!("odd number of bytes ({}) for {self}", bytes.len()));
                }
                let units = bytes.chunks_exact(2).map(|pair| {
                    let pair = [pair[0], pair[1]];
                    if self == Self::Utf16Be {
                        u16::from_be_bytes(pair)
                    } else {
                        u16::from_le_bytes(pair)
                    }
                });
                char::decode_utf16(units)
                    .enumerate()
                    .map(|(i, c)| {
                        c.map_err(|e| {
                            format!("unpaired surrogate {:#06x} at unit {i}", e.unpaired_surrogate())
                        })
                    })
                    .collect()
            },
            Self::Iso8859_1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Self::UsAscii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(offset) => Err(format!(
                    "byte {:#04x} at offset {offset} is not ASCII",
                    bytes[offset]
                )),
                None => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            },
        }
    }

    /// Encodes `text` into bytes.
    ///
    /// # Errors
    ///
    /// Returns a description of the first character this charset cannot
    /// represent.
    pub fn encode(self, text: &str) -> Result<Vec<u8>, String> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Utf16Be => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            Self::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Self::Iso8859_1 | Self::UsAscii => {
                let limit = if self == Self::UsAscii { 0x7f } else { 0xff };
                text.chars()
                    .enumerate()
                    .map(|(i, c)| match u8::try_from(u32::from(c)) {
                        Ok(b) if u32::from(b) <= limit => Ok(b),
                        _ => Err(format!("character {c:?} at position {i} is not representable in {self}")),
                    })
                    .collect()
            },
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Charset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Charset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("unknown charset: {raw}")))
    }
}
