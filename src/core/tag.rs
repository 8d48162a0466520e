//! Four-byte identifiers for containers, components, decoders, and flash regions
//!
//! Tags are short ASCII (or binary) names, not cryptographic signatures. On
//! storage they are four raw bytes; they compare bytewise.

use crate::error::{BootError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 4-byte tag such as `IPFW`, `PYBK` or `LZ4 `
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag([u8; 4]);

impl Tag {
    pub const LEN: usize = 4;

    pub const fn new(bytes: &[u8; 4]) -> Self {
        Tag(*bytes)
    }

    /// Read a tag from the first four bytes of `bytes`
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 4] = bytes.get(..Self::LEN)?.try_into().ok()?;
        Some(Tag(raw))
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub fn from_u32(value: u32) -> Self {
        Tag(value.to_le_bytes())
    }

    fn is_printable(&self) -> bool {
        self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_printable() {
            for b in self.0 {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08x}", self.to_u32())
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self)
    }
}

impl FromStr for Tag {
    type Err = BootError;

    /// Parse a four-character ASCII tag, or `0x` followed by eight hex digits
    fn from_str(s: &str) -> Result<Self> {
        if let Some(hex_value) = s.strip_prefix("0x").filter(|h| h.len() == 8) {
            let value = u32::from_str_radix(hex_value, 16)
                .map_err(|e| BootError::Config(format!("invalid tag '{}': {}", s, e)))?;
            return Ok(Tag::from_u32(value));
        }

        let bytes = s.as_bytes();
        if bytes.len() != Self::LEN || !s.is_ascii() {
            return Err(BootError::Config(format!(
                "invalid tag '{}': expected exactly 4 ASCII characters",
                s
            )));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(Tag(raw))
    }
}

impl TryFrom<String> for Tag {
    type Error = BootError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}

impl From<[u8; 4]> for Tag {
    fn from(raw: [u8; 4]) -> Self {
        Tag(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ascii() {
        let tag: Tag = "PYBK".parse().unwrap();
        assert_eq!(tag, Tag::new(b"PYBK"));
        assert_eq!(tag.to_string(), "PYBK");
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!("PYB".parse::<Tag>().is_err());
        assert!("PYBKX".parse::<Tag>().is_err());
    }

    #[test]
    fn test_parse_hex() {
        let tag: Tag = "0x4b425950".parse().unwrap();
        assert_eq!(tag, Tag::new(b"PYBK"));
    }

    #[test]
    fn test_ascii_tag_starting_with_hex_prefix() {
        let tag = Tag::new(b"0x12");
        assert_eq!(tag.to_string(), "0x12");
        assert_eq!("0x12".parse::<Tag>().unwrap(), tag);

        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(serde_json::from_str::<Tag>(&json).unwrap(), tag);
    }

    #[test]
    fn test_hex_form_needs_eight_digits() {
        assert!("0x123".parse::<Tag>().is_err());
        assert!("0x123456789".parse::<Tag>().is_err());
        let tag = Tag::from_u32(3);
        assert_eq!(tag.to_string().parse::<Tag>().unwrap(), tag);
    }

    #[test]
    fn test_u32_round_trip_is_little_endian() {
        let tag = Tag::new(b"LZ4 ");
        assert_eq!(tag.to_u32().to_le_bytes(), *b"LZ4 ");
        assert_eq!(Tag::from_u32(tag.to_u32()), tag);
    }

    #[test]
    fn test_non_printable_display() {
        let tag = Tag::from_u32(3);
        assert_eq!(tag.to_string(), "0x00000003");
    }

    #[test]
    fn test_from_slice_short() {
        assert!(Tag::from_slice(b"AB").is_none());
        assert_eq!(Tag::from_slice(b"ABCDEF"), Some(Tag::new(b"ABCD")));
    }
}
