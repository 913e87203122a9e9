//! Decoder for the fixed 64-byte preamble of a storage index file
//!
//! Layout:
//!
//! | bytes  | content                                   |
//! |--------|-------------------------------------------|
//! | 0..32  | ASCII version string                      |
//! | 32..35 | major, minor, patch as ASCII digits       |
//! | 36     | endianness (0 little, 1 big)              |
//! | 37     | format version                            |
//! | 38     | active flag (writer still open)           |
//! | 39     | metadata order (0 sorted, 1 unsorted)     |

use anyhow::{anyhow, Result};

pub const HEADER_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BpHeader {
    pub version_string: String,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub endianness: Endianness,
    pub format_version: u8,
    pub active: bool,
    pub sorted_metadata: bool,
}

impl BpHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(anyhow!(
                "Header needs {} bytes, got {}",
                HEADER_LEN,
                bytes.len()
            ));
        }

        let version_string = String::from_utf8_lossy(&bytes[0..32])
            .trim_end_matches(|c: char| c == '\0' || c == ' ')
            .to_string();

        let digit = |pos: usize| -> Result<u8> {
            let b = bytes[pos];
            if b.is_ascii_digit() {
                Ok(b - b'0')
            } else {
                Err(anyhow!("Byte {} is not a version digit: {:#04x}", pos, b))
            }
        };

        let endianness = match bytes[36] {
            0 => Endianness::Little,
            1 => Endianness::Big,
            other => return Err(anyhow!("Invalid endianness flag {}", other)),
        };

        let sorted_metadata = match bytes[39] {
            0 => true,
            1 => false,
            other => return Err(anyhow!("Invalid metadata order flag {}", other)),
        };

        Ok(Self {
            version_string,
            major: digit(32)?,
            minor: digit(33)?,
            patch: digit(34)?,
            endianness,
            format_version: bytes[37],
            active: bytes[38] != 0,
            sorted_metadata,
        })
    }

    /// One-line summary used by `info -v`
    pub fn summary(&self) -> String {
        format!(
            "BP{} written by {}.{}.{}, {} endian{}{}",
            self.format_version,
            self.major,
            self.minor,
            self.patch,
            match self.endianness {
                Endianness::Little => "little",
                Endianness::Big => "big",
            },
            if self.active { ", active" } else { "" },
            if self.sorted_metadata { "" } else { ", unsorted metadata" },
        )
    }
}

#[cfg(test)]
pub(crate) fn sample_header(endian: u8, sorted: u8) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_LEN];
    let text = b"ADIOS-BP v2.10.0 Index Table";
    bytes[..text.len()].copy_from_slice(text);
    bytes[32] = b'2';
    bytes[33] = b'1';
    bytes[34] = b'0';
    bytes[36] = endian;
    bytes[37] = 5;
    bytes[38] = 0;
    bytes[39] = sorted;
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        let h = BpHeader::parse(&sample_header(0, 0)).unwrap();
        assert_eq!(h.version_string, "ADIOS-BP v2.10.0 Index Table");
        assert_eq!((h.major, h.minor, h.patch), (2, 1, 0));
        assert_eq!(h.endianness, Endianness::Little);
        assert_eq!(h.format_version, 5);
        assert!(!h.active);
        assert!(h.sorted_metadata);
        assert_eq!(h.summary(), "BP5 written by 2.1.0, little endian");
    }

    #[test]
    fn test_big_endian_unsorted() {
        let h = BpHeader::parse(&sample_header(1, 1)).unwrap();
        assert_eq!(h.endianness, Endianness::Big);
        assert!(!h.sorted_metadata);
    }

    #[test]
    fn test_invalid_flags() {
        assert!(BpHeader::parse(&sample_header(2, 0)).is_err());
        assert!(BpHeader::parse(&sample_header(0, 2)).is_err());
        let mut bad_digit = sample_header(0, 0);
        bad_digit[33] = b'x';
        assert!(BpHeader::parse(&bad_digit).is_err());
    }

    #[test]
    fn test_short_input() {
        assert!(BpHeader::parse(&[0u8; 40]).is_err());
    }
}
