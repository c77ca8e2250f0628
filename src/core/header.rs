// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Segment and command record headers.
//!
//! Every record in the boot container starts with the same 4-byte header:
//! a tag byte, a 16-bit header-inclusive length and a parameter byte. The
//! ROM convention stores the length big-endian; the v4-era container
//! lookahead uses the byte-reversed little-endian flavor.

use std::fmt;

/// Segment tags used across the container generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegTag {
    /// Device Configuration Data.
    Dcd = 0xD2,
    /// Command Sequence File data.
    Csf = 0xD4,
    /// Image Vector Table, container version 2 (v6/v7, v8M, RT).
    Ivt2 = 0xD1,
    /// Certificate record.
    Crt = 0xD7,
    /// Signature record.
    Sig = 0xD8,
    /// Image Vector Table, container version 3 (v8QXP A0).
    Ivt3 = 0xDE,
    /// Boot images container (v8 B0 silicon).
    Bic1 = 0x87,
}

impl SegTag {
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Command tags for DCD and CSF sub-records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdTag {
    WriteData = 0xCC,
    CheckData = 0xCF,
    Nop = 0xC0,
    Unlock = 0xB2,
    Set = 0xB1,
    Initialize = 0xB4,
    InstallKey = 0xBE,
    AuthData = 0xCA,
}

impl CmdTag {
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Error raised while reading a record header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer bytes available than the fixed header needs.
    Truncated { have: usize },
    /// The tag byte did not match the required tag.
    UnexpectedTag { found: u8, expected: u8 },
    /// The length field is smaller than the header itself.
    ShortLength { length: u16 },
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::Truncated { have } => {
                write!(f, "record header needs {} bytes, found {}", Header::SIZE, have)
            }
            HeaderError::UnexpectedTag { found, expected } => {
                write!(f, "invalid header tag 0x{found:02X}, expected 0x{expected:02X}")
            }
            HeaderError::ShortLength { length } => {
                write!(f, "header length {length} is shorter than the header itself")
            }
        }
    }
}

impl std::error::Error for HeaderError {}

/// The shared `{tag, length, param}` record header (big-endian length).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: u8,
    pub param: u8,
    pub length: u16,
}

impl Header {
    pub const SIZE: usize = 4;

    /// New header covering only itself; callers grow `length` as payload
    /// is attached.
    pub fn new(tag: u8, param: u8) -> Self {
        Self {
            tag,
            param,
            length: Self::SIZE as u16,
        }
    }

    pub fn export(&self) -> [u8; Self::SIZE] {
        let len = self.length.to_be_bytes();
        [self.tag, len[0], len[1], self.param]
    }

    /// Read a header at `offset`, optionally insisting on a tag value.
    pub fn parse(data: &[u8], offset: usize, required_tag: Option<u8>) -> Result<Self, HeaderError> {
        let Some(raw) = data.get(offset..offset + Self::SIZE) else {
            return Err(HeaderError::Truncated {
                have: data.len().saturating_sub(offset),
            });
        };
        let header = Self {
            tag: raw[0],
            length: u16::from_be_bytes([raw[1], raw[2]]),
            param: raw[3],
        };
        if let Some(expected) = required_tag {
            if header.tag != expected {
                return Err(HeaderError::UnexpectedTag {
                    found: header.tag,
                    expected,
                });
            }
        }
        if (header.length as usize) < Self::SIZE {
            return Err(HeaderError::ShortLength {
                length: header.length,
            });
        }
        Ok(header)
    }
}

/// Byte-reversed header used by the v4-era boot-images container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header2 {
    pub tag: u8,
    pub param: u8,
    pub length: u16,
}

impl Header2 {
    pub const SIZE: usize = 4;

    pub fn new(tag: u8, param: u8) -> Self {
        Self {
            tag,
            param,
            length: Self::SIZE as u16,
        }
    }

    pub fn export(&self) -> [u8; Self::SIZE] {
        let len = self.length.to_le_bytes();
        [self.param, len[0], len[1], self.tag]
    }

    pub fn parse(data: &[u8], offset: usize, required_tag: Option<u8>) -> Result<Self, HeaderError> {
        let Some(raw) = data.get(offset..offset + Self::SIZE) else {
            return Err(HeaderError::Truncated {
                have: data.len().saturating_sub(offset),
            });
        };
        let header = Self {
            param: raw[0],
            length: u16::from_le_bytes([raw[1], raw[2]]),
            tag: raw[3],
        };
        if let Some(expected) = required_tag {
            if header.tag != expected {
                return Err(HeaderError::UnexpectedTag {
                    found: header.tag,
                    expected,
                });
            }
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = Header {
            tag: SegTag::Dcd.value(),
            param: 0x41,
            length: 0x01D0,
        };
        let raw = header.export();
        assert_eq!(raw, [0xD2, 0x01, 0xD0, 0x41]);
        let back = Header::parse(&raw, 0, Some(SegTag::Dcd.value())).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn header_rejects_wrong_tag() {
        let raw = [0xD2, 0x00, 0x04, 0x41];
        let err = Header::parse(&raw, 0, Some(SegTag::Ivt2.value())).unwrap_err();
        assert_eq!(
            err,
            HeaderError::UnexpectedTag {
                found: 0xD2,
                expected: 0xD1
            }
        );
    }

    #[test]
    fn header_rejects_truncated_input() {
        let raw = [0xD2, 0x00];
        assert_eq!(
            Header::parse(&raw, 0, None).unwrap_err(),
            HeaderError::Truncated { have: 2 }
        );
    }

    #[test]
    fn header2_is_byte_reversed() {
        let header = Header2 {
            tag: SegTag::Bic1.value(),
            param: 0x00,
            length: 0x0400,
        };
        assert_eq!(header.export(), [0x00, 0x00, 0x04, 0x87]);
        let back = Header2::parse(&header.export(), 0, Some(SegTag::Bic1.value())).unwrap();
        assert_eq!(back, header);
    }
}
