// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Device Configuration Data engine.
//!
//! A DCD segment is an ordered program of write/check/nop/unlock commands
//! executed by the ROM before any code runs. The segment round-trips between
//! the binary container form and a line-oriented text form.

use std::fmt;

use crate::core::header::{Header, HeaderError, SegTag};

pub mod commands;
pub mod text;

pub use commands::{CheckData, CheckOps, DataWidth, DcdCommand, Engine, Unlock, WriteData, WriteOps};

/// Hard ceiling on the DCD segment size, headers included. The ROM rejects
/// anything larger.
pub const DCD_MAX_SIZE: usize = 1768;

/// DCD engine errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    MalformedHeader(String),
    UnknownCommandTag(u8),
    OversizeSegment(usize),
    InvalidWidth(u8),
    InvalidOps(u8),
    BadAlignment { address: u32, width: u8 },
    UnknownEngine(String),
    Syntax { line: usize, message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedHeader(msg) => write!(f, "malformed header: {msg}"),
            Error::UnknownCommandTag(tag) => write!(f, "unknown command tag 0x{tag:02X}"),
            Error::OversizeSegment(size) => {
                write!(f, "DCD segment of {size} bytes exceeds the {DCD_MAX_SIZE} byte limit")
            }
            Error::InvalidWidth(code) => write!(f, "invalid access width code {code}"),
            Error::InvalidOps(code) => write!(f, "invalid operation code {code}"),
            Error::BadAlignment { address, width } => {
                write!(f, "address 0x{address:08X} is not aligned to {width} bytes")
            }
            Error::UnknownEngine(name) => write!(f, "unknown engine {name}"),
            Error::Syntax { line, message } => write!(f, "line {line}: {message}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<HeaderError> for Error {
    fn from(err: HeaderError) -> Self {
        Error::MalformedHeader(err.to_string())
    }
}

/// DCD segment: version byte plus the ordered command program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegDcd {
    /// Header param byte; 0x41 on v6/v7 parts, 0x43 on v8 parts.
    pub version: u8,
    commands: Vec<DcdCommand>,
}

impl Default for SegDcd {
    fn default() -> Self {
        Self::new(0x41)
    }
}

impl SegDcd {
    pub fn new(version: u8) -> Self {
        Self {
            version,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[DcdCommand] {
        &self.commands
    }

    /// Total binary size, segment header included.
    pub fn size(&self) -> usize {
        Header::SIZE + self.commands.iter().map(DcdCommand::size).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Append a command, enforcing the segment ceiling.
    pub fn push(&mut self, cmd: DcdCommand) -> Result<(), Error> {
        let new_size = self.size() + cmd.size();
        if new_size > DCD_MAX_SIZE {
            return Err(Error::OversizeSegment(new_size));
        }
        self.commands.push(cmd);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Serialize to the binary container form.
    pub fn export(&self) -> Vec<u8> {
        let mut header = Header::new(SegTag::Dcd.value(), self.version);
        header.length = self.size() as u16;
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&header.export());
        for cmd in &self.commands {
            cmd.export_into(&mut out);
        }
        out
    }

    /// Parse the binary container form.
    ///
    /// The input must start with the DCD segment header; trailing bytes
    /// beyond the declared length are ignored.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let header = Header::parse(data, 0, Some(SegTag::Dcd.value()))?;
        let total = header.length as usize;
        if total > DCD_MAX_SIZE {
            return Err(Error::OversizeSegment(total));
        }
        if total > data.len() {
            return Err(Error::MalformedHeader(format!(
                "DCD header declares {total} bytes, input has {}",
                data.len()
            )));
        }
        let mut segment = Self::new(header.param);
        let mut index = Header::SIZE;
        while index < total {
            let cmd = DcdCommand::parse(data, index)?;
            index += cmd.size();
            segment.commands.push(cmd);
        }
        Ok(segment)
    }

    /// Parse the line-oriented text form. See [`text`].
    pub fn parse_text(input: &str) -> Result<Self, Error> {
        text::parse(input)
    }

    /// Emit the canonical text form. See [`text`].
    pub fn export_text(&self) -> String {
        text::emit(self)
    }

    /// Human-readable command listing.
    pub fn info(&self) -> String {
        let mut out = String::new();
        for cmd in &self.commands {
            match cmd {
                DcdCommand::WriteData(write) => {
                    out.push_str(&format!(
                        "Write Data Command (Ops: {}, Bytes: {})\n",
                        write.ops.name(),
                        write.width.bytes()
                    ));
                    for (address, value) in write.entries() {
                        out.push_str(&format!(
                            "- Address: 0x{address:08X}, Value: 0x{value:08X}\n"
                        ));
                    }
                }
                DcdCommand::CheckData(check) => {
                    out.push_str(&format!(
                        "Check Data Command (Ops: {}, Bytes: {})\n",
                        check.ops.name(),
                        check.width.bytes()
                    ));
                    out.push_str(&format!(
                        "- Address: 0x{:08X}, Mask: 0x{:08X}",
                        check.address, check.mask
                    ));
                    if let Some(count) = check.count {
                        out.push_str(&format!(", Count: {count}"));
                    }
                    out.push('\n');
                }
                DcdCommand::Nop => out.push_str("NOP Command\n"),
                DcdCommand::Unlock(unlock) => {
                    out.push_str(&format!(
                        "Unlock Command (Engine: {})\n",
                        unlock.engine.name()
                    ));
                    for (ix, value) in unlock.values.iter().enumerate() {
                        out.push_str(&format!(" {ix:02}) Value: 0x{value:08X}\n"));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SegDcd {
        let mut dcd = SegDcd::new(0x41);
        let mut write = WriteData::new(WriteOps::WriteValue, DataWidth::Word);
        write.push(0x3034_0004, 0x4F40_0005).unwrap();
        write.push(0x3039_1000, 0x0000_0002).unwrap();
        dcd.push(DcdCommand::WriteData(write)).unwrap();
        dcd.push(DcdCommand::Nop).unwrap();
        dcd
    }

    #[test]
    fn binary_roundtrip_is_byte_exact() {
        let dcd = sample();
        let raw = dcd.export();
        assert_eq!(raw.len(), dcd.size());
        let back = SegDcd::parse(&raw).unwrap();
        assert_eq!(back, dcd);
        assert_eq!(back.export(), raw);
    }

    #[test]
    fn segment_header_carries_total_length() {
        let raw = sample().export();
        assert_eq!(raw[0], 0xD2);
        assert_eq!(u16::from_be_bytes([raw[1], raw[2]]) as usize, raw.len());
        assert_eq!(raw[3], 0x41);
    }

    #[test]
    fn ceiling_is_enforced_on_push() {
        let mut dcd = SegDcd::new(0x41);
        // 220 write records of 8 bytes each plus headers stay just below the
        // ceiling; the next one crosses it.
        let mut write = WriteData::new(WriteOps::WriteValue, DataWidth::Word);
        for ix in 0..220u32 {
            write.push(ix * 4, 0).unwrap();
        }
        dcd.push(DcdCommand::WriteData(write)).unwrap();
        assert_eq!(dcd.size(), 4 + 4 + 220 * 8);
        let mut filler = WriteData::new(WriteOps::WriteValue, DataWidth::Word);
        filler.push(0, 0).unwrap();
        let err = dcd.push(DcdCommand::WriteData(filler)).unwrap_err();
        assert!(matches!(err, Error::OversizeSegment(_)));
    }

    #[test]
    fn parse_rejects_oversize_header() {
        let mut raw = sample().export();
        let bogus = (DCD_MAX_SIZE + 1) as u16;
        raw[1..3].copy_from_slice(&bogus.to_be_bytes());
        assert!(matches!(
            SegDcd::parse(&raw).unwrap_err(),
            Error::OversizeSegment(1769)
        ));
    }

    #[test]
    fn parse_rejects_declared_length_past_input() {
        let mut raw = sample().export();
        let bogus = (raw.len() + 8) as u16;
        raw[1..3].copy_from_slice(&bogus.to_be_bytes());
        assert!(matches!(
            SegDcd::parse(&raw).unwrap_err(),
            Error::MalformedHeader(_)
        ));
    }
}
