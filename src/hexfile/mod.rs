// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Intel-HEX and Motorola S-record inputs.
//!
//! Both formats parse to a flat `{base_addr, bytes, entry?}` payload. The
//! payload must be contiguous; address gaps are an error unless the caller
//! supplies a fill byte.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    BadRecord { line: usize, message: String },
    Checksum { line: usize },
    LengthMismatch { from: u32, to: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadRecord { line, message } => write!(f, "line {line}: {message}"),
            Error::Checksum { line } => write!(f, "line {line}: checksum mismatch"),
            Error::LengthMismatch { from, to } => write!(
                f,
                "payload is not contiguous: gap between 0x{from:08X} and 0x{to:08X}"
            ),
        }
    }
}

impl std::error::Error for Error {}

/// A flat memory payload recovered from a hex file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexImage {
    pub base_addr: u32,
    pub data: Vec<u8>,
    pub entry: Option<u32>,
}

fn bad(line: usize, message: impl Into<String>) -> Error {
    Error::BadRecord {
        line,
        message: message.into(),
    }
}

fn hex_bytes(text: &str, line: usize) -> Result<Vec<u8>, Error> {
    if text.len() % 2 != 0 {
        return Err(bad(line, "odd number of hex digits"));
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    for ix in (0..text.len()).step_by(2) {
        let byte = u8::from_str_radix(&text[ix..ix + 2], 16)
            .map_err(|_| bad(line, "invalid hex digit"))?;
        out.push(byte);
    }
    Ok(out)
}

/// Merge `(address, bytes)` chunks into one contiguous payload.
fn assemble(mut chunks: Vec<(u32, Vec<u8>)>, entry: Option<u32>, fill: Option<u8>) -> Result<HexImage, Error> {
    chunks.retain(|(_, data)| !data.is_empty());
    if chunks.is_empty() {
        return Ok(HexImage {
            base_addr: 0,
            data: Vec::new(),
            entry,
        });
    }
    chunks.sort_by_key(|(address, _)| *address);
    let base = chunks[0].0;
    let end = chunks
        .iter()
        .map(|(address, data)| *address as u64 + data.len() as u64)
        .max()
        .unwrap_or(u64::from(base));
    let mut data = vec![fill.unwrap_or(0); (end - u64::from(base)) as usize];
    let mut cursor = u64::from(base);
    for (address, bytes) in &chunks {
        if u64::from(*address) > cursor && fill.is_none() {
            return Err(Error::LengthMismatch {
                from: cursor as u32,
                to: *address,
            });
        }
        let offset = (*address - base) as usize;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        cursor = cursor.max(u64::from(*address) + bytes.len() as u64);
    }
    Ok(HexImage {
        base_addr: base,
        data,
        entry,
    })
}

/// Parse Intel-HEX text. Record types 00/01/02/03/04/05 are understood.
pub fn parse_ihex(text: &str, fill: Option<u8>) -> Result<HexImage, Error> {
    let mut chunks: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut upper: u32 = 0;
    let mut entry: Option<u32> = None;
    for (ix, raw_line) in text.lines().enumerate() {
        let line_no = ix + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(body) = line.strip_prefix(':') else {
            return Err(bad(line_no, "record must start with ':'"));
        };
        let bytes = hex_bytes(body, line_no)?;
        if bytes.len() < 5 {
            return Err(bad(line_no, "record too short"));
        }
        let count = bytes[0] as usize;
        if bytes.len() != count + 5 {
            return Err(bad(line_no, "record length field mismatch"));
        }
        let sum: u8 = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != 0 {
            return Err(Error::Checksum { line: line_no });
        }
        let address = u32::from(u16::from_be_bytes([bytes[1], bytes[2]]));
        let payload = &bytes[4..4 + count];
        match bytes[3] {
            0x00 => chunks.push((upper + address, payload.to_vec())),
            0x01 => break,
            0x02 => {
                if count != 2 {
                    return Err(bad(line_no, "extended segment record needs 2 bytes"));
                }
                upper = u32::from(u16::from_be_bytes([payload[0], payload[1]])) << 4;
            }
            0x03 => {
                if count != 4 {
                    return Err(bad(line_no, "start segment record needs 4 bytes"));
                }
                let cs = u32::from(u16::from_be_bytes([payload[0], payload[1]]));
                let ip = u32::from(u16::from_be_bytes([payload[2], payload[3]]));
                entry = Some((cs << 4) + ip);
            }
            0x04 => {
                if count != 2 {
                    return Err(bad(line_no, "extended linear record needs 2 bytes"));
                }
                upper = u32::from(u16::from_be_bytes([payload[0], payload[1]])) << 16;
            }
            0x05 => {
                if count != 4 {
                    return Err(bad(line_no, "start linear record needs 4 bytes"));
                }
                entry = Some(u32::from_be_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ]));
            }
            other => return Err(bad(line_no, format!("unknown record type 0x{other:02X}"))),
        }
    }
    assemble(chunks, entry, fill)
}

/// Parse Motorola S-record text. S1/S2/S3 carry data, S7/S8/S9 the entry.
pub fn parse_srec(text: &str, fill: Option<u8>) -> Result<HexImage, Error> {
    let mut chunks: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut entry: Option<u32> = None;
    for (ix, raw_line) in text.lines().enumerate() {
        let line_no = ix + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let mut chars = line.chars();
        if chars.next() != Some('S') {
            return Err(bad(line_no, "record must start with 'S'"));
        }
        let kind = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| bad(line_no, "invalid record type"))?;
        let bytes = hex_bytes(&line[2..], line_no)?;
        if bytes.is_empty() || bytes.len() != bytes[0] as usize + 1 {
            return Err(bad(line_no, "record length field mismatch"));
        }
        let sum: u8 = bytes[..bytes.len() - 1]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        if !sum != bytes[bytes.len() - 1] {
            return Err(Error::Checksum { line: line_no });
        }
        let addr_size = match kind {
            0 | 5 => {
                // header and count records carry no payload of interest
                continue;
            }
            1 | 9 => 2,
            2 | 8 => 3,
            3 | 7 => 4,
            6 => continue,
            other => return Err(bad(line_no, format!("unknown record type S{other}"))),
        };
        if bytes.len() < 1 + addr_size + 1 {
            return Err(bad(line_no, "record too short"));
        }
        let mut address = 0u32;
        for b in &bytes[1..1 + addr_size] {
            address = (address << 8) | u32::from(*b);
        }
        let payload = &bytes[1 + addr_size..bytes.len() - 1];
        match kind {
            1 | 2 | 3 => chunks.push((address, payload.to_vec())),
            7 | 8 | 9 => entry = Some(address),
            _ => unreachable!(),
        }
    }
    assemble(chunks, entry, fill)
}

/// Parse either format, picking by the first record character.
pub fn parse(text: &str, fill: Option<u8>) -> Result<HexImage, Error> {
    match text.trim_start().chars().next() {
        Some(':') => parse_ihex(text, fill),
        Some('S') => parse_srec(text, fill),
        _ => Err(bad(1, "neither an Intel-HEX nor an S-record file")),
    }
}

/// Emit Intel-HEX covering the payload, 32 bytes per record.
pub fn export_ihex(image: &HexImage) -> String {
    const LINE_LIMIT: usize = 32;
    let mut out = String::new();
    let mut upper: Option<u16> = None;
    let mut emit = |bytes: &[u8]| {
        let mut sum = 0u8;
        for b in bytes {
            sum = sum.wrapping_add(*b);
        }
        let checksum = (!sum).wrapping_add(1);
        out.push(':');
        for b in bytes {
            out.push_str(&format!("{b:02X}"));
        }
        out.push_str(&format!("{checksum:02X}\n"));
    };
    for (ix, chunk) in image.data.chunks(LINE_LIMIT).enumerate() {
        let address = image.base_addr + (ix * LINE_LIMIT) as u32;
        let ela = (address >> 16) as u16;
        if upper != Some(ela) {
            if ela != 0 || upper.is_some() {
                let ela_bytes = ela.to_be_bytes();
                emit(&[0x02, 0x00, 0x00, 0x04, ela_bytes[0], ela_bytes[1]]);
            }
            upper = Some(ela);
        }
        let low = (address & 0xFFFF) as u16;
        let mut record = vec![chunk.len() as u8, (low >> 8) as u8, (low & 0xFF) as u8, 0x00];
        record.extend_from_slice(chunk);
        emit(&record);
    }
    if let Some(entry) = image.entry {
        let e = entry.to_be_bytes();
        emit(&[0x04, 0x00, 0x00, 0x05, e[0], e[1], e[2], e[3]]);
    }
    out.push_str(":00000001FF\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihex_roundtrip_recovers_payload() {
        let image = HexImage {
            base_addr: 0x0087_0000,
            data: (0..200u16).map(|v| v as u8).collect(),
            entry: Some(0x0087_0040),
        };
        let text = export_ihex(&image);
        let back = parse_ihex(&text, None).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn ihex_detects_bad_checksum() {
        let mut text = export_ihex(&HexImage {
            base_addr: 0,
            data: vec![1, 2, 3, 4],
            entry: None,
        });
        // corrupt one data digit without touching the checksum
        text = text.replacen("0102", "0103", 1);
        assert!(matches!(
            parse_ihex(&text, None).unwrap_err(),
            Error::Checksum { .. }
        ));
    }

    #[test]
    fn ihex_gap_is_length_mismatch_without_fill() {
        let text = "\
:020000040000FA
:041000000011223386
:041020004455667756
:00000001FF
";
        let err = parse_ihex(text, None).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { from: 0x1004, to: 0x1020 }));
        let filled = parse_ihex(text, Some(0xFF)).unwrap();
        assert_eq!(filled.base_addr, 0x1000);
        assert_eq!(filled.data.len(), 0x24);
        assert_eq!(filled.data[4], 0xFF);
        assert_eq!(filled.data[0x20], 0x44);
    }

    #[test]
    fn srec_basic_payload_and_entry() {
        // S1: 2-byte address records; S9: entry
        let text = "\
S00600004844521B
S107100001020304DE
S9031000EC
";
        let image = parse_srec(text, None).unwrap();
        assert_eq!(image.base_addr, 0x1000);
        assert_eq!(image.data, vec![1, 2, 3, 4]);
        assert_eq!(image.entry, Some(0x1000));
    }

    #[test]
    fn srec_s3_wide_addresses() {
        // S3: 4-byte address, payload AA BB
        let text = "S30780000000AABB13\nS705800000007A\n";
        let image = parse_srec(text, None).unwrap();
        assert_eq!(image.base_addr, 0x8000_0000);
        assert_eq!(image.data, vec![0xAA, 0xBB]);
        assert_eq!(image.entry, Some(0x8000_0000));
    }

    #[test]
    fn srec_checksum_is_verified() {
        let text = "S107100001020304DD\n";
        assert!(matches!(
            parse_srec(text, None).unwrap_err(),
            Error::Checksum { line: 1 }
        ));
    }

    #[test]
    fn auto_dispatch_by_first_character() {
        assert!(parse("S9031000EC\n", None).is_ok());
        assert!(parse(":00000001FF\n", None).is_ok());
        assert!(parse("GARBAGE", None).is_err());
    }

    #[test]
    fn ihex_crossing_64k_boundary_emits_ela() {
        let image = HexImage {
            base_addr: 0x0000_FFF0,
            data: vec![0x5A; 0x40],
            entry: None,
        };
        let text = export_ihex(&image);
        assert!(text.contains(":020000040001F9"));
        let back = parse_ihex(&text, None).unwrap();
        assert_eq!(back, image);
    }
}
