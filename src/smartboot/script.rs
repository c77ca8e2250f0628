// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! BODY command programs and their execution.
//!
//! A recipe's `CMDS` text compiles into a list of device operations with
//! every address and payload resolved up front; execution then drives a
//! connected SDP client and aborts on the first failure.

use crate::dcd::text::parse_u32;
use crate::sdp::{DataFormat, HidTransport, SdpClient};

use super::data::{DataSeg, SegKind};
use super::Error;

/// One resolved device operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootCmd {
    WriteRegister {
        format: DataFormat,
        address: u32,
        value: u32,
    },
    WriteDcd {
        address: u32,
        data: Vec<u8>,
    },
    WriteImage {
        address: u32,
        data: Vec<u8>,
    },
    SkipDcd,
    Jump {
        address: u32,
    },
}

impl BootCmd {
    pub fn describe(&self) -> String {
        match self {
            BootCmd::WriteRegister { address, value, .. } => {
                format!("Write: REG[0x{address:08X}] = 0x{value:08X}")
            }
            BootCmd::WriteDcd { address, data } => {
                format!("Write DCD ({} bytes) to 0x{address:08X}", data.len())
            }
            BootCmd::WriteImage { address, data } => {
                format!("Write image ({} bytes) to 0x{address:08X}", data.len())
            }
            BootCmd::SkipDcd => "Skip DCD segment of the loaded image".into(),
            BootCmd::Jump { address } => format!("Jump to 0x{address:08X} and run"),
        }
    }
}

fn syntax(line: usize, message: impl Into<String>) -> Error {
    Error::Document(format!("CMDS line {line}: {}", message.into()))
}

fn find_segment<'a>(
    segments: &'a [DataSeg],
    name: &str,
) -> Result<(usize, &'a DataSeg), Error> {
    segments
        .iter()
        .enumerate()
        .find(|(_, seg)| seg.name == name)
        .ok_or_else(|| Error::UnknownSegmentRef(name.to_string()))
}

/// Compile a `CMDS` program against the document's resolved segments.
pub fn compile(
    cmds: &str,
    segments: &[DataSeg],
    resolved: &[Vec<u8>],
) -> Result<Vec<BootCmd>, Error> {
    let mut script = Vec::new();
    for (ix, raw_line) in cmds.lines().enumerate() {
        let line_no = ix + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens[0] {
            "WREG" => {
                if tokens.len() != 4 {
                    return Err(syntax(line_no, "WREG needs: bytes address value"));
                }
                let bytes: u32 = tokens[1]
                    .parse()
                    .map_err(|_| syntax(line_no, "invalid access size"))?;
                let format = DataFormat::from_bits(bytes * 8)
                    .ok_or_else(|| syntax(line_no, "access size must be 1, 2 or 4"))?;
                let address =
                    parse_u32(tokens[2]).ok_or_else(|| syntax(line_no, "invalid address"))?;
                let value =
                    parse_u32(tokens[3]).ok_or_else(|| syntax(line_no, "invalid value"))?;
                script.push(BootCmd::WriteRegister {
                    format,
                    address,
                    value,
                });
            }
            "WDCD" => {
                if tokens.len() < 2 || tokens.len() > 3 {
                    return Err(syntax(line_no, "WDCD needs: data_name [address]"));
                }
                let (index, seg) = find_segment(segments, tokens[1])?;
                let bytes = &resolved[index];
                let data = match seg.kind {
                    SegKind::Dcd => bytes.clone(),
                    SegKind::Imx => seg.dcd_bytes(bytes)?,
                    _ => {
                        return Err(syntax(
                            line_no,
                            format!("segment {} holds no DCD", seg.name),
                        ))
                    }
                };
                let address = match tokens.get(2) {
                    Some(raw) => {
                        parse_u32(raw).ok_or_else(|| syntax(line_no, "invalid address"))?
                    }
                    None => seg.addr.ok_or_else(|| {
                        syntax(line_no, format!("ADDR not defined in DATA->{}", seg.name))
                    })?,
                };
                script.push(BootCmd::WriteDcd { address, data });
            }
            "WIMG" => {
                if tokens.len() < 2 || tokens.len() > 3 {
                    return Err(syntax(line_no, "WIMG needs: data_name [address]"));
                }
                let (index, seg) = find_segment(segments, tokens[1])?;
                let bytes = resolved[index].clone();
                let address = match tokens.get(2) {
                    Some(raw) => {
                        parse_u32(raw).ok_or_else(|| syntax(line_no, "invalid address"))?
                    }
                    None => seg.default_address(&bytes).ok_or_else(|| {
                        syntax(line_no, format!("ADDR not defined in DATA->{}", seg.name))
                    })?,
                };
                script.push(BootCmd::WriteImage {
                    address,
                    data: bytes,
                });
            }
            "SDCD" => script.push(BootCmd::SkipDcd),
            "JRUN" => {
                if tokens.len() != 2 {
                    return Err(syntax(line_no, "JRUN needs: address | imx_data_name"));
                }
                let address = match parse_u32(tokens[1]) {
                    Some(address) => address,
                    None => {
                        let (index, seg) = find_segment(segments, tokens[1])?;
                        seg.ivt_address(&resolved[index])?
                    }
                };
                script.push(BootCmd::Jump { address });
            }
            other => return Err(syntax(line_no, format!("unknown command: {other}"))),
        }
    }
    Ok(script)
}

/// Run a compiled script against a connected device. The first error aborts;
/// no compensation is attempted, the target keeps whatever state the
/// completed writes left behind.
pub fn execute<T: HidTransport>(
    client: &mut SdpClient<T>,
    script: &[BootCmd],
) -> Result<(), Error> {
    for (ix, cmd) in script.iter().enumerate() {
        log::info!("{}/{}: {}", ix + 1, script.len(), cmd.describe());
        match cmd {
            BootCmd::WriteRegister {
                format,
                address,
                value,
            } => client.write_register(*address, *value, *format)?,
            BootCmd::WriteDcd { address, data } => client.write_dcd(*address, data)?,
            BootCmd::WriteImage { address, data } => client.write_file(*address, data)?,
            BootCmd::SkipDcd => client.skip_dcd()?,
            BootCmd::Jump { address } => client.jump(*address)?,
        }
    }
    Ok(())
}
