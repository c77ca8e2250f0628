// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Line-oriented DCD text form.
//!
//! One command per logical line; `\` continues a line, `#` starts a comment.
//! Command names are accepted in CamelCase (`WriteValue`) and upper-snake
//! (`WRITE_VALUE`) spellings; emit canonicalizes to CamelCase. Consecutive
//! write lines sharing the same operation and width coalesce into a single
//! Write Data record, matching the binary form the ROM expects.

use super::commands::{CheckData, CheckOps, DataWidth, DcdCommand, Engine, Unlock, WriteData, WriteOps};
use super::{Error, SegDcd};

/// Parse an unsigned numeric literal: hex (`0x`), binary (`0b`), octal
/// (`0o`), or decimal. Underscore separators are allowed.
pub fn parse_u32(text: &str) -> Option<u32> {
    let text: String = text.trim().chars().filter(|&c| c != '_').collect();
    let text = text.as_str();
    if text.is_empty() {
        return None;
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        u32::from_str_radix(bin, 2).ok()
    } else if let Some(oct) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
        u32::from_str_radix(oct, 8).ok()
    } else {
        text.parse::<u32>().ok()
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|&c| c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

enum LineCmd {
    Write(WriteOps),
    Check(CheckOps),
    Unlock,
    Nop,
}

fn lookup(name: &str) -> Option<LineCmd> {
    Some(match normalize(name).as_str() {
        "writevalue" => LineCmd::Write(WriteOps::WriteValue),
        "writeclear" | "writevalue1" => LineCmd::Write(WriteOps::WriteClear),
        "clearbitmask" => LineCmd::Write(WriteOps::ClearBitmask),
        "setbitmask" => LineCmd::Write(WriteOps::SetBitmask),
        "checkallclear" => LineCmd::Check(CheckOps::AllClear),
        "checkallset" => LineCmd::Check(CheckOps::AllSet),
        "checkanyclear" => LineCmd::Check(CheckOps::AnyClear),
        "checkanyset" => LineCmd::Check(CheckOps::AnySet),
        "unlock" => LineCmd::Unlock,
        "nop" => LineCmd::Nop,
        _ => return None,
    })
}

fn syntax(line: usize, message: impl Into<String>) -> Error {
    Error::Syntax {
        line,
        message: message.into(),
    }
}

fn width_arg(tokens: &[String], line: usize) -> Result<DataWidth, Error> {
    let raw = tokens
        .get(1)
        .ok_or_else(|| syntax(line, "missing access width"))?;
    let value = parse_u32(raw).ok_or_else(|| syntax(line, format!("invalid width: {raw}")))?;
    let code = u8::try_from(value).map_err(|_| Error::InvalidWidth(u8::MAX))?;
    DataWidth::from_code(code).ok_or(Error::InvalidWidth(code))
}

fn num_arg(tokens: &[String], index: usize, what: &str, line: usize) -> Result<u32, Error> {
    let raw = tokens
        .get(index)
        .ok_or_else(|| syntax(line, format!("missing {what}")))?;
    parse_u32(raw).ok_or_else(|| syntax(line, format!("invalid {what}: {raw}")))
}

fn flush(dcd: &mut SegDcd, pending: &mut Option<WriteData>) -> Result<(), Error> {
    if let Some(write) = pending.take() {
        dcd.push(DcdCommand::WriteData(write))?;
    }
    Ok(())
}

fn dispatch(
    dcd: &mut SegDcd,
    pending: &mut Option<WriteData>,
    tokens: &[String],
    line: usize,
) -> Result<(), Error> {
    let Some(cmd) = lookup(&tokens[0]) else {
        return Err(syntax(line, format!("unknown command: {}", tokens[0])));
    };
    match cmd {
        LineCmd::Write(ops) => {
            if tokens.len() < 4 {
                return Err(syntax(line, "write command needs width, address, value"));
            }
            let width = width_arg(tokens, line)?;
            let address = num_arg(tokens, 2, "address", line)?;
            let value = num_arg(tokens, 3, "value", line)?;
            let matches_pending = pending
                .as_ref()
                .map(|w| w.ops == ops && w.width == width)
                .unwrap_or(false);
            if !matches_pending {
                flush(dcd, pending)?;
                *pending = Some(WriteData::new(ops, width));
            }
            pending
                .as_mut()
                .expect("pending write present")
                .push(address, value)?;
        }
        LineCmd::Check(ops) => {
            flush(dcd, pending)?;
            if tokens.len() < 4 {
                return Err(syntax(line, "check command needs width, address, mask"));
            }
            let width = width_arg(tokens, line)?;
            let address = num_arg(tokens, 2, "address", line)?;
            let mask = num_arg(tokens, 3, "mask", line)?;
            let count = if tokens.len() > 4 {
                Some(num_arg(tokens, 4, "count", line)?)
            } else {
                None
            };
            dcd.push(DcdCommand::CheckData(CheckData::new(
                ops, width, address, mask, count,
            )?))?;
        }
        LineCmd::Unlock => {
            flush(dcd, pending)?;
            let engine_name = tokens
                .get(1)
                .ok_or_else(|| syntax(line, "unlock command needs an engine name"))?;
            let engine = Engine::from_name(engine_name)
                .ok_or_else(|| Error::UnknownEngine(engine_name.clone()))?;
            let mut values = Vec::new();
            for raw in &tokens[2..] {
                values.push(
                    parse_u32(raw).ok_or_else(|| syntax(line, format!("invalid value: {raw}")))?,
                );
            }
            dcd.push(DcdCommand::Unlock(Unlock::new(engine, values)))?;
        }
        LineCmd::Nop => {
            flush(dcd, pending)?;
            dcd.push(DcdCommand::Nop)?;
        }
    }
    Ok(())
}

/// Parse the text form into a DCD segment.
pub fn parse(input: &str) -> Result<SegDcd, Error> {
    let mut dcd = SegDcd::new(0x41);
    let mut pending: Option<WriteData> = None;
    let mut tokens: Vec<String> = Vec::new();
    let mut start_line = 0usize;

    for (ix, raw_line) in input.lines().enumerate() {
        let line_no = ix + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if tokens.is_empty() {
            start_line = line_no;
        }
        tokens.extend(line.split_whitespace().map(str::to_string));
        if tokens.last().map(|t| t == "\\").unwrap_or(false) {
            tokens.pop();
            continue;
        }
        dispatch(&mut dcd, &mut pending, &tokens, start_line)?;
        tokens.clear();
    }
    if !tokens.is_empty() {
        dispatch(&mut dcd, &mut pending, &tokens, start_line)?;
    }
    flush(&mut dcd, &mut pending)?;
    Ok(dcd)
}

/// Emit the canonical text form.
pub fn emit(dcd: &SegDcd) -> String {
    let mut out = String::new();
    for cmd in dcd.commands() {
        match cmd {
            DcdCommand::WriteData(write) => {
                for (address, value) in write.entries() {
                    out.push_str(&format!(
                        "{} {} 0x{address:08X} 0x{value:08X}\n",
                        write.ops.name(),
                        write.width.bytes()
                    ));
                }
            }
            DcdCommand::CheckData(check) => {
                out.push_str(&format!(
                    "{} {} 0x{:08X} 0x{:08X}",
                    check.ops.name(),
                    check.width.bytes(),
                    check.address,
                    check.mask
                ));
                if let Some(count) = check.count {
                    out.push_str(&format!(" {count}"));
                }
                out.push('\n');
            }
            DcdCommand::Unlock(unlock) => {
                out.push_str(&format!("Unlock {}", unlock.engine.name()));
                for (ix, value) in unlock.values.iter().enumerate() {
                    if ix != 0 && ix % 6 == 0 {
                        out.push_str(" \\\n");
                    }
                    out.push_str(&format!(" 0x{value:08X}"));
                }
                out.push('\n');
            }
            DcdCommand::Nop => out.push_str("Nop\n"),
        }
        out.push('\n');
    }
    out
}
