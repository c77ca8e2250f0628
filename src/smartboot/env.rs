// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! U-Boot environment patching inside firmware images.
//!
//! The environment block is a CRC-32 word followed by `key=value\0` entries,
//! a terminating NUL and zero fill. The marker entry (`bootdelay=` by
//! default) names the first entry of the block; the block is rewritten in
//! place and re-sealed when a valid CRC precedes it.

use std::fmt;

use crate::core::crc::crc32;

/// Default marker entry used to locate the environment block.
pub const DEFAULT_MARK: &str = "bootdelay=";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnvMode {
    #[default]
    Disabled,
    /// Update and insert the given entries, keep the rest.
    Merge,
    /// Drop the existing environment, keep only the given entries.
    Replace,
}

impl EnvMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "disabled" => Some(Self::Disabled),
            "merge" => Some(Self::Merge),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    MarkNotFound(String),
    Overflow { need: usize, room: usize },
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::MarkNotFound(mark) => {
                write!(f, "environment marker {mark:?} not found in image")
            }
            EnvError::Overflow { need, room } => write!(
                f,
                "patched environment needs {need} bytes, block holds {room}"
            ),
        }
    }
}

impl std::error::Error for EnvError {}

/// Expand from the marker to the `[start, end)` span of the block. The
/// marker names the block's first entry; the block runs through the entry
/// terminator and its zero fill.
fn find_region(image: &[u8], mark_at: usize) -> (usize, usize) {
    let start = mark_at;
    let mut end = mark_at;
    while end < image.len() {
        if image[end] == 0 && (end + 1 >= image.len() || image[end + 1] == 0) {
            end += 1;
            break;
        }
        end += 1;
    }
    while end < image.len() && image[end] == 0 {
        end += 1;
    }
    (start, end)
}

fn parse_entries(region: &[u8]) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for part in region.split(|b| *b == 0) {
        if part.is_empty() {
            break;
        }
        let text = String::from_utf8_lossy(part);
        match text.split_once('=') {
            Some((key, value)) => entries.push((key.to_string(), value.to_string())),
            None => entries.push((text.to_string(), String::new())),
        }
    }
    entries
}

fn upsert(entries: &mut Vec<(String, String)>, key: &str, value: &str) {
    match entries.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => entries.push((key.to_string(), value.to_string())),
    }
}

/// Patch the environment block located via `mark`, applying the `key = value`
/// lines of `eval` under the given mode. Returns the patched image.
pub fn patch_env(image: &[u8], mark: &str, mode: EnvMode, eval: &str) -> Result<Vec<u8>, EnvError> {
    if mode == EnvMode::Disabled {
        return Ok(image.to_vec());
    }
    let mark_at = image
        .windows(mark.len().max(1))
        .position(|window| window == mark.as_bytes())
        .ok_or_else(|| EnvError::MarkNotFound(mark.to_string()))?;
    let (start, end) = find_region(image, mark_at);

    let mut entries = if mode == EnvMode::Replace {
        Vec::new()
    } else {
        parse_entries(&image[start..end])
    };
    for line in eval.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => upsert(&mut entries, key.trim(), value.trim()),
            None => upsert(&mut entries, line, ""),
        }
    }

    let mut block = Vec::new();
    for (key, value) in &entries {
        block.extend_from_slice(key.as_bytes());
        block.push(b'=');
        block.extend_from_slice(value.as_bytes());
        block.push(0);
    }
    block.push(0);
    let room = end - start;
    if block.len() > room {
        return Err(EnvError::Overflow {
            need: block.len(),
            room,
        });
    }
    block.resize(room, 0);

    let mut out = image.to_vec();
    // re-seal only when the four preceding bytes held a valid CRC
    let had_crc = start >= 4
        && u32::from_le_bytes([out[start - 4], out[start - 3], out[start - 2], out[start - 1]])
            == crc32(&out[start..end]);
    out[start..end].copy_from_slice(&block);
    if had_crc {
        let crc = crc32(&out[start..end]);
        out[start - 4..start].copy_from_slice(&crc.to_le_bytes());
    }
    Ok(out)
}
