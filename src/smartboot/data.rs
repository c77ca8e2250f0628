// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! DATA segments of a smart-boot description.
//!
//! Each named segment resolves to the bytes pushed over the download
//! protocol: DCD programs, boot images (from a file or composed out of
//! other segments), raw or wrapped U-Boot images, and plain binaries.

use std::fs;
use std::path::{Path, PathBuf};

use crate::dcd::SegDcd;
use crate::image::{BootImage, BootImg2, ParseHint};

use super::env::{patch_env, EnvMode, DEFAULT_MARK};
use super::Error;

/// Recognized `TYPE` values. `FDT` is reserved and treated as raw bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SegKind {
    Dcd,
    Imx,
    Uri,
    Uei,
    #[default]
    Bin,
    Fdt,
}

impl SegKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "DCD" => Some(Self::Dcd),
            "IMX" => Some(Self::Imx),
            "URI" => Some(Self::Uri),
            "UEI" => Some(Self::Uei),
            "BIN" => Some(Self::Bin),
            "FDT" => Some(Self::Fdt),
            _ => None,
        }
    }
}

/// Environment patch settings for `IMX` and `URI` segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvPatch {
    pub mode: EnvMode,
    pub mark: String,
    pub eval: String,
}

impl Default for EnvPatch {
    fn default() -> Self {
        Self {
            mode: EnvMode::Disabled,
            mark: DEFAULT_MARK.to_string(),
            eval: String::new(),
        }
    }
}

/// An `IMX` segment composed from other segments, referenced by index into
/// the document's segment list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImxCompose {
    pub start_address: u32,
    pub offset: u32,
    pub dcd_index: usize,
    pub app_index: usize,
}

/// Where the segment's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegSource {
    File(PathBuf),
    Inline(String),
    Compose(ImxCompose),
}

/// One named DATA segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSeg {
    pub name: String,
    pub desc: String,
    pub kind: SegKind,
    pub addr: Option<u32>,
    pub source: SegSource,
    pub env: EnvPatch,
}

/// Legacy uImage header fields the orchestrator cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UImageHeader {
    pub size: u32,
    pub load: u32,
    pub entry: u32,
}

pub const UIMAGE_MAGIC: u32 = 0x2705_1956;
pub const UIMAGE_HEADER_SIZE: usize = 64;

/// Parse the 64-byte legacy uImage header (big-endian fields).
pub fn parse_uimage(data: &[u8]) -> Option<UImageHeader> {
    if data.len() < UIMAGE_HEADER_SIZE {
        return None;
    }
    let word = |at: usize| u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    if word(0) != UIMAGE_MAGIC {
        return None;
    }
    Some(UImageHeader {
        size: word(12),
        load: word(16),
        entry: word(20),
    })
}

fn read_file(base_dir: &Path, path: &Path) -> Result<Vec<u8>, Error> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    fs::read(&absolute).map_err(|err| Error::Io(format!("{}: {err}", absolute.display())))
}

fn is_dcd_text(path: &Path, data: &[u8]) -> bool {
    path.extension().map(|e| e.eq_ignore_ascii_case("txt")).unwrap_or(false)
        || data.first() != Some(&0xD2)
}

impl DataSeg {
    /// Resolve the segment to its byte payload. `resolved` holds the bytes
    /// of the segments declared before this one; composed images may only
    /// reference those.
    pub fn resolve(&self, base_dir: &Path, resolved: &[Vec<u8>]) -> Result<Vec<u8>, Error> {
        let raw = match &self.source {
            SegSource::File(path) => Some(read_file(base_dir, path)?),
            SegSource::Inline(_) | SegSource::Compose(_) => None,
        };
        match self.kind {
            SegKind::Dcd => {
                let dcd = match (&self.source, raw) {
                    (SegSource::Inline(text), _) => SegDcd::parse_text(text)?,
                    (SegSource::File(path), Some(data)) => {
                        if is_dcd_text(path, &data) {
                            SegDcd::parse_text(&String::from_utf8_lossy(&data))?
                        } else {
                            SegDcd::parse(&data)?
                        }
                    }
                    _ => {
                        return Err(Error::Document(format!(
                            "DATA->{}: a DCD segment cannot be composed",
                            self.name
                        )))
                    }
                };
                Ok(dcd.export())
            }
            SegKind::Imx => match &self.source {
                SegSource::Compose(compose) => {
                    let dcd_bytes = resolved.get(compose.dcd_index).ok_or_else(|| {
                        Error::UnknownSegmentRef(format!("{} (DCDSEG)", self.name))
                    })?;
                    let app = resolved.get(compose.app_index).ok_or_else(|| {
                        Error::UnknownSegmentRef(format!("{} (APPSEG)", self.name))
                    })?;
                    let mut image =
                        BootImg2::new(compose.start_address, compose.offset, 0x41, false);
                    image.dcd = Some(SegDcd::parse(dcd_bytes)?);
                    image.set_app(app.clone());
                    Ok(image.export()?)
                }
                _ => {
                    let data = raw.ok_or_else(|| {
                        Error::Document(format!("DATA->{}: FILE or DATA required", self.name))
                    })?;
                    Ok(patch_env(&data, &self.env.mark, self.env.mode, &self.env.eval)?)
                }
            },
            SegKind::Uri => {
                let data = raw.ok_or_else(|| {
                    Error::Document(format!("DATA->{}: FILE required", self.name))
                })?;
                Ok(patch_env(&data, &self.env.mark, self.env.mode, &self.env.eval)?)
            }
            SegKind::Uei | SegKind::Bin | SegKind::Fdt => match (&self.source, raw) {
                (_, Some(data)) => Ok(data),
                (SegSource::Inline(text), _) => Ok(text.clone().into_bytes()),
                _ => Err(Error::Document(format!(
                    "DATA->{}: FILE or DATA required",
                    self.name
                ))),
            },
        }
    }

    /// Default push address when neither the command nor `ADDR` names one.
    pub fn default_address(&self, bytes: &[u8]) -> Option<u32> {
        if let Some(addr) = self.addr {
            return Some(addr);
        }
        match self.kind {
            SegKind::Imx => BootImage::parse(bytes, ParseHint::Auto, 0x100)
                .ok()
                .map(|image| image.address() as u32),
            SegKind::Uei => parse_uimage(bytes).map(|header| header.load),
            _ => None,
        }
    }

    /// The IVT target address of an `IMX` segment, for `JRUN`.
    pub fn ivt_address(&self, bytes: &[u8]) -> Result<u32, Error> {
        let image = BootImage::parse(bytes, ParseHint::Auto, 0x100)?;
        Ok(image.self_address() as u32)
    }

    /// The DCD blob of an `IMX` segment, for `WDCD` against an image.
    pub fn dcd_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let image = BootImage::parse(bytes, ParseHint::Auto, 0x100)?;
        match image.dcd() {
            Some(dcd) => Ok(dcd.export()),
            None => Err(Error::Document(format!(
                "DATA->{}: image carries no DCD",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn seg(kind: SegKind, source: SegSource) -> DataSeg {
        DataSeg {
            name: "test".into(),
            desc: String::new(),
            kind,
            addr: None,
            source,
            env: EnvPatch::default(),
        }
    }

    #[test]
    fn dcd_segment_resolves_inline_text() {
        let seg = seg(
            SegKind::Dcd,
            SegSource::Inline("WriteValue 4 0x30340004 0x4F400005\n".into()),
        );
        let bytes = seg.resolve(Path::new("."), &[]).unwrap();
        assert_eq!(bytes[0], 0xD2);
        assert_eq!(bytes.len(), 4 + 4 + 8);
    }

    #[test]
    fn imx_segment_composes_from_references() {
        let dcd_bytes = {
            let seg = seg(
                SegKind::Dcd,
                SegSource::Inline("WriteValue 4 0x30340004 0x1\n".into()),
            );
            seg.resolve(Path::new("."), &[]).unwrap()
        };
        let app = vec![0xAAu8; 64];
        let resolved = vec![dcd_bytes, app];
        let compose = seg(
            SegKind::Imx,
            SegSource::Compose(ImxCompose {
                start_address: 0x877F_F000,
                offset: 0x400,
                dcd_index: 0,
                app_index: 1,
            }),
        );
        let bytes = compose.resolve(Path::new("."), &resolved).unwrap();
        assert_eq!(bytes.len(), 0x2000);
        assert_eq!(compose.default_address(&bytes), Some(0x877F_F000));
        assert_eq!(compose.ivt_address(&bytes).unwrap(), 0x877F_F400);
        let dcd = compose.dcd_bytes(&bytes).unwrap();
        assert_eq!(dcd[0], 0xD2);
    }

    #[test]
    fn compose_with_bad_reference_is_unknown_segment() {
        let compose = seg(
            SegKind::Imx,
            SegSource::Compose(ImxCompose {
                start_address: 0,
                offset: 0x400,
                dcd_index: 5,
                app_index: 1,
            }),
        );
        assert!(matches!(
            compose.resolve(Path::new("."), &[]).unwrap_err(),
            Error::UnknownSegmentRef(_)
        ));
    }

    #[test]
    fn uimage_header_parses() {
        let mut raw = vec![0u8; 80];
        raw[0..4].copy_from_slice(&UIMAGE_MAGIC.to_be_bytes());
        raw[12..16].copy_from_slice(&16u32.to_be_bytes());
        raw[16..20].copy_from_slice(&0x8200_0000u32.to_be_bytes());
        raw[20..24].copy_from_slice(&0x8200_0040u32.to_be_bytes());
        let header = parse_uimage(&raw).unwrap();
        assert_eq!(header.load, 0x8200_0000);
        assert_eq!(header.entry, 0x8200_0040);
        let uei = seg(SegKind::Uei, SegSource::Inline(String::new()));
        assert_eq!(uei.default_address(&raw), Some(0x8200_0000));
        assert_eq!(parse_uimage(&[0u8; 64]), None);
    }

    #[test]
    fn explicit_addr_wins_over_derived() {
        let mut uei = seg(SegKind::Uei, SegSource::Inline(String::new()));
        uei.addr = Some(0x1234_0000);
        assert_eq!(uei.default_address(&[0u8; 4]), Some(0x1234_0000));
    }

    #[test]
    fn bin_segment_passes_inline_bytes() {
        let seg = seg(SegKind::Bin, SegSource::Inline("raw payload".into()));
        assert_eq!(
            seg.resolve(Path::new("."), &[]).unwrap(),
            b"raw payload".to_vec()
        );
        assert_eq!(seg.default_address(b"raw payload"), None);
    }
}
