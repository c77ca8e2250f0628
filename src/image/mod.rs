// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Boot-image codec.
//!
//! Four container generations share the segment vocabulary: v2 (v6/v7, RT),
//! v2b (v8M, same layout with different defaults), v3a (v8QXP A0) and v3b
//! (v8QM A0) with chained IVTs and per-core image descriptor tables.
//! Images are values: build or parse, mutate freely, export to an owned
//! byte buffer. The exported buffer is the byte-exact flash content from the
//! image base, so `bdt.length` equals the buffer length.

use std::fmt;

use crate::core::bytes::sizeof_fmt;
use crate::core::header::{Header, HeaderError, SegTag};
use crate::dcd::{self, SegDcd};

pub mod segments;

pub use segments::{SegBds3a, SegBds3b, SegBdt, SegCsf, SegIds3a, SegIds3b, SegIvt2, SegIvt3a, SegIvt3b};

/// Boot-image codec errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnrecognizedVariant,
    MalformedHeader(String),
    InvalidPointer(String),
    LengthMismatch(String),
    AppTooLarge(String),
    MissingRequiredSegment(&'static str),
    Dcd(dcd::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnrecognizedVariant => write!(f, "not a recognized boot image"),
            Error::MalformedHeader(msg) => write!(f, "malformed header: {msg}"),
            Error::InvalidPointer(msg) => write!(f, "invalid pointer: {msg}"),
            Error::LengthMismatch(msg) => write!(f, "length mismatch: {msg}"),
            Error::AppTooLarge(msg) => write!(f, "application too large: {msg}"),
            Error::MissingRequiredSegment(what) => write!(f, "missing required segment: {what}"),
            Error::Dcd(err) => write!(f, "DCD: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<HeaderError> for Error {
    fn from(err: HeaderError) -> Self {
        Error::MalformedHeader(err.to_string())
    }
}

impl From<dcd::Error> for Error {
    fn from(err: dcd::Error) -> Self {
        Error::Dcd(err)
    }
}

/// Container generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    V2,
    V2b,
    V3a,
    V3b,
}

/// Variant selection for [`parse`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseHint {
    #[default]
    Auto,
    Only(Variant),
}

/// Payload roles accepted by `add_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    App,
    Scfw,
    Scd,
    AppA53,
    AppA72,
    Cm4_0,
    Cm4_1,
}

impl ImageKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "APP" => Self::App,
            "SCFW" => Self::Scfw,
            "SCD" => Self::Scd,
            "APP-A53" | "APP-A35" => Self::AppA53,
            "APP-A72" => Self::AppA72,
            "CM4-0" => Self::Cm4_0,
            "CM4-1" => Self::Cm4_1,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::App => "APP",
            Self::Scfw => "SCFW",
            Self::Scd => "SCD",
            Self::AppA53 => "APP-A53",
            Self::AppA72 => "APP-A72",
            Self::Cm4_0 => "CM4-0",
            Self::Cm4_1 => "CM4-1",
        }
    }
}

/// Options for [`BootImage::build`].
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub offset: u32,
    pub version: u8,
    pub plugin: bool,
    pub app_entry_offset: u32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            offset: 0x400,
            version: 0x41,
            plugin: false,
            app_entry_offset: 0,
        }
    }
}

fn pad_len(size: usize, align: usize) -> usize {
    match size % align {
        0 => 0,
        rem => align - rem,
    }
}

fn scan_tag(data: &[u8], step: usize, matches: impl Fn(&Header) -> bool) -> Option<usize> {
    let step = step.max(4);
    let mut pos = 0usize;
    while pos + Header::SIZE <= data.len() {
        if let Ok(header) = Header::parse(data, pos, None) {
            if matches(&header) {
                return Some(pos);
            }
        }
        pos += step;
    }
    None
}

////////////////////////////////////////////////////////////////////////////
// Boot image v2 / v2b
////////////////////////////////////////////////////////////////////////////

/// Container v2: IVT, BDT, DCD, app payload, appended CSF.
///
/// The v2b (v8M) flavor is the same layout with version byte 0x43; use
/// [`BootImg2::new_v2b`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImg2 {
    pub address: u32,
    pub offset: u32,
    pub version: u8,
    pub plugin: bool,
    /// Added to the app load address to form `ivt.entry`.
    pub app_entry_offset: u32,
    pub dcd: Option<SegDcd>,
    pub csf: Option<SegCsf>,
    app: Vec<u8>,
    /// Space reserved for the CSF area; parsed images keep the source
    /// buffer's tail size so export reproduces it byte-exact.
    csf_space: Option<usize>,
}

impl BootImg2 {
    pub const CSF_SIZE: usize = 0x2000;
    pub const APP_ALIGN: usize = 0x1000;

    pub fn new(address: u32, offset: u32, version: u8, plugin: bool) -> Self {
        Self {
            address,
            offset,
            version,
            plugin,
            app_entry_offset: 0,
            dcd: None,
            csf: None,
            app: Vec::new(),
            csf_space: None,
        }
    }

    /// v8M flavor: identical layout, container version byte 0x43.
    pub fn new_v2b(address: u32, offset: u32, plugin: bool) -> Self {
        Self::new(address, offset, 0x43, plugin)
    }

    pub fn app(&self) -> &[u8] {
        &self.app
    }

    pub fn set_app(&mut self, data: Vec<u8>) {
        self.app = data;
    }

    /// Header area size: IVT + BDT + DCD + padding, keyed by the IVT offset.
    fn head_size(&self) -> usize {
        match self.offset {
            0x100 => 0x300,
            _ => 0xC00,
        }
    }

    fn dcd_size(&self) -> usize {
        self.dcd.as_ref().map(SegDcd::size).unwrap_or(0)
    }

    fn csf_space(&self) -> usize {
        if self.csf.is_some() {
            self.csf_space.unwrap_or(Self::CSF_SIZE)
        } else {
            0
        }
    }

    /// Total image length, offset prefix included. This is the value written
    /// to `bdt.length`.
    pub fn total_size(&self) -> usize {
        self.offset as usize
            + self.head_size()
            + self.app.len()
            + pad_len(self.app.len(), Self::APP_ALIGN)
            + self.csf_space()
    }

    /// Recompute the IVT and BDT from the current segments.
    fn layout(&self) -> Result<(SegIvt2, SegBdt), Error> {
        let head = self.head_size();
        let fixed = SegIvt2::SIZE + SegBdt::SIZE + self.dcd_size();
        if fixed > head {
            return Err(Error::LengthMismatch(format!(
                "header area needs {fixed} bytes, only {head} available at IVT offset 0x{:X}",
                self.offset
            )));
        }
        if let Some(csf) = &self.csf {
            if csf.size() > self.csf_space() {
                return Err(Error::LengthMismatch(format!(
                    "CSF of {} bytes exceeds the reserved {} bytes",
                    csf.size(),
                    self.csf_space()
                )));
            }
        }

        let mut ivt = SegIvt2::new(self.version);
        ivt.self_address = self.address + self.offset;
        ivt.bdt_address = ivt.self_address + SegIvt2::SIZE as u32;
        let app_address = self.address + self.offset as u32 + head as u32;
        ivt.dcd_address = if self.dcd.is_some() {
            ivt.bdt_address + SegBdt::SIZE as u32
        } else {
            0
        };
        ivt.entry = app_address + self.app_entry_offset;
        ivt.csf_address = if self.csf.is_some() {
            app_address + (self.app.len() + pad_len(self.app.len(), Self::APP_ALIGN)) as u32
        } else {
            0
        };

        let bdt = SegBdt {
            start: self.address,
            length: self.total_size() as u32,
            plugin: u32::from(self.plugin),
        };
        ivt.validate()?;
        Ok((ivt, bdt))
    }

    /// Export the byte-exact flash image, starting at the image base.
    pub fn export(&self) -> Result<Vec<u8>, Error> {
        let (ivt, bdt) = self.layout()?;
        let total = self.total_size();
        let mut out = Vec::with_capacity(total);
        out.resize(self.offset as usize, 0);
        ivt.export_into(&mut out);
        bdt.export_into(&mut out);
        if let Some(dcd) = &self.dcd {
            out.extend_from_slice(&dcd.export());
        }
        out.resize(self.offset as usize + self.head_size(), 0);
        out.extend_from_slice(&self.app);
        out.resize(total - self.csf_space(), 0);
        if let Some(csf) = &self.csf {
            csf.export_into(&mut out);
        }
        out.resize(total, 0);
        Ok(out)
    }

    /// Parse a v2 image, scanning for the IVT with the given step.
    pub fn parse(data: &[u8], step: usize) -> Result<Self, Error> {
        let pos = scan_tag(data, step, |h| {
            h.tag == SegTag::Ivt2.value()
                && h.length as usize == SegIvt2::SIZE
                && (0x40..=0x44).contains(&h.param)
        })
        .ok_or(Error::UnrecognizedVariant)?;
        Self::parse_at(data, pos)
    }

    fn parse_at(data: &[u8], pos: usize) -> Result<Self, Error> {
        let ivt = SegIvt2::parse(data, pos)?;
        let bdt_off = pos + (ivt.bdt_address - ivt.self_address) as usize;
        let bdt = SegBdt::parse(data, bdt_off)?;
        if ivt.self_address < bdt.start {
            return Err(Error::InvalidPointer(format!(
                "IVT self 0x{:08X} below image start 0x{:08X}",
                ivt.self_address, bdt.start
            )));
        }
        let offset = ivt.self_address - bdt.start;
        let span = |what: &str, address: u32| -> Result<(), Error> {
            if address != 0
                && !(bdt.start..bdt.start.wrapping_add(bdt.length)).contains(&address)
            {
                return Err(Error::InvalidPointer(format!(
                    "{what} 0x{address:08X} outside [0x{:08X}, 0x{:08X})",
                    bdt.start,
                    bdt.start.wrapping_add(bdt.length)
                )));
            }
            Ok(())
        };
        span("DCD pointer", ivt.dcd_address)?;
        span("CSF pointer", ivt.csf_address)?;
        span("entry", ivt.entry)?;

        // When the offset prefix is present in the buffer, the declared
        // length must fit it.
        if pos >= offset as usize {
            let base = pos - offset as usize;
            if base + bdt.length as usize > data.len() {
                return Err(Error::LengthMismatch(format!(
                    "BDT declares {} bytes, buffer holds {}",
                    bdt.length,
                    data.len() - base
                )));
            }
        }

        let mut image = Self::new(bdt.start, offset, ivt.version, bdt.plugin != 0);

        if ivt.dcd_address != 0 {
            let dcd_off = pos + (ivt.dcd_address - ivt.self_address) as usize;
            let slice = data
                .get(dcd_off..)
                .ok_or_else(|| Error::InvalidPointer("DCD pointer past buffer".into()))?;
            image.dcd = Some(SegDcd::parse(slice)?);
        }

        if ivt.entry < ivt.self_address {
            return Err(Error::InvalidPointer(format!(
                "entry 0x{:08X} before IVT 0x{:08X}",
                ivt.entry, ivt.self_address
            )));
        }
        let app_off = pos + (ivt.entry - ivt.self_address) as usize;
        let declared = if ivt.csf_address != 0 {
            (ivt.csf_address - ivt.entry) as usize
        } else {
            (bdt.length - (ivt.entry - bdt.start)) as usize
        };
        let available = data.len().saturating_sub(app_off);
        let app_size = declared.min(available);
        image.app = data
            .get(app_off..app_off + app_size)
            .ok_or_else(|| Error::InvalidPointer("app region past buffer".into()))?
            .to_vec();

        if ivt.csf_address != 0 {
            let csf_off = pos + (ivt.csf_address - ivt.self_address) as usize;
            image.csf = Some(SegCsf::parse(data, csf_off)?);
            image.csf_space = Some(data.len() - csf_off);
        }
        Ok(image)
    }

    pub fn info(&self) -> String {
        let Ok((ivt, bdt)) = self.layout() else {
            return "inconsistent image".into();
        };
        let mut out = String::new();
        out.push_str("# IVT (Image Vector Table)\n");
        out.push_str(&format!(" IVT: 0x{:08X}\n", ivt.self_address));
        out.push_str(&format!(" BDT: 0x{:08X}\n", ivt.bdt_address));
        out.push_str(&format!(" DCD: 0x{:08X}\n", ivt.dcd_address));
        out.push_str(&format!(" APP: 0x{:08X}\n", ivt.entry));
        out.push_str(&format!(" CSF: 0x{:08X}\n", ivt.csf_address));
        out.push_str("\n# BDT (Boot Data Table)\n");
        out.push_str(&format!(" Start:  0x{:08X}\n", bdt.start));
        out.push_str(&format!(
            " Length: {} ({} Bytes)\n",
            sizeof_fmt(bdt.length as usize),
            bdt.length
        ));
        out.push_str(&format!(
            " Plugin: {}\n",
            if bdt.plugin != 0 { "YES" } else { "NO" }
        ));
        if let Some(dcd) = &self.dcd {
            out.push_str("\n# DCD (Device Config Data)\n");
            out.push_str(&dcd.info());
        }
        if let Some(csf) = &self.csf {
            out.push_str(&format!(
                "\n# CSF (Code Signing Data)\n {} Bytes (opaque)\n",
                csf.size()
            ));
        }
        out
    }
}

////////////////////////////////////////////////////////////////////////////
// Boot image v3a (v8QXP A0)
////////////////////////////////////////////////////////////////////////////

const IMG_TYPE_SCD: u32 = 0x02;
const IMG_TYPE_EXEC: u32 = 0x03;

const SCFW_FLAGS_SCFW: u32 = 0x01;
const SCFW_FLAGS_APP_3A: u32 = 0x0135_5FC4;
const SCFW_FLAGS_M4_0: u32 = 0x004A_5162;
const SCFW_FLAGS_M4_1: u32 = 0x004F_52A3;
const SCFW_FLAGS_A53: u32 = 0x0135_4014;
const SCFW_FLAGS_A72: u32 = 0x0135_4065;

const SCFW_LOAD_3A: u64 = 0x1FFE_0000;
const SCFW_LOAD_3B: u64 = 0x30FE_0000;
const SCFW_ENTRY_3B: u64 = 0x1FFE_0000;

const LOAD_ADDR_SCU_ROM: u64 = 0x2000_E000;
const LOAD_ADDR_AP_ROM: u64 = 0x0011_0000;

const V3_SECTOR: usize = 0x200;
const V3_APP_ALIGN: usize = 0x1200;
const V3_IMG_AUTO_ALIGN: usize = 0x10;

/// Container v3a: two chained IVTs, descriptor tables, SCFW plus per-core
/// payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImg3a {
    pub address: [u64; 2],
    pub offset: u32,
    pub version: u8,
    pub dcd: Option<SegDcd>,
    pub csf: Option<SegCsf>,
    bdt: [SegBds3a; 2],
    app: [[Vec<u8>; SegBds3a::IMAGES_MAX_COUNT]; 2],
    scd_address: u64,
}

impl BootImg3a {
    pub fn new(offset: u32, version: u8) -> Self {
        Self {
            address: [LOAD_ADDR_SCU_ROM, LOAD_ADDR_AP_ROM],
            offset,
            version,
            dcd: None,
            csf: None,
            bdt: [SegBds3a::default(), SegBds3a::default()],
            app: Default::default(),
            scd_address: 0,
        }
    }

    pub fn descriptors(&self, container: usize) -> &SegBds3a {
        &self.bdt[container]
    }

    pub fn payload(&self, container: usize, index: usize) -> &[u8] {
        &self.app[container][index]
    }

    /// Classify a descriptor slot by its flag words.
    pub fn image_kind(&self, container: usize, index: usize) -> ImageKind {
        let ids = &self.bdt[container].images[index];
        match ids.scfw_flags {
            SCFW_FLAGS_SCFW => ImageKind::Scfw,
            SCFW_FLAGS_M4_0 => ImageKind::Cm4_0,
            SCFW_FLAGS_M4_1 => ImageKind::Cm4_1,
            _ if ids.hab_flags == IMG_TYPE_SCD => ImageKind::Scd,
            _ => ImageKind::AppA53,
        }
    }

    fn free_slot(&self, container: usize) -> Result<usize, Error> {
        let index = self.bdt[container].images_count as usize;
        if index >= SegBds3a::IMAGES_MAX_COUNT {
            return Err(Error::AppTooLarge(format!(
                "container {container} has no free image descriptor slot"
            )));
        }
        Ok(index)
    }

    /// Attach one payload. SCFW must come before SCD.
    pub fn add_image(&mut self, data: Vec<u8>, kind: ImageKind, address: u64) -> Result<(), Error> {
        match kind {
            ImageKind::App | ImageKind::AppA53 => {
                let index = self.free_slot(1)?;
                let ids = &mut self.bdt[1].images[index];
                ids.image_destination = address;
                ids.image_entry = address;
                ids.image_size = data.len() as u32;
                ids.hab_flags = IMG_TYPE_EXEC;
                ids.scfw_flags = SCFW_FLAGS_APP_3A;
                self.bdt[1].images_count += 1;
                self.app[1][index] = data;
            }
            ImageKind::Cm4_0 | ImageKind::Cm4_1 => {
                let index = self.free_slot(0)?;
                let ids = &mut self.bdt[0].images[index];
                ids.image_destination = address;
                ids.image_entry = address;
                ids.image_size = data.len() as u32;
                ids.hab_flags = IMG_TYPE_EXEC;
                ids.scfw_flags = if kind == ImageKind::Cm4_0 {
                    SCFW_FLAGS_M4_0
                } else {
                    SCFW_FLAGS_M4_1
                };
                self.bdt[0].images_count += 1;
                self.app[0][index] = data;
            }
            ImageKind::Scfw => {
                let index = self.free_slot(0)?;
                let ids = &mut self.bdt[0].images[index];
                ids.image_destination = SCFW_LOAD_3A;
                ids.image_entry = SCFW_LOAD_3A;
                ids.image_size = data.len() as u32;
                ids.hab_flags = IMG_TYPE_EXEC;
                ids.scfw_flags = SCFW_FLAGS_SCFW;
                self.bdt[0].images_count += 1;
                self.scd_address =
                    SCFW_LOAD_3A + (data.len() + pad_len(data.len(), V3_IMG_AUTO_ALIGN)) as u64;
                self.app[0][index] = data;
            }
            ImageKind::Scd => {
                if self.scd_address == 0 {
                    return Err(Error::MissingRequiredSegment("SCFW before SCD"));
                }
                let index = self.free_slot(0)?;
                let ids = &mut self.bdt[0].images[index];
                ids.image_destination = self.scd_address;
                ids.image_entry = 0;
                ids.image_size = data.len() as u32;
                ids.hab_flags = IMG_TYPE_SCD;
                ids.scfw_flags = 0x1;
                self.bdt[0].images_count += 1;
                self.app[0][index] = data;
            }
            ImageKind::AppA72 => {
                return Err(Error::MissingRequiredSegment(
                    "A72 clusters exist only in the v3b container",
                ))
            }
        }
        Ok(())
    }

    fn update(&mut self) -> [SegIvt3a; 2] {
        let mut ivt = [SegIvt3a::new(self.version), SegIvt3a::new(self.version)];
        for container in 0..2 {
            ivt[container].version = 0x01;
            ivt[container].self_address =
                self.address[container] + u64::from(self.offset) + (container * SegIvt3a::SIZE) as u64;
            ivt[container].bdt_address = ivt[container].self_address
                + (SegIvt3a::SIZE * (2 - container) + container * SegBds3a::SIZE) as u64;
            if container == 0 {
                ivt[0].next = SegIvt3a::SIZE as u64;
                if self.dcd.is_some() {
                    ivt[0].dcd_address = ivt[0].bdt_address + (SegBds3a::SIZE * 2) as u64;
                    ivt[0].csf_address = if self.csf.is_some() {
                        ivt[0].dcd_address + self.dcd.as_ref().map(SegDcd::size).unwrap_or(0) as u64
                    } else {
                        0
                    };
                } else {
                    ivt[0].dcd_address = 0;
                    ivt[0].csf_address = if self.csf.is_some() {
                        ivt[0].bdt_address + (SegBds3a::SIZE * 2) as u64
                    } else {
                        0
                    };
                }
            }

            if self.bdt[container].images_count != 0 {
                self.bdt[container].boot_data_size = SegBds3a::SIZE as u32;
                self.bdt[container].images[0].image_source = if container == 0 {
                    V3_APP_ALIGN as u64
                } else {
                    let last = self.bdt[0].images_count.saturating_sub(1) as usize;
                    let size = self.app[0][last].len();
                    self.bdt[0].images[last].image_source
                        + (size + pad_len(size, V3_SECTOR)) as u64
                };
                for ix in 0..self.bdt[container].images_count as usize - 1 {
                    let size = self.app[container][ix].len();
                    self.bdt[container].images[ix + 1].image_source =
                        self.bdt[container].images[ix].image_source
                            + (size + pad_len(size, V3_SECTOR)) as u64;
                }
            }
        }
        ivt
    }

    pub fn export(&mut self) -> Result<Vec<u8>, Error> {
        let ivt = self.update();
        for table in &ivt {
            table.validate()?;
        }
        let mut out = vec![0u8; self.offset as usize];
        ivt[0].export_into(&mut out);
        ivt[1].export_into(&mut out);
        self.bdt[0].export_into(&mut out);
        self.bdt[1].export_into(&mut out);
        if let Some(dcd) = &self.dcd {
            out.extend_from_slice(&dcd.export());
        }
        if let Some(csf) = &self.csf {
            csf.export_into(&mut out);
        }
        out.resize(V3_APP_ALIGN.max(out.len()), 0);
        for container in 0..2 {
            let count = self.bdt[container].images_count as usize;
            for ix in 0..count {
                let data = &self.app[container][ix];
                out.extend_from_slice(data);
                let last = container == 1 && ix + 1 == count;
                if !last {
                    let pad = pad_len(data.len(), V3_SECTOR);
                    out.resize(out.len() + pad, 0);
                }
            }
        }
        Ok(out)
    }

    pub fn parse(data: &[u8], step: usize) -> Result<Self, Error> {
        let pos = scan_tag(data, step, |h| {
            h.tag == SegTag::Ivt3.value() && h.length as usize == SegIvt3a::SIZE && h.param == 0x43
        })
        .ok_or(Error::UnrecognizedVariant)?;
        Self::parse_at(data, pos)
    }

    fn parse_at(data: &[u8], pos: usize) -> Result<Self, Error> {
        let ivt0 = SegIvt3a::parse(data, pos)?;
        let ivt1 = SegIvt3a::parse(data, pos + SegIvt3a::SIZE)?;
        let mut image = Self::new(0x400, ivt0.param);
        image.address = [
            ivt0.self_address - u64::from(image.offset),
            ivt1.self_address - u64::from(image.offset) - SegIvt3a::SIZE as u64,
        ];
        let bds_base = pos + 2 * SegIvt3a::SIZE;
        image.bdt[0] = SegBds3a::parse(data, bds_base)?;
        image.bdt[1] = SegBds3a::parse(data, bds_base + SegBds3a::SIZE)?;

        if ivt0.dcd_address != 0 {
            let dcd_off = pos + (ivt0.dcd_address - ivt0.self_address) as usize;
            let slice = data
                .get(dcd_off..)
                .ok_or_else(|| Error::InvalidPointer("DCD pointer past buffer".into()))?;
            image.dcd = Some(SegDcd::parse(slice)?);
        }
        if ivt0.csf_address != 0 {
            let csf_off = pos + (ivt0.csf_address - ivt0.self_address) as usize;
            image.csf = Some(SegCsf::parse(data, csf_off)?);
        }
        for container in 0..2 {
            for ix in 0..image.bdt[container].images_count as usize {
                let ids = image.bdt[container].images[ix];
                let start = (pos as i64 + ids.image_source as i64 - image.offset as i64) as usize;
                let end = start + ids.image_size as usize;
                image.app[container][ix] = data
                    .get(start..end)
                    .ok_or_else(|| {
                        Error::InvalidPointer(format!(
                            "image source 0x{:X} past buffer",
                            ids.image_source
                        ))
                    })?
                    .to_vec();
            }
        }
        Ok(image)
    }

    pub fn info(&mut self) -> String {
        let ivt = self.update();
        let mut out = String::new();
        for (ix, table) in ivt.iter().enumerate() {
            out.push_str(&format!("# IVT[{ix}]\n"));
            out.push_str(&format!(" IVT:  0x{:08X}\n", table.self_address));
            out.push_str(&format!(" BDT:  0x{:08X}\n", table.bdt_address));
            out.push_str(&format!(" DCD:  0x{:08X}\n", table.dcd_address));
            out.push_str(&format!(" CSF:  0x{:08X}\n", table.csf_address));
            out.push_str(&format!(" NEXT: 0x{:08X}\n", table.next));
        }
        for container in 0..2 {
            out.push_str(&format!(
                "# BDI[{container}]: {} image(s)\n",
                self.bdt[container].images_count
            ));
            for ix in 0..self.bdt[container].images_count as usize {
                let ids = self.bdt[container].images[ix];
                out.push_str(&format!(
                    " [{ix}] src 0x{:08X} dst 0x{:08X} entry 0x{:08X} {}\n",
                    ids.image_source,
                    ids.image_destination,
                    ids.image_entry,
                    sizeof_fmt(ids.image_size as usize)
                ));
            }
        }
        if let Some(dcd) = &self.dcd {
            out.push_str("# DCD\n");
            out.push_str(&dcd.info());
        }
        out
    }
}

////////////////////////////////////////////////////////////////////////////
// Boot image v3b (v8QM A0)
////////////////////////////////////////////////////////////////////////////

/// Container v3b: like v3a with two A-core clusters plus dedicated SCD and
/// CSF descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImg3b {
    pub address: [u64; 2],
    pub offset: u32,
    pub version: u8,
    pub dcd: Option<SegDcd>,
    pub csf: Option<SegCsf>,
    bdt: [SegBds3b; 2],
    app: [[Vec<u8>; SegBds3b::IMAGES_MAX_COUNT]; 2],
    scd: Vec<u8>,
    scd_address: u64,
}

impl BootImg3b {
    pub fn new(offset: u32, version: u8) -> Self {
        Self {
            address: [LOAD_ADDR_SCU_ROM, LOAD_ADDR_AP_ROM],
            offset,
            version,
            dcd: None,
            csf: None,
            bdt: [SegBds3b::default(), SegBds3b::default()],
            app: Default::default(),
            scd: Vec::new(),
            scd_address: 0,
        }
    }

    pub fn descriptors(&self, container: usize) -> &SegBds3b {
        &self.bdt[container]
    }

    pub fn payload(&self, container: usize, index: usize) -> &[u8] {
        &self.app[container][index]
    }

    pub fn scd_payload(&self) -> &[u8] {
        &self.scd
    }

    /// Classify a descriptor slot by its flag word.
    pub fn image_kind(&self, container: usize, index: usize) -> ImageKind {
        match self.bdt[container].images[index].flags {
            SCFW_FLAGS_SCFW => ImageKind::Scfw,
            SCFW_FLAGS_M4_0 => ImageKind::Cm4_0,
            SCFW_FLAGS_M4_1 => ImageKind::Cm4_1,
            SCFW_FLAGS_A72 => ImageKind::AppA72,
            _ => ImageKind::AppA53,
        }
    }

    fn free_slot(&self, container: usize) -> Result<usize, Error> {
        let index = self.bdt[container].images_count as usize;
        if index >= SegBds3b::IMAGES_MAX_COUNT {
            return Err(Error::AppTooLarge(format!(
                "container {container} has no free image descriptor slot"
            )));
        }
        Ok(index)
    }

    pub fn add_image(&mut self, data: Vec<u8>, kind: ImageKind, address: u64) -> Result<(), Error> {
        match kind {
            ImageKind::App | ImageKind::AppA53 | ImageKind::AppA72 => {
                let index = self.free_slot(1)?;
                let ids = &mut self.bdt[1].images[index];
                ids.image_destination = address;
                ids.image_entry = address;
                ids.image_size = data.len() as u32;
                ids.flags = if kind == ImageKind::AppA72 {
                    SCFW_FLAGS_A72
                } else {
                    SCFW_FLAGS_A53
                };
                self.bdt[1].images_count += 1;
                self.app[1][index] = data;
            }
            ImageKind::Cm4_0 | ImageKind::Cm4_1 => {
                let index = self.free_slot(0)?;
                let ids = &mut self.bdt[0].images[index];
                ids.image_destination = address;
                ids.image_entry = address;
                ids.image_size = data.len() as u32;
                ids.flags = if kind == ImageKind::Cm4_0 {
                    SCFW_FLAGS_M4_0
                } else {
                    SCFW_FLAGS_M4_1
                };
                self.bdt[0].images_count += 1;
                self.app[0][index] = data;
            }
            ImageKind::Scfw => {
                let index = self.free_slot(0)?;
                let ids = &mut self.bdt[0].images[index];
                ids.image_destination = SCFW_LOAD_3B;
                ids.image_entry = SCFW_ENTRY_3B;
                ids.image_size = data.len() as u32;
                ids.flags = SCFW_FLAGS_SCFW;
                self.scd_address =
                    SCFW_LOAD_3B + (data.len() + pad_len(data.len(), V3_IMG_AUTO_ALIGN)) as u64;
                self.bdt[0].images_count += 1;
                self.app[0][index] = data;
            }
            ImageKind::Scd => {
                if self.scd_address == 0 {
                    return Err(Error::MissingRequiredSegment("SCFW before SCD"));
                }
                self.bdt[0].scd.image_destination = self.scd_address;
                self.bdt[0].scd.image_entry = 0;
                self.bdt[0].scd.image_size = data.len() as u32;
                self.scd = data;
            }
        }
        Ok(())
    }

    fn update(&mut self) -> [SegIvt3b; 2] {
        let mut ivt = [SegIvt3b::new(self.version), SegIvt3b::new(self.version)];
        for container in 0..2 {
            ivt[container].self_address =
                self.address[container] + u64::from(self.offset) + (container * SegIvt3b::SIZE) as u64;
            ivt[container].bdt_address = ivt[container].self_address
                + (SegIvt3b::SIZE * (2 - container) + container * SegBds3b::SIZE) as u64;
            if container == 0 {
                if self.dcd.is_some() {
                    ivt[0].dcd_address = ivt[0].bdt_address + (SegBds3b::SIZE * 2) as u64;
                    ivt[0].csf_address = if self.csf.is_some() {
                        ivt[0].dcd_address + self.dcd.as_ref().map(SegDcd::size).unwrap_or(0) as u64
                    } else {
                        0
                    };
                } else {
                    ivt[0].dcd_address = 0;
                    ivt[0].csf_address = if self.csf.is_some() {
                        ivt[0].bdt_address + (SegBds3b::SIZE * 2) as u64
                    } else {
                        0
                    };
                }
            }

            if self.bdt[container].images_count != 0 {
                self.bdt[container].boot_data_size = SegBds3b::SIZE as u32;
                self.bdt[container].images[0].image_source = if container == 0 {
                    V3_APP_ALIGN as u64
                } else {
                    let last = self.bdt[0].images_count.saturating_sub(1) as usize;
                    let size = self.app[0][last].len();
                    self.bdt[0].images[last].image_source
                        + (size + pad_len(size, V3_SECTOR)) as u64
                };
                for ix in 0..self.bdt[container].images_count as usize - 1 {
                    let size = self.app[container][ix].len();
                    self.bdt[container].images[ix + 1].image_source =
                        self.bdt[container].images[ix].image_source
                            + (size + pad_len(size, V3_SECTOR)) as u64;
                }
            }
        }

        // SCD and CSF trail the last application payload.
        let mut next = 0u64;
        for container in 0..2 {
            let count = self.bdt[container].images_count as usize;
            if count > 0 {
                let last = count - 1;
                let size = self.app[container][last].len();
                next = self.bdt[container].images[last].image_source
                    + (size + pad_len(size, V3_SECTOR)) as u64;
            }
        }
        if self.bdt[0].scd.image_destination != 0 {
            self.bdt[0].scd.image_source = next;
            ivt[0].scd_address = self.bdt[0].scd.image_destination;
            next += (self.scd.len() + pad_len(self.scd.len(), V3_SECTOR)) as u64;
        }
        if let Some(csf) = &self.csf {
            self.bdt[0].csf.image_source = next;
            self.bdt[0].csf.image_size = csf.size() as u32;
        }
        ivt
    }

    pub fn export(&mut self) -> Result<Vec<u8>, Error> {
        let ivt = self.update();
        for table in &ivt {
            table.validate()?;
        }
        let mut out = vec![0u8; self.offset as usize];
        ivt[0].export_into(&mut out);
        ivt[1].export_into(&mut out);
        self.bdt[0].export_into(&mut out);
        self.bdt[1].export_into(&mut out);
        if let Some(dcd) = &self.dcd {
            out.extend_from_slice(&dcd.export());
        }
        out.resize(V3_APP_ALIGN.max(out.len()), 0);
        for container in 0..2 {
            for ix in 0..self.bdt[container].images_count as usize {
                let data = &self.app[container][ix];
                out.extend_from_slice(data);
                out.resize(out.len() + pad_len(data.len(), V3_SECTOR), 0);
            }
        }
        if self.bdt[0].scd.image_source != 0 {
            out.extend_from_slice(&self.scd);
            out.resize(out.len() + pad_len(self.scd.len(), V3_SECTOR), 0);
        }
        if let Some(csf) = &self.csf {
            if self.bdt[0].csf.image_source != 0 {
                csf.export_into(&mut out);
            }
        }
        Ok(out)
    }

    pub fn parse(data: &[u8], step: usize) -> Result<Self, Error> {
        let pos = scan_tag(data, step, |h| {
            h.tag == SegTag::Ivt2.value() && h.length as usize == SegIvt3b::SIZE && h.param == 0x43
        })
        .ok_or(Error::UnrecognizedVariant)?;
        Self::parse_at(data, pos)
    }

    fn parse_at(data: &[u8], pos: usize) -> Result<Self, Error> {
        let ivt0 = SegIvt3b::parse(data, pos)?;
        let ivt1 = SegIvt3b::parse(data, pos + SegIvt3b::SIZE)?;
        let mut image = Self::new(0x400, ivt0.version);
        image.address[0] = ivt0.self_address - u64::from(image.offset);
        image.address[1] = ivt1.self_address - u64::from(image.offset) - SegIvt3b::SIZE as u64;
        let bds_base = pos + 2 * SegIvt3b::SIZE;
        image.bdt[0] = SegBds3b::parse(data, bds_base)?;
        image.bdt[1] = SegBds3b::parse(data, bds_base + SegBds3b::SIZE)?;

        if ivt0.dcd_address != 0 {
            let dcd_off = pos + (ivt0.dcd_address - ivt0.self_address) as usize;
            let slice = data
                .get(dcd_off..)
                .ok_or_else(|| Error::InvalidPointer("DCD pointer past buffer".into()))?;
            image.dcd = Some(SegDcd::parse(slice)?);
        }
        let offset = image.offset;
        let fetch = move |source: u64, size: usize| -> Result<Vec<u8>, Error> {
            let start = (pos as i64 + source as i64 - i64::from(offset)) as usize;
            data.get(start..start + size)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::InvalidPointer(format!("image source 0x{source:X} past buffer")))
        };
        for container in 0..2 {
            for ix in 0..image.bdt[container].images_count as usize {
                let ids = image.bdt[container].images[ix];
                image.app[container][ix] = fetch(ids.image_source, ids.image_size as usize)?;
            }
        }
        if image.bdt[0].scd.image_source != 0 {
            image.scd = fetch(image.bdt[0].scd.image_source, image.bdt[0].scd.image_size as usize)?;
            image.scd_address = image.bdt[0].scd.image_destination;
        }
        if image.bdt[0].csf.image_source != 0 {
            let csf_off =
                (pos as i64 + image.bdt[0].csf.image_source as i64 - image.offset as i64) as usize;
            image.csf = Some(SegCsf::parse(data, csf_off)?);
        }
        Ok(image)
    }

    pub fn info(&mut self) -> String {
        let ivt = self.update();
        let mut out = String::new();
        for (ix, table) in ivt.iter().enumerate() {
            out.push_str(&format!("# IVT[{ix}]\n"));
            out.push_str(&format!(" IVT: 0x{:08X}\n", table.self_address));
            out.push_str(&format!(" BDT: 0x{:08X}\n", table.bdt_address));
            out.push_str(&format!(" DCD: 0x{:08X}\n", table.dcd_address));
            out.push_str(&format!(" SCD: 0x{:08X}\n", table.scd_address));
            out.push_str(&format!(" CSF: 0x{:08X}\n", table.csf_address));
        }
        for container in 0..2 {
            out.push_str(&format!(
                "# BDI[{container}]: {} image(s)\n",
                self.bdt[container].images_count
            ));
            for ix in 0..self.bdt[container].images_count as usize {
                let ids = self.bdt[container].images[ix];
                out.push_str(&format!(
                    " [{ix}] src 0x{:08X} dst 0x{:08X} entry 0x{:08X} {}\n",
                    ids.image_source,
                    ids.image_destination,
                    ids.image_entry,
                    sizeof_fmt(ids.image_size as usize)
                ));
            }
        }
        if let Some(dcd) = &self.dcd {
            out.push_str("# DCD\n");
            out.push_str(&dcd.info());
        }
        out
    }
}

////////////////////////////////////////////////////////////////////////////
// Variant dispatch
////////////////////////////////////////////////////////////////////////////

/// A parsed or built boot image of any supported generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootImage {
    V2(BootImg2),
    V3a(BootImg3a),
    V3b(BootImg3b),
}

impl BootImage {
    /// Build a fresh image. v2/v2b take the app payload directly; the v3
    /// generations start empty and receive payloads via `add_image`.
    pub fn build(
        variant: Variant,
        start_address: u64,
        app: Vec<u8>,
        dcd: Option<SegDcd>,
        csf: Option<SegCsf>,
        options: BuildOptions,
    ) -> Result<Self, Error> {
        Ok(match variant {
            Variant::V2 | Variant::V2b => {
                let mut image = if variant == Variant::V2 {
                    BootImg2::new(start_address as u32, options.offset, options.version, options.plugin)
                } else {
                    BootImg2::new_v2b(start_address as u32, options.offset, options.plugin)
                };
                image.app_entry_offset = options.app_entry_offset;
                image.set_app(app);
                image.dcd = dcd;
                image.csf = csf;
                Self::V2(image)
            }
            Variant::V3a => {
                let mut image = BootImg3a::new(options.offset, 0x43);
                image.dcd = dcd;
                image.csf = csf;
                if !app.is_empty() {
                    image.add_image(app, ImageKind::AppA53, start_address)?;
                }
                Self::V3a(image)
            }
            Variant::V3b => {
                let mut image = BootImg3b::new(options.offset, 0x43);
                image.dcd = dcd;
                image.csf = csf;
                if !app.is_empty() {
                    image.add_image(app, ImageKind::AppA53, start_address)?;
                }
                Self::V3b(image)
            }
        })
    }

    /// Parse any supported container, scanning for a recognized IVT.
    pub fn parse(data: &[u8], hint: ParseHint, step: usize) -> Result<Self, Error> {
        match hint {
            ParseHint::Only(Variant::V2) | ParseHint::Only(Variant::V2b) => {
                Ok(Self::V2(BootImg2::parse(data, step)?))
            }
            ParseHint::Only(Variant::V3a) => Ok(Self::V3a(BootImg3a::parse(data, step)?)),
            ParseHint::Only(Variant::V3b) => Ok(Self::V3b(BootImg3b::parse(data, step)?)),
            ParseHint::Auto => {
                let step = step.max(4);
                let mut pos = 0usize;
                while pos + Header::SIZE <= data.len() {
                    if let Ok(header) = Header::parse(data, pos, None) {
                        if header.tag == SegTag::Ivt2.value()
                            && header.length as usize == SegIvt2::SIZE
                            && (0x40..=0x44).contains(&header.param)
                        {
                            return Ok(Self::V2(BootImg2::parse_at(data, pos)?));
                        }
                        if header.tag == SegTag::Ivt2.value()
                            && header.length as usize == SegIvt3b::SIZE
                        {
                            return Ok(Self::V3b(BootImg3b::parse_at(data, pos)?));
                        }
                        if header.tag == SegTag::Ivt3.value()
                            && header.length as usize == SegIvt3a::SIZE
                        {
                            return Ok(Self::V3a(BootImg3a::parse_at(data, pos)?));
                        }
                    }
                    pos += step;
                }
                Err(Error::UnrecognizedVariant)
            }
        }
    }

    pub fn variant(&self) -> Variant {
        match self {
            Self::V2(image) if image.version >= 0x43 => Variant::V2b,
            Self::V2(_) => Variant::V2,
            Self::V3a(_) => Variant::V3a,
            Self::V3b(_) => Variant::V3b,
        }
    }

    /// Image base address in target memory.
    pub fn address(&self) -> u64 {
        match self {
            Self::V2(image) => u64::from(image.address),
            Self::V3a(image) => image.address[0],
            Self::V3b(image) => image.address[0],
        }
    }

    /// IVT offset inside the image.
    pub fn offset(&self) -> u32 {
        match self {
            Self::V2(image) => image.offset,
            Self::V3a(image) => image.offset,
            Self::V3b(image) => image.offset,
        }
    }

    /// Target address of the (first) IVT: `image base + ivt offset`.
    pub fn self_address(&self) -> u64 {
        self.address() + u64::from(self.offset())
    }

    pub fn dcd(&self) -> Option<&SegDcd> {
        match self {
            Self::V2(image) => image.dcd.as_ref(),
            Self::V3a(image) => image.dcd.as_ref(),
            Self::V3b(image) => image.dcd.as_ref(),
        }
    }

    pub fn export(&mut self) -> Result<Vec<u8>, Error> {
        match self {
            Self::V2(image) => image.export(),
            Self::V3a(image) => image.export(),
            Self::V3b(image) => image.export(),
        }
    }

    pub fn info(&mut self) -> String {
        match self {
            Self::V2(image) => image.info(),
            Self::V3a(image) => image.info(),
            Self::V3b(image) => image.info(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcd::{DataWidth, DcdCommand, WriteData, WriteOps};

    fn ddr_dcd() -> SegDcd {
        let mut dcd = SegDcd::new(0x41);
        let mut write = WriteData::new(WriteOps::WriteValue, DataWidth::Word);
        write.push(0x3034_0004, 0x4F40_0005).unwrap();
        write.push(0x3039_1000, 0x0000_0002).unwrap();
        write.push(0x307A_0000, 0x0104_0001).unwrap();
        dcd.push(DcdCommand::WriteData(write)).unwrap();
        dcd.push(DcdCommand::CheckData(
            crate::dcd::CheckData::new(
                crate::dcd::CheckOps::AnyClear,
                DataWidth::Word,
                0x3079_00C4,
                0x0000_0001,
                None,
            )
            .unwrap(),
        ))
        .unwrap();
        dcd
    }

    fn sample_v2() -> BootImg2 {
        let mut image = BootImg2::new(0x877F_F000, 0x400, 0x41, false);
        image.set_app(vec![0xAA; 100]);
        image.dcd = Some(ddr_dcd());
        image
    }

    #[test]
    fn v2_layout_addresses() {
        let image = sample_v2();
        let (ivt, bdt) = image.layout().unwrap();
        assert_eq!(ivt.self_address, 0x877F_F400);
        assert_eq!(ivt.bdt_address, 0x877F_F420);
        assert_eq!(ivt.dcd_address, 0x877F_F42C);
        assert_eq!(ivt.entry, 0x8780_0000);
        assert_eq!(ivt.csf_address, 0);
        assert_eq!(bdt.start, 0x877F_F000);
        assert_eq!(bdt.plugin, 0);
        assert_eq!(bdt.length, 0x2000);
    }

    #[test]
    fn v2_export_length_matches_bdt() {
        let image = sample_v2();
        let raw = image.export().unwrap();
        assert_eq!(raw.len(), 0x2000);
        assert!(raw.len() >= 0x400 + 32 + 12 + 44 + 100);
        // IVT sits at the configured offset
        assert_eq!(raw[0x400], 0xD1);
        // app payload at the head boundary
        assert_eq!(raw[0x400 + 0xC00], 0xAA);
    }

    #[test]
    fn v2_parse_export_roundtrip() {
        let raw = sample_v2().export().unwrap();
        let parsed = BootImg2::parse(&raw, 0x100).unwrap();
        assert_eq!(parsed.address, 0x877F_F000);
        assert_eq!(parsed.offset, 0x400);
        assert!(!parsed.plugin);
        let dcd = parsed.dcd.as_ref().unwrap();
        assert_eq!(dcd.commands().len(), 2);
        assert_eq!(parsed.export().unwrap(), raw);
    }

    #[test]
    fn v2_auto_parse_via_enum() {
        let raw = sample_v2().export().unwrap();
        let image = BootImage::parse(&raw, ParseHint::Auto, 0x100).unwrap();
        assert_eq!(image.variant(), Variant::V2);
        assert_eq!(image.self_address(), 0x877F_F400);
    }

    #[test]
    fn v2_zero_dcd_zero_csf_pointers() {
        let mut image = BootImg2::new(0x1000_0000, 0x400, 0x41, false);
        image.set_app(Vec::new());
        let (ivt, bdt) = image.layout().unwrap();
        assert_eq!(ivt.dcd_address, 0);
        assert_eq!(ivt.csf_address, 0);
        // app_len = 0: the image covers only the headers
        assert_eq!(bdt.length, 0x400 + 0xC00);
        assert_eq!(image.export().unwrap().len(), 0x1000);
    }

    #[test]
    fn v2_rejects_truncated_buffer() {
        let mut raw = sample_v2().export().unwrap();
        raw.truncate(0x1800);
        assert!(matches!(
            BootImg2::parse(&raw, 0x100).unwrap_err(),
            Error::LengthMismatch(_)
        ));
    }

    #[test]
    fn v2_csf_space_is_reserved() {
        let mut image = sample_v2();
        let mut csf_raw = vec![0xD4, 0x00, 0x10, 0x00];
        csf_raw.extend_from_slice(&[0x5A; 12]);
        image.csf = Some(SegCsf::from_raw(csf_raw).unwrap());
        let raw = image.export().unwrap();
        // app area + reserved CSF block
        assert_eq!(raw.len(), 0x400 + 0xC00 + 0x1000 + 0x2000);
        let parsed = BootImg2::parse(&raw, 0x100).unwrap();
        assert_eq!(parsed.csf.as_ref().unwrap().size(), 16);
        assert_eq!(parsed.export().unwrap(), raw);
    }

    #[test]
    fn unrecognized_buffer_is_rejected() {
        let raw = vec![0u8; 0x800];
        assert!(matches!(
            BootImage::parse(&raw, ParseHint::Auto, 0x100).unwrap_err(),
            Error::UnrecognizedVariant
        ));
    }

    #[test]
    fn v3a_requires_scfw_before_scd() {
        let mut image = BootImg3a::new(0x400, 0x43);
        let err = image
            .add_image(vec![0u8; 16], ImageKind::Scd, 0)
            .unwrap_err();
        assert!(matches!(err, Error::MissingRequiredSegment(_)));
    }

    #[test]
    fn v3a_roundtrip_with_scfw_and_app() {
        let mut image = BootImg3a::new(0x400, 0x43);
        image
            .add_image(vec![0x11; 0x300], ImageKind::Scfw, 0)
            .unwrap();
        image
            .add_image(vec![0x22; 0x180], ImageKind::Cm4_0, 0x3400_0000)
            .unwrap();
        image
            .add_image(vec![0x33; 0x500], ImageKind::AppA53, 0x8000_0000)
            .unwrap();
        let raw = image.export().unwrap();
        // first payload lands at the app alignment boundary
        assert_eq!(raw[V3_APP_ALIGN], 0x11);
        let parsed = BootImg3a::parse(&raw, 0x100).unwrap();
        assert_eq!(parsed.bdt[0].images_count, 2);
        assert_eq!(parsed.bdt[1].images_count, 1);
        assert_eq!(parsed.app[0][0], vec![0x11; 0x300]);
        assert_eq!(parsed.app[1][0], vec![0x33; 0x500]);
        let mut parsed = parsed;
        assert_eq!(parsed.export().unwrap(), raw);
    }

    #[test]
    fn v3a_slot_limit_is_app_too_large() {
        let mut image = BootImg3a::new(0x400, 0x43);
        for _ in 0..SegBds3a::IMAGES_MAX_COUNT {
            image
                .add_image(vec![0u8; 8], ImageKind::Cm4_0, 0x3400_0000)
                .unwrap();
        }
        assert!(matches!(
            image
                .add_image(vec![0u8; 8], ImageKind::Cm4_0, 0x3400_0000)
                .unwrap_err(),
            Error::AppTooLarge(_)
        ));
    }

    #[test]
    fn v3b_roundtrip_with_scd() {
        let mut image = BootImg3b::new(0x400, 0x43);
        image
            .add_image(vec![0x44; 0x250], ImageKind::Scfw, 0)
            .unwrap();
        image
            .add_image(vec![0x55; 0x100], ImageKind::Scd, 0)
            .unwrap();
        image
            .add_image(vec![0x66; 0x400], ImageKind::AppA72, 0x8000_0000)
            .unwrap();
        let raw = image.export().unwrap();
        let parsed = BootImg3b::parse(&raw, 0x100).unwrap();
        assert_eq!(parsed.bdt[0].images_count, 1);
        assert_eq!(parsed.bdt[1].images_count, 1);
        assert_eq!(parsed.bdt[1].images[0].flags, SCFW_FLAGS_A72);
        assert_eq!(parsed.scd, vec![0x55; 0x100]);
        let mut parsed = parsed;
        assert_eq!(parsed.export().unwrap(), raw);
    }

    #[test]
    fn build_dispatches_by_variant() {
        let image = BootImage::build(
            Variant::V2,
            0x8780_0000,
            vec![0xEE; 64],
            None,
            None,
            BuildOptions::default(),
        )
        .unwrap();
        assert_eq!(image.variant(), Variant::V2);
        assert_eq!(image.self_address(), 0x8780_0400);
    }
}
