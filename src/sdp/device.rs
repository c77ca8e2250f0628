// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Supported ROM devices and their HID report profiles.
//!
//! The ROM of every family member enumerates as a USB-HID device; the
//! VID/PID pair identifies the chip, the chip selects report sizes and the
//! endianness of device-to-host status words. On multi-user systems the
//! identifiers in [`DEVICE_TABLE`] are the ones a udev rule must grant
//! read/write access to; nothing here installs such rules.

use std::fmt;
use std::str::FromStr;

/// Chips whose ROM speaks the serial download protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipTag {
    Vybrid,
    Mx6Dqp,
    Mx6Sdl,
    Mx6Sl,
    Mx6Sx,
    Mx6Ul,
    Mx6Ull,
    Mx6Sll,
    Mx7Sd,
    Mx7Ulp,
    Mx8Mq,
    Mx8QxpA0,
    Mx8QmA0,
    Mx8Qxp,
    Mx8Qm,
    MxRt,
}

/// `(vendor_id, product_id, chip)` rows for every supported ROM.
pub const DEVICE_TABLE: &[(u16, u16, ChipTag)] = &[
    (0x15A2, 0x006A, ChipTag::Vybrid),
    (0x15A2, 0x0054, ChipTag::Mx6Dqp),
    (0x15A2, 0x0061, ChipTag::Mx6Sdl),
    (0x15A2, 0x0063, ChipTag::Mx6Sl),
    (0x15A2, 0x0071, ChipTag::Mx6Sx),
    (0x15A2, 0x007D, ChipTag::Mx6Ul),
    (0x15A2, 0x0080, ChipTag::Mx6Ull),
    (0x15A2, 0x0128, ChipTag::Mx6Sll),
    (0x15A2, 0x0076, ChipTag::Mx7Sd),
    (0x1FC9, 0x0126, ChipTag::Mx7Ulp),
    (0x1FC9, 0x012B, ChipTag::Mx8Mq),
    (0x1FC9, 0x007D, ChipTag::Mx8QxpA0),
    (0x1FC9, 0x0129, ChipTag::Mx8QmA0),
    (0x1FC9, 0x012F, ChipTag::Mx8Qxp),
    (0x1FC9, 0x0130, ChipTag::MxRt),
];

impl ChipTag {
    pub fn name(self) -> &'static str {
        match self {
            Self::Vybrid => "VYBRID",
            Self::Mx6Dqp => "MX6DQP",
            Self::Mx6Sdl => "MX6SDL",
            Self::Mx6Sl => "MX6SL",
            Self::Mx6Sx => "MX6SX",
            Self::Mx6Ul => "MX6UL",
            Self::Mx6Ull => "MX6ULL",
            Self::Mx6Sll => "MX6SLL",
            Self::Mx7Sd => "MX7SD",
            Self::Mx7Ulp => "MX7ULP",
            Self::Mx8Mq => "MX8MQ",
            Self::Mx8QxpA0 => "MX8QXP-A0",
            Self::Mx8QmA0 => "MX8QM-A0",
            Self::Mx8Qxp => "MX8QXP",
            Self::Mx8Qm => "MX8QM",
            Self::MxRt => "MXRT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        DEVICE_TABLE
            .iter()
            .map(|(_, _, chip)| *chip)
            .chain([Self::Mx8Qm])
            .find(|chip| chip.name().eq_ignore_ascii_case(name))
    }

    /// Report sizes and status framing for this chip's ROM.
    pub fn profile(self) -> HidProfile {
        match self {
            // the v8 generations frame device-to-host status big-endian
            Self::Mx8QxpA0 | Self::Mx8QmA0 | Self::Mx8Qxp | Self::Mx8Qm => HidProfile {
                report1_size: 1024,
                report2_size: 1024,
                report3_size: 4,
                report4_size: 64,
                status_big_endian: true,
            },
            _ => HidProfile::default(),
        }
    }

    /// Whether the ROM understands the Skip DCD Header command. The parts
    /// with DDR attached through the DCD path do; RT and v8 ROMs do not.
    pub fn supports_skip_dcd(self) -> bool {
        !matches!(
            self,
            Self::MxRt | Self::Mx8QxpA0 | Self::Mx8QmA0 | Self::Mx8Qxp | Self::Mx8Qm
        )
    }
}

impl fmt::Display for ChipTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Look up a chip by USB identity.
pub fn lookup(vid: u16, pid: u16) -> Option<ChipTag> {
    DEVICE_TABLE
        .iter()
        .find(|(v, p, _)| *v == vid && *p == pid)
        .map(|(_, _, chip)| *chip)
}

/// USB-HID report sizing and endian conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidProfile {
    /// host -> device command report
    pub report1_size: usize,
    /// host -> device data report
    pub report2_size: usize,
    /// device -> host interim status report
    pub report3_size: usize,
    /// device -> host final response report
    pub report4_size: usize,
    /// device -> host status words are big-endian
    pub status_big_endian: bool,
}

impl Default for HidProfile {
    fn default() -> Self {
        Self {
            report1_size: 1024,
            report2_size: 1024,
            report3_size: 4,
            report4_size: 64,
            status_big_endian: false,
        }
    }
}

/// The `--target` option: a chip symbol, a raw `VID:PID` pair, or automatic
/// matching against the device table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetSelector {
    #[default]
    Auto,
    ByChip(ChipTag),
    ByUsbId(u16, u16),
}

/// Error for unparseable `--target` strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadTarget(pub String);

impl fmt::Display for BadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown target: {}", self.0)
    }
}

impl std::error::Error for BadTarget {}

fn parse_u16(text: &str) -> Option<u16> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        // bare USB ids are conventionally hex
        u16::from_str_radix(text, 16).ok()
    }
}

impl FromStr for TargetSelector {
    type Err = BadTarget;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        if let Some((vid, pid)) = text.split_once(':') {
            let vid = parse_u16(vid).ok_or_else(|| BadTarget(text.into()))?;
            let pid = parse_u16(pid).ok_or_else(|| BadTarget(text.into()))?;
            return Ok(Self::ByUsbId(vid, pid));
        }
        ChipTag::from_name(text)
            .map(Self::ByChip)
            .ok_or_else(|| BadTarget(text.into()))
    }
}

impl TargetSelector {
    /// Does a device with this USB identity match the selector?
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        match self {
            Self::Auto => lookup(vid, pid).is_some(),
            Self::ByChip(chip) => lookup(vid, pid) == Some(*chip),
            Self::ByUsbId(v, p) => *v == vid && *p == pid,
        }
    }

    /// The HID profile the selector implies. Raw VID:PID selectors fall
    /// back to the table, then to the default profile.
    pub fn profile(&self) -> HidProfile {
        match self {
            Self::Auto => HidProfile::default(),
            Self::ByChip(chip) => chip.profile(),
            Self::ByUsbId(vid, pid) => lookup(*vid, *pid)
                .map(ChipTag::profile)
                .unwrap_or_default(),
        }
    }
}

/// Process-wide client configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanConfig {
    pub target: TargetSelector,
    /// 0 = quiet, 1 = info, 2 = full transfer tracing
    pub debug_level: u8,
}

impl ScanConfig {
    pub fn new(target: TargetSelector, debug_level: u8) -> Self {
        Self {
            target,
            debug_level,
        }
    }

    /// Whether an enumerated device should be opened under this
    /// configuration.
    pub fn accepts(&self, vid: u16, pid: u16) -> bool {
        self.target.matches(vid, pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup() {
        assert_eq!(lookup(0x15A2, 0x0054), Some(ChipTag::Mx6Dqp));
        assert_eq!(lookup(0x1FC9, 0x0130), Some(ChipTag::MxRt));
        assert_eq!(lookup(0xDEAD, 0xBEEF), None);
    }

    #[test]
    fn chip_names_roundtrip() {
        for (_, _, chip) in DEVICE_TABLE {
            assert_eq!(ChipTag::from_name(chip.name()), Some(*chip));
        }
        assert_eq!(ChipTag::from_name("mx6dqp"), Some(ChipTag::Mx6Dqp));
        assert_eq!(ChipTag::from_name("MX8QM"), Some(ChipTag::Mx8Qm));
    }

    #[test]
    fn target_selector_parsing() {
        assert_eq!("auto".parse::<TargetSelector>().unwrap(), TargetSelector::Auto);
        assert_eq!(
            "MX7SD".parse::<TargetSelector>().unwrap(),
            TargetSelector::ByChip(ChipTag::Mx7Sd)
        );
        assert_eq!(
            "0x15A2:0x0061".parse::<TargetSelector>().unwrap(),
            TargetSelector::ByUsbId(0x15A2, 0x0061)
        );
        assert_eq!(
            "1fc9:012b".parse::<TargetSelector>().unwrap(),
            TargetSelector::ByUsbId(0x1FC9, 0x012B)
        );
        assert!("flux-capacitor".parse::<TargetSelector>().is_err());
    }

    #[test]
    fn selector_matching() {
        let by_chip = TargetSelector::ByChip(ChipTag::Mx6Ul);
        assert!(by_chip.matches(0x15A2, 0x007D));
        assert!(!by_chip.matches(0x15A2, 0x0054));
        assert!(TargetSelector::Auto.matches(0x15A2, 0x0054));
        assert!(!TargetSelector::Auto.matches(0x0000, 0x0001));
    }

    #[test]
    fn v8_profiles_use_big_endian_status() {
        assert!(ChipTag::Mx8Qxp.profile().status_big_endian);
        assert!(!ChipTag::Mx6Dqp.profile().status_big_endian);
        assert_eq!(ChipTag::Mx6Dqp.profile().report3_size, 4);
    }

    #[test]
    fn skip_dcd_support() {
        assert!(ChipTag::Mx6Ul.supports_skip_dcd());
        assert!(!ChipTag::MxRt.supports_skip_dcd());
    }

    #[test]
    fn scan_config_filters_by_target() {
        let config = ScanConfig::new("MX6ULL".parse().unwrap(), 1);
        assert!(config.accepts(0x15A2, 0x0080));
        assert!(!config.accepts(0x15A2, 0x0054));
        assert!(ScanConfig::default().accepts(0x15A2, 0x0054));
    }
}
