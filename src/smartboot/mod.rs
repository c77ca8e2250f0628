// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Smart-boot recipe interpreter.
//!
//! A `.smx` description has four sections: `HEAD` (chip selection), `VARS`
//! (string substitutions), `DATA` (named payload segments) and `BODY`
//! (ordered recipes of device commands). `{{ name }}` substitution runs over
//! the raw document before structural interpretation; execution composes the
//! boot-image codec with the download client.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::dcd;
use crate::image;
use crate::sdp::{self, TargetSelector};

pub mod data;
pub mod env;
pub mod script;

pub use data::{DataSeg, EnvPatch, ImxCompose, SegKind, SegSource};
pub use env::{EnvError, EnvMode};
pub use script::{compile, execute, BootCmd};

/// Smart-boot errors. The first failure aborts the recipe; partial target
/// state is not rolled back.
#[derive(Debug)]
pub enum Error {
    Document(String),
    UnresolvedVariable(String),
    UnknownSegmentRef(String),
    Io(String),
    Env(EnvError),
    Dcd(dcd::Error),
    Image(image::Error),
    Sdp(sdp::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Document(msg) => write!(f, "smart-boot description: {msg}"),
            Error::UnresolvedVariable(name) => write!(f, "unresolved variable: {name}"),
            Error::UnknownSegmentRef(name) => write!(f, "unknown data segment: {name}"),
            Error::Io(msg) => write!(f, "i/o: {msg}"),
            Error::Env(err) => write!(f, "environment patch: {err}"),
            Error::Dcd(err) => write!(f, "DCD: {err}"),
            Error::Image(err) => write!(f, "boot image: {err}"),
            Error::Sdp(err) => write!(f, "device: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<EnvError> for Error {
    fn from(err: EnvError) -> Self {
        Error::Env(err)
    }
}

impl From<dcd::Error> for Error {
    fn from(err: dcd::Error) -> Self {
        Error::Dcd(err)
    }
}

impl From<image::Error> for Error {
    fn from(err: image::Error) -> Self {
        Error::Image(err)
    }
}

impl From<sdp::Error> for Error {
    fn from(err: sdp::Error) -> Self {
        Error::Sdp(err)
    }
}

/// Replace every `{{ name }}` in `text` from `vars`. A single pass; values
/// are inserted verbatim.
pub fn substitute(text: &str, vars: &BTreeMap<String, String>) -> Result<String, Error> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(Error::Document("unterminated {{ variable }}".into()));
        };
        let name = after[..end].trim();
        let value = vars
            .get(name)
            .ok_or_else(|| Error::UnresolvedVariable(name.to_string()))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn val_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn val_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(text) => dcd::text::parse_u32(text),
        _ => None,
    }
}

fn get<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Value> {
    mapping.get(&Value::String(key.to_string()))
}

fn get_string(mapping: &Mapping, key: &str) -> Option<String> {
    get(mapping, key).and_then(val_string)
}

/// One named BODY recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    pub name: String,
    pub desc: String,
    pub cmds: String,
}

/// A parsed `.smx` document.
#[derive(Debug, Clone)]
pub struct SmxFile {
    pub name: String,
    pub desc: String,
    pub chip: TargetSelector,
    pub data: Vec<DataSeg>,
    pub body: Vec<Recipe>,
}

impl SmxFile {
    /// Parse the document text: read `VARS`, substitute, then interpret the
    /// sections.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let probe: Value = serde_yaml::from_str(text)
            .map_err(|err| Error::Document(err.to_string()))?;
        let mut vars = BTreeMap::new();
        if let Some(mapping) = probe.get("VARS").and_then(Value::as_mapping) {
            for (key, value) in mapping {
                if let (Some(key), Some(value)) = (val_string(key), val_string(value)) {
                    vars.insert(key, value);
                }
            }
        }
        let text = substitute(text, &vars)?;
        let doc: Value = serde_yaml::from_str(&text)
            .map_err(|err| Error::Document(err.to_string()))?;

        let head = doc
            .get("HEAD")
            .and_then(Value::as_mapping)
            .ok_or_else(|| Error::Document("HEAD section is required".into()))?;
        let chip_text = get_string(head, "CHIP")
            .ok_or_else(|| Error::Document("HEAD->CHIP is required".into()))?;
        let chip: TargetSelector = chip_text
            .parse()
            .map_err(|err| Error::Document(format!("HEAD->CHIP: {err}")))?;

        let mut smx = Self {
            name: get_string(head, "NAME").unwrap_or_default(),
            desc: get_string(head, "DESC").unwrap_or_default(),
            chip,
            data: Vec::new(),
            body: Vec::new(),
        };

        let data = doc
            .get("DATA")
            .and_then(Value::as_mapping)
            .ok_or_else(|| Error::Document("DATA section is required".into()))?;
        for (name, value) in data {
            let name = val_string(name)
                .ok_or_else(|| Error::Document("DATA segment names must be strings".into()))?;
            let seg = smx.parse_segment(&name, value)?;
            smx.data.push(seg);
        }

        let body = doc
            .get("BODY")
            .and_then(Value::as_sequence)
            .ok_or_else(|| Error::Document("BODY section is required".into()))?;
        for entry in body {
            let mapping = entry
                .as_mapping()
                .ok_or_else(|| Error::Document("BODY entries must be mappings".into()))?;
            smx.body.push(Recipe {
                name: get_string(mapping, "NAME").unwrap_or_else(|| "unnamed".into()),
                desc: get_string(mapping, "DESC").unwrap_or_default(),
                cmds: get_string(mapping, "CMDS")
                    .ok_or_else(|| Error::Document("BODY->CMDS is required".into()))?,
            });
        }
        if smx.body.is_empty() {
            return Err(Error::Document("BODY section is empty".into()));
        }
        Ok(smx)
    }

    fn parse_segment(&self, name: &str, value: &Value) -> Result<DataSeg, Error> {
        let mapping = value
            .as_mapping()
            .ok_or_else(|| Error::Document(format!("DATA->{name} must be a mapping")))?;
        let kind = match get_string(mapping, "TYPE") {
            Some(raw) => SegKind::from_name(&raw)
                .ok_or_else(|| Error::Document(format!("DATA->{name}: unsupported TYPE {raw}")))?,
            None => SegKind::Bin,
        };
        let mut env = EnvPatch::default();
        if let Some(raw) = get_string(mapping, "MODE") {
            env.mode = EnvMode::from_name(&raw)
                .ok_or_else(|| Error::Document(format!("DATA->{name}: unsupported MODE {raw}")))?;
        }
        if let Some(mark) = get_string(mapping, "MARK") {
            env.mark = mark;
        }
        if let Some(eval) = get_string(mapping, "EVAL") {
            env.eval = eval;
        }

        let addr = match get(mapping, "ADDR") {
            Some(value) => Some(
                val_u32(value)
                    .ok_or_else(|| Error::Document(format!("DATA->{name}: invalid ADDR")))?,
            ),
            None => None,
        };

        let source = if let Some(file) = get_string(mapping, "FILE") {
            SegSource::File(file.into())
        } else {
            match get(mapping, "DATA") {
                Some(Value::String(text)) => SegSource::Inline(text.clone()),
                Some(Value::Mapping(compose)) => {
                    if kind != SegKind::Imx {
                        return Err(Error::Document(format!(
                            "DATA->{name}: only IMX segments compose from sub-segments"
                        )));
                    }
                    SegSource::Compose(self.parse_compose(name, compose)?)
                }
                Some(_) => {
                    return Err(Error::Document(format!(
                        "DATA->{name}: DATA must be text or a mapping"
                    )))
                }
                None => {
                    return Err(Error::Document(format!(
                        "DATA->{name}: FILE or DATA is required"
                    )))
                }
            }
        };

        Ok(DataSeg {
            name: name.to_string(),
            desc: get_string(mapping, "DESC").unwrap_or_default(),
            kind,
            addr,
            source,
            env,
        })
    }

    fn parse_compose(&self, name: &str, mapping: &Mapping) -> Result<ImxCompose, Error> {
        let start_address = get(mapping, "STADDR")
            .and_then(val_u32)
            .ok_or_else(|| Error::Document(format!("DATA->{name}: STADDR is required")))?;
        let offset = match get(mapping, "OFFSET") {
            Some(value) => val_u32(value)
                .ok_or_else(|| Error::Document(format!("DATA->{name}: invalid OFFSET")))?,
            None => 0x400,
        };
        let reference = |key: &str| -> Result<usize, Error> {
            let target = get_string(mapping, key)
                .ok_or_else(|| Error::Document(format!("DATA->{name}: {key} is required")))?;
            self.data
                .iter()
                .position(|seg| seg.name == target)
                .ok_or(Error::UnknownSegmentRef(target))
        };
        Ok(ImxCompose {
            start_address,
            offset,
            dcd_index: reference("DCDSEG")?,
            app_index: reference("APPSEG")?,
        })
    }

    pub fn segment(&self, name: &str) -> Option<&DataSeg> {
        self.data.iter().find(|seg| seg.name == name)
    }

    /// Resolve every DATA segment to bytes, in declaration order.
    pub fn resolve_data(&self, base_dir: &Path) -> Result<Vec<Vec<u8>>, Error> {
        let mut resolved: Vec<Vec<u8>> = Vec::new();
        for seg in &self.data {
            let bytes = seg.resolve(base_dir, &resolved)?;
            resolved.push(bytes);
        }
        Ok(resolved)
    }

    /// Compile one BODY recipe into device operations.
    pub fn compile(&self, index: usize, resolved: &[Vec<u8>]) -> Result<Vec<BootCmd>, Error> {
        let recipe = self
            .body
            .get(index)
            .ok_or_else(|| Error::Document(format!("no boot option {index}")))?;
        script::compile(&recipe.cmds, &self.data, resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::{
        HidProfile, MockTransport, SdpClient, ACK_FILE_COMPLETE, ACK_SKIP_DCD,
        ACK_WRITE_COMPLETE, REPORT_COMMAND, REPORT_INTERIM, REPORT_RESPONSE, SECURE_OPEN,
    };

    const SMX: &str = r#"
HEAD:
  NAME: imx7d ram loader
  DESC: load and start u-boot from RAM
  CHIP: MX7SD

VARS:
  OCRAM: "0x00910000"
  START: "0x877FF000"

DATA:
  ddr_init:
    TYPE: DCD
    DESC: DDR controller bring-up
    ADDR: "{{ OCRAM }}"
    DATA: |
      WriteValue 4 0x30340004 0x4F400005
      WriteValue 4 0x30391000 0x00000002
      CheckAnyClear 4 0x307900C4 0x00000001

  app_blob:
    TYPE: BIN
    DATA: application payload bytes

  boot_img:
    TYPE: IMX
    DESC: composed boot image
    DATA:
      STADDR: "{{ START }}"
      OFFSET: "0x400"
      DCDSEG: ddr_init
      APPSEG: app_blob

BODY:
  - NAME: ram_boot
    DESC: full RAM boot
    CMDS: |
      WREG 4 0x30340004 0x4F400005
      WDCD ddr_init
      WIMG boot_img
      SDCD
      JRUN boot_img
"#;

    #[test]
    fn parses_head_vars_and_sections() {
        let smx = SmxFile::parse(SMX).unwrap();
        assert_eq!(smx.name, "imx7d ram loader");
        assert!(matches!(smx.chip, TargetSelector::ByChip(_)));
        assert_eq!(smx.data.len(), 3);
        assert_eq!(smx.body.len(), 1);
        assert_eq!(smx.segment("ddr_init").unwrap().addr, Some(0x0091_0000));
    }

    #[test]
    fn unresolved_variable_is_fatal() {
        let text = SMX.replace("OCRAM:", "SCRATCH:");
        match SmxFile::parse(&text).unwrap_err() {
            Error::UnresolvedVariable(name) => assert_eq!(name, "OCRAM"),
            other => panic!("expected unresolved variable, got {other}"),
        }
    }

    #[test]
    fn unknown_compose_reference_is_fatal() {
        let text = SMX.replace("APPSEG: app_blob", "APPSEG: nonesuch");
        assert!(matches!(
            SmxFile::parse(&text).unwrap_err(),
            Error::UnknownSegmentRef(name) if name == "nonesuch"
        ));
    }

    #[test]
    fn chip_accepts_vid_pid_literal() {
        let text = SMX.replace("CHIP: MX7SD", "CHIP: \"0x15A2:0x0076\"");
        let smx = SmxFile::parse(&text).unwrap();
        assert_eq!(smx.chip, TargetSelector::ByUsbId(0x15A2, 0x0076));
    }

    #[test]
    fn recipe_runs_against_mock_device() {
        let smx = SmxFile::parse(SMX).unwrap();
        let resolved = smx.resolve_data(Path::new(".")).unwrap();
        let script = smx.compile(0, &resolved).unwrap();
        assert_eq!(script.len(), 5);

        let mut mock = MockTransport::new();
        // WREG
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, ACK_WRITE_COMPLETE, false);
        // WDCD
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, ACK_WRITE_COMPLETE, false);
        // WIMG
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, ACK_FILE_COMPLETE, false);
        // SDCD
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, ACK_SKIP_DCD, false);
        // JRUN (no final report, the core jumps away)
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);

        let mut client = SdpClient::new(mock, HidProfile::default());
        client.open().unwrap();
        execute(&mut client, &script).unwrap();

        let mock = client.into_transport();
        let opcodes: Vec<u16> = mock
            .sent
            .iter()
            .filter(|raw| raw[0] == REPORT_COMMAND)
            .map(|raw| u16::from_be_bytes([raw[1], raw[2]]))
            .collect();
        assert_eq!(opcodes, vec![0x0202, 0x0606, 0x0404, 0x0B0B, 0x0F0F]);

        // the image write targets the composed image base, the jump its IVT
        let commands: Vec<&Vec<u8>> = mock
            .sent
            .iter()
            .filter(|raw| raw[0] == REPORT_COMMAND)
            .collect();
        assert_eq!(&commands[2][3..7], &0x877F_F000u32.to_be_bytes());
        assert_eq!(&commands[4][3..7], &0x877F_F400u32.to_be_bytes());
    }

    #[test]
    fn recipe_aborts_on_first_device_error() {
        let smx = SmxFile::parse(SMX).unwrap();
        let resolved = smx.resolve_data(Path::new(".")).unwrap();
        let script = smx.compile(0, &resolved).unwrap();

        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, 0xDEAD_0001, false);
        let mut client = SdpClient::new(mock, HidProfile::default());
        client.open().unwrap();
        let err = execute(&mut client, &script).unwrap_err();
        assert!(matches!(err, Error::Sdp(sdp::Error::DeviceError(0xDEAD_0001))));
        // nothing past the failing command was sent
        let mock = client.into_transport();
        assert_eq!(mock.sent.len(), 1);
    }

    #[test]
    fn substitution_is_single_pass() {
        let mut vars = BTreeMap::new();
        vars.insert("A".to_string(), "{{ B }}".to_string());
        vars.insert("B".to_string(), "x".to_string());
        // the inserted value is kept verbatim, not expanded again
        assert_eq!(substitute("{{ A }}", &vars).unwrap(), "{{ B }}");
    }
}
