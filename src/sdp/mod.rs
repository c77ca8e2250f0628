// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Serial Download Protocol client.
//!
//! The ROM exposes a half-duplex command channel over four HID reports:
//! report 1 carries the 16-byte command block host-to-device, report 2
//! streams payload data, report 3 returns the interim security status and
//! report 4 the final response. Every operation is one command/reply cycle;
//! a failure leaves the handle in a sticky error state until `close` or
//! `reset`.

use std::fmt;

use crate::core::bytes::hexstr;
use crate::hab;

pub mod device;
pub mod transport;

pub use device::{ChipTag, HidProfile, ScanConfig, TargetSelector};
pub use transport::{HidTransport, MockTransport, TransportError};

/// Report IDs of the protocol.
pub const REPORT_COMMAND: u8 = 1;
pub const REPORT_DATA: u8 = 2;
pub const REPORT_INTERIM: u8 = 3;
pub const REPORT_RESPONSE: u8 = 4;

/// Command opcodes, 16-bit big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdId {
    ReadRegister = 0x0101,
    WriteRegister = 0x0202,
    WriteFile = 0x0404,
    ReadStatus = 0x0505,
    WriteDcd = 0x0606,
    WriteCsf = 0x0A0A,
    SkipDcdHeader = 0x0B0B,
    JumpAddress = 0x0F0F,
}

/// Completion words the ROM reports on report 4.
pub const ACK_WRITE_COMPLETE: u32 = 0x128A_8A12;
pub const ACK_FILE_COMPLETE: u32 = 0x8888_8888;
pub const ACK_SKIP_DCD: u32 = 0x900D_D009;

/// Security configuration words on report 3.
pub const SECURE_OPEN: u32 = 0x5678_7856;
pub const SECURE_LOCKED: u32 = 0x1234_3412;

/// Register access width, encoded as the on-wire format byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Bits8 = 0x08,
    Bits16 = 0x10,
    Bits32 = 0x20,
}

impl DataFormat {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::Bits8),
            16 => Some(Self::Bits16),
            32 => Some(Self::Bits32),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn bytes(self) -> u32 {
        (self as u32) / 8
    }
}

/// SDP client errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    BadAlignment { address: u32, bytes: u32 },
    TransportTimeout,
    TransportError(String),
    DeviceNotFound,
    DeviceBusy,
    UnexpectedReport { expected: u8, found: u8 },
    HabStatusError(u32),
    DeviceError(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadAlignment { address, bytes } => {
                write!(f, "address 0x{address:08X} is not aligned to {bytes} bytes")
            }
            Error::TransportTimeout => write!(f, "timed out waiting for the device"),
            Error::TransportError(msg) => write!(f, "transport error: {msg}"),
            Error::DeviceNotFound => write!(f, "no matching device connected"),
            Error::DeviceBusy => write!(f, "device handle is not ready"),
            Error::UnexpectedReport { expected, found } => {
                write!(f, "expected report {expected}, device sent report {found}")
            }
            Error::HabStatusError(word) => {
                write!(f, "device security status 0x{word:08X}: {}", hab::status_info(*word))
            }
            Error::DeviceError(word) => {
                write!(f, "device reported 0x{word:08X}: {}", hab::status_info(*word))
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Error::TransportTimeout,
            TransportError::Failed(msg) => Error::TransportError(msg),
        }
    }
}

/// Per-frame progress callback for streaming writes.
pub trait ProgressListener {
    fn on_progress(&mut self, bytes_sent: usize, total: usize);
}

/// Device handle lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Disconnected,
    Opened,
    Idle,
    Error,
}

/// Options for the composite [`SdpClient::write_image`].
#[derive(Debug, Clone, Copy)]
pub struct WriteImageOptions {
    /// Upload the image's DCD to OCRAM first to bring up DDR.
    pub init_ddr: bool,
    /// Issue Skip DCD Header after the image write so the ROM does not run
    /// the DCD a second time.
    pub skip_dcd: bool,
    /// OCRAM scratch address for the DDR-init DCD upload.
    pub ocram_address: u32,
    /// Jump to the image after writing.
    pub run: bool,
}

impl Default for WriteImageOptions {
    fn default() -> Self {
        Self {
            init_ddr: false,
            skip_dcd: false,
            ocram_address: 0x0091_0000,
            run: false,
        }
    }
}

/// The host side of the serial download protocol over one device handle.
pub struct SdpClient<T: HidTransport> {
    transport: T,
    profile: HidProfile,
    state: HandleState,
    timeout_ms: u64,
    progress: Option<Box<dyn ProgressListener>>,
}

impl<T: HidTransport> SdpClient<T> {
    pub fn new(transport: T, profile: HidProfile) -> Self {
        Self {
            transport,
            profile,
            state: HandleState::Disconnected,
            timeout_ms: 1000,
            progress: None,
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn set_timeout_ms(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    pub fn set_progress_listener(&mut self, listener: Option<Box<dyn ProgressListener>>) {
        self.progress = listener;
    }

    /// Take ownership of the device channel.
    pub fn open(&mut self) -> Result<(), Error> {
        if self.state != HandleState::Disconnected {
            return Err(Error::DeviceBusy);
        }
        self.state = HandleState::Opened;
        Ok(())
    }

    /// Release the device channel. Valid from any state.
    pub fn close(&mut self) {
        self.state = HandleState::Disconnected;
    }

    /// Clear a sticky error without dropping the channel.
    pub fn reset(&mut self) {
        if self.state == HandleState::Error {
            self.state = HandleState::Idle;
        }
    }

    /// Tear down the handle and recover the transport (used by tests).
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn guard(&self) -> Result<(), Error> {
        match self.state {
            HandleState::Opened | HandleState::Idle => Ok(()),
            HandleState::Disconnected => {
                Err(Error::TransportError("device handle is not open".into()))
            }
            HandleState::Error => Err(Error::DeviceBusy),
        }
    }

    /// Run one command/reply cycle, folding the outcome into the handle
    /// state machine.
    fn run<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R, Error>) -> Result<R, Error> {
        self.guard()?;
        match op(self) {
            Ok(value) => {
                self.state = HandleState::Idle;
                Ok(value)
            }
            Err(err) => {
                self.state = HandleState::Error;
                Err(err)
            }
        }
    }

    fn send_cmd(
        &mut self,
        cmd: CmdId,
        address: u32,
        format: u8,
        count: u32,
        value: u32,
    ) -> Result<(), Error> {
        let mut block = [0u8; 16];
        block[0..2].copy_from_slice(&(cmd as u16).to_be_bytes());
        block[2..6].copy_from_slice(&address.to_be_bytes());
        block[6] = format;
        block[7..11].copy_from_slice(&count.to_be_bytes());
        block[11..15].copy_from_slice(&value.to_be_bytes());
        log::debug!("TX-CMD [0x]: {}", hexstr(&block));
        let report = transport::encode_report(REPORT_COMMAND, &block, self.profile.report1_size);
        self.transport.write_report(&report)?;
        Ok(())
    }

    fn read_expected(&mut self, expected: u8) -> Result<Vec<u8>, Error> {
        let raw = self.transport.read_report(self.timeout_ms)?;
        let (id, payload) =
            transport::decode_report(&raw).ok_or_else(|| Error::TransportError("empty report".into()))?;
        log::debug!("RX [0x]: {:02X} {}", id, hexstr(payload));
        if id != expected {
            return Err(Error::UnexpectedReport {
                expected,
                found: id,
            });
        }
        Ok(payload.to_vec())
    }

    fn status_word(&self, payload: &[u8]) -> Result<u32, Error> {
        if payload.len() < 4 {
            return Err(Error::TransportError("status report shorter than 4 bytes".into()));
        }
        let bytes = [payload[0], payload[1], payload[2], payload[3]];
        Ok(if self.profile.status_big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    /// Consume the report-3 interim status. Anything other than the open
    /// security configuration aborts the operation.
    fn check_interim(&mut self) -> Result<(), Error> {
        let payload = self.read_expected(REPORT_INTERIM)?;
        let word = self.status_word(&payload)?;
        if word != SECURE_OPEN {
            log::info!("SECURE: 0x{word:08X}");
            return Err(Error::HabStatusError(word));
        }
        log::debug!("SECURE: not enabled");
        Ok(())
    }

    fn final_status(&mut self) -> Result<u32, Error> {
        let payload = self.read_expected(REPORT_RESPONSE)?;
        self.status_word(&payload)
    }

    fn expect_ack(&mut self, ack: u32) -> Result<(), Error> {
        let word = self.final_status()?;
        if word != ack {
            log::info!("RX-CMD: ERROR 0x{word:08X}");
            return Err(Error::DeviceError(word));
        }
        log::info!("RX-CMD: OK");
        Ok(())
    }

    /// Stream payload bytes in report-2 frames, one byte reserved for the
    /// report ID.
    fn send_data(&mut self, data: &[u8]) -> Result<(), Error> {
        let frame_len = self.profile.report2_size - 1;
        let total = data.len();
        let mut sent = 0usize;
        for chunk in data.chunks(frame_len) {
            let report = transport::encode_report(REPORT_DATA, chunk, self.profile.report2_size);
            self.transport.write_report(&report)?;
            sent += chunk.len();
            if let Some(listener) = self.progress.as_deref_mut() {
                listener.on_progress(sent, total);
            }
        }
        Ok(())
    }

    fn check_alignment(address: u32, format: DataFormat) -> Result<(), Error> {
        if address % format.bytes() != 0 {
            return Err(Error::BadAlignment {
                address,
                bytes: format.bytes(),
            });
        }
        Ok(())
    }

    /// Read `count` cells of `format` width starting at `address`.
    pub fn read_register(
        &mut self,
        address: u32,
        format: DataFormat,
        count: u32,
    ) -> Result<Vec<u32>, Error> {
        Self::check_alignment(address, format)?;
        self.run(|client| {
            let byte_count = count * format.bytes();
            log::info!(
                "TX-CMD: Read [ Addr=0x{address:08X} | Len={byte_count} | Format={} ]",
                format.bytes() * 8
            );
            client.send_cmd(CmdId::ReadRegister, address, format.code(), byte_count, 0)?;
            client.check_interim()?;
            let mut data = Vec::with_capacity(byte_count as usize);
            while data.len() < byte_count as usize {
                let payload = client.read_expected(REPORT_RESPONSE)?;
                data.extend_from_slice(&payload);
            }
            data.truncate(byte_count as usize);
            let cell = format.bytes() as usize;
            let values = data
                .chunks_exact(cell)
                .map(|chunk| match format {
                    DataFormat::Bits8 => u32::from(chunk[0]),
                    DataFormat::Bits16 => u32::from(u16::from_le_bytes([chunk[0], chunk[1]])),
                    DataFormat::Bits32 => {
                        u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
                    }
                })
                .collect();
            Ok(values)
        })
    }

    /// Write one register cell.
    pub fn write_register(
        &mut self,
        address: u32,
        value: u32,
        format: DataFormat,
    ) -> Result<(), Error> {
        Self::check_alignment(address, format)?;
        self.run(|client| {
            log::info!("TX-CMD: Write [ Addr=0x{address:08X} | Val=0x{value:08X} ]");
            client.send_cmd(
                CmdId::WriteRegister,
                address,
                format.code(),
                format.bytes(),
                value,
            )?;
            client.check_interim()?;
            client.expect_ack(ACK_WRITE_COMPLETE)
        })
    }

    /// Push a DCD blob to `address` and let the ROM execute it.
    pub fn write_dcd(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        self.run(|client| {
            log::info!("TX-CMD: WriteDCD [ Addr=0x{address:08X} | Len={} ]", data.len());
            client.send_cmd(CmdId::WriteDcd, address, 0, data.len() as u32, 0)?;
            client.send_data(data)?;
            client.check_interim()?;
            client.expect_ack(ACK_WRITE_COMPLETE)
        })
    }

    /// Push CSF data to `address`.
    pub fn write_csf(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        self.run(|client| {
            log::info!("TX-CMD: WriteCSF [ Addr=0x{address:08X} | Len={} ]", data.len());
            client.send_cmd(CmdId::WriteCsf, address, 0, data.len() as u32, 0)?;
            client.send_data(data)?;
            client.check_interim()?;
            client.expect_ack(ACK_WRITE_COMPLETE)
        })
    }

    /// Write arbitrary bytes to target memory.
    pub fn write_file(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        self.run(|client| {
            log::info!("TX-CMD: WriteFile [ Addr=0x{address:08X} | Len={} ]", data.len());
            client.send_cmd(CmdId::WriteFile, address, 0, data.len() as u32, 0)?;
            client.send_data(data)?;
            client.check_interim()?;
            client.expect_ack(ACK_FILE_COMPLETE)
        })
    }

    /// Tell the ROM to ignore the DCD of the already-loaded image.
    pub fn skip_dcd(&mut self) -> Result<(), Error> {
        self.run(|client| {
            log::info!("TX-CMD: SkipDCD");
            client.send_cmd(CmdId::SkipDcdHeader, 0, 0, 0, 0)?;
            client.check_interim()?;
            client.expect_ack(ACK_SKIP_DCD)
        })
    }

    /// Jump into a previously written image. The device usually leaves the
    /// protocol, so a missing final report counts as success; a report that
    /// does arrive carries a HAB event.
    pub fn jump(&mut self, address: u32) -> Result<(), Error> {
        self.run(|client| {
            log::info!("TX-CMD: Jump [ Addr=0x{address:08X} ]");
            client.send_cmd(CmdId::JumpAddress, address, 0, 0, 0)?;
            client.check_interim()?;
            match client.transport.read_report(client.timeout_ms) {
                Err(TransportError::Timeout) => Ok(()),
                Err(other) => Err(other.into()),
                Ok(raw) => {
                    let (id, payload) = transport::decode_report(&raw)
                        .ok_or_else(|| Error::TransportError("empty report".into()))?;
                    if id != REPORT_RESPONSE {
                        return Err(Error::UnexpectedReport {
                            expected: REPORT_RESPONSE,
                            found: id,
                        });
                    }
                    let word = client.status_word(payload)?;
                    Err(Error::DeviceError(word))
                }
            }
        })
    }

    /// Read the ROM error status word; the value is passed through.
    pub fn read_status(&mut self) -> Result<u32, Error> {
        self.run(|client| {
            log::info!("TX-CMD: ReadStatus");
            client.send_cmd(CmdId::ReadStatus, 0, 0, 0, 0)?;
            client.check_interim()?;
            client.final_status()
        })
    }

    /// Composite image load: optional DDR init from the image's DCD,
    /// image write, optional Skip DCD, optional jump.
    pub fn write_image(
        &mut self,
        image: &mut crate::image::BootImage,
        options: &WriteImageOptions,
    ) -> Result<(), Error> {
        let raw = image
            .export()
            .map_err(|err| Error::TransportError(format!("image export failed: {err}")))?;
        if options.init_ddr {
            match image.dcd() {
                Some(dcd) => {
                    log::info!("Init DDR via OCRAM 0x{:08X}", options.ocram_address);
                    let blob = dcd.export();
                    self.write_dcd(options.ocram_address, &blob)?;
                }
                None => log::warn!("init_ddr requested but the image carries no DCD"),
            }
        }
        let address = (image.self_address() - u64::from(image.offset())) as u32;
        self.write_file(address, &raw)?;
        if options.skip_dcd {
            self.skip_dcd()?;
        }
        if options.run {
            self.jump(image.self_address() as u32)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_profile() -> HidProfile {
        HidProfile {
            report1_size: 17,
            report2_size: 9,
            report3_size: 4,
            report4_size: 65,
            status_big_endian: false,
        }
    }

    fn open_client(mock: MockTransport, profile: HidProfile) -> SdpClient<MockTransport> {
        let mut client = SdpClient::new(mock, profile);
        client.open().unwrap();
        client
    }

    #[test]
    fn write_register_emits_golden_command_block() {
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, ACK_WRITE_COMPLETE, false);
        let mut client = open_client(mock, HidProfile::default());
        client
            .write_register(0x0090_0000, 0x5555_5555, DataFormat::Bits32)
            .unwrap();
        assert_eq!(client.state(), HandleState::Idle);

        let mock = client.into_transport();
        assert_eq!(mock.sent.len(), 1);
        let payload = mock.sent_payload(0);
        assert_eq!(mock.sent[0][0], REPORT_COMMAND);
        assert_eq!(mock.sent[0].len(), HidProfile::default().report1_size);
        assert_eq!(&payload[0..2], &0x0202u16.to_be_bytes());
        assert_eq!(&payload[2..6], &0x0090_0000u32.to_be_bytes());
        assert_eq!(payload[6], 0x20);
        assert_eq!(&payload[7..11], &4u32.to_be_bytes());
        assert_eq!(&payload[11..15], &0x5555_5555u32.to_be_bytes());
        assert_eq!(payload[15], 0);
    }

    #[test]
    fn write_register_rejects_misaligned_address() {
        let client_err = {
            let mut client = open_client(MockTransport::new(), HidProfile::default());
            client.write_register(0x0090_0002, 0, DataFormat::Bits32)
        };
        assert!(matches!(
            client_err.unwrap_err(),
            Error::BadAlignment { address: 0x0090_0002, bytes: 4 }
        ));
    }

    #[test]
    fn write_register_bad_ack_is_device_error_and_sticky() {
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, 0xDEAD_BEEF, false);
        let mut client = open_client(mock, HidProfile::default());
        let err = client
            .write_register(0x0090_0000, 1, DataFormat::Bits32)
            .unwrap_err();
        assert_eq!(err, Error::DeviceError(0xDEAD_BEEF));
        assert_eq!(client.state(), HandleState::Error);
        // sticky until reset
        assert_eq!(
            client.read_status().unwrap_err(),
            Error::DeviceBusy
        );
        client.reset();
        assert_eq!(client.state(), HandleState::Idle);
    }

    #[test]
    fn locked_device_reports_hab_status_error() {
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_LOCKED, false);
        let mut client = open_client(mock, HidProfile::default());
        assert_eq!(
            client
                .write_register(0, 1, DataFormat::Bits32)
                .unwrap_err(),
            Error::HabStatusError(SECURE_LOCKED)
        );
    }

    #[test]
    fn read_register_unpacks_little_endian_cells() {
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        // 8 bytes of data over two report-4 frames
        mock.push_reply(REPORT_RESPONSE, &[0x78, 0x56, 0x34, 0x12]);
        mock.push_reply(REPORT_RESPONSE, &[0xEF, 0xBE, 0xAD, 0xDE]);
        let mut client = open_client(mock, HidProfile::default());
        let values = client
            .read_register(0x0090_0000, DataFormat::Bits32, 2)
            .unwrap();
        assert_eq!(values, vec![0x1234_5678, 0xDEAD_BEEF]);

        let mock = client.into_transport();
        let payload = mock.sent_payload(0);
        assert_eq!(&payload[0..2], &0x0101u16.to_be_bytes());
        assert_eq!(payload[6], 0x20);
        assert_eq!(&payload[7..11], &8u32.to_be_bytes());
    }

    #[test]
    fn read_register_payload_length_matches_cells() {
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_reply(REPORT_RESPONSE, &[0xAA, 0xBB, 0xCC, 0xDD]);
        let mut client = open_client(mock, HidProfile::default());
        let values = client
            .read_register(0x0090_0000, DataFormat::Bits16, 2)
            .unwrap();
        assert_eq!(values, vec![0xBBAA, 0xDDCC]);
    }

    #[test]
    fn write_dcd_streams_report2_frames() {
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, ACK_WRITE_COMPLETE, false);
        let mut client = open_client(mock, small_profile());
        // 20 bytes over 8-byte frames: 8 + 8 + 4
        let data: Vec<u8> = (0u8..20).collect();
        client.write_dcd(0x0091_0000, &data).unwrap();

        let mock = client.into_transport();
        assert_eq!(mock.sent.len(), 4);
        assert_eq!(mock.sent[1][0], REPORT_DATA);
        assert_eq!(mock.sent[1].len(), 9);
        assert_eq!(&mock.sent[1][1..9], &data[0..8]);
        assert_eq!(&mock.sent[2][1..9], &data[8..16]);
        // final short frame is padded to the report size
        assert_eq!(&mock.sent[3][1..5], &data[16..20]);
        assert_eq!(&mock.sent[3][5..9], &[0, 0, 0, 0]);
    }

    #[test]
    fn progress_listener_sees_every_frame() {
        struct Recorder(std::rc::Rc<std::cell::RefCell<Vec<(usize, usize)>>>);
        impl ProgressListener for Recorder {
            fn on_progress(&mut self, sent: usize, total: usize) {
                self.0.borrow_mut().push((sent, total));
            }
        }
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, ACK_FILE_COMPLETE, false);
        let mut client = open_client(mock, small_profile());
        client.set_progress_listener(Some(Box::new(Recorder(seen.clone()))));
        client.write_file(0x8000_0000, &[0u8; 20]).unwrap();
        assert_eq!(*seen.borrow(), vec![(8, 20), (16, 20), (20, 20)]);
    }

    #[test]
    fn jump_without_reply_succeeds() {
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        let mut client = open_client(mock, HidProfile::default());
        client.jump(0x877F_F400).unwrap();
        assert_eq!(client.state(), HandleState::Idle);
    }

    #[test]
    fn jump_with_hab_event_fails() {
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        let event = u32::from_le_bytes([0x33, 0x27, 0xDD, 0x00]);
        mock.push_status(REPORT_RESPONSE, event, false);
        let mut client = open_client(mock, HidProfile::default());
        assert_eq!(client.jump(0x877F_F400).unwrap_err(), Error::DeviceError(event));
    }

    #[test]
    fn read_status_passes_word_through() {
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, 0xF0F0_F0F0, false);
        let mut client = open_client(mock, HidProfile::default());
        assert_eq!(client.read_status().unwrap(), 0xF0F0_F0F0);
    }

    #[test]
    fn big_endian_profile_decodes_status() {
        let mut mock = MockTransport::new();
        let mut profile = HidProfile::default();
        profile.status_big_endian = true;
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, true);
        mock.push_status(REPORT_RESPONSE, ACK_SKIP_DCD, true);
        let mut client = open_client(mock, profile);
        client.skip_dcd().unwrap();
    }

    #[test]
    fn unopened_handle_refuses_operations() {
        let mut client = SdpClient::new(MockTransport::new(), HidProfile::default());
        assert!(matches!(
            client.read_status().unwrap_err(),
            Error::TransportError(_)
        ));
    }

    #[test]
    fn wrong_report_id_is_unexpected_report() {
        let mut mock = MockTransport::new();
        mock.push_status(REPORT_RESPONSE, SECURE_OPEN, false);
        let mut client = open_client(mock, HidProfile::default());
        assert_eq!(
            client.read_status().unwrap_err(),
            Error::UnexpectedReport {
                expected: REPORT_INTERIM,
                found: REPORT_RESPONSE
            }
        );
    }

    #[test]
    fn write_image_sequence_with_ddr_init_and_run() {
        use crate::dcd::{DataWidth, DcdCommand, SegDcd, WriteData, WriteOps};
        use crate::image::{BootImage, BootImg2};

        let mut dcd = SegDcd::new(0x41);
        let mut write = WriteData::new(WriteOps::WriteValue, DataWidth::Word);
        write.push(0x3034_0004, 0x4F40_0005).unwrap();
        dcd.push(DcdCommand::WriteData(write)).unwrap();

        let mut img2 = BootImg2::new(0x877F_F000, 0x400, 0x41, false);
        img2.set_app(vec![0xAA; 64]);
        img2.dcd = Some(dcd);
        let mut image = BootImage::V2(img2);

        let mut mock = MockTransport::new();
        // WDCD: interim + final
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, ACK_WRITE_COMPLETE, false);
        // WriteFile: interim + final
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, ACK_FILE_COMPLETE, false);
        // SkipDcd: interim + final
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);
        mock.push_status(REPORT_RESPONSE, ACK_SKIP_DCD, false);
        // Jump: interim only
        mock.push_status(REPORT_INTERIM, SECURE_OPEN, false);

        let mut client = open_client(mock, HidProfile::default());
        client
            .write_image(
                &mut image,
                &WriteImageOptions {
                    init_ddr: true,
                    skip_dcd: true,
                    ocram_address: 0x0091_0000,
                    run: true,
                },
            )
            .unwrap();

        let mock = client.into_transport();
        let commands: Vec<&Vec<u8>> = mock
            .sent
            .iter()
            .filter(|raw| raw[0] == REPORT_COMMAND)
            .collect();
        assert_eq!(commands.len(), 4);
        // (a) Write DCD to OCRAM
        assert_eq!(&commands[0][1..3], &0x0606u16.to_be_bytes());
        assert_eq!(&commands[0][3..7], &0x0091_0000u32.to_be_bytes());
        // (b) Write File to ivt.self - ivt_offset
        assert_eq!(&commands[1][1..3], &0x0404u16.to_be_bytes());
        assert_eq!(&commands[1][3..7], &0x877F_F000u32.to_be_bytes());
        // (c) Skip DCD
        assert_eq!(&commands[2][1..3], &0x0B0Bu16.to_be_bytes());
        // (d) Jump to ivt.self
        assert_eq!(&commands[3][1..3], &0x0F0Fu16.to_be_bytes());
        assert_eq!(&commands[3][3..7], &0x877F_F400u32.to_be_bytes());
    }
}
