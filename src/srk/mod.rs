// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Super Root Key table and fuse block generation.
//!
//! One to four certificates anchor secure boot: their RSA public keys are
//! packed into the SRK table, and the per-record digests concatenate into
//! the block burned into the SoC fuses. Only the layout is produced here;
//! certificate issuance and signing live outside this crate.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::core::header::{Header, SegTag};

/// Most SRK slots any HAB version supports.
pub const SRK_MAX_KEYS: usize = 4;

/// Key record tag and PKCS#1 signature algorithm parameter.
const SRK_KEY_TAG: u8 = 0xE1;
const SRK_ALG_PKCS1: u8 = 0x21;

/// Flag marking a CA key record.
pub const SRK_FLAG_CA: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Pem(String),
    Der(String),
    EmptyTable,
    TooManyKeys(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Pem(msg) => write!(f, "PEM: {msg}"),
            Error::Der(msg) => write!(f, "DER: {msg}"),
            Error::EmptyTable => write!(f, "SRK table needs at least one key"),
            Error::TooManyKeys(count) => {
                write!(f, "SRK table holds at most {SRK_MAX_KEYS} keys, got {count}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// One DER type-length-value: `(tag, content_start, content_len)`.
fn der_tlv(data: &[u8], pos: usize) -> Option<(u8, usize, usize)> {
    let tag = *data.get(pos)?;
    let first = *data.get(pos + 1)?;
    if first < 0x80 {
        Some((tag, pos + 2, first as usize))
    } else {
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 {
            return None;
        }
        let mut len = 0usize;
        for ix in 0..count {
            len = (len << 8) | *data.get(pos + 2 + ix)? as usize;
        }
        Some((tag, pos + 2 + count, len))
    }
}

/// Parse `SEQUENCE { INTEGER modulus, INTEGER exponent }`, the RSAPublicKey
/// structure.
fn parse_rsa_sequence(data: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let (tag, start, len) = der_tlv(data, 0)?;
    if tag != 0x30 || start + len > data.len() {
        return None;
    }
    let (int_tag, mod_start, mod_len) = der_tlv(data, start)?;
    if int_tag != 0x02 {
        return None;
    }
    let (int_tag, exp_start, exp_len) = der_tlv(data, mod_start + mod_len)?;
    if int_tag != 0x02 || exp_start + exp_len > start + len {
        return None;
    }
    let mut modulus = data[mod_start..mod_start + mod_len].to_vec();
    // big integers carry a sign-padding zero byte
    while modulus.len() > 1 && modulus[0] == 0 {
        modulus.remove(0);
    }
    let exponent = data[exp_start..exp_start + exp_len].to_vec();
    Some((modulus, exponent))
}

/// Depth-first walk to the SubjectPublicKeyInfo BIT STRING holding the RSA
/// key. The signature BIT STRING at the certificate tail never parses as an
/// RSAPublicKey sequence, so the first hit is the key.
fn find_rsa_public_key(data: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut pos = 0usize;
    while pos < data.len() {
        let (tag, start, len) = der_tlv(data, pos)?;
        if start + len > data.len() {
            return None;
        }
        if tag == 0x03 && len > 1 {
            // skip the unused-bits count byte
            if let Some(found) = parse_rsa_sequence(&data[start + 1..start + len]) {
                return Some(found);
            }
        }
        if tag & 0x20 != 0 {
            if let Some(found) = find_rsa_public_key(&data[start..start + len]) {
                return Some(found);
            }
        }
        pos = start + len;
    }
    None
}

/// One SRK table entry: an RSA public key with record flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrkItem {
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
    pub flags: u8,
}

impl SrkItem {
    pub fn new(modulus: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self {
            modulus,
            exponent,
            flags: 0,
        }
    }

    /// Extract the public key from a PEM certificate.
    pub fn from_certificate_pem(text: &str) -> Result<Self, Error> {
        let block = pem::parse(text).map_err(|err| Error::Pem(err.to_string()))?;
        let (modulus, exponent) = find_rsa_public_key(block.contents())
            .ok_or_else(|| Error::Der("no RSA public key found in certificate".into()))?;
        Ok(Self::new(modulus, exponent))
    }

    pub fn size(&self) -> usize {
        Header::SIZE + 8 + self.modulus.len() + self.exponent.len()
    }

    /// Record layout: header, three reserved bytes, flags, modulus and
    /// exponent lengths, then the two big-endian integers.
    pub fn export(&self) -> Vec<u8> {
        let mut header = Header::new(SRK_KEY_TAG, SRK_ALG_PKCS1);
        header.length = self.size() as u16;
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&header.export());
        out.extend_from_slice(&[0x00, 0x00, 0x00, self.flags]);
        out.extend_from_slice(&(self.modulus.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.exponent.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.modulus);
        out.extend_from_slice(&self.exponent);
        out
    }

    /// SHA-256 over the exported record.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.export()).into()
    }
}

/// The SRK table: up to four key records under a certificate-tagged header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrkTable {
    items: Vec<SrkItem>,
}

impl SrkTable {
    pub fn new(items: Vec<SrkItem>) -> Result<Self, Error> {
        if items.is_empty() {
            return Err(Error::EmptyTable);
        }
        if items.len() > SRK_MAX_KEYS {
            return Err(Error::TooManyKeys(items.len()));
        }
        Ok(Self { items })
    }

    pub fn from_certificates<S: AsRef<str>>(texts: &[S]) -> Result<Self, Error> {
        let mut items = Vec::with_capacity(texts.len());
        for text in texts {
            items.push(SrkItem::from_certificate_pem(text.as_ref())?);
        }
        Self::new(items)
    }

    pub fn items(&self) -> &[SrkItem] {
        &self.items
    }

    pub fn size(&self) -> usize {
        Header::SIZE + self.items.iter().map(SrkItem::size).sum::<usize>()
    }

    pub fn export(&self) -> Vec<u8> {
        let mut header = Header::new(SegTag::Crt.value(), 0x40);
        header.length = self.size() as u16;
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&header.export());
        for item in &self.items {
            out.extend_from_slice(&item.export());
        }
        out
    }

    /// Fuse block: per-record digests concatenated in table order, each
    /// truncated to `digest_len` bytes (32 keeps the full SHA-256).
    pub fn fuses(&self, digest_len: usize) -> Vec<u8> {
        let digest_len = digest_len.min(32);
        let mut out = Vec::with_capacity(self.items.len() * digest_len);
        for item in &self.items {
            out.extend_from_slice(&item.digest()[..digest_len]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn der_len(len: usize) -> Vec<u8> {
        if len < 0x80 {
            vec![len as u8]
        } else if len < 0x100 {
            vec![0x81, len as u8]
        } else {
            vec![0x82, (len >> 8) as u8, len as u8]
        }
    }

    fn der(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&der_len(content.len()));
        out.extend_from_slice(content);
        out
    }

    /// Minimal certificate-shaped DER: an outer sequence holding some
    /// issuer-ish noise and a SubjectPublicKeyInfo.
    fn fake_certificate(modulus: &[u8], exponent: &[u8]) -> Vec<u8> {
        let mut padded_mod = vec![0x00];
        padded_mod.extend_from_slice(modulus);
        let rsa = der(
            0x30,
            &[der(0x02, &padded_mod), der(0x02, exponent)].concat(),
        );
        let mut bits = vec![0x00];
        bits.extend_from_slice(&rsa);
        let spki = der(
            0x30,
            &[
                der(0x30, &der(0x06, &[0x2A, 0x86, 0x48])),
                der(0x03, &bits),
            ]
            .concat(),
        );
        let tbs = der(0x30, &[der(0x02, &[0x01]), spki].concat());
        der(0x30, &tbs)
    }

    fn fake_pem(modulus: &[u8], exponent: &[u8]) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", fake_certificate(modulus, exponent)))
    }

    #[test]
    fn extracts_key_from_pem_certificate() {
        let modulus = [0xC1u8; 64];
        let text = fake_pem(&modulus, &[0x01, 0x00, 0x01]);
        let item = SrkItem::from_certificate_pem(&text).unwrap();
        assert_eq!(item.modulus, modulus.to_vec());
        assert_eq!(item.exponent, vec![0x01, 0x00, 0x01]);
    }

    #[test]
    fn record_layout() {
        let item = SrkItem::new(vec![0xAA; 32], vec![0x01, 0x00, 0x01]);
        let raw = item.export();
        assert_eq!(raw.len(), 4 + 8 + 32 + 3);
        assert_eq!(raw[0], 0xE1);
        assert_eq!(u16::from_be_bytes([raw[1], raw[2]]) as usize, raw.len());
        assert_eq!(raw[3], 0x21);
        assert_eq!(&raw[8..10], &(32u16).to_be_bytes());
        assert_eq!(&raw[10..12], &(3u16).to_be_bytes());
    }

    #[test]
    fn table_header_covers_all_records() {
        let items = vec![
            SrkItem::new(vec![0x11; 32], vec![0x03]),
            SrkItem::new(vec![0x22; 32], vec![0x03]),
        ];
        let table = SrkTable::new(items).unwrap();
        let raw = table.export();
        assert_eq!(raw[0], 0xD7);
        assert_eq!(raw[3], 0x40);
        assert_eq!(u16::from_be_bytes([raw[1], raw[2]]) as usize, raw.len());
    }

    #[test]
    fn fuses_concatenate_digests_in_order() {
        let certs: Vec<String> = (0u8..4)
            .map(|ix| fake_pem(&[ix + 1; 48], &[0x01, 0x00, 0x01]))
            .collect();
        let table = SrkTable::from_certificates(&certs).unwrap();
        let fuses = table.fuses(32);
        assert_eq!(fuses.len(), 4 * 32);
        for (ix, item) in table.items().iter().enumerate() {
            assert_eq!(&fuses[ix * 32..(ix + 1) * 32], &item.digest());
        }
        // truncation per HAB version keeps the leading bytes
        let short = table.fuses(8);
        assert_eq!(short.len(), 4 * 8);
        assert_eq!(&short[..8], &table.items()[0].digest()[..8]);
    }

    #[test]
    fn table_bounds() {
        assert!(matches!(SrkTable::new(Vec::new()), Err(Error::EmptyTable)));
        let too_many = vec![SrkItem::new(vec![1], vec![1]); 5];
        assert!(matches!(
            SrkTable::new(too_many),
            Err(Error::TooManyKeys(5))
        ));
    }

    #[test]
    fn garbage_pem_is_rejected() {
        assert!(matches!(
            SrkItem::from_certificate_pem("not a pem"),
            Err(Error::Pem(_))
        ));
        let text = pem::encode(&pem::Pem::new("CERTIFICATE", vec![0xFF; 16]));
        assert!(matches!(
            SrkItem::from_certificate_pem(&text),
            Err(Error::Der(_))
        ));
    }
}
