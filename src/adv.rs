//! Decoding of the advertising data broadcast by serial bridge devices.
//!
//! Two generations of devices are around, each with its own advertising
//! format. Both are a sequence of length-prefixed AD structures; they are told
//! apart by the marker structures they contain (local name, service list and
//! manufacturer specific data prefixes). Decoding is a single stateless pass
//! and shares nothing with the [`Bridge`](crate::Bridge).
//!
//! **Example**
//! ```
//! use brspcom::adv;
//!
//! let raw = [2, 0x01, 0x06];
//! assert!(adv::parse_ad_data(&raw).is_none());
//! ```

mod v1;
mod v2;

use std::convert::TryInto;

pub use v1::{AdvV1, AdvV1Flags, AdvV1Status};
pub use v2::{AdvV2, AdvV2Flags};

// =============================================================================
// Public Interface
// =============================================================================

/// A decoded advertisement, of either format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advertisement {
    V1(AdvV1),
    V2(AdvV2),
}
impl Advertisement {
    pub fn device_id(&self) -> u32 {
        match self {
            Advertisement::V1(adv) => adv.id,
            Advertisement::V2(adv) => adv.id,
        }
    }

    pub fn auth_key(&self) -> u32 {
        match self {
            Advertisement::V1(adv) => adv.key,
            Advertisement::V2(adv) => adv.key,
        }
    }

    /// `true` when the device is ready to accept a transaction.
    pub fn can_transact(&self) -> bool {
        match self {
            Advertisement::V1(adv) => adv.can_transact(),
            Advertisement::V2(adv) => adv.can_transact(),
        }
    }

    /// `true` when the device reports maintenance conditions at all.
    pub fn supports_maintenance(&self) -> bool {
        match self {
            Advertisement::V1(adv) => adv.supports_maintenance(),
            Advertisement::V2(adv) => adv.supports_maintenance(),
        }
    }

    /// `true` when the device asks for a maintenance visit.
    pub fn needs_maintenance(&self) -> bool {
        match self {
            Advertisement::V1(adv) => adv.needs_maintenance(),
            Advertisement::V2(adv) => adv.needs_maintenance(),
        }
    }
}

/// Decode raw advertising data, trying the first generation format and then
/// the second one. Returns `None` when neither matches.
pub fn parse_ad_data(raw: &[u8]) -> Option<Advertisement> {
    v1::parse(raw)
        .map(Advertisement::V1)
        .or_else(|| v2::parse(raw).map(Advertisement::V2))
}

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Iterate over the AD structures of `raw` (the bytes after each length
/// prefix). Stops at a zero length or at a structure running past the end.
pub(crate) fn ad_structures(raw: &[u8]) -> AdStructures<'_> {
    AdStructures { raw }
}

pub(crate) struct AdStructures<'a> {
    raw: &'a [u8],
}
impl<'a> Iterator for AdStructures<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.raw.len() <= 1 {
            return None;
        }
        let len = self.raw[0] as usize;
        if len == 0 || len + 1 > self.raw.len() {
            self.raw = &[];
            return None;
        }
        let structure = &self.raw[1..=len];
        self.raw = &self.raw[len + 1..];
        Some(structure)
    }
}

pub(crate) fn le_u16(bytes: &[u8]) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(..2)?.try_into().ok()?))
}

pub(crate) fn le_u32(bytes: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?))
}

// =============================================================================
// Unit Tests
// =============================================================================

/// Encode AD structures with their length prefix.
#[cfg(test)]
pub(crate) fn encode(structures: &[&[u8]]) -> Vec<u8> {
    let mut raw = Vec::new();
    for s in structures {
        raw.push(s.len() as u8);
        raw.extend_from_slice(s);
    }
    raw
}

#[test]
fn structures_are_split_on_length_prefix() {
    let raw = encode(&[&[0x01, 0x06], &[0x09, b'P', b'R']]);
    let found: Vec<&[u8]> = ad_structures(&raw).collect();
    assert_eq!(found, vec![&[0x01, 0x06][..], &[0x09, b'P', b'R'][..]]);
}

#[test]
fn scan_stops_at_zero_length() {
    let mut raw = encode(&[&[0x01, 0x06]]);
    raw.extend_from_slice(&[0, 2, 0x0a, 0x00]);
    assert_eq!(ad_structures(&raw).count(), 1);
}

#[test]
fn scan_stops_at_truncated_structure() {
    let mut raw = encode(&[&[0x01, 0x06]]);
    raw.extend_from_slice(&[5, 0xff, 0x01]);
    assert_eq!(ad_structures(&raw).count(), 1);
}

#[test]
fn unknown_data_is_not_an_advertisement() {
    let raw = encode(&[&[0x01, 0x06], &[0x09, b'X', b'Y', b'Z']]);
    assert_eq!(parse_ad_data(&raw), None);
    assert_eq!(parse_ad_data(&[]), None);
}

#[test]
fn little_endian_fields() {
    assert_eq!(le_u16(&[0x34, 0x12]), Some(0x1234));
    assert_eq!(le_u32(&[0x78, 0x56, 0x34, 0x12, 0xff]), Some(0x1234_5678));
    assert_eq!(le_u32(&[0x78, 0x56]), None);
}
