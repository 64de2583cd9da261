//! First generation advertising format.
//!
//! Recognized by the complete local name `PayRange`, the serial bridge service
//! in the 128-bit service UUID list and a 16-byte manufacturer specific data
//! structure.

use super::{ad_structures, le_u32};
use crate::gatt::BRIDGE_SERVICE;

/// Complete local name structure.
const NAME: &[u8] = &[0x09, b'P', b'a', b'y', b'R', b'a', b'n', b'g', b'e'];
/// Complete list of 128-bit service UUIDs type.
const SERVICE_LIST: u8 = 0x07;

/// Maintenance condition reported by a first generation device. A value of
/// `0` means the device does not report any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvV1Flags(pub u8);
impl AdvV1Flags {
    pub const NONE: AdvV1Flags = AdvV1Flags(8);
    pub const CLOCK: AdvV1Flags = AdvV1Flags(9);
    pub const INACTIVITY: AdvV1Flags = AdvV1Flags(10);
    pub const CASHLESS_PENDING: AdvV1Flags = AdvV1Flags(11);
    pub const CASH_PENDING: AdvV1Flags = AdvV1Flags(12);
    pub const CONNECT_REQUEST: AdvV1Flags = AdvV1Flags(13);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvV1Status(pub u8);
impl AdvV1Status {
    pub const READY: AdvV1Status = AdvV1Status(0);
    pub const BUSY: AdvV1Status = AdvV1Status(1);
    pub const DISABLED: AdvV1Status = AdvV1Status(2);
    pub const OFFLINE: AdvV1Status = AdvV1Status(0xff);
}

/// A first generation advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvV1 {
    pub id: u32,
    pub key: u32,
    pub flags: AdvV1Flags,
    pub status: AdvV1Status,
}
impl AdvV1 {
    pub fn can_transact(&self) -> bool {
        self.status == AdvV1Status::READY
    }

    pub fn supports_maintenance(&self) -> bool {
        self.flags.0 != 0
    }

    pub fn needs_maintenance(&self) -> bool {
        self.flags != AdvV1Flags::NONE
    }
}

pub(crate) fn parse(raw: &[u8]) -> Option<AdvV1> {
    let mut service_list = vec![SERVICE_LIST];
    service_list.extend_from_slice(&BRIDGE_SERVICE.as_u128().to_le_bytes());

    let mut name = false;
    let mut service = false;
    let mut msd = None;
    for s in ad_structures(raw) {
        if s == NAME {
            name = true;
        } else if s == &service_list[..] {
            service = true;
        } else if is_manufacturer_data(s) {
            msd = Some(&s[4..]);
        }
    }

    let msd = msd?;
    if !(name && service) {
        return None;
    }
    Some(AdvV1 {
        id: le_u32(&msd[0..])?,
        key: le_u32(&msd[7..])?,
        flags: AdvV1Flags(msd[5]),
        status: AdvV1Status(msd[6]),
    })
}

fn is_manufacturer_data(s: &[u8]) -> bool {
    s.len() == 16 && s[..4] == [0xff, 0x85, 0x00, 0xff] && s[8] == 0x01 && s[15] == 0x01
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
use crate::adv::{encode, parse_ad_data, Advertisement};

#[cfg(test)]
fn service_list() -> Vec<u8> {
    let mut s = vec![0x07];
    s.extend_from_slice(&[
        0x79, 0x60, 0x22, 0xa0, 0xbe, 0xaf, 0xc0, 0xbd, 0xde, 0x48, 0x79, 0x62, 0xf1, 0x84,
        0x2b, 0xda,
    ]);
    s
}

#[cfg(test)]
fn manufacturer_data(flags: u8, status: u8) -> Vec<u8> {
    vec![
        0xff, 0x85, 0x00, 0xff, // prefix
        0x78, 0x56, 0x34, 0x12, // id
        0x01, flags, status, //
        0xef, 0xbe, 0xad, 0xde, // key
        0x01,
    ]
}

#[cfg(test)]
fn advertisement(flags: u8, status: u8) -> Vec<u8> {
    encode(&[
        &[0x01, 0x06],
        NAME,
        &service_list(),
        &manufacturer_data(flags, status),
    ])
}

#[test]
fn decodes_ready_device() {
    let adv = parse(&advertisement(8, 0)).unwrap();
    assert_eq!(
        adv,
        AdvV1 {
            id: 0x1234_5678,
            key: 0xdead_beef,
            flags: AdvV1Flags::NONE,
            status: AdvV1Status::READY,
        }
    );
    assert!(adv.can_transact());
    assert!(adv.supports_maintenance());
    assert!(!adv.needs_maintenance());
}

#[test]
fn maintenance_flags() {
    let adv = parse(&advertisement(12, 1)).unwrap();
    assert_eq!(adv.flags, AdvV1Flags::CASH_PENDING);
    assert_eq!(adv.status, AdvV1Status::BUSY);
    assert!(!adv.can_transact());
    assert!(adv.needs_maintenance());

    let adv = parse(&advertisement(0, 0)).unwrap();
    assert!(!adv.supports_maintenance());
}

#[test]
fn all_markers_are_required() {
    let without_name = encode(&[&service_list(), &manufacturer_data(8, 0)]);
    assert_eq!(parse(&without_name), None);

    let without_service = encode(&[NAME, &manufacturer_data(8, 0)]);
    assert_eq!(parse(&without_service), None);

    let mut msd = manufacturer_data(8, 0);
    msd[15] = 0x02;
    let bad_msd = encode(&[NAME, &service_list(), &msd]);
    assert_eq!(parse(&bad_msd), None);
}

#[test]
fn generic_entry_point() {
    let adv = parse_ad_data(&advertisement(9, 0xff)).unwrap();
    assert!(matches!(adv, Advertisement::V1(_)));
    assert_eq!(adv.device_id(), 0x1234_5678);
    assert_eq!(adv.auth_key(), 0xdead_beef);
    assert!(!adv.can_transact());
    assert!(adv.needs_maintenance());
}
