//! Second generation advertising format.
//!
//! Recognized by the short local name `PR` and a 17-byte manufacturer specific
//! data structure. A second manufacturer structure may carry opaque partner
//! data.

use super::{ad_structures, le_u16, le_u32};

const NAME: &[u8] = &[0x09, b'P', b'R'];
const MSD_STATUS: [u8; 4] = [0xff, 0xc9, 0x02, 0x00];
const MSD_PARTNER: [u8; 4] = [0xff, 0xc9, 0x02, 0x01];

/// Status and alarm bits of a second generation device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvV2Flags(pub u16);
impl AdvV2Flags {
    pub const CAN_TRANSACT: u16 = 0x2000;
    pub const CASH_PENDING: u16 = 0x0800;
    pub const CASHLESS_PENDING: u16 = 0x0400;

    pub const MACH_ALARM_MASK: u16 = 0x03c0;
    pub const MACH_ALARM_NONE: u16 = 0x0000;
    pub const MACH_ALARM_INACTIVITY: u16 = 0x0040;

    pub const CONN_ALARM_MASK: u16 = 0x0038;
    pub const CONN_ALARM_NONE: u16 = 0x0000;
    pub const CONN_ALARM_CLOCK_NOT_SET: u16 = 0x0008;
    pub const CONN_ALARM_DEBUG_PENDING: u16 = 0x0010;
    pub const CONN_ALARM_FW_UPDATE_NEEDED: u16 = 0x0018;

    pub const STATUS_MASK: u16 = 0x0007;
    pub const STATUS_READY: u16 = 0x0000;
    pub const STATUS_BUSY: u16 = 0x0001;
    pub const STATUS_DISABLED: u16 = 0x0002;
    pub const STATUS_READY_MAINT: u16 = 0x0004;
    pub const STATUS_OFFLINE: u16 = 0x0007;

    pub fn status(self) -> u16 {
        self.0 & Self::STATUS_MASK
    }

    pub fn machine_alarm(self) -> u16 {
        self.0 & Self::MACH_ALARM_MASK
    }

    pub fn connection_alarm(self) -> u16 {
        self.0 & Self::CONN_ALARM_MASK
    }

    pub fn contains(self, bits: u16) -> bool {
        self.0 & bits != 0
    }
}

/// A second generation advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvV2 {
    pub id: u32,
    pub key: u32,
    pub flags: AdvV2Flags,
    pub fw_version: u16,
    pub partner_data: Option<Vec<u8>>,
}
impl AdvV2 {
    pub fn can_transact(&self) -> bool {
        self.flags.status() == AdvV2Flags::STATUS_READY
            || self.flags.contains(AdvV2Flags::CAN_TRANSACT)
    }

    pub fn supports_maintenance(&self) -> bool {
        true
    }

    pub fn needs_maintenance(&self) -> bool {
        self.flags
            .contains(AdvV2Flags::CASH_PENDING | AdvV2Flags::CASHLESS_PENDING)
            || self.flags.connection_alarm() != AdvV2Flags::CONN_ALARM_NONE
    }
}

pub(crate) fn parse(raw: &[u8]) -> Option<AdvV2> {
    let mut name = false;
    let mut status = None;
    let mut partner = None;
    for s in ad_structures(raw) {
        if s == NAME {
            name = true;
        } else if s.len() == 17 && s[..4] == MSD_STATUS {
            status = Some(&s[4..]);
        } else if s.len() > 5 && s[..4] == MSD_PARTNER {
            partner = Some(&s[4..]);
        }
    }

    let msd = status?;
    if !name {
        return None;
    }
    Some(AdvV2 {
        id: le_u32(&msd[0..])?,
        key: le_u32(&msd[4..])?,
        flags: AdvV2Flags(le_u16(&msd[8..])?),
        fw_version: le_u16(&msd[10..])?,
        partner_data: partner.map(<[u8]>::to_vec),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
use crate::adv::{encode, parse_ad_data, Advertisement};

#[cfg(test)]
fn status_data(flags: u16) -> Vec<u8> {
    let mut s = MSD_STATUS.to_vec();
    s.extend_from_slice(&0x0102_0304u32.to_le_bytes());
    s.extend_from_slice(&0xcafe_f00du32.to_le_bytes());
    s.extend_from_slice(&flags.to_le_bytes());
    s.extend_from_slice(&0x0207u16.to_le_bytes());
    s.push(0);
    s
}

#[test]
fn decodes_device() {
    let raw = encode(&[NAME, &status_data(0x0000)]);
    let adv = parse(&raw).unwrap();
    assert_eq!(
        adv,
        AdvV2 {
            id: 0x0102_0304,
            key: 0xcafe_f00d,
            flags: AdvV2Flags(0),
            fw_version: 0x0207,
            partner_data: None,
        }
    );
    assert!(adv.can_transact());
    assert!(adv.supports_maintenance());
    assert!(!adv.needs_maintenance());
}

#[test]
fn partner_data_is_copied() {
    let mut partner = MSD_PARTNER.to_vec();
    partner.extend_from_slice(b"acme");
    let raw = encode(&[&partner, NAME, &status_data(0)]);
    let adv = parse(&raw).unwrap();
    assert_eq!(adv.partner_data, Some(b"acme".to_vec()));
}

#[test]
fn transact_and_maintenance_flags() {
    let busy = AdvV2Flags::STATUS_BUSY;
    let adv = parse(&encode(&[NAME, &status_data(busy)])).unwrap();
    assert!(!adv.can_transact());

    let adv = parse(&encode(&[NAME, &status_data(busy | AdvV2Flags::CAN_TRANSACT)])).unwrap();
    assert!(adv.can_transact());

    let adv = parse(&encode(&[NAME, &status_data(AdvV2Flags::CASHLESS_PENDING)])).unwrap();
    assert!(adv.needs_maintenance());

    let flags = AdvV2Flags::CONN_ALARM_FW_UPDATE_NEEDED;
    let adv = parse(&encode(&[NAME, &status_data(flags)])).unwrap();
    assert_eq!(adv.flags.connection_alarm(), flags);
    assert!(adv.needs_maintenance());

    // Machine alarms alone do not ask for maintenance.
    let flags = AdvV2Flags::MACH_ALARM_INACTIVITY;
    let adv = parse(&encode(&[NAME, &status_data(flags)])).unwrap();
    assert_eq!(adv.flags.machine_alarm(), flags);
    assert!(!adv.needs_maintenance());
}

#[test]
fn name_is_required() {
    assert_eq!(parse(&encode(&[&status_data(0)])), None);
}

#[test]
fn generic_entry_point_falls_back_to_v2() {
    let adv = parse_ad_data(&encode(&[NAME, &status_data(0)])).unwrap();
    assert!(matches!(adv, Advertisement::V2(_)));
    assert_eq!(adv.device_id(), 0x0102_0304);
    assert_eq!(adv.auth_key(), 0xcafe_f00d);
}
