//! The GATT collaborator interface the serial bridge is built upon.
//!
//! `brspcom` does not talk to a radio stack by itself. Whatever stack is used
//! (a host controller binding, a platform API, or the in-process
//! [`LoopbackPeripheral`](crate::LoopbackPeripheral)) is wrapped behind the
//! [`Peripheral`] trait, which only needs to provide discovery, notification
//! subscription and characteristic writes on an already connected device.

use std::error::Error;

use uuid::Uuid;

// =============================================================================
// Public Interface
// =============================================================================

/// Opaque error reported by the underlying GATT stack.
pub type GattError = Box<dyn Error + Send + Sync + 'static>;

/// Callback invoked by the GATT stack for every notification or indication
/// received on a subscribed characteristic. The callback may be called from any
/// thread.
pub type NotifyHandler = Box<dyn Fn(&[u8], Option<GattError>) + Send + Sync + 'static>;

/// The serial bridge GATT service.
pub const BRIDGE_SERVICE: Uuid = Uuid::from_u128(0xDA2B84F1_6279_48DE_BDC0_AFBEA0226079);
/// Characteristic used for the mode handshake.
pub const BRIDGE_MODE: Uuid = Uuid::from_u128(0xA87988B9_694C_479C_900E_95DFA6C00A24);
/// Characteristic the central writes to (received by the peer).
pub const BRIDGE_RX: Uuid = Uuid::from_u128(0xBF03260C_7205_4C25_AF43_93B1C299D159);
/// Characteristic the peer notifies on (transmitted by the peer).
pub const BRIDGE_TX: Uuid = Uuid::from_u128(0x18CDA784_4BD3_4370_85BB_BFED91EC86AF);

/// A discovered primary service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    pub handle: u16,
}

/// A discovered characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    /// Handle of the characteristic value attribute.
    pub handle: u16,
}

/// A discovered characteristic descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub handle: u16,
}

/// The capabilities `brspcom` needs from a connected GATT peripheral.
///
/// Implementations must be usable from several threads at once: writes are
/// issued from the bridge transmission thread while notifications are delivered
/// from whatever thread the stack uses for its callbacks.
pub trait Peripheral: Send + Sync {
    /// Discover the primary services matching `filter` (all of them when the
    /// filter is empty).
    fn discover_services(&self, filter: &[Uuid]) -> Result<Vec<Service>, GattError>;

    /// Discover the characteristics of `service` matching `filter`.
    fn discover_characteristics(
        &self,
        filter: &[Uuid],
        service: &Service,
    ) -> Result<Vec<Characteristic>, GattError>;

    /// Discover the descriptors of `characteristic`. Some stacks need this
    /// before notifications can be enabled.
    fn discover_descriptors(
        &self,
        filter: &[Uuid],
        characteristic: &Characteristic,
    ) -> Result<Vec<Descriptor>, GattError>;

    /// Enable notification delivery on `characteristic` to `handler`, or
    /// disable it when `handler` is `None`.
    fn set_indicate_value(
        &self,
        characteristic: &Characteristic,
        handler: Option<NotifyHandler>,
    ) -> Result<(), GattError>;

    /// Write `value` to `characteristic`, waiting for the peer acknowledgement
    /// when `with_response` is set.
    fn write_characteristic(
        &self,
        characteristic: &Characteristic,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), GattError>;
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn bridge_identifiers() {
    assert_eq!(
        BRIDGE_SERVICE.to_string(),
        "da2b84f1-6279-48de-bdc0-afbea0226079"
    );
    assert_eq!(BRIDGE_MODE.to_string(), "a87988b9-694c-479c-900e-95dfa6c00a24");
    assert_eq!(BRIDGE_RX.to_string(), "bf03260c-7205-4c25-af43-93b1c299d159");
    assert_eq!(BRIDGE_TX.to_string(), "18cda784-4bd3-4370-85bb-bfed91ec86af");
}
