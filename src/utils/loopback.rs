//! An in-process peripheral echoing the serial bridge traffic.
//!
//! [`LoopbackPeripheral`] exposes the serial bridge service with its three
//! characteristics. Once switched into bridge mode, every chunk written to the
//! receive characteristic comes back as a notification on the transmit
//! characteristic, from the writing thread, before the write returns.

use std::sync::{Arc, Mutex, MutexGuard};

use log::trace;
use uuid::Uuid;

use crate::gatt::*;
use crate::settings::MAX_CHUNK;

/// Client Characteristic Configuration descriptor.
const CCCD: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

const SERVICE: Service = Service {
    uuid: BRIDGE_SERVICE,
    handle: 0x0010,
};
const MODE: Characteristic = Characteristic {
    uuid: BRIDGE_MODE,
    handle: 0x0012,
};
const RX: Characteristic = Characteristic {
    uuid: BRIDGE_RX,
    handle: 0x0015,
};
const TX: Characteristic = Characteristic {
    uuid: BRIDGE_TX,
    handle: 0x0018,
};
const TX_CCCD: Descriptor = Descriptor {
    uuid: CCCD,
    handle: 0x0019,
};

// =============================================================================
// Public Interface
// =============================================================================

/// A [`Peripheral`] implementing the serial bridge service in memory and
/// echoing back whatever is written to it.
#[derive(Default)]
pub struct LoopbackPeripheral {
    state: Mutex<LoopbackState>,
}

#[derive(Default)]
struct LoopbackState {
    handler: Option<Arc<NotifyHandler>>,
    bridge_mode: bool,
    echoed: u64,
}

impl LoopbackPeripheral {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once the mode handshake was received.
    pub fn in_bridge_mode(&self) -> bool {
        self.state().bridge_mode
    }

    /// Number of bytes echoed back so far.
    pub fn echoed(&self) -> u64 {
        self.state().echoed
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Peripheral for LoopbackPeripheral {
    fn discover_services(&self, filter: &[Uuid]) -> Result<Vec<Service>, GattError> {
        Ok(matching(&[SERVICE], filter, |s| s.uuid))
    }

    fn discover_characteristics(
        &self,
        filter: &[Uuid],
        service: &Service,
    ) -> Result<Vec<Characteristic>, GattError> {
        if *service != SERVICE {
            return Err(format!("unknown service {}", service.uuid).into());
        }
        Ok(matching(&[MODE, RX, TX], filter, |c| c.uuid))
    }

    fn discover_descriptors(
        &self,
        filter: &[Uuid],
        characteristic: &Characteristic,
    ) -> Result<Vec<Descriptor>, GattError> {
        if *characteristic == TX {
            Ok(matching(&[TX_CCCD], filter, |d| d.uuid))
        } else {
            Ok(Vec::new())
        }
    }

    fn set_indicate_value(
        &self,
        characteristic: &Characteristic,
        handler: Option<NotifyHandler>,
    ) -> Result<(), GattError> {
        if *characteristic != TX {
            return Err(format!("{} does not notify", characteristic.uuid).into());
        }
        self.state().handler = handler.map(Arc::new);
        Ok(())
    }

    fn write_characteristic(
        &self,
        characteristic: &Characteristic,
        value: &[u8],
        _with_response: bool,
    ) -> Result<(), GattError> {
        if *characteristic == MODE {
            self.state().bridge_mode = value == [1];
            return Ok(());
        }
        if *characteristic != RX {
            return Err(format!("{} is not writable", characteristic.uuid).into());
        }
        if value.len() > MAX_CHUNK {
            return Err(format!("value of {} bytes exceeds {} bytes", value.len(), MAX_CHUNK).into());
        }

        // Never call the handler with the lock held, it blocks until the
        // notification is consumed.
        let handler = {
            let mut state = self.state();
            if !state.bridge_mode {
                return Ok(());
            }
            state.echoed += value.len() as u64;
            state.handler.clone()
        };
        if let Some(handler) = handler {
            trace!("loopback echo of {} bytes", value.len());
            (*handler)(value, None);
        }
        Ok(())
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn matching<T: Copy>(items: &[T], filter: &[Uuid], uuid: impl Fn(&T) -> Uuid) -> Vec<T> {
    items
        .iter()
        .filter(|item| filter.is_empty() || filter.contains(&uuid(item)))
        .copied()
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn exposes_bridge_attributes() {
    let p = LoopbackPeripheral::new();
    let services = p.discover_services(&[BRIDGE_SERVICE]).unwrap();
    assert_eq!(services, vec![SERVICE]);
    let chars = p.discover_characteristics(&[], &services[0]).unwrap();
    assert_eq!(chars.len(), 3);
    let only_tx = p.discover_characteristics(&[BRIDGE_TX], &services[0]).unwrap();
    assert_eq!(only_tx, vec![TX]);
    assert_eq!(p.discover_descriptors(&[], &TX).unwrap(), vec![TX_CCCD]);
}

#[test]
fn echoes_only_in_bridge_mode() {
    let p = LoopbackPeripheral::new();
    let (sender, received) = std::sync::mpsc::channel();
    let sender = Mutex::new(sender);
    p.set_indicate_value(
        &TX,
        Some(Box::new(move |data: &[u8], _| {
            let _ = sender.lock().unwrap().send(data.to_vec());
        })),
    )
    .unwrap();

    p.write_characteristic(&RX, b"ignored", true).unwrap();
    assert!(received.try_recv().is_err());

    p.write_characteristic(&MODE, &[1], true).unwrap();
    assert!(p.in_bridge_mode());
    p.write_characteristic(&RX, b"echo", true).unwrap();
    assert_eq!(received.try_recv().unwrap(), b"echo");
    assert_eq!(p.echoed(), 4);
}

#[test]
fn rejects_oversized_writes() {
    let p = LoopbackPeripheral::new();
    assert!(p.write_characteristic(&RX, &[0; MAX_CHUNK + 1], true).is_err());
}
