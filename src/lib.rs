//! `brspcom` is a blocking byte-stream transport over the BRSP serial bridge
//! GATT service, found on BLE modules that act as a wireless serial port.
//!
//! The bridge service only offers short writes on one characteristic and
//! asynchronous notifications on another one, at most 20 bytes at a time. On
//! top of that, `brspcom` provides a conventional stream with `read`, `write`,
//! `flush` and `close`:
//!
//! * writes of any length are queued and fragmented into 20-byte chunks, sent
//!   one at a time,
//! * notifications are reassembled into a continuous readable stream,
//! * transmission failures are captured and reported by the next `flush`,
//!   notification failures by the `read` reaching the point of the stream
//!   where they happened.
//!
//! The radio stack itself is not part of `brspcom`. It is plugged in through
//! the [`Peripheral`] trait; [`LoopbackPeripheral`] is an in-process
//! implementation echoing everything back, useful for testing.
//!
//! Additionally, [`adv`] decodes the advertising data broadcast by the devices
//! exposing this bridge.
//!
//! The engine behind a [`Bridge`] owns all the protocol state on a single
//! thread and is driven by typed **events** (caller requests, notifications,
//! chunk hand-offs, write failures and shutdown) received over channels. It
//! never shares its state, hence never needs a lock:
//!
//! * Only one event is processed at a time, to completion.
//! * The engine is either **idle** or **active** (a chunk is offered for
//!   transmission); only `write`, `flush` and chunk hand-offs depend on it.
//! * Callers never touch the state; they send a request and wait on a reply
//!   channel of their own.

pub mod adv;
mod bridge;
mod error;
pub mod gatt;
mod settings;
mod utils;

pub use bridge::{Bridge, BridgeCharacteristics};
pub use error::BridgeError;
pub use gatt::{Characteristic, Descriptor, GattError, NotifyHandler, Peripheral, Service};
pub use settings::{Settings, SettingsBuilder, DEFAULT_QUEUE_GROWTH, MAX_CHUNK};
pub use utils::LoopbackPeripheral;
