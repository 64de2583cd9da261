//! `brspcom` serial bridge transport.
//!
//! The bridge is made of three cooperating parts:
//!
//! * the [`Bridge`] facade, whose `read`, `write`, `flush` and `close` only
//!   send requests and wait for replies,
//! * the engine, a thread owning all protocol state and processing its events
//!   one at a time,
//! * the transmission pump, a thread writing the chunks offered by the engine
//!   to the peripheral.
//!
//! Notifications from the peripheral are delivered by the GATT stack callback
//! straight into the engine inbox.
//!
//! ```text
//!    read/write/flush        .--------.   chunk    .------.  write   .------.
//!  caller ---------------->  | Engine | ---------> | Pump | -------> | GATT |
//!         <---------------   '--------' <--------- '------'          '------'
//!              replies           ^       write errors                   |
//!                                '--------------------------------------'
//!                                        notifications
//! ```
//!
//! **Example** - Pushing data through the bridge and checking for delivery
//! errors:
//! ```no_run
//! use std::{io::Write, sync::Arc};
//! use brspcom::{Bridge, LoopbackPeripheral};
//!
//! let mut bridge = Bridge::open(Arc::new(LoopbackPeripheral::new())).unwrap();
//! bridge.write_all(b"hello bridge").unwrap();
//! // Write never blocks on the radio, flush tells how the transmission went.
//! bridge.flush().unwrap();
//! ```

mod connection;
mod engine;
mod events;
mod pump;
mod ring_queue;

pub use connection::{Bridge, BridgeCharacteristics};
