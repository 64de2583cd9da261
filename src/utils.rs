//! Helpers around the serial bridge.

mod loopback;

pub use loopback::LoopbackPeripheral;
