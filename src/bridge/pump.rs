//! The transmission pump.
//!
//! A relay thread between the engine and the GATT stack: it takes whatever
//! chunk the engine currently offers, writes it to the bridge receive
//! characteristic and reports failures back to the engine. It keeps no state of
//! its own and never retries.

use std::sync::Arc;

use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, log_enabled, trace, warn, Level::Trace};

use super::engine::hex_view;
use super::events::Chunk;
use crate::gatt::{Characteristic, GattError, Peripheral};

// =============================================================================
// Crate-Public Interface
// =============================================================================

pub(crate) struct Pump {
    pub peripheral: Arc<dyn Peripheral>,
    /// The characteristic chunks are written to.
    pub rx: Characteristic,
    pub with_response: bool,
    pub outgoing: Receiver<Chunk>,
    pub write_errors: Sender<GattError>,
    /// Never carries a message; disconnected when the bridge is closed.
    pub closed: Receiver<()>,
}
impl Pump {
    /// Run until the bridge is closed or the engine goes away.
    pub fn run(self) {
        debug!("transmission pump started");
        loop {
            select! {
                recv(self.outgoing) -> chunk => match chunk {
                    Ok(chunk) => self.transmit(&chunk),
                    Err(_) => break,
                },
                recv(self.closed) -> _ => break,
            }
        }
        debug!("transmission pump stopped");
    }

    /// Perform one physical write. Empty chunks only mark the end of a
    /// transmission burst and are not written.
    fn transmit(&self, chunk: &Chunk) {
        if chunk.is_empty() {
            return;
        }

        let data = chunk.as_slice();
        if log_enabled!(Trace) {
            trace!("sending {} bytes\n{}", data.len(), hex_view(data));
        }

        if let Err(err) = self
            .peripheral
            .write_characteristic(&self.rx, data, self.with_response)
        {
            warn!("chunk write failed: {}", err);
            if self.write_errors.send(err).is_err() {
                debug!("engine is gone, write error dropped");
            }
        }
    }
}
