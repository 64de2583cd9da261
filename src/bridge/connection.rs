//! The public face of the serial bridge: connection setup and the blocking
//! stream operations.
//!
//! None of the methods here touch protocol state. Each one turns the call into
//! a request for the engine and, where the call has to wait, blocks on a reply
//! channel dedicated to that request.

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard},
    thread,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};

use super::engine::{Engine, Inbox};
use super::events::*;
use super::pump::Pump;
use crate::{
    error::BridgeError,
    gatt::{
        Characteristic, GattError, NotifyHandler, Peripheral, Service, BRIDGE_MODE, BRIDGE_RX,
        BRIDGE_SERVICE, BRIDGE_TX,
    },
    settings::Settings,
};

// =============================================================================
// Public Interface
// =============================================================================

/// The serial bridge attributes discovered on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeCharacteristics {
    pub service: Service,
    /// Written once with `1` to switch the peer into bridge mode.
    pub mode: Characteristic,
    /// Written with the outbound chunks.
    pub rx: Characteristic,
    /// Notifies the inbound chunks.
    pub tx: Characteristic,
}

/// A byte stream over the serial bridge service of a connected peripheral.
///
/// All methods take `&self` and a bridge can be shared between threads (e.g.
/// in an `Arc`), one of them blocked in [`read`](Bridge::read) while another
/// one writes.
///
/// **Example**
///
/// ```no_run
/// use std::sync::Arc;
/// use brspcom::{Bridge, LoopbackPeripheral};
///
/// let bridge = Bridge::open(Arc::new(LoopbackPeripheral::new())).unwrap();
/// bridge.write(b"ping").unwrap();
/// bridge.flush().unwrap();
///
/// let mut buf = [0u8; 4];
/// let n = bridge.read(&mut buf).unwrap();
/// assert_eq!(&buf[..n], b"ping");
/// bridge.close().unwrap();
/// ```
pub struct Bridge {
    characteristics: BridgeCharacteristics,
    reads: Sender<ReadRequest>,
    writes: Sender<Vec<u8>>,
    flushes: Sender<FlushRequest>,
    /// Dropping the sender stops both the engine and the pump.
    closed: Mutex<Option<Sender<()>>>,
}
impl Bridge {
    /// Open a bridge on `peripheral` with the default [`Settings`].
    pub fn open(peripheral: Arc<dyn Peripheral>) -> Result<Bridge, BridgeError> {
        Self::open_with(peripheral, Settings::default())
    }

    /// Discover the serial bridge service on `peripheral`, subscribe to its
    /// notifications and perform the mode handshake. The engine and
    /// transmission threads are only started once all of that succeeded.
    pub fn open_with(
        peripheral: Arc<dyn Peripheral>,
        settings: Settings,
    ) -> Result<Bridge, BridgeError> {
        let characteristics = discover(peripheral.as_ref())?;
        debug!("{:#?}", characteristics);

        let (incoming_tx, incoming) = bounded(0);
        subscribe(peripheral.as_ref(), &characteristics.tx, incoming_tx)?;

        if let Err(err) = peripheral.write_characteristic(&characteristics.mode, &[1], true) {
            warn!("bridge mode handshake failed: {}", err);
            return Err(roll_back(peripheral.as_ref(), &characteristics.tx, err.into()));
        }

        let (reads_tx, reads) = bounded(0);
        let (writes_tx, writes) = bounded(0);
        let (flushes_tx, flushes) = bounded(0);
        let (write_errors_tx, write_errors) = bounded(0);
        let (closed_tx, closed) = bounded(0);
        let (outgoing_tx, outgoing) = bounded(0);

        let pump = Pump {
            peripheral: peripheral.clone(),
            rx: characteristics.rx,
            with_response: settings.write_with_response,
            outgoing,
            write_errors: write_errors_tx,
            closed: closed.clone(),
        };
        let engine = Engine::new(
            settings,
            Inbox {
                reads,
                writes,
                flushes,
                incoming,
                write_errors,
                closed,
            },
            outgoing_tx,
        );

        // If anything fails from here, `closed_tx` is dropped on return, which
        // stops whatever thread was already started.
        if let Err(err) = start(engine, pump) {
            warn!("{}", err);
            return Err(roll_back(peripheral.as_ref(), &characteristics.tx, err));
        }

        info!("serial bridge open");
        Ok(Bridge {
            characteristics,
            reads: reads_tx,
            writes: writes_tx,
            flushes: flushes_tx,
            closed: Mutex::new(Some(closed_tx)),
        })
    }

    pub fn characteristics(&self) -> &BridgeCharacteristics {
        &self.characteristics
    }

    /// Read at least one byte into `buf`, blocking until data is available.
    ///
    /// A notification failure reported by the GATT stack is returned by the
    /// read that reaches the point of the stream where it occurred, once; the
    /// stream can still be read afterwards.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let (reply, response) = bounded(1);
        let req = ReadRequest {
            len: buf.len(),
            reply,
        };
        self.reads.send(req).map_err(|_| BridgeError::Closed)?;
        let data = wait(&response)??;

        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    /// Queue `buf` for transmission and return immediately with its full
    /// length.
    ///
    /// Transmission failures are not reported here: call
    /// [`flush`](Bridge::flush) to learn about them.
    pub fn write(&self, buf: &[u8]) -> Result<usize, BridgeError> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        self.writes
            .send(buf.to_vec())
            .map_err(|_| BridgeError::Closed)?;
        Ok(buf.len())
    }

    /// Block until everything written so far has been transmitted, then report
    /// the earliest transmission failure since the previous flush, if any.
    pub fn flush(&self) -> Result<(), BridgeError> {
        self.ensure_open()?;
        let (reply, response) = bounded(1);
        self.flushes
            .send(FlushRequest { reply })
            .map_err(|_| BridgeError::Closed)?;
        wait(&response)?
    }

    /// Stop the bridge. Pending and later calls fail with
    /// [`BridgeError::Closed`]. Does not wait for the bridge threads to exit.
    pub fn close(&self) -> Result<(), BridgeError> {
        if self.closed_signal().take().is_some() {
            debug!("closing serial bridge");
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        match *self.closed_signal() {
            Some(_) => Ok(()),
            None => Err(BridgeError::Closed),
        }
    }

    fn closed_signal(&self) -> MutexGuard<'_, Option<Sender<()>>> {
        match self.closed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
impl Drop for Bridge {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl io::Read for Bridge {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Bridge::read(self, buf).map_err(io::Error::from)
    }
}
impl io::Write for Bridge {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Bridge::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Bridge::flush(self).map_err(io::Error::from)
    }
}
impl<'a> io::Read for &'a Bridge {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Bridge::read(*self, buf).map_err(io::Error::from)
    }
}
impl<'a> io::Write for &'a Bridge {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Bridge::write(*self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Bridge::flush(*self).map_err(io::Error::from)
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// Locate the bridge service and its three characteristics.
fn discover(peripheral: &dyn Peripheral) -> Result<BridgeCharacteristics, BridgeError> {
    let service = peripheral
        .discover_services(&[BRIDGE_SERVICE])?
        .into_iter()
        .find(|s| s.uuid == BRIDGE_SERVICE)
        .ok_or(BridgeError::NotBridge)?;

    let chars =
        peripheral.discover_characteristics(&[BRIDGE_MODE, BRIDGE_RX, BRIDGE_TX], &service)?;
    let find = |uuid| chars.iter().find(|c| c.uuid == uuid).copied();
    let (mode, rx, tx) = match (find(BRIDGE_MODE), find(BRIDGE_RX), find(BRIDGE_TX)) {
        (Some(mode), Some(rx), Some(tx)) => (mode, rx, tx),
        _ => {
            info!("peripheral is missing serial bridge characteristics");
            return Err(BridgeError::NotBridge);
        }
    };

    peripheral.discover_descriptors(&[], &tx)?;

    Ok(BridgeCharacteristics {
        service,
        mode,
        rx,
        tx,
    })
}

/// Route notifications of `tx` into the engine inbox.
fn subscribe(
    peripheral: &dyn Peripheral,
    tx: &Characteristic,
    incoming: Sender<IncomingChunk>,
) -> Result<(), BridgeError> {
    // Start from a clean subscription, some stacks keep the previous handler
    // otherwise.
    peripheral.set_indicate_value(tx, None)?;

    let handler: NotifyHandler = Box::new(move |data: &[u8], error: Option<GattError>| {
        if incoming.send(IncomingChunk::new(data, error)).is_err() {
            debug!("notification of {} bytes after close, dropped", data.len());
        }
    });
    peripheral.set_indicate_value(tx, Some(handler))?;
    Ok(())
}

/// Undo [`subscribe`] after a failed open and hand back the failure. The
/// unsubscription is best effort.
fn roll_back(peripheral: &dyn Peripheral, tx: &Characteristic, err: BridgeError) -> BridgeError {
    if let Err(unsub) = peripheral.set_indicate_value(tx, None) {
        debug!("could not unsubscribe from notifications: {}", unsub);
    }
    err
}

fn start(engine: Engine, pump: Pump) -> Result<(), BridgeError> {
    spawn("brsp-engine", move || engine.run())?;
    spawn("brsp-pump", move || pump.run())
}

fn spawn<F>(name: &str, f: F) -> Result<(), BridgeError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map(|_| ())
        .map_err(BridgeError::Spawn)
}

fn wait<T>(response: &Receiver<T>) -> Result<T, BridgeError> {
    response.recv().map_err(|_| BridgeError::Closed)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn roll_back_stops_notifications() {
    use crate::utils::LoopbackPeripheral;

    let peripheral = LoopbackPeripheral::new();
    let chars = discover(&peripheral).unwrap();
    let (incoming_tx, incoming) = bounded(1);
    subscribe(&peripheral, &chars.tx, incoming_tx).unwrap();
    peripheral.write_characteristic(&chars.mode, &[1], true).unwrap();
    peripheral.write_characteristic(&chars.rx, b"ping", true).unwrap();
    assert_eq!(incoming.try_recv().unwrap().chunk.as_slice(), b"ping");

    let err = BridgeError::Spawn(io::Error::new(io::ErrorKind::Other, "no threads"));
    let err = roll_back(&peripheral, &chars.tx, err);
    assert!(matches!(err, BridgeError::Spawn(_)));

    peripheral.write_characteristic(&chars.rx, b"pong", true).unwrap();
    assert!(incoming.try_recv().is_err());
}
