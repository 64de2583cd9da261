//! The serial bridge engine.
//!
//! The engine is the only owner of the mutable protocol state: both byte
//! queues, the pending read and flush requests, the captured errors, the
//! current outgoing chunk and the transmit mode. It runs on its own thread and
//! processes one [`Event`] at a time, so none of that state needs a lock.
//!
//! The engine has two transmit modes:
//!
//! ```text
//!                   write (first chunk carved)
//!          .------.  ---------------------------->  .--------.
//!   START->| Idle |                                 | Active |--.
//!          '------'  <----------------------------  '--------'  | chunk taken,
//!              ^      chunk taken, queue empty,         ^       | refilled
//!              |      nothing left in flight            '-------'
//!              |
//!   read, flush (answered), notifications, write errors
//! ```
//!
//! While `Active`, the current chunk is offered to the transmission pump as one
//! of the events the engine waits on. Each time the pump takes it, the engine
//! refills it from the outbound queue. When the queue is empty, one empty
//! chunk is still offered: the pump only accepts it after it is done with the
//! previous write (and has reported its failure, if any), which is what makes
//! it safe to go back to `Idle` and answer the pending flushes.

use std::collections::VecDeque;

use crossbeam_channel::{Receiver, Select, Sender};
use log::{debug, info, log_enabled, trace, warn, Level::Trace};

use super::events::*;
use super::ring_queue::RingQueue;
use crate::{error::BridgeError, gatt::GattError, settings::Settings};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// The receiving ends of all the engine inputs.
pub(crate) struct Inbox {
    pub reads: Receiver<ReadRequest>,
    pub writes: Receiver<Vec<u8>>,
    pub flushes: Receiver<FlushRequest>,
    pub incoming: Receiver<IncomingChunk>,
    pub write_errors: Receiver<GattError>,
    /// Never carries a message; disconnected when the bridge is closed.
    pub closed: Receiver<()>,
}

pub(crate) struct Engine {
    settings: Settings,
    inbox: Inbox,
    /// Rendezvous channel to the transmission pump.
    outgoing: Sender<Chunk>,

    in_queue: RingQueue,
    out_queue: RingQueue,
    /// `true` while a chunk is being offered to the transmission pump.
    transmitting: bool,
    chunk: Chunk,

    read_reqs: VecDeque<ReadRequest>,
    flush_reqs: Vec<FlushRequest>,

    /// Notification failures, keyed by the inbound stream position they
    /// occurred at.
    read_errors: VecDeque<(u64, GattError)>,
    /// The earliest write failure not yet reported by a flush.
    write_error: Option<GattError>,

    /// Total bytes pushed into the inbound queue.
    received: u64,
    /// Total bytes handed to readers.
    delivered: u64,
}
impl Engine {
    pub fn new(settings: Settings, inbox: Inbox, outgoing: Sender<Chunk>) -> Self {
        Engine {
            in_queue: RingQueue::with_growth(settings.queue_growth),
            out_queue: RingQueue::with_growth(settings.queue_growth),
            settings,
            inbox,
            outgoing,
            transmitting: false,
            chunk: Chunk::default(),
            read_reqs: VecDeque::new(),
            flush_reqs: Vec::new(),
            read_errors: VecDeque::new(),
            write_error: None,
            received: 0,
            delivered: 0,
        }
    }

    /// The engine event loop. Runs until the bridge is closed, then fails every
    /// request still pending with [`BridgeError::Closed`].
    pub fn run(mut self) {
        debug!("engine started");
        loop {
            match self.next_event() {
                Event::Shutdown => break,
                event => self.step(event),
            }
        }
        self.shutdown();
    }

    /// Process one event to completion.
    pub fn step(&mut self, event: Event) {
        match event {
            Event::Read(req) => self.handle_read(req),
            Event::Write(data) => self.handle_write(data),
            Event::Flush(req) => self.handle_flush(req),
            Event::Incoming(incoming) => self.handle_incoming(incoming),
            Event::ChunkTaken => self.handle_chunk_taken(),
            Event::WriteError(err) => self.handle_write_error(err),
            Event::Shutdown => unreachable!("shutdown is handled by the event loop"),
        }
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }
}

// =============================================================================
// Private stuff
// =============================================================================

impl Engine {
    /// Wait for the next ready input. The current chunk is only offered to the
    /// pump while transmitting.
    fn next_event(&self) -> Event {
        let inbox = &self.inbox;
        let mut sel = Select::new();
        let reads = sel.recv(&inbox.reads);
        let writes = sel.recv(&inbox.writes);
        let flushes = sel.recv(&inbox.flushes);
        let incoming = sel.recv(&inbox.incoming);
        let write_errors = sel.recv(&inbox.write_errors);
        let closed = sel.recv(&inbox.closed);
        let outgoing = if self.transmitting {
            Some(sel.send(&self.outgoing))
        } else {
            None
        };

        let oper = sel.select();
        let index = oper.index();
        if index == reads {
            oper.recv(&inbox.reads).map_or(Event::Shutdown, Event::Read)
        } else if index == writes {
            oper.recv(&inbox.writes).map_or(Event::Shutdown, Event::Write)
        } else if index == flushes {
            oper.recv(&inbox.flushes).map_or(Event::Shutdown, Event::Flush)
        } else if index == incoming {
            oper.recv(&inbox.incoming).map_or_else(
                |_| {
                    warn!("notification delivery stopped, shutting down");
                    Event::Shutdown
                },
                Event::Incoming,
            )
        } else if index == write_errors {
            oper.recv(&inbox.write_errors)
                .map_or(Event::Shutdown, Event::WriteError)
        } else if index == closed {
            let _ = oper.recv(&inbox.closed);
            Event::Shutdown
        } else if Some(index) == outgoing {
            match oper.send(&self.outgoing, self.chunk) {
                Ok(()) => Event::ChunkTaken,
                Err(_) => Event::Shutdown,
            }
        } else {
            unreachable!("unknown select operation {}", index)
        }
    }

    fn handle_read(&mut self, req: ReadRequest) {
        match self.next_readable(req.len) {
            Some(result) => req.answer(result),
            None => {
                trace!("no inbound data, read of {} bytes pending", req.len);
                self.read_reqs.push_back(req);
            }
        }
    }

    fn handle_write(&mut self, data: Vec<u8>) {
        let mut src = &data[..];
        if src.is_empty() {
            return;
        }

        if !self.transmitting {
            let n = src.len().min(self.settings.max_chunk);
            self.chunk = Chunk::from_slice(&src[..n]);
            self.transmitting = true;
            debug!("=> Active");
            src = &src[n..];
        }

        self.out_queue.write(src);
        trace!("{} bytes staged for transmission", self.out_queue.queued());
    }

    fn handle_flush(&mut self, req: FlushRequest) {
        if self.transmitting {
            self.flush_reqs.push(req);
        } else {
            req.answer(self.take_write_result());
        }
    }

    fn handle_incoming(&mut self, incoming: IncomingChunk) {
        let data = incoming.chunk.as_slice();
        if log_enabled!(Trace) {
            trace!("received {} bytes\n{}", data.len(), hex_view(data));
        }

        self.in_queue.write(data);
        self.received += data.len() as u64;
        if let Some(err) = incoming.error {
            warn!("notification error at stream offset {}: {}", self.received, err);
            self.read_errors.push_back((self.received, err));
        }

        self.serve_pending_reads();
    }

    fn handle_chunk_taken(&mut self) {
        let max_chunk = self.settings.max_chunk;
        let n = self.out_queue.read(&mut self.chunk.data[..max_chunk]);
        if n > 0 {
            self.chunk.len = n;
        } else if !self.chunk.is_empty() {
            // Offer an empty chunk so that going idle waits for the pump to be
            // done with the one it just took.
            self.chunk.len = 0;
        } else {
            self.transmitting = false;
            debug!("=> Idle");
            if self.flush_reqs.is_empty() {
                // Kept for the next flush.
                return;
            }
            let mut result = self.take_write_result();
            for req in self.flush_reqs.drain(..) {
                req.answer(std::mem::replace(&mut result, Ok(())));
            }
        }
    }

    fn handle_write_error(&mut self, err: GattError) {
        match self.write_error {
            None => self.write_error = Some(err),
            Some(ref pending) => {
                warn!("write error '{}' while '{}' is not reported yet", err, pending);
            }
        }
    }

    fn shutdown(&mut self) {
        info!(
            "bridge closed ({} pending reads, {} pending flushes)",
            self.read_reqs.len(),
            self.flush_reqs.len()
        );
        for req in self.flush_reqs.drain(..) {
            req.answer(Err(BridgeError::Closed));
        }
        for req in self.read_reqs.drain(..) {
            req.answer(Err(BridgeError::Closed));
        }
    }

    /// Answer waiting readers, oldest first, for as long as there is something
    /// to give them.
    fn serve_pending_reads(&mut self) {
        while let Some(len) = self.read_reqs.front().map(|req| req.len) {
            match self.next_readable(len) {
                Some(result) => {
                    if let Some(req) = self.read_reqs.pop_front() {
                        req.answer(result);
                    }
                }
                None => break,
            }
        }
    }

    /// Take up to `len` bytes from the inbound stream, stopping at the position
    /// of the next captured notification error. Reaching that position yields
    /// the error itself. `None` when there is nothing to report yet.
    fn next_readable(&mut self, len: usize) -> Option<ReadReply> {
        let mut limit = len;
        if let Some(&(at, _)) = self.read_errors.front() {
            if at == self.delivered {
                let (_, err) = self.read_errors.pop_front()?;
                return Some(Err(BridgeError::Transport(err)));
            }
            limit = limit.min((at - self.delivered) as usize);
        }

        let available = self.in_queue.queued().min(limit);
        if available == 0 {
            return None;
        }
        let mut data = vec![0; available];
        let n = self.in_queue.read(&mut data);
        data.truncate(n);
        self.delivered += n as u64;
        Some(Ok(data))
    }

    fn take_write_result(&mut self) -> Result<(), BridgeError> {
        match self.write_error.take() {
            Some(err) => Err(BridgeError::Transport(err)),
            None => Ok(()),
        }
    }
}

pub(crate) fn hex_view(data: &[u8]) -> hexplay::HexView<'_> {
    hexplay::HexViewBuilder::new(data)
        .address_offset(0)
        .row_width(16)
        .finish()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
use crate::settings::SettingsBuilder;
#[cfg(test)]
use crossbeam_channel::bounded;

/// Keeps the sending halves alive so the engine can be stepped by hand.
#[cfg(test)]
struct Harness {
    engine: Engine,
    _senders: (
        Sender<ReadRequest>,
        Sender<Vec<u8>>,
        Sender<FlushRequest>,
        Sender<IncomingChunk>,
        Sender<GattError>,
        Sender<()>,
    ),
    _outgoing: Receiver<Chunk>,
}

#[cfg(test)]
fn harness(settings: Settings) -> Harness {
    let (read_tx, reads) = bounded(0);
    let (write_tx, writes) = bounded(0);
    let (flush_tx, flushes) = bounded(0);
    let (incoming_tx, incoming) = bounded(0);
    let (error_tx, write_errors) = bounded(0);
    let (closed_tx, closed) = bounded(0);
    let (outgoing, outgoing_rx) = bounded(0);
    let inbox = Inbox {
        reads,
        writes,
        flushes,
        incoming,
        write_errors,
        closed,
    };
    Harness {
        engine: Engine::new(settings, inbox, outgoing),
        _senders: (read_tx, write_tx, flush_tx, incoming_tx, error_tx, closed_tx),
        _outgoing: outgoing_rx,
    }
}

#[cfg(test)]
fn read(engine: &mut Engine, len: usize) -> Receiver<ReadReply> {
    let (reply, response) = bounded(1);
    engine.step(Event::Read(ReadRequest { len, reply }));
    response
}

#[cfg(test)]
fn flush(engine: &mut Engine) -> Receiver<Result<(), BridgeError>> {
    let (reply, response) = bounded(1);
    engine.step(Event::Flush(FlushRequest { reply }));
    response
}

#[cfg(test)]
fn notify(engine: &mut Engine, data: &[u8], error: Option<&str>) {
    let error = error.map(GattError::from);
    engine.step(Event::Incoming(IncomingChunk::new(data, error)));
}

/// Simulate the pump taking chunks until the engine goes idle, returning
/// the chunks actually carrying data.
#[cfg(test)]
fn drain_chunks(engine: &mut Engine) -> Vec<Vec<u8>> {
    let mut sent = Vec::new();
    while engine.is_transmitting() {
        if !engine.chunk.is_empty() {
            sent.push(engine.chunk.as_slice().to_vec());
        }
        engine.step(Event::ChunkTaken);
    }
    sent
}

#[test]
fn write_is_fragmented_in_order() {
    let mut h = harness(Settings::default());
    let first: Vec<u8> = (0..45).collect();
    h.engine.step(Event::Write(first.clone()));
    h.engine.step(Event::Write(b"xyz".to_vec()));

    let sent = drain_chunks(&mut h.engine);
    let lengths: Vec<usize> = sent.iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![20, 20, 8]);
    assert_eq!(sent.concat(), [&first[..], b"xyz"].concat());
}

#[test]
fn configured_chunk_size_is_used() {
    let mut h = harness(SettingsBuilder::new().max_chunk(4).finalize());
    h.engine.step(Event::Write(b"abcdefghij".to_vec()));
    let sent = drain_chunks(&mut h.engine);
    assert_eq!(sent, vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]);
}

#[test]
fn idle_needs_an_empty_chunk_hand_off() {
    let mut h = harness(Settings::default());
    h.engine.step(Event::Write(b"hi".to_vec()));
    assert!(h.engine.is_transmitting());

    h.engine.step(Event::ChunkTaken);
    assert!(h.engine.is_transmitting());
    assert!(h.engine.chunk.is_empty());

    h.engine.step(Event::ChunkTaken);
    assert!(!h.engine.is_transmitting());
}

#[test]
fn flush_when_idle_answers_immediately() {
    let mut h = harness(Settings::default());
    let response = flush(&mut h.engine);
    assert!(response.try_recv().unwrap().is_ok());
}

#[test]
fn flush_waits_for_idle_and_reports_earliest_error() {
    let mut h = harness(Settings::default());
    h.engine.step(Event::Write(vec![b'A'; 30]));
    let first = flush(&mut h.engine);
    let second = flush(&mut h.engine);
    assert!(first.try_recv().is_err());

    h.engine.step(Event::ChunkTaken);
    h.engine.step(Event::WriteError("first failure".into()));
    h.engine.step(Event::ChunkTaken);
    h.engine.step(Event::WriteError("second failure".into()));
    h.engine.step(Event::ChunkTaken);
    assert!(!h.engine.is_transmitting());

    match first.try_recv().unwrap() {
        Err(BridgeError::Transport(err)) => assert_eq!(err.to_string(), "first failure"),
        other => panic!("unexpected flush result {:?}", other),
    }
    assert!(second.try_recv().unwrap().is_ok());
    assert!(flush(&mut h.engine).try_recv().unwrap().is_ok());
}

#[test]
fn write_error_outlives_going_idle() {
    let mut h = harness(Settings::default());
    h.engine.step(Event::Write(b"lost".to_vec()));
    h.engine.step(Event::ChunkTaken);
    h.engine.step(Event::WriteError("radio failure".into()));
    h.engine.step(Event::ChunkTaken);
    assert!(!h.engine.is_transmitting());

    match flush(&mut h.engine).try_recv().unwrap() {
        Err(BridgeError::Transport(err)) => assert_eq!(err.to_string(), "radio failure"),
        other => panic!("unexpected flush result {:?}", other),
    }
    assert!(flush(&mut h.engine).try_recv().unwrap().is_ok());
}

#[test]
fn read_served_from_queue() {
    let mut h = harness(Settings::default());
    notify(&mut h.engine, b"hello world", None);

    let response = read(&mut h.engine, 5);
    assert_eq!(response.try_recv().unwrap().unwrap(), b"hello");
    let response = read(&mut h.engine, 64);
    assert_eq!(response.try_recv().unwrap().unwrap(), b" world");
}

#[test]
fn pending_reads_are_served_in_order() {
    let mut h = harness(Settings::default());
    let first = read(&mut h.engine, 4);
    let second = read(&mut h.engine, 4);
    let third = read(&mut h.engine, 4);
    assert!(first.try_recv().is_err());

    notify(&mut h.engine, b"abcdef", None);
    assert_eq!(first.try_recv().unwrap().unwrap(), b"abcd");
    assert_eq!(second.try_recv().unwrap().unwrap(), b"ef");
    assert!(third.try_recv().is_err());

    notify(&mut h.engine, b"gh", None);
    assert_eq!(third.try_recv().unwrap().unwrap(), b"gh");
}

#[test]
fn notification_error_is_reported_at_its_position() {
    let mut h = harness(Settings::default());
    notify(&mut h.engine, b"abc", Some("bad notification"));
    notify(&mut h.engine, b"def", None);

    let response = read(&mut h.engine, 64);
    assert_eq!(response.try_recv().unwrap().unwrap(), b"abc");
    let response = read(&mut h.engine, 64);
    match response.try_recv().unwrap() {
        Err(BridgeError::Transport(err)) => assert_eq!(err.to_string(), "bad notification"),
        other => panic!("unexpected read result {:?}", other),
    }
    let response = read(&mut h.engine, 64);
    assert_eq!(response.try_recv().unwrap().unwrap(), b"def");
}

#[test]
fn empty_failed_notification_fails_pending_read() {
    let mut h = harness(Settings::default());
    let response = read(&mut h.engine, 8);
    notify(&mut h.engine, &[], Some("link dropped a packet"));
    assert!(matches!(
        response.try_recv().unwrap(),
        Err(BridgeError::Transport(_))
    ));

    // Reported once only.
    let response = read(&mut h.engine, 8);
    assert!(response.try_recv().is_err());
}

#[test]
fn shutdown_fails_pending_requests() {
    let mut h = harness(Settings::default());
    let pending_read = read(&mut h.engine, 8);
    h.engine.step(Event::Write(b"data".to_vec()));
    let pending_flush = flush(&mut h.engine);

    h.engine.shutdown();
    assert!(matches!(
        pending_read.try_recv().unwrap(),
        Err(BridgeError::Closed)
    ));
    assert!(matches!(
        pending_flush.try_recv().unwrap(),
        Err(BridgeError::Closed)
    ));
}
