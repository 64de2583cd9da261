//! Events processed by the serial bridge engine.
//!
//! This module is private and restricted to the [`bridge`](crate::bridge)
//! scope. Every input of the engine (requests from the [`Bridge`] facade,
//! notifications from the GATT stack, hand-offs and failures from the
//! transmission pump and the shutdown signal) is turned into one [`Event`] and
//! handled to completion before the next one is accepted.
//!
//! [`Bridge`]: crate::Bridge

use std::fmt;

use crossbeam_channel::Sender;
use log::warn;

use crate::{error::BridgeError, gatt::GattError, settings::MAX_CHUNK};

// =============================================================================
// Crate-Public Interface
// =============================================================================

// Chunk =======================================================================

/// One over-the-air payload, at most [`MAX_CHUNK`] bytes.
///
/// Chunks are plain values: the engine hands a copy to the transmission pump so
/// it is free to refill its own chunk while the previous one is in flight.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub data: [u8; MAX_CHUNK],
    pub len: usize,
}
impl Default for Chunk {
    fn default() -> Self {
        Chunk {
            data: [0; MAX_CHUNK],
            len: 0,
        }
    }
}
impl Chunk {
    /// Build a chunk holding the first [`MAX_CHUNK`] bytes of `src` at most.
    pub fn from_slice(src: &[u8]) -> Self {
        let mut chunk = Chunk::default();
        chunk.len = src.len().min(MAX_CHUNK);
        chunk.data[..chunk.len].copy_from_slice(&src[..chunk.len]);
        chunk
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Chunk").field(&self.as_slice()).finish()
    }
}

// IncomingChunk ===============================================================

/// A notification received on the transmit characteristic, with the error the
/// GATT stack attached to it, if any.
#[derive(Debug)]
pub(crate) struct IncomingChunk {
    pub chunk: Chunk,
    pub error: Option<GattError>,
}
impl IncomingChunk {
    pub fn new(data: &[u8], error: Option<GattError>) -> Self {
        if data.len() > MAX_CHUNK {
            warn!(
                "notification of {} bytes truncated to {} bytes",
                data.len(),
                MAX_CHUNK
            );
        }
        IncomingChunk {
            chunk: Chunk::from_slice(data),
            error,
        }
    }
}

// Requests ====================================================================

/// What the engine sends back to a reader: the bytes read, or the error found
/// at the current stream position.
pub(crate) type ReadReply = Result<Vec<u8>, BridgeError>;

/// A pending `read` call, waiting for up to `len` bytes.
#[derive(Debug)]
pub(crate) struct ReadRequest {
    pub len: usize,
    pub reply: Sender<ReadReply>,
}
impl ReadRequest {
    /// Answer the request. The reader may have gone away, in which case there
    /// is nobody left to tell.
    pub fn answer(self, result: ReadReply) {
        let _ = self.reply.send(result);
    }
}

/// A pending `flush` call.
#[derive(Debug)]
pub(crate) struct FlushRequest {
    pub reply: Sender<Result<(), BridgeError>>,
}
impl FlushRequest {
    pub fn answer(self, result: Result<(), BridgeError>) {
        let _ = self.reply.send(result);
    }
}

// Events enum ==================================================================

/// Events that can be processed by the serial bridge engine.
#[derive(Debug)]
pub(crate) enum Event {
    /// A caller wants to read from the stream.
    Read(ReadRequest),
    /// A caller wrote bytes to the stream.
    Write(Vec<u8>),
    /// A caller wants to know the outcome of its previous writes.
    Flush(FlushRequest),
    /// The peer notified data on the transmit characteristic.
    Incoming(IncomingChunk),
    /// The transmission pump took the current outgoing chunk.
    ChunkTaken,
    /// The transmission pump failed to write a chunk.
    WriteError(GattError),
    /// The bridge was closed or one of the engine inputs went away.
    Shutdown,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn chunk_from_short_slice() {
    let chunk = Chunk::from_slice(b"abc");
    assert_eq!(chunk.len, 3);
    assert_eq!(chunk.as_slice(), b"abc");
    assert!(!chunk.is_empty());
}

#[test]
fn chunk_from_long_slice_is_capped() {
    let data: Vec<u8> = (0..45).collect();
    let chunk = Chunk::from_slice(&data);
    assert_eq!(chunk.as_slice(), &data[..MAX_CHUNK]);
}

#[test]
fn incoming_chunk_keeps_error() {
    let incoming = IncomingChunk::new(&[], Some("notification failed".into()));
    assert!(incoming.chunk.is_empty());
    assert_eq!(
        incoming.error.map(|e| e.to_string()),
        Some("notification failed".to_string())
    );
}
