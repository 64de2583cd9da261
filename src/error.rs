//! Errors reported by the serial bridge.

use std::io;

use thiserror::Error;

use crate::gatt::GattError;

/// Everything that can go wrong while opening or using a
/// [`Bridge`](crate::Bridge).
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The peripheral lacks the serial bridge service or one of its
    /// characteristics.
    #[error("peripheral does not implement the serial bridge service")]
    NotBridge,
    /// Reserved for collaborators that enforce their own deadlines. Never
    /// raised by the bridge itself.
    #[error("serial bridge timeout")]
    Timeout,
    /// The bridge was closed while the operation was pending, or before it was
    /// issued.
    #[error("serial bridge was closed")]
    Closed,
    /// A failure reported by the underlying GATT stack.
    #[error("transport error: {0}")]
    Transport(#[from] GattError),
    /// The engine or transmission thread could not be started.
    #[error("could not start the bridge threads: {0}")]
    Spawn(#[source] io::Error),
}

impl From<BridgeError> for io::Error {
    fn from(err: BridgeError) -> io::Error {
        let kind = match err {
            BridgeError::NotBridge => io::ErrorKind::Unsupported,
            BridgeError::Timeout => io::ErrorKind::TimedOut,
            BridgeError::Closed => io::ErrorKind::BrokenPipe,
            BridgeError::Transport(_) | BridgeError::Spawn(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn io_error_kinds() {
    let kind = |err: BridgeError| io::Error::from(err).kind();
    assert_eq!(kind(BridgeError::Closed), io::ErrorKind::BrokenPipe);
    assert_eq!(kind(BridgeError::Timeout), io::ErrorKind::TimedOut);
    assert_eq!(kind(BridgeError::NotBridge), io::ErrorKind::Unsupported);
    assert_eq!(
        kind(BridgeError::Transport("link lost".into())),
        io::ErrorKind::Other
    );
}

#[test]
fn transport_error_message() {
    let err = BridgeError::from(GattError::from("insufficient authentication"));
    assert_eq!(
        err.to_string(),
        "transport error: insufficient authentication"
    );
}
