//! End-to-end behavior of the serial bridge over scripted peripherals.

use std::{
    io::{Read, Write},
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use brspcom::{
    gatt::{BRIDGE_MODE, BRIDGE_RX, BRIDGE_SERVICE, BRIDGE_TX},
    Bridge, BridgeError, Characteristic, Descriptor, GattError, LoopbackPeripheral, NotifyHandler,
    Peripheral, Service, SettingsBuilder,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use uuid::Uuid;

// =============================================================================
// Scripted peripheral
// =============================================================================

type WriteFilter = Box<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// A peripheral recording everything the bridge does to it.
struct MockPeripheral {
    service: bool,
    characteristics: Vec<Uuid>,
    /// Data chunks for which this returns `true` fail to be written.
    fail_write: WriteFilter,
    fail_handshake: bool,
    /// When set, every data write waits for a message (or a disconnect).
    gate: Option<Receiver<()>>,
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    handler: Option<Arc<NotifyHandler>>,
    indicate_calls: usize,
    writes: Vec<(Uuid, Vec<u8>)>,
}

impl MockPeripheral {
    fn new() -> Self {
        MockPeripheral {
            service: true,
            characteristics: vec![BRIDGE_MODE, BRIDGE_RX, BRIDGE_TX],
            fail_write: Box::new(|_| false),
            fail_handshake: false,
            gate: None,
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Payloads written to the bridge receive characteristic.
    fn chunks(&self) -> Vec<Vec<u8>> {
        self.state()
            .writes
            .iter()
            .filter(|(uuid, _)| *uuid == BRIDGE_RX)
            .map(|(_, data)| data.clone())
            .collect()
    }

    fn notify(&self, data: &[u8], error: Option<&str>) {
        let handler = self.state().handler.clone().expect("not subscribed");
        (*handler)(data, error.map(GattError::from));
    }
}

fn characteristic(uuid: Uuid, handle: u16) -> Characteristic {
    Characteristic { uuid, handle }
}

impl Peripheral for MockPeripheral {
    fn discover_services(&self, _filter: &[Uuid]) -> Result<Vec<Service>, GattError> {
        let mut services = vec![Service {
            uuid: Uuid::from_u128(0x1800),
            handle: 1,
        }];
        if self.service {
            services.push(Service {
                uuid: BRIDGE_SERVICE,
                handle: 0x20,
            });
        }
        Ok(services)
    }

    fn discover_characteristics(
        &self,
        _filter: &[Uuid],
        _service: &Service,
    ) -> Result<Vec<Characteristic>, GattError> {
        Ok(self
            .characteristics
            .iter()
            .enumerate()
            .map(|(i, uuid)| characteristic(*uuid, 0x22 + 3 * i as u16))
            .collect())
    }

    fn discover_descriptors(
        &self,
        _filter: &[Uuid],
        _characteristic: &Characteristic,
    ) -> Result<Vec<Descriptor>, GattError> {
        Ok(Vec::new())
    }

    fn set_indicate_value(
        &self,
        characteristic: &Characteristic,
        handler: Option<NotifyHandler>,
    ) -> Result<(), GattError> {
        assert_eq!(characteristic.uuid, BRIDGE_TX);
        let mut state = self.state();
        state.indicate_calls += 1;
        state.handler = handler.map(Arc::new);
        Ok(())
    }

    fn write_characteristic(
        &self,
        characteristic: &Characteristic,
        value: &[u8],
        _with_response: bool,
    ) -> Result<(), GattError> {
        if characteristic.uuid == BRIDGE_MODE && self.fail_handshake {
            return Err("handshake rejected".into());
        }
        if characteristic.uuid == BRIDGE_RX {
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
        }
        self.state()
            .writes
            .push((characteristic.uuid, value.to_vec()));
        if characteristic.uuid == BRIDGE_RX && (self.fail_write)(value) {
            return Err("write rejected".into());
        }
        Ok(())
    }
}

fn open(mock: MockPeripheral) -> (Arc<MockPeripheral>, Bridge) {
    let mock = Arc::new(mock);
    let bridge = Bridge::open(mock.clone()).expect("bridge should open");
    (mock, bridge)
}

fn gated() -> (MockPeripheral, Sender<()>) {
    let (release, gate) = bounded(0);
    let mut mock = MockPeripheral::new();
    mock.gate = Some(gate);
    (mock, release)
}

/// Poll until `count` data chunks were written to the mock.
fn wait_for_chunks(mock: &MockPeripheral, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while mock.chunks().len() < count {
        assert!(Instant::now() < deadline, "only {} chunks written", mock.chunks().len());
        thread::yield_now();
    }
}

// =============================================================================
// Connection setup
// =============================================================================

#[test]
fn open_subscribes_then_performs_handshake() {
    let (mock, bridge) = open(MockPeripheral::new());
    let state = mock.state();
    assert!(state.handler.is_some());
    assert_eq!(state.writes, vec![(BRIDGE_MODE, vec![1])]);
    assert_eq!(bridge.characteristics().service.uuid, BRIDGE_SERVICE);
    assert_eq!(bridge.characteristics().rx.uuid, BRIDGE_RX);
}

#[test]
fn open_fails_without_all_characteristics() {
    let mut mock = MockPeripheral::new();
    mock.characteristics = vec![BRIDGE_MODE, BRIDGE_TX];
    let mock = Arc::new(mock);

    match Bridge::open(mock.clone()) {
        Err(BridgeError::NotBridge) => {}
        Err(err) => panic!("unexpected error {}", err),
        Ok(_) => panic!("open should fail"),
    }
    let state = mock.state();
    assert_eq!(state.indicate_calls, 0);
    assert!(state.writes.is_empty());
}

#[test]
fn open_fails_without_service() {
    let mut mock = MockPeripheral::new();
    mock.service = false;
    assert!(matches!(
        Bridge::open(Arc::new(mock)),
        Err(BridgeError::NotBridge)
    ));
}

#[test]
fn failed_handshake_unsubscribes() {
    let mut mock = MockPeripheral::new();
    mock.fail_handshake = true;
    let mock = Arc::new(mock);

    assert!(matches!(
        Bridge::open(mock.clone()),
        Err(BridgeError::Transport(_))
    ));
    assert!(mock.state().handler.is_none());
}

// =============================================================================
// Writing
// =============================================================================

#[test]
fn writes_are_fragmented_into_chunks() {
    let (mock, bridge) = open(MockPeripheral::new());
    let payload: Vec<u8> = (0..45).collect();

    assert_eq!(bridge.write(&payload).unwrap(), 45);
    bridge.flush().unwrap();

    let chunks = mock.chunks();
    let lengths: Vec<usize> = chunks.iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![20, 20, 5]);
    assert_eq!(chunks.concat(), payload);
}

#[test]
fn consecutive_writes_keep_their_order() {
    let (mock, bridge) = open(MockPeripheral::new());
    let first = vec![b'a'; 45];
    let second = vec![b'b'; 12];

    bridge.write(&first).unwrap();
    bridge.write(&second).unwrap();
    bridge.flush().unwrap();

    let sent = mock.chunks().concat();
    assert_eq!(sent, [first, second].concat());
    assert!(mock.chunks().iter().all(|c| c.len() <= 20));
}

#[test]
fn smaller_chunk_size_setting() {
    let mock = Arc::new(MockPeripheral::new());
    let settings = SettingsBuilder::new().max_chunk(8).finalize();
    let bridge = Bridge::open_with(mock.clone(), settings).unwrap();

    bridge.write(&[7; 20]).unwrap();
    bridge.flush().unwrap();
    let lengths: Vec<usize> = mock.chunks().iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![8, 8, 4]);
}

#[test]
fn flush_reports_earliest_write_failure_once() {
    let mut mock = MockPeripheral::new();
    mock.fail_write = Box::new(|chunk| chunk.starts_with(b"A"));
    let (mock, bridge) = open(mock);

    assert_eq!(bridge.write(b"AAAA").unwrap(), 4);
    assert_eq!(bridge.write(b"BBBB").unwrap(), 4);

    match bridge.flush() {
        Err(BridgeError::Transport(err)) => assert_eq!(err.to_string(), "write rejected"),
        other => panic!("unexpected flush result {:?}", other),
    }
    assert!(bridge.flush().is_ok());
    assert_eq!(mock.chunks().len(), 2);

    // The stream is still usable.
    bridge.write(b"CCCC").unwrap();
    assert!(bridge.flush().is_ok());
}

#[test]
fn write_failure_is_reported_by_a_late_flush() {
    let (mut mock, release) = gated();
    mock.fail_write = Box::new(|chunk| chunk.starts_with(b"F"));
    let (mock, bridge) = open(mock);

    bridge.write(b"FFFF").unwrap();
    bridge.write(&[b'x'; 37]).unwrap();
    for _ in 0..3 {
        release.send(()).unwrap();
    }
    wait_for_chunks(&mock, 3);

    // A round trip through the engine, giving the outbound side time to go
    // idle before the flush arrives.
    mock.notify(b"sync", None);
    bridge.read(&mut [0u8; 4]).unwrap();

    match bridge.flush() {
        Err(BridgeError::Transport(err)) => assert_eq!(err.to_string(), "write rejected"),
        other => panic!("unexpected flush result {:?}", other),
    }
    assert!(bridge.flush().is_ok());
    let lengths: Vec<usize> = mock.chunks().iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![4, 20, 17]);
}

#[test]
fn write_does_not_wait_for_transmission() {
    let (mock, release) = gated();
    let (mock, bridge) = open(mock);

    // Every write returns while the first chunk is still stuck in the radio.
    for _ in 0..10 {
        assert_eq!(bridge.write(&[1; 100]).unwrap(), 100);
    }
    assert!(mock.chunks().is_empty());

    drop(release);
    bridge.flush().unwrap();
    assert_eq!(mock.chunks().concat().len(), 1000);
}

// =============================================================================
// Reading
// =============================================================================

#[test]
fn concurrent_reads_are_all_served() {
    let (mock, bridge) = open(MockPeripheral::new());
    let bridge = Arc::new(bridge);

    let spawn_reader = |bridge: Arc<Bridge>| {
        thread::spawn(move || {
            let mut buf = [0u8; 5];
            let n = bridge.read(&mut buf).unwrap();
            buf[..n].to_vec()
        })
    };
    let readers = vec![spawn_reader(bridge.clone()), spawn_reader(bridge.clone())];

    mock.notify(b"AAAAA", None);
    mock.notify(b"BBBBB", None);

    let mut received: Vec<Vec<u8>> = readers.into_iter().map(|r| r.join().unwrap()).collect();
    received.sort();
    assert_eq!(received, vec![b"AAAAA".to_vec(), b"BBBBB".to_vec()]);
}

#[test]
fn notifications_are_reassembled() {
    let (mock, bridge) = open(MockPeripheral::new());
    mock.notify(b"hello ", None);
    mock.notify(b"serial ", None);
    mock.notify(b"bridge", None);

    let mut buf = [0u8; 64];
    let mut received = Vec::new();
    while received.len() < 19 {
        let n = bridge.read(&mut buf).unwrap();
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, b"hello serial bridge");
}

#[test]
fn notification_error_is_reported_by_read() {
    let (mock, bridge) = open(MockPeripheral::new());
    mock.notify(b"abc", Some("bad packet"));
    mock.notify(b"def", None);

    let mut buf = [0u8; 16];
    assert_eq!(bridge.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"abc");
    match bridge.read(&mut buf) {
        Err(BridgeError::Transport(err)) => assert_eq!(err.to_string(), "bad packet"),
        other => panic!("unexpected read result {:?}", other),
    }
    assert_eq!(bridge.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"def");
}

// =============================================================================
// Closing
// =============================================================================

#[test]
fn close_fails_pending_read_and_flush() {
    let (mock, release) = gated();
    let (_mock, bridge) = open(mock);
    let bridge = Arc::new(bridge);

    bridge.write(b"stuck").unwrap();
    let reader = {
        let bridge = bridge.clone();
        thread::spawn(move || bridge.read(&mut [0u8; 8]))
    };
    let flusher = {
        let bridge = bridge.clone();
        thread::spawn(move || bridge.flush())
    };

    // Whether or not the requests reached the engine yet, they end with Closed.
    bridge.close().unwrap();
    assert!(matches!(reader.join().unwrap(), Err(BridgeError::Closed)));
    assert!(matches!(flusher.join().unwrap(), Err(BridgeError::Closed)));
    drop(release);
}

#[test]
fn calls_after_close_fail() {
    let (_mock, bridge) = open(MockPeripheral::new());
    bridge.close().unwrap();
    bridge.close().unwrap();

    assert!(matches!(bridge.read(&mut [0u8; 4]), Err(BridgeError::Closed)));
    assert!(matches!(bridge.write(b"late"), Err(BridgeError::Closed)));
    assert!(matches!(bridge.flush(), Err(BridgeError::Closed)));
}

// =============================================================================
// Loopback
// =============================================================================

#[test]
fn loopback_round_trip_through_std_io() {
    let peripheral = Arc::new(LoopbackPeripheral::new());
    let mut bridge = Bridge::open(peripheral.clone()).unwrap();
    assert!(peripheral.in_bridge_mode());

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    bridge.write_all(&payload).unwrap();
    bridge.flush().unwrap();

    let mut echoed = vec![0u8; payload.len()];
    bridge.read_exact(&mut echoed).unwrap();
    assert_eq!(echoed, payload);
    assert_eq!(peripheral.echoed(), 1000);
}

#[test]
fn io_errors_after_close() {
    let mut bridge = Bridge::open(Arc::new(LoopbackPeripheral::new())).unwrap();
    bridge.close().unwrap();
    let err = Write::write(&mut bridge, b"x").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
}
