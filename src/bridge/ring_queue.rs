//! Growable circular byte queue.
//!
//! The bridge uses two of them: one to reassemble inbound notifications into a
//! continuous readable stream, the other to stage outbound bytes until they can
//! be cut into chunks. Neither side of the link has a flow control signal, so
//! the queue never refuses data; it grows instead.

use crate::settings::DEFAULT_QUEUE_GROWTH;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// A byte FIFO over a wrapping backing buffer.
///
/// `head` is where the next byte is written, `tail` where the next byte is
/// read. The queue is empty when both are equal, so one slot of the buffer is
/// always left unused. Once a read drains the queue both cursors go back to
/// `0`.
#[derive(Debug)]
pub(crate) struct RingQueue {
    data: Vec<u8>,
    head: usize,
    tail: usize,
    /// Minimum number of bytes added to the buffer when it grows.
    growth: usize,
}
impl Default for RingQueue {
    fn default() -> Self {
        Self::with_growth(DEFAULT_QUEUE_GROWTH)
    }
}
impl RingQueue {
    /// Create an empty queue which grows by at least `growth` bytes at a time.
    pub fn with_growth(growth: usize) -> Self {
        RingQueue {
            data: Vec::new(),
            head: 0,
            tail: 0,
            growth: growth.max(1),
        }
    }

    /// Number of bytes currently stored.
    pub fn queued(&self) -> usize {
        if self.head >= self.tail {
            self.head - self.tail
        } else {
            self.data.len() + self.head - self.tail
        }
    }

    /// Move up to `dst.len()` bytes out of the queue into `dst`, returning how
    /// many were copied.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let mut n;

        if self.head >= self.tail {
            n = copy(dst, &self.data[self.tail..self.head]);
            self.tail += n;
        } else {
            n = copy(dst, &self.data[self.tail..]);
            self.tail += n;
            if self.tail == self.data.len() {
                let m = copy(&mut dst[n..], &self.data[..self.head]);
                self.tail = m;
                n += m;
            }
        }

        if self.tail == self.head {
            self.head = 0;
            self.tail = 0;
        }

        n
    }

    /// Append all of `src` to the queue, growing the backing buffer first if
    /// it cannot hold it.
    pub fn write(&mut self, mut src: &[u8]) {
        if src.is_empty() {
            return;
        }

        let space = self.data.len() - self.queued();
        if src.len() >= space {
            self.grow(src.len() - space + 1);
        }

        let room = self.data.len() - self.head;
        if room < src.len() {
            self.data[self.head..].copy_from_slice(&src[..room]);
            src = &src[room..];
            self.head = 0;
        }

        self.data[self.head..self.head + src.len()].copy_from_slice(src);
        self.head += src.len();
        if self.head == self.data.len() {
            self.head = 0;
        }
    }

    /// Reallocate with at least `shortfall` more bytes, compacting the queued
    /// content to offset `0`.
    fn grow(&mut self, shortfall: usize) {
        let mut data = vec![0; self.data.len() + shortfall.max(self.growth)];
        let n = self.read(&mut data);
        self.data = data;
        self.head = n;
        self.tail = 0;
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn copy(dst: &mut [u8], src: &[u8]) -> usize {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

#[test]
fn empty_queue() {
    let mut q = RingQueue::default();
    let mut buf = [0u8; 8];
    assert_eq!(q.queued(), 0);
    assert_eq!(q.read(&mut buf), 0);
    q.write(&[]);
    assert_eq!(q.data.len(), 0);
}

#[test]
fn first_write_grows_by_minimum() {
    let mut q = RingQueue::default();
    q.write(b"hello");
    assert_eq!(q.data.len(), 256);
    assert_eq!(q.queued(), 5);
}

#[test]
fn growth_covers_large_shortfall() {
    let mut q = RingQueue::default();
    let data = pattern(300, 1);
    q.write(&data);
    assert_eq!(q.data.len(), 301);

    let mut out = vec![0u8; 300];
    assert_eq!(q.read(&mut out), 300);
    assert_eq!(out, data);
}

#[test]
fn write_past_capacity_preserves_content() {
    let mut q = RingQueue::default();
    q.write(&pattern(200, 3));
    assert_eq!(q.data.len(), 256);

    // Wrap the cursors before growing.
    let mut out = vec![0u8; 150];
    assert_eq!(q.read(&mut out), 150);
    assert_eq!(out, pattern(200, 3)[..150].to_vec());
    q.write(&pattern(100, 9));
    assert!(q.head < q.tail);

    q.write(&pattern(300, 5));
    assert_eq!(q.queued(), 450);
    assert_eq!(q.tail, 0);

    let mut out = vec![0u8; 450];
    assert_eq!(q.read(&mut out), 450);
    let mut expected = pattern(200, 3)[150..].to_vec();
    expected.extend(pattern(100, 9));
    expected.extend(pattern(300, 5));
    assert_eq!(out, expected);
}

#[test]
fn drained_queue_resets_cursors() {
    let mut q = RingQueue::default();
    q.write(&pattern(250, 0));
    let mut out = vec![0u8; 240];
    q.read(&mut out);
    // 10 queued, write wraps around the end of the buffer
    q.write(&pattern(20, 42));
    assert!(q.head < q.tail);
    assert_eq!(q.queued(), 30);

    let mut out = vec![0u8; 64];
    assert_eq!(q.read(&mut out), 30);
    assert_eq!(q.queued(), 0);
    assert_eq!((q.head, q.tail), (0, 0));

    q.write(b"after");
    let mut out = [0u8; 5];
    assert_eq!(q.read(&mut out), 5);
    assert_eq!(&out, b"after");
}

#[test]
fn partial_reads_across_wrap_point() {
    let mut q = RingQueue::with_growth(16);
    let mut written = Vec::new();
    let mut read = Vec::new();
    let mut buf = [0u8; 7];

    for round in 0..40u8 {
        let data = pattern(5 + (round as usize % 11), round);
        q.write(&data);
        written.extend_from_slice(&data);
        let n = q.read(&mut buf);
        read.extend_from_slice(&buf[..n]);
    }
    loop {
        let n = q.read(&mut buf);
        if n == 0 {
            break;
        }
        read.extend_from_slice(&buf[..n]);
    }

    assert_eq!(read, written);
    assert_eq!((q.head, q.tail), (0, 0));
}

#[test]
fn exact_fill_to_buffer_end() {
    let mut q = RingQueue::with_growth(10);
    q.write(&pattern(4, 0));
    let mut out = [0u8; 4];
    q.read(&mut out[..2]);
    // head reaches the end of the buffer exactly
    q.write(&pattern(6, 1));
    assert_eq!(q.head, 0);
    assert_eq!(q.queued(), 8);

    let mut out = [0u8; 8];
    assert_eq!(q.read(&mut out), 8);
    let mut expected = pattern(4, 0)[2..].to_vec();
    expected.extend(pattern(6, 1));
    assert_eq!(out.to_vec(), expected);
}
