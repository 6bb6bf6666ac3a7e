//! Byte-oriented SPSC ring buffer for PCM.
//!
//! Wraps the lock-free `ringbuf` heap buffer and splits it into a producer
//! half and a consumer half. The data path never takes a lock; a small
//! mutex/condvar doorbell exists only so the timed `send` / `recv_up_to`
//! calls can sleep instead of spinning.
//!
//! Writes are all-or-nothing: when there is not enough room the producer's
//! bytes are dropped and counted, never partially written and never allowed
//! to overwrite unread data.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("ring buffer full ({needed} bytes needed, {free} free)")]
    Full { needed: usize, free: usize },
    #[error("timed out waiting for {needed} free bytes")]
    Timeout { needed: usize },
    #[error("write of {len} bytes exceeds ring capacity {capacity}")]
    TooLarge { len: usize, capacity: usize },
    #[error("ring buffer capacity must be non-zero")]
    ZeroCapacity,
    #[error("could not allocate {0} bytes for ring buffer")]
    Alloc(usize),
}

impl RingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Full { .. } | Self::Timeout { .. } => ErrorKind::TransientIo,
            Self::TooLarge { .. } | Self::ZeroCapacity => ErrorKind::InvalidArgument,
            Self::Alloc(_) => ErrorKind::ResourceExhausted,
        }
    }
}

/// Wakes a half that is sleeping on the other half's progress.
#[derive(Default)]
struct Doorbell {
    lock: Mutex<()>,
    data: Condvar,
    space: Condvar,
}

impl Doorbell {
    /// Sleep on `cv` until `ready()` holds or `deadline` passes.
    fn wait_until(&self, cv: &Condvar, deadline: Instant, ready: impl Fn() -> bool) -> bool {
        let mut guard = self.lock.lock();
        loop {
            if ready() {
                return true;
            }
            if cv.wait_until(&mut guard, deadline).timed_out() {
                return ready();
            }
        }
    }

    fn ring(&self, cv: &Condvar) {
        let _guard = self.lock.lock();
        cv.notify_all();
    }
}

/// Shared count of bytes-writes refused by a producer.
#[derive(Debug, Clone, Default)]
pub struct DropCounter(Arc<AtomicU64>);

impl DropCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Increment and return the new total.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Producer half. Exactly one thread owns it at a time.
pub struct ByteProducer {
    inner: HeapProd<u8>,
    bell: Arc<Doorbell>,
    dropped: DropCounter,
}

/// Consumer half. Exactly one thread owns it at a time.
pub struct ByteConsumer {
    inner: HeapCons<u8>,
    bell: Arc<Doorbell>,
}

/// Create a matched producer/consumer pair of `capacity` bytes.
pub fn byte_ring(capacity: usize) -> Result<(ByteProducer, ByteConsumer), RingError> {
    if capacity == 0 {
        return Err(RingError::ZeroCapacity);
    }
    // Probe the allocator first so exhaustion is an error, not an abort.
    let mut probe: Vec<u8> = Vec::new();
    probe
        .try_reserve_exact(capacity)
        .map_err(|_| RingError::Alloc(capacity))?;
    drop(probe);

    let (prod, cons) = HeapRb::<u8>::new(capacity).split();
    let bell = Arc::new(Doorbell::default());
    Ok((
        ByteProducer {
            inner: prod,
            bell: Arc::clone(&bell),
            dropped: DropCounter::default(),
        },
        ByteConsumer { inner: cons, bell },
    ))
}

impl ByteProducer {
    /// Enqueue all of `bytes` or nothing.
    ///
    /// With a zero timeout this never sleeps and reports `Full`. Otherwise it
    /// waits up to `timeout` for the consumer to free enough room.
    pub fn send(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), RingError> {
        let needed = bytes.len();
        let capacity = self.capacity();
        if needed > capacity {
            self.dropped.bump();
            return Err(RingError::TooLarge {
                len: needed,
                capacity,
            });
        }

        if self.inner.vacant_len() < needed {
            if timeout.is_zero() {
                self.dropped.bump();
                return Err(RingError::Full {
                    needed,
                    free: self.inner.vacant_len(),
                });
            }
            let inner = &self.inner;
            let deadline = Instant::now() + timeout;
            if !self
                .bell
                .wait_until(&self.bell.space, deadline, || inner.vacant_len() >= needed)
            {
                self.dropped.bump();
                return Err(RingError::Timeout { needed });
            }
        }

        self.inner.push_slice(bytes);
        self.bell.ring(&self.bell.data);
        Ok(())
    }

    /// Non-blocking send.
    pub fn try_send(&mut self, bytes: &[u8]) -> Result<(), RingError> {
        self.send(bytes, Duration::ZERO)
    }

    pub fn free_size(&self) -> usize {
        self.inner.vacant_len()
    }

    pub fn used_size(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Handle on this producer's refused-write counter.
    pub fn drop_counter(&self) -> DropCounter {
        self.dropped.clone()
    }
}

impl ByteConsumer {
    /// Borrow up to `max` contiguous bytes, waiting up to `timeout` for data.
    ///
    /// The bytes stay reserved until the returned slice is released (or
    /// dropped). At the wrap point the slice may be shorter than what is
    /// available; call again for the remainder.
    pub fn recv_up_to(&mut self, max: usize, timeout: Duration) -> Option<RecvSlice<'_>> {
        if max == 0 {
            return None;
        }
        if self.inner.is_empty() && !timeout.is_zero() {
            let inner = &self.inner;
            let deadline = Instant::now() + timeout;
            self.bell
                .wait_until(&self.bell.data, deadline, || !inner.is_empty());
        }
        let len = self.inner.as_slices().0.len().min(max);
        if len == 0 {
            return None;
        }
        Some(RecvSlice {
            consumer: self,
            len,
        })
    }

    /// Copy out up to `buf.len()` bytes, waiting up to `timeout` for the
    /// first byte. Returns the number of bytes copied.
    pub fn read(&mut self, buf: &mut [u8], timeout: Duration) -> usize {
        if buf.is_empty() {
            return 0;
        }
        if self.inner.is_empty() && !timeout.is_zero() {
            let inner = &self.inner;
            let deadline = Instant::now() + timeout;
            self.bell
                .wait_until(&self.bell.data, deadline, || !inner.is_empty());
        }
        let n = self.inner.pop_slice(buf);
        if n > 0 {
            self.bell.ring(&self.bell.space);
        }
        n
    }

    /// Wait up to `timeout` until at least `n` bytes are queued.
    pub fn wait_available(&self, n: usize, timeout: Duration) -> bool {
        let inner = &self.inner;
        if inner.occupied_len() >= n {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        self.bell
            .wait_until(&self.bell.data, deadline, || inner.occupied_len() >= n)
    }

    /// Discard everything currently queued.
    pub fn clear(&mut self) {
        self.inner.clear();
        self.bell.ring(&self.bell.space);
    }

    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn free_size(&self) -> usize {
        self.inner.vacant_len()
    }

    pub fn used_size(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}

/// Borrowed run of queued bytes. Releasing it frees the space.
pub struct RecvSlice<'a> {
    consumer: &'a mut ByteConsumer,
    len: usize,
}

impl RecvSlice<'_> {
    /// Hand the bytes back to the ring so the producer can reuse the space.
    pub fn release(self) {}
}

impl Deref for RecvSlice<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.consumer.inner.as_slices().0[..self.len]
    }
}

impl Drop for RecvSlice<'_> {
    fn drop(&mut self) {
        self.consumer.inner.skip(self.len);
        self.consumer.bell.ring(&self.consumer.bell.space);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ring_send_and_recv() {
        let (mut tx, mut rx) = byte_ring(8).unwrap();
        tx.try_send(&[1, 2, 3]).unwrap();
        assert_eq!(rx.available(), 3);

        let slice = rx.recv_up_to(2, Duration::ZERO).unwrap();
        assert_eq!(&*slice, &[1, 2]);
        slice.release();
        assert_eq!(rx.available(), 1);
    }

    #[test]
    fn test_ring_full_drops_whole_write() {
        let (mut tx, mut rx) = byte_ring(4).unwrap();
        tx.try_send(&[1, 2, 3]).unwrap();
        let err = tx.try_send(&[4, 5]).unwrap_err();
        assert_eq!(err, RingError::Full { needed: 2, free: 1 });
        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert_eq!(tx.drop_counter().get(), 1);

        // Nothing from the refused write leaked in.
        let mut buf = [0u8; 4];
        assert_eq!(rx.read(&mut buf, Duration::ZERO), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_ring_oversized_write_rejected() {
        let (mut tx, _rx) = byte_ring(4).unwrap();
        let err = tx.try_send(&[0; 5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_ring_zero_capacity() {
        assert!(matches!(byte_ring(0), Err(RingError::ZeroCapacity)));
    }

    #[test]
    fn test_ring_recv_times_out_when_empty() {
        let (_tx, mut rx) = byte_ring(4).unwrap();
        let start = Instant::now();
        assert!(rx.recv_up_to(4, Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_ring_space_held_until_release() {
        let (mut tx, mut rx) = byte_ring(4).unwrap();
        tx.try_send(&[1, 2, 3, 4]).unwrap();
        {
            let slice = rx.recv_up_to(4, Duration::ZERO).unwrap();
            assert_eq!(slice.len(), 4);
            assert_eq!(tx.free_size(), 0);
        }
        assert_eq!(tx.free_size(), 4);
    }

    #[test]
    fn test_ring_wrap_returns_contiguous_runs() {
        let (mut tx, mut rx) = byte_ring(4).unwrap();
        tx.try_send(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 2];
        rx.read(&mut buf, Duration::ZERO);
        tx.try_send(&[4, 5, 6]).unwrap();

        let mut seen = Vec::new();
        while let Some(slice) = rx.recv_up_to(8, Duration::ZERO) {
            seen.extend_from_slice(&slice);
        }
        assert_eq!(seen, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_ring_blocking_send_wakes_on_consume() {
        let (mut tx, mut rx) = byte_ring(4).unwrap();
        tx.try_send(&[0; 4]).unwrap();

        let reader = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let mut buf = [0u8; 4];
            rx.read(&mut buf, Duration::from_millis(100))
        });

        tx.send(&[9, 9], Duration::from_millis(500)).unwrap();
        assert_eq!(reader.join().unwrap(), 4);
    }

    #[test]
    fn test_ring_clear() {
        let (mut tx, mut rx) = byte_ring(16).unwrap();
        tx.try_send(&[7; 10]).unwrap();
        rx.clear();
        assert_eq!(rx.available(), 0);
        assert_eq!(tx.free_size(), 16);
    }

    proptest! {
        #[test]
        fn test_ring_sizes_always_sum_to_capacity(
            ops in proptest::collection::vec((any::<bool>(), 0usize..48), 1..64),
        ) {
            let (mut tx, mut rx) = byte_ring(64).unwrap();
            for (is_send, n) in ops {
                if is_send {
                    let _ = tx.try_send(&vec![0xAB; n]);
                } else if let Some(slice) = rx.recv_up_to(n, Duration::ZERO) {
                    prop_assert!(slice.len() <= n);
                    slice.release();
                }
                prop_assert_eq!(tx.free_size() + tx.used_size(), 64);
                prop_assert_eq!(rx.free_size() + rx.used_size(), 64);
            }
        }
    }
}
