// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Bounded single-producer/single-consumer sample ring with an open/closed
//! lifecycle.
//!
//! Writers never wait: whatever does not fit is reported back so the caller
//! can drop and account for it. Readers either take what is there, wait on a
//! condition variable with a timeout, or (on the audio path) take an exact
//! count without ever contending for the lock.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

/// Outcome of [`SampleQueue::wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Ready,
    TimedOut,
    Closed,
}

struct Ring<T> {
    buf: Vec<T>,
    read_pos: usize,
    write_pos: usize,
    available: usize,
    open: bool,
}

impl<T: Copy> Ring<T> {
    fn free(&self) -> usize {
        self.buf.len() - self.available
    }

    fn push(&mut self, block: &[T]) -> usize {
        let cap = self.buf.len();
        let n = block.len().min(self.free());
        let first = n.min(cap - self.write_pos);
        self.buf[self.write_pos..self.write_pos + first].copy_from_slice(&block[..first]);
        self.buf[..n - first].copy_from_slice(&block[first..n]);
        self.write_pos = (self.write_pos + n) % cap;
        self.available += n;
        n
    }

    fn pop(&mut self, dst: &mut [T]) -> usize {
        let cap = self.buf.len();
        let n = dst.len().min(self.available);
        let first = n.min(cap - self.read_pos);
        dst[..first].copy_from_slice(&self.buf[self.read_pos..self.read_pos + first]);
        dst[first..n].copy_from_slice(&self.buf[..n - first]);
        self.read_pos = (self.read_pos + n) % cap;
        self.available -= n;
        n
    }
}

/// Fixed-capacity sample queue shared between one producer and one consumer.
///
/// A new queue starts closed; call [`SampleQueue::open`] once the consumer is
/// ready. Opening discards anything left over from a previous session.
pub struct SampleQueue<T> {
    ring: Mutex<Ring<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T: Copy + Default> SampleQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                buf: vec![T::default(); capacity],
                read_pos: 0,
                write_pos: 0,
                available: 0,
                open: false,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.lock().available
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn open(&self) {
        let mut ring = self.lock();
        ring.read_pos = 0;
        ring.write_pos = 0;
        ring.available = 0;
        ring.open = true;
    }

    /// Close the queue and wake every waiter.
    pub fn close(&self) {
        self.lock().open = false;
        self.ready.notify_all();
    }

    /// Append as much of `block` as fits. Returns the number accepted; zero
    /// while closed.
    pub fn write(&self, block: &[T]) -> usize {
        let accepted = {
            let mut ring = self.lock();
            if !ring.open {
                return 0;
            }
            ring.push(block)
        };
        if accepted > 0 {
            self.ready.notify_one();
        }
        accepted
    }

    /// Move up to `dst.len()` samples into `dst`. Returns the count moved;
    /// zero while closed.
    pub fn read_into(&self, dst: &mut [T]) -> usize {
        let mut ring = self.lock();
        if !ring.open {
            return 0;
        }
        ring.pop(dst)
    }

    /// Remove and return up to `max` samples.
    pub fn read(&self, max: usize) -> Vec<T> {
        let mut ring = self.lock();
        if !ring.open {
            return Vec::new();
        }
        let mut out = vec![T::default(); max.min(ring.available)];
        let n = ring.pop(&mut out);
        out.truncate(n);
        out
    }

    /// Fill all of `dst` or nothing, without waiting on the lock.
    ///
    /// A lock held by the other side counts as an underrun so a real-time
    /// caller is never parked.
    pub fn try_read_exact(&self, dst: &mut [T]) -> PipelineResult<()> {
        let mut ring = match self.ring.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(PipelineError::QueueUnderrun {
                    requested: dst.len(),
                    available: 0,
                })
            }
        };
        if !ring.open {
            return Err(PipelineError::QueueClosed);
        }
        if ring.available < dst.len() {
            return Err(PipelineError::QueueUnderrun {
                requested: dst.len(),
                available: ring.available,
            });
        }
        ring.pop(dst);
        Ok(())
    }

    /// Block until at least `min` samples are queued, the queue closes, or
    /// `timeout` elapses.
    pub fn wait_for(&self, min: usize, timeout: Duration) -> WaitStatus {
        let ring = self.lock();
        let (ring, _) = self
            .ready
            .wait_timeout_while(ring, timeout, |r| r.open && r.available < min)
            .unwrap_or_else(PoisonError::into_inner);
        if !ring.open {
            WaitStatus::Closed
        } else if ring.available >= min {
            WaitStatus::Ready
        } else {
            WaitStatus::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn open_queue(capacity: usize) -> SampleQueue<f32> {
        let q = SampleQueue::new(capacity);
        q.open();
        q
    }

    #[test]
    fn new_queue_is_closed() {
        let q = SampleQueue::<f32>::new(8);
        assert!(!q.is_open());
        assert_eq!(q.write(&[1.0, 2.0]), 0);
        assert_eq!(q.available(), 0);
    }

    #[test]
    fn write_accepts_only_free_space() {
        let q = open_queue(5);
        assert_eq!(q.write(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(q.write(&[4.0, 5.0, 6.0, 7.0]), 2);
        assert_eq!(q.available(), 5);
        assert_eq!(q.write(&[8.0]), 0);
        assert_eq!(q.read(10), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn wraparound_preserves_order() {
        let q = open_queue(4);
        q.write(&[1.0, 2.0, 3.0]);
        assert_eq!(q.read(2), vec![1.0, 2.0]);
        q.write(&[4.0, 5.0, 6.0]);
        let mut out = [0.0; 4];
        assert_eq!(q.read_into(&mut out), 4);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn available_never_exceeds_capacity() {
        // Deterministic pseudo-random mix of writes and reads.
        let q = open_queue(37);
        let mut seed = 0x2545_f491_u32;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };
        let mut expected = 0usize;
        for _ in 0..2000 {
            let len = (next() % 50) as usize;
            if next() % 2 == 0 {
                let block = vec![1.0_f32; len];
                let accepted = q.write(&block);
                assert!(accepted <= len);
                expected += accepted;
            } else {
                let before = q.available();
                let got = q.read(len);
                assert!(got.len() <= len);
                assert!(got.len() <= before);
                expected -= got.len();
            }
            assert!(q.available() <= q.capacity());
            assert_eq!(q.available(), expected);
        }
    }

    #[test]
    fn closed_queue_reports_zero_progress() {
        let q = open_queue(8);
        q.write(&[1.0, 2.0]);
        q.close();
        assert_eq!(q.write(&[3.0]), 0);
        assert!(q.read(8).is_empty());
        let mut out = [0.0; 2];
        assert_eq!(q.read_into(&mut out), 0);
        assert_eq!(q.try_read_exact(&mut out), Err(PipelineError::QueueClosed));
        assert_eq!(q.wait_for(1, Duration::from_secs(5)), WaitStatus::Closed);
    }

    #[test]
    fn reopen_discards_stale_samples() {
        let q = open_queue(8);
        q.write(&[1.0, 2.0, 3.0]);
        q.close();
        q.open();
        assert_eq!(q.available(), 0);
    }

    #[test]
    fn try_read_exact_is_all_or_nothing() {
        let q = open_queue(8);
        q.write(&[1.0, 2.0, 3.0]);
        let mut out = [0.0; 4];
        assert_eq!(
            q.try_read_exact(&mut out),
            Err(PipelineError::QueueUnderrun {
                requested: 4,
                available: 3
            })
        );
        assert_eq!(q.available(), 3);
        let mut out = [0.0; 3];
        assert_eq!(q.try_read_exact(&mut out), Ok(()));
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(q.available(), 0);
    }

    #[test]
    fn wait_for_times_out_without_data() {
        let q = open_queue(8);
        let start = Instant::now();
        assert_eq!(q.wait_for(4, Duration::from_millis(20)), WaitStatus::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn wait_for_wakes_on_write() {
        let q = Arc::new(open_queue(64));
        let writer = q.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.write(&[0.5; 16]);
        });
        assert_eq!(q.wait_for(16, Duration::from_secs(5)), WaitStatus::Ready);
        handle.join().unwrap();
    }

    #[test]
    fn close_unblocks_waiting_reader() {
        let q = Arc::new(open_queue(64));
        let waiter = q.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let status = waiter.wait_for(32, Duration::from_secs(30));
            (status, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        q.close();
        let (status, elapsed) = handle.join().unwrap();
        assert_eq!(status, WaitStatus::Closed);
        assert!(elapsed < Duration::from_secs(5));
    }
}
