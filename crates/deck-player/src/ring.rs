//! Lock-free single-producer/single-consumer ring buffer for interleaved
//! `f32` audio frames.
//!
//! The producer (decode thread) and consumer (audio callback) each own one
//! half after [`RingBuffer::with_capacity`]:
//! - [`RingProducer::write`] copies up to the free space and reports the count
//! - [`RingConsumer::read`] copies up to the available frames and reports the
//!   count; the caller decides underrun policy (zero-fill)
//!
//! Neither side blocks or allocates. Capacity is fixed at construction and
//! all operations are frame-granular: a frame's samples are never split
//! between two calls.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Index protocol: `read` and `write` count frames monotonically (wrapping);
/// the slot is `index & mask`. Occupancy is `write - read`, so
/// `available_to_read + available_to_write == capacity` holds at all times.
/// Only the producer stores `write` (Release) and only the consumer stores
/// `read` (Release); each side Acquire-loads the other's index before
/// touching storage, which keeps the sample copies race-free.
struct RingShared {
    data: UnsafeCell<Box<[f32]>>,
    capacity: usize,
    mask: usize,
    channels: usize,
    read: AtomicUsize,
    write: AtomicUsize,
}

// Storage regions touched by the two halves are disjoint by the index
// protocol above.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

impl RingShared {
    fn occupied(&self) -> usize {
        self.write
            .load(Ordering::Acquire)
            .wrapping_sub(self.read.load(Ordering::Acquire))
    }
}

/// Constructor for a producer/consumer pair.
pub struct RingBuffer;

impl RingBuffer {
    /// Allocate a ring of at least `capacity_frames` frames (rounded up to a
    /// power of two) of `channels` interleaved samples and split it.
    pub fn with_capacity(capacity_frames: usize, channels: usize) -> (RingProducer, RingConsumer) {
        assert!(capacity_frames > 0, "ring capacity must be non-zero");
        assert!(channels > 0, "ring channel count must be non-zero");

        let capacity = capacity_frames.next_power_of_two();
        let shared = Arc::new(RingShared {
            data: UnsafeCell::new(vec![0.0f32; capacity * channels].into_boxed_slice()),
            capacity,
            mask: capacity - 1,
            channels,
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        });

        (
            RingProducer {
                shared: shared.clone(),
            },
            RingConsumer { shared },
        )
    }
}

/// Write half, owned by the decode producer thread.
pub struct RingProducer {
    shared: Arc<RingShared>,
}

impl RingProducer {
    /// Copy up to `free_space` whole frames from `samples` and return the
    /// number of frames actually written. Never blocks.
    ///
    /// `samples` must hold whole interleaved frames; a trailing partial frame
    /// is ignored.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let ch = self.shared.channels;
        let frames = samples.len() / ch;
        let w = self.shared.write.load(Ordering::Relaxed);
        let r = self.shared.read.load(Ordering::Acquire);
        let free = self.shared.capacity - w.wrapping_sub(r);
        let n = frames.min(free);
        if n == 0 {
            return 0;
        }

        let slot = (w & self.shared.mask) * ch;
        let first = ((self.shared.capacity - (w & self.shared.mask)).min(n)) * ch;
        let total = n * ch;
        unsafe {
            let buf = (*self.shared.data.get()).as_mut_ptr();
            std::ptr::copy_nonoverlapping(samples.as_ptr(), buf.add(slot), first);
            if first < total {
                std::ptr::copy_nonoverlapping(samples.as_ptr().add(first), buf, total - first);
            }
        }

        self.shared.write.store(w.wrapping_add(n), Ordering::Release);
        n
    }

    /// Frames the producer could write right now.
    pub fn available_to_write(&self) -> usize {
        self.shared.capacity - self.shared.occupied()
    }

    /// Frames currently queued for the consumer.
    pub fn available_to_read(&self) -> usize {
        self.shared.occupied()
    }

    /// Fixed capacity in frames.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Interleaved frame stride in samples.
    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    /// Second write handle for relaunching the producer thread.
    ///
    /// Caller must guarantee the previous handle is retired (the decode
    /// loop's exit latch enforces this) — two live writers would break the
    /// single-producer index discipline.
    pub(crate) fn duplicate(&self) -> RingProducer {
        RingProducer {
            shared: self.shared.clone(),
        }
    }
}

/// Read half, owned by the audio callback.
pub struct RingConsumer {
    shared: Arc<RingShared>,
}

impl RingConsumer {
    /// Copy up to `available` whole frames into `dst` and return the number of
    /// frames actually read. Never blocks; the caller zero-fills shortfall.
    pub fn read(&mut self, dst: &mut [f32]) -> usize {
        let ch = self.shared.channels;
        let frames = dst.len() / ch;
        let r = self.shared.read.load(Ordering::Relaxed);
        let w = self.shared.write.load(Ordering::Acquire);
        let n = frames.min(w.wrapping_sub(r));
        if n == 0 {
            return 0;
        }

        let slot = (r & self.shared.mask) * ch;
        let first = ((self.shared.capacity - (r & self.shared.mask)).min(n)) * ch;
        let total = n * ch;
        unsafe {
            let buf = (*self.shared.data.get()).as_ptr();
            std::ptr::copy_nonoverlapping(buf.add(slot), dst.as_mut_ptr(), first);
            if first < total {
                std::ptr::copy_nonoverlapping(buf, dst.as_mut_ptr().add(first), total - first);
            }
        }

        self.shared.read.store(r.wrapping_add(n), Ordering::Release);
        n
    }

    /// Drop everything currently buffered and return the number of frames
    /// discarded. Consumer-side only, so the index discipline holds.
    pub fn discard_all(&mut self) -> usize {
        let r = self.shared.read.load(Ordering::Relaxed);
        let w = self.shared.write.load(Ordering::Acquire);
        let n = w.wrapping_sub(r);
        if n > 0 {
            self.shared.read.store(w, Ordering::Release);
        }
        n
    }

    /// Frames currently queued for the consumer.
    pub fn available_to_read(&self) -> usize {
        self.shared.occupied()
    }

    /// Frames the producer could write right now.
    pub fn available_to_write(&self) -> usize {
        self.shared.capacity - self.shared.occupied()
    }

    /// Fixed capacity in frames.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Interleaved frame stride in samples.
    pub fn channels(&self) -> usize {
        self.shared.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let (prod, _cons) = RingBuffer::with_capacity(100, 2);
        assert_eq!(prod.capacity(), 128);
        let (prod, _cons) = RingBuffer::with_capacity(128, 2);
        assert_eq!(prod.capacity(), 128);
    }

    #[test]
    fn availability_invariant_holds_after_every_operation() {
        let (mut prod, mut cons) = RingBuffer::with_capacity(8, 2);
        let cap = prod.capacity();
        let frame = [0.5f32, -0.5];
        let mut out = vec![0.0f32; 2 * cap];

        assert_eq!(prod.available_to_read() + prod.available_to_write(), cap);
        for step in 0..50 {
            if step % 3 == 0 {
                cons.read(&mut out[..2]);
            } else {
                prod.write(&frame);
            }
            assert_eq!(prod.available_to_read() + prod.available_to_write(), cap);
            assert_eq!(cons.available_to_read() + cons.available_to_write(), cap);
        }
    }

    #[test]
    fn oversized_write_truncates_to_free_space() {
        let (mut prod, _cons) = RingBuffer::with_capacity(4, 1);
        let written = prod.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(written, 4);
        assert_eq!(prod.available_to_write(), 0);
        assert_eq!(prod.write(&[7.0]), 0);
    }

    #[test]
    fn read_truncates_to_available() {
        let (mut prod, mut cons) = RingBuffer::with_capacity(8, 1);
        prod.write(&[1.0, 2.0]);
        let mut dst = [0.0f32; 5];
        assert_eq!(cons.read(&mut dst), 2);
        assert_eq!(&dst[..2], &[1.0, 2.0]);
        assert_eq!(cons.read(&mut dst), 0);
    }

    #[test]
    fn data_survives_wraparound_in_order() {
        let (mut prod, mut cons) = RingBuffer::with_capacity(4, 2);
        let mut next = 0.0f32;
        let mut expect = 0.0f32;
        let mut scratch = [0.0f32; 6];

        // Cycle enough frames through a 4-frame ring to wrap several times.
        for _ in 0..10 {
            let chunk: Vec<f32> = (0..6)
                .map(|_| {
                    next += 1.0;
                    next
                })
                .collect();
            let mut offset = 0;
            while offset < chunk.len() {
                let wrote = prod.write(&chunk[offset..]);
                offset += wrote * 2;
                let got = cons.read(&mut scratch);
                for sample in &scratch[..got * 2] {
                    expect += 1.0;
                    assert_eq!(*sample, expect);
                }
            }
        }
    }

    #[test]
    fn partial_frame_input_is_ignored() {
        let (mut prod, mut cons) = RingBuffer::with_capacity(4, 2);
        // Five samples = two whole stereo frames plus a dangling sample.
        assert_eq!(prod.write(&[1.0, 2.0, 3.0, 4.0, 5.0]), 2);
        let mut dst = [0.0f32; 8];
        assert_eq!(cons.read(&mut dst), 2);
        assert_eq!(&dst[..4], &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn discard_all_empties_the_ring() {
        let (mut prod, mut cons) = RingBuffer::with_capacity(8, 2);
        prod.write(&[0.0; 10]);
        assert_eq!(cons.discard_all(), 5);
        assert_eq!(cons.available_to_read(), 0);
        assert_eq!(prod.available_to_write(), prod.capacity());
        assert_eq!(cons.discard_all(), 0);
    }

    #[test]
    fn spsc_stream_is_delivered_intact_across_threads() {
        const FRAMES: usize = 20_000;
        let (mut prod, mut cons) = RingBuffer::with_capacity(64, 1);

        let producer = thread::spawn(move || {
            let mut sent = 0usize;
            while sent < FRAMES {
                let end = (sent + 17).min(FRAMES);
                let chunk: Vec<f32> = (sent..end).map(|v| v as f32).collect();
                let wrote = prod.write(&chunk);
                sent += wrote;
                if wrote == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut got = 0usize;
        let mut dst = [0.0f32; 23];
        while got < FRAMES {
            let n = cons.read(&mut dst);
            for sample in &dst[..n] {
                assert_eq!(*sample, got as f32);
                got += 1;
            }
            if n == 0 {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
