//! Lock-free stereo sample queue between the emulation thread and a host
//! audio callback.
//!
//! The ring size is rounded up to a power of two. Read and write cursors
//! count frames forever and wrap on overflow, so `write - read` is always
//! the fill level and no slot has to be sacrificed.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

struct Ring {
    slots: Box<[UnsafeCell<[i16; 2]>]>,
    mask: usize,
    write: AtomicUsize,
    read: AtomicUsize,
    /// Frames discarded because the consumer fell behind.
    dropped: AtomicU64,
}

// The producer only touches slots in [read + len, read + cap) and the
// consumer only slots in [read, write); the cursors are published with
// release/acquire pairs.
unsafe impl Sync for Ring {}

impl Ring {
    fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

/// Emulator side of the queue.
#[derive(Clone)]
pub struct AudioProducer {
    ring: Arc<Ring>,
}

/// Host side of the queue.
#[derive(Clone)]
pub struct AudioConsumer {
    ring: Arc<Ring>,
}

/// Create a queue holding at least `frames` stereo frames.
pub fn audio_queue(frames: usize) -> (AudioProducer, AudioConsumer) {
    let cap = frames.max(2).next_power_of_two();
    let slots = (0..cap).map(|_| UnsafeCell::new([0i16; 2])).collect();
    let ring = Arc::new(Ring {
        slots,
        mask: cap - 1,
        write: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
        dropped: AtomicU64::new(0),
    });
    (
        AudioProducer {
            ring: Arc::clone(&ring),
        },
        AudioConsumer { ring },
    )
}

impl AudioProducer {
    /// Queue one frame. Returns false (and counts a drop) when full.
    pub fn push_stereo(&self, left: i16, right: i16) -> bool {
        let ring = &*self.ring;
        let write = ring.write.load(Ordering::Relaxed);
        let read = ring.read.load(Ordering::Acquire);
        if write.wrapping_sub(read) > ring.mask {
            ring.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        // SAFETY: the slot is outside [read, write), so the consumer is not
        // looking at it.
        unsafe {
            *ring.slots[write & ring.mask].get() = [left, right];
        }
        ring.write.store(write.wrapping_add(1), Ordering::Release);
        true
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl AudioConsumer {
    pub fn pop_stereo(&self) -> Option<(i16, i16)> {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Relaxed);
        let write = ring.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        // SAFETY: the slot is inside [read, write), which the producer
        // finished writing before publishing `write`.
        let [l, r] = unsafe { *ring.slots[read & ring.mask].get() };
        ring.read.store(read.wrapping_add(1), Ordering::Release);
        Some((l, r))
    }

    /// Fill `out` with interleaved left/right samples, padding with silence
    /// once the queue runs dry. Returns the number of real frames copied.
    pub fn drain_interleaved(&self, out: &mut [i16]) -> usize {
        let mut copied = 0;
        for frame in out.chunks_mut(2) {
            match self.pop_stereo() {
                Some((l, r)) => {
                    frame[0] = l;
                    if let Some(right) = frame.get_mut(1) {
                        *right = r;
                    }
                    copied += 1;
                }
                None => frame.fill(0),
            }
        }
        copied
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames the producer had to throw away so far.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for AudioProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioProducer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl fmt::Debug for AudioConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioConsumer")
            .field("len", &self.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn capacity_rounds_up() {
        let (p, _c) = audio_queue(1000);
        assert_eq!(p.capacity(), 1024);
    }

    #[test]
    fn fifo_order_and_overflow_count() {
        let (p, c) = audio_queue(4);
        for i in 0..6 {
            p.push_stereo(i, -i);
        }
        assert_eq!(c.len(), 4);
        assert_eq!(c.dropped(), 2);
        assert_eq!(c.pop_stereo(), Some((0, 0)));
        assert_eq!(c.pop_stereo(), Some((1, -1)));
        assert!(p.push_stereo(9, 9));
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn drain_pads_with_silence() {
        let (p, c) = audio_queue(8);
        p.push_stereo(3, 4);
        let mut out = [7i16; 6];
        assert_eq!(c.drain_interleaved(&mut out), 1);
        assert_eq!(out, [3, 4, 0, 0, 0, 0]);
        assert!(c.is_empty());
    }

    #[test]
    fn threaded_transfer_preserves_order() {
        let (p, c) = audio_queue(64);
        let producer = thread::spawn(move || {
            let mut i = 0i16;
            while i < 1000 {
                if p.push_stereo(i, i) {
                    i += 1;
                }
            }
        });
        let mut expected = 0i16;
        while expected < 1000 {
            if let Some((l, _)) = c.pop_stereo() {
                assert_eq!(l, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }
}
