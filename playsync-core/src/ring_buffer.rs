//! Lock-free single-producer/single-consumer sample channel
//!
//! Bridges the cooperative decode context (producer) and the real-time
//! audio render context (consumer). Neither side ever blocks: the producer
//! gets a short count when space runs out, the consumer gets a starved
//! outcome and silence when samples run out.
//!
//! Both cursors are monotonically increasing sample counts; the slot index
//! is the cursor modulo capacity. `available_read = write - read` and
//! `available_write = capacity - available_read`, so the two always sum to
//! the capacity.
//!
//! The producer owns the write cursor. The read cursor is advanced by the
//! consumer with a compare-exchange, which also lets the producer side
//! discard everything buffered (`SampleProducer::drain`) while seeking: the
//! drain and a concurrent read race on the same cursor and exactly one of
//! them consumes each span.

use crate::error::{PlaybackError, PlaybackResult};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared state between producer and consumer
struct Shared {
    /// Sample slots, f32 stored as bits
    buffer: Box<[AtomicU32]>,
    capacity: usize,
    /// Only advanced by the producer
    write_pos: AtomicUsize,
    /// Advanced by the consumer or by a drain
    read_pos: AtomicUsize,
    total_written: AtomicU64,
    total_read: AtomicU64,
    overflow_count: AtomicU64,
    underrun_count: AtomicU64,
    drained_samples: AtomicU64,
}

impl Shared {
    fn available_read(&self) -> usize {
        // Read first: the write cursor only moves forward, so it cannot
        // fall behind a read cursor loaded earlier
        let read = self.read_pos.load(Ordering::Acquire);
        let write = self.write_pos.load(Ordering::Acquire);
        write.wrapping_sub(read).min(self.capacity)
    }

    fn stats(&self) -> RingBufferStats {
        let available_read = self.available_read();
        RingBufferStats {
            capacity: self.capacity,
            available_read,
            available_write: self.capacity - available_read,
            total_written: self.total_written.load(Ordering::Relaxed),
            total_read: self.total_read.load(Ordering::Relaxed),
            overflow_count: self.overflow_count.load(Ordering::Relaxed),
            underrun_count: self.underrun_count.load(Ordering::Relaxed),
            drained_samples: self.drained_samples.load(Ordering::Relaxed),
        }
    }
}

/// Producer half, owned by the decode side
pub struct SampleProducer {
    shared: Arc<Shared>,
}

/// Consumer half, owned by the real-time render side
pub struct SampleConsumer {
    shared: Arc<Shared>,
}

/// Result of a consumer read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The destination was filled completely
    Filled(usize),
    /// Fewer samples were available than requested; the rest is silence
    Starved {
        /// Samples actually read
        read: usize,
        /// Samples requested
        requested: usize,
    },
}

impl ReadOutcome {
    /// Whether the read came up short
    pub fn is_starved(&self) -> bool {
        matches!(self, ReadOutcome::Starved { .. })
    }

    /// Number of real samples copied into the destination
    pub fn samples_read(&self) -> usize {
        match *self {
            ReadOutcome::Filled(read) => read,
            ReadOutcome::Starved { read, .. } => read,
        }
    }

    /// Convert a starved read into a `RingBufferUnderrun` error
    pub fn into_result(self) -> PlaybackResult<usize> {
        match self {
            ReadOutcome::Filled(read) => Ok(read),
            ReadOutcome::Starved { read, requested } => {
                Err(PlaybackError::RingBufferUnderrun { requested, read })
            }
        }
    }
}

/// Counters snapshot for observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingBufferStats {
    /// Capacity in samples
    pub capacity: usize,
    /// Samples ready for the consumer
    pub available_read: usize,
    /// Free slots for the producer
    pub available_write: usize,
    /// Total samples written by the producer
    pub total_written: u64,
    /// Total samples read by the consumer
    pub total_read: u64,
    /// Writes that came up short
    pub overflow_count: u64,
    /// Reads that came up short
    pub underrun_count: u64,
    /// Samples discarded by drains
    pub drained_samples: u64,
}

/// Create a ring buffer holding `capacity` interleaved samples
pub fn channel(capacity: usize) -> PlaybackResult<(SampleProducer, SampleConsumer)> {
    if capacity == 0 {
        return Err(PlaybackError::config("ring buffer capacity must be non-zero"));
    }

    let shared = Arc::new(Shared {
        buffer: (0..capacity)
            .map(|_| AtomicU32::new(0.0f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice(),
        capacity,
        write_pos: AtomicUsize::new(0),
        read_pos: AtomicUsize::new(0),
        total_written: AtomicU64::new(0),
        total_read: AtomicU64::new(0),
        overflow_count: AtomicU64::new(0),
        underrun_count: AtomicU64::new(0),
        drained_samples: AtomicU64::new(0),
    });

    Ok((
        SampleProducer {
            shared: shared.clone(),
        },
        SampleConsumer { shared },
    ))
}

/// Create a ring buffer sized for `duration_secs` of interleaved audio
pub fn with_duration(
    duration_secs: f64,
    sample_rate: u32,
    channel_count: u16,
) -> PlaybackResult<(SampleProducer, SampleConsumer)> {
    channel(capacity_for(duration_secs, sample_rate, channel_count)?)
}

/// Capacity in samples for `duration_secs` of interleaved audio
pub fn capacity_for(
    duration_secs: f64,
    sample_rate: u32,
    channel_count: u16,
) -> PlaybackResult<usize> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(PlaybackError::config(format!(
            "buffer duration must be positive, got {}",
            duration_secs
        )));
    }
    if sample_rate == 0 || channel_count == 0 {
        return Err(PlaybackError::config(format!(
            "cannot size ring buffer for {} Hz, {} channels",
            sample_rate, channel_count
        )));
    }
    let samples = (duration_secs * sample_rate as f64 * channel_count as f64).round() as usize;
    Ok(samples.max(1))
}

impl SampleProducer {
    /// Copy up to `available_write()` samples into the buffer
    ///
    /// Returns the number of samples written. A short count means the buffer
    /// is full; it is counted as an overflow and the caller decides how to
    /// surface it.
    pub fn write(&self, samples: &[f32]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let s = &self.shared;
        let write = s.write_pos.load(Ordering::Relaxed);
        let read = s.read_pos.load(Ordering::Acquire);
        let free = s.capacity - write.wrapping_sub(read);
        let count = samples.len().min(free);

        for (offset, sample) in samples[..count].iter().enumerate() {
            let slot = write.wrapping_add(offset) % s.capacity;
            s.buffer[slot].store(sample.to_bits(), Ordering::Relaxed);
        }
        s.write_pos
            .store(write.wrapping_add(count), Ordering::Release);
        s.total_written.fetch_add(count as u64, Ordering::Relaxed);

        if count < samples.len() {
            s.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    /// Discard every buffered sample
    ///
    /// This is a consuming operation issued from the decode side while the
    /// pipeline is seeking. Returns the number of samples discarded.
    pub fn drain(&self) -> usize {
        let s = &self.shared;
        let mut discarded = 0;
        loop {
            let read = s.read_pos.load(Ordering::Acquire);
            let write = s.write_pos.load(Ordering::Acquire);
            if read == write {
                break;
            }
            if s
                .read_pos
                .compare_exchange(read, write, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                discarded = write.wrapping_sub(read);
                break;
            }
        }
        s.drained_samples
            .fetch_add(discarded as u64, Ordering::Relaxed);
        discarded
    }

    /// Samples currently buffered
    pub fn available_read(&self) -> usize {
        self.shared.available_read()
    }

    /// Free slots
    pub fn available_write(&self) -> usize {
        self.shared.capacity - self.shared.available_read()
    }

    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Buffered audio expressed in seconds
    pub fn fill_seconds(&self, channel_count: u16, sample_rate: u32) -> f64 {
        let per_second = channel_count as f64 * sample_rate as f64;
        if per_second <= 0.0 {
            return 0.0;
        }
        (self.capacity() - self.available_write()) as f64 / per_second
    }

    /// Counters snapshot
    pub fn stats(&self) -> RingBufferStats {
        self.shared.stats()
    }
}

impl SampleConsumer {
    /// Fill `destination` with as many samples as are available
    ///
    /// Any shortfall is zero-filled and reported as starved. Never blocks.
    pub fn read(&self, destination: &mut [f32]) -> ReadOutcome {
        let requested = destination.len();
        if requested == 0 {
            return ReadOutcome::Filled(0);
        }

        let s = &self.shared;
        let read = s.read_pos.load(Ordering::Acquire);
        let write = s.write_pos.load(Ordering::Acquire);
        let count = requested.min(write.wrapping_sub(read));

        for (offset, out) in destination[..count].iter_mut().enumerate() {
            let slot = read.wrapping_add(offset) % s.capacity;
            *out = f32::from_bits(s.buffer[slot].load(Ordering::Relaxed));
        }

        let count = if count > 0
            && s
                .read_pos
                .compare_exchange(
                    read,
                    read.wrapping_add(count),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
        {
            // A drain won the race; what we copied is stale
            0
        } else {
            count
        };

        destination[count..].fill(0.0);
        s.total_read.fetch_add(count as u64, Ordering::Relaxed);

        if count < requested {
            s.underrun_count.fetch_add(1, Ordering::Relaxed);
            ReadOutcome::Starved {
                read: count,
                requested,
            }
        } else {
            ReadOutcome::Filled(count)
        }
    }

    /// Samples currently buffered
    pub fn available_read(&self) -> usize {
        self.shared.available_read()
    }

    /// Free slots
    pub fn available_write(&self) -> usize {
        self.shared.capacity - self.shared.available_read()
    }

    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Counters snapshot
    pub fn stats(&self) -> RingBufferStats {
        self.shared.stats()
    }
}

impl fmt::Debug for SampleProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleProducer")
            .field("capacity", &self.shared.capacity)
            .field("available_read", &self.available_read())
            .finish()
    }
}

impl fmt::Debug for SampleConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleConsumer")
            .field("capacity", &self.shared.capacity)
            .field("available_read", &self.available_read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_write_when_space_available() {
        let (producer, consumer) = channel(8).unwrap();
        assert_eq!(producer.write(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(consumer.available_read(), 3);
        assert_eq!(producer.available_write(), 5);
        assert_eq!(producer.stats().overflow_count, 0);
    }

    #[test]
    fn test_short_write_reports_exact_count() {
        let (producer, _consumer) = channel(4).unwrap();
        assert_eq!(producer.write(&[0.5; 6]), 4);
        assert_eq!(producer.available_write(), 0);
        assert_eq!(producer.stats().overflow_count, 1);
    }

    #[test]
    fn test_read_wraps_around_capacity() {
        let (producer, consumer) = channel(4).unwrap();
        producer.write(&[1.0, 2.0, 3.0]);
        let mut out = [0.0; 2];
        assert_eq!(consumer.read(&mut out), ReadOutcome::Filled(2));
        assert_eq!(out, [1.0, 2.0]);

        assert_eq!(producer.write(&[4.0, 5.0, 6.0]), 3);
        let mut out = [0.0; 4];
        assert_eq!(consumer.read(&mut out), ReadOutcome::Filled(4));
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_underrun_zero_fills_and_reports_starved() {
        let (producer, consumer) = channel(16).unwrap();
        producer.write(&[0.25, 0.75]);
        let mut out = [9.0; 4];
        let outcome = consumer.read(&mut out);

        assert_eq!(
            outcome,
            ReadOutcome::Starved {
                read: 2,
                requested: 4
            }
        );
        assert_eq!(out, [0.25, 0.75, 0.0, 0.0]);
        assert_eq!(consumer.stats().underrun_count, 1);
        assert!(matches!(
            outcome.into_result(),
            Err(PlaybackError::RingBufferUnderrun {
                requested: 4,
                read: 2
            })
        ));
    }

    #[test]
    fn test_drain_empties_buffer() {
        let (producer, consumer) = channel(10).unwrap();
        producer.write(&[1.0; 7]);
        assert_eq!(producer.drain(), 7);
        assert_eq!(consumer.available_read(), 0);
        assert_eq!(producer.available_write(), 10);
        assert_eq!(producer.drain(), 0);
        assert_eq!(producer.stats().drained_samples, 7);
    }

    #[test]
    fn test_capacity_from_duration() {
        assert_eq!(capacity_for(0.6, 48_000, 2).unwrap(), 57_600);
        assert_eq!(capacity_for(0.05, 48_000, 1).unwrap(), 2_400);
        assert!(capacity_for(0.0, 48_000, 2).is_err());
        assert!(capacity_for(0.6, 0, 2).is_err());
        assert!(channel(0).is_err());
    }

    #[test]
    fn test_fill_seconds() {
        let (producer, _consumer) = channel(48_000).unwrap();
        producer.write(&vec![0.0; 9_600]);
        let secs = producer.fill_seconds(2, 48_000);
        assert!((secs - 0.1).abs() < 1e-9);
    }
}
