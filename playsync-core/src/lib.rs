//! # playsync core
//!
//! Leaf building blocks of the playback engine: the media clock, the
//! lock-free sample ring buffer shared with the real-time audio context,
//! pipeline tuning constants and the error taxonomy.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod ring_buffer;

// Re-export main types
pub use clock::{ClockState, ManualTime, MediaClock, MediaTimeSync, MonotonicTime, TimeSource};
pub use config::{PipelineConfig, SeekAuthority};
pub use error::{ErrorCategory, PlaybackError, PlaybackResult};
pub use guard::{InFlight, InFlightGuard};
pub use ring_buffer::{ReadOutcome, RingBufferStats, SampleConsumer, SampleProducer};
