//! Media clock
//!
//! The logical playback position is derived from a wall-clock time source
//! and the pause state. While playing, the position advances with the wall
//! clock from a snapshot taken at the last start or retime; while paused it
//! is frozen at that snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Source of wall-clock time in milliseconds
///
/// Hosts that resynchronize the clock (`MediaClock::retime`) must express
/// their wall origins in the same time base as the source.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Current wall-clock time in milliseconds
    fn now_millis(&self) -> f64;
}

/// Monotonic time source measured from its creation
#[derive(Debug, Clone)]
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    /// Create a time source whose zero is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_millis(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced time source for deterministic runs
#[derive(Debug, Default)]
pub struct ManualTime {
    bits: AtomicU64,
}

impl ManualTime {
    /// Create a manual time source starting at `millis`
    pub fn starting_at(millis: f64) -> Self {
        Self {
            bits: AtomicU64::new(millis.to_bits()),
        }
    }

    /// Set the current time
    pub fn set(&self, millis: f64) {
        self.bits.store(millis.to_bits(), Ordering::SeqCst);
    }

    /// Advance the current time by `delta_millis`
    pub fn advance(&self, delta_millis: f64) {
        self.set(self.now_millis() + delta_millis);
    }
}

impl TimeSource for ManualTime {
    fn now_millis(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Snapshot of the clock's mutable state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockState {
    /// Whether the position advances with the wall clock
    pub is_playing: bool,
    /// Position at the last start, stop or retime
    pub paused_position_millis: f64,
    /// Wall-clock time the paused position refers to
    pub wall_clock_start_millis: f64,
}

impl Default for ClockState {
    fn default() -> Self {
        Self {
            is_playing: false,
            paused_position_millis: 0.0,
            wall_clock_start_millis: 0.0,
        }
    }
}

impl ClockState {
    /// Position at wall-clock time `now_millis`
    pub fn position_at(&self, now_millis: f64) -> f64 {
        if self.is_playing {
            self.paused_position_millis + (now_millis - self.wall_clock_start_millis)
        } else {
            self.paused_position_millis
        }
    }
}

/// Position reported by an external authority (usually the audio output)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaTimeSync {
    /// Media position in seconds at `wall_origin_millis`
    pub position_seconds: f64,
    /// Wall-clock time of the report, in the clock's time base
    pub wall_origin_millis: f64,
}

/// Logical playback position tracker
///
/// Every mutator replaces the whole [`ClockState`] at once, so a reader never
/// observes a playing clock paired with a stale wall-clock origin.
#[derive(Debug, Clone)]
pub struct MediaClock {
    state: ClockState,
    time: Arc<dyn TimeSource>,
}

impl MediaClock {
    /// Create a paused clock at position zero
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            state: ClockState::default(),
            time,
        }
    }

    /// Current logical position in milliseconds
    pub fn current_position_millis(&self) -> f64 {
        self.state.position_at(self.time.now_millis())
    }

    /// Current logical position in microseconds
    pub fn current_position_micros(&self) -> i64 {
        (self.current_position_millis() * 1000.0).round() as i64
    }

    /// Current wall-clock time of the underlying source
    pub fn now_millis(&self) -> f64 {
        self.time.now_millis()
    }

    /// Whether the clock is advancing
    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ClockState {
        self.state
    }

    /// Start advancing from the paused position
    ///
    /// Returns `false` when the clock was already playing.
    pub fn start(&mut self) -> bool {
        if self.state.is_playing {
            return false;
        }
        self.state = ClockState {
            is_playing: true,
            paused_position_millis: self.state.paused_position_millis,
            wall_clock_start_millis: self.time.now_millis(),
        };
        debug!(
            position_ms = self.state.paused_position_millis,
            "Media clock started"
        );
        true
    }

    /// Freeze the position at its current value
    ///
    /// Returns `false` when the clock was already paused.
    pub fn stop(&mut self) -> bool {
        if !self.state.is_playing {
            return false;
        }
        let now = self.time.now_millis();
        self.state = ClockState {
            is_playing: false,
            paused_position_millis: self.state.position_at(now),
            wall_clock_start_millis: now,
        };
        debug!(
            position_ms = self.state.paused_position_millis,
            "Media clock stopped"
        );
        true
    }

    /// Replace the position reference with an externally authoritative one
    ///
    /// `paused_millis` is the position at wall-clock time
    /// `wall_clock_origin_millis`. The playing flag is preserved.
    pub fn retime(&mut self, paused_millis: f64, wall_clock_origin_millis: f64) {
        self.state = ClockState {
            is_playing: self.state.is_playing,
            paused_position_millis: paused_millis,
            wall_clock_start_millis: wall_clock_origin_millis,
        };
        trace!(
            paused_ms = paused_millis,
            origin_ms = wall_clock_origin_millis,
            "Media clock retimed"
        );
    }

    /// Apply an external position report through [`MediaClock::retime`]
    pub fn sync(&mut self, sync: MediaTimeSync) {
        self.retime(sync.position_seconds * 1000.0, sync.wall_origin_millis);
    }
}
