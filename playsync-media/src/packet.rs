//! Compressed packets and rational time bases

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Microseconds per second, the container-neutral time base
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Rational time base (`num / den` seconds per tick)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    /// Numerator
    pub num: i32,
    /// Denominator
    pub den: i32,
}

impl TimeBase {
    /// Microsecond time base
    pub const MICROS: TimeBase = TimeBase {
        num: 1,
        den: MICROS_PER_SECOND as i32,
    };

    /// Create a new time base
    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Whether both terms are usable for conversion
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Convert a tick count to seconds
    pub fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        ticks as f64 * self.num as f64 / self.den as f64
    }

    /// Convert seconds to the nearest tick count
    pub fn seconds_to_ticks(&self, seconds: f64) -> i64 {
        if !self.is_valid() {
            return 0;
        }
        (seconds * self.den as f64 / self.num as f64).round() as i64
    }

    /// Convert a tick count to microseconds
    pub fn ticks_to_micros(&self, ticks: i64) -> i64 {
        if !self.is_valid() {
            return 0;
        }
        let scaled = ticks as i128 * self.num as i128 * MICROS_PER_SECOND as i128;
        (scaled / self.den as i128) as i64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MICROS
    }
}

/// Compressed, timestamped unit of media data
///
/// A packet is owned by exactly one queue at a time and moves out on
/// dequeue; dropping it releases its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Index of the stream this packet belongs to
    pub stream_index: usize,
    /// Presentation timestamp in `time_base` ticks
    pub pts: i64,
    /// Time base of `pts`
    pub time_base: TimeBase,
    /// Whether the packet starts a decodable sequence
    pub is_keyframe: bool,
    /// Compressed payload
    pub data: Bytes,
}

impl Packet {
    /// Create a packet
    pub fn new(stream_index: usize, pts: i64, time_base: TimeBase, data: Bytes) -> Self {
        Self {
            stream_index,
            pts,
            time_base,
            is_keyframe: false,
            data,
        }
    }

    /// Mark the packet as a keyframe
    pub fn keyframe(mut self) -> Self {
        self.is_keyframe = true;
        self
    }

    /// Presentation time in seconds
    pub fn pts_seconds(&self) -> f64 {
        self.time_base.ticks_to_seconds(self.pts)
    }

    /// Presentation time in microseconds
    pub fn pts_micros(&self) -> i64 {
        self.time_base.ticks_to_micros(self.pts)
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_base_conversions() {
        let tb = TimeBase::new(1, 90_000);
        assert_eq!(tb.ticks_to_seconds(180_000), 2.0);
        assert_eq!(tb.seconds_to_ticks(1.5), 135_000);
        assert_eq!(tb.ticks_to_micros(90), 1_000);
    }

    #[test]
    fn test_invalid_time_base_is_zero() {
        let tb = TimeBase::new(0, 0);
        assert!(!tb.is_valid());
        assert_eq!(tb.ticks_to_seconds(100), 0.0);
        assert_eq!(tb.seconds_to_ticks(3.0), 0);
    }

    #[test]
    fn test_packet_time() {
        let packet = Packet::new(1, 48_000, TimeBase::new(1, 48_000), Bytes::from_static(b"aac"));
        assert_eq!(packet.pts_seconds(), 1.0);
        assert_eq!(packet.pts_micros(), 1_000_000);
        assert_eq!(packet.size(), 3);
        assert!(!packet.is_keyframe);
        assert!(packet.keyframe().is_keyframe);
    }
}
