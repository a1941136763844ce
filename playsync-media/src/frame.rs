//! Decoded video and audio frames

use bytes::Bytes;
use std::fmt;
use tracing::trace;

/// Decoded picture awaiting display
///
/// Held by the video frame buffer until it is displayed past or evicted;
/// eviction goes through [`DecodedVideoFrame::release`]. Not `Clone`: each
/// decoded frame has exactly one owner and is released once.
#[derive(PartialEq)]
pub struct DecodedVideoFrame {
    /// Presentation time in microseconds
    pub timestamp_micros: i64,
    /// Display width in pixels
    pub display_width: u32,
    /// Display height in pixels
    pub display_height: u32,
    /// Pixel data in the decoder's output format
    pub data: Bytes,
}

impl DecodedVideoFrame {
    /// Create a decoded frame
    pub fn new(timestamp_micros: i64, display_width: u32, display_height: u32, data: Bytes) -> Self {
        Self {
            timestamp_micros,
            display_width,
            display_height,
            data,
        }
    }

    /// Give the frame's resources back
    pub fn release(self) {
        trace!(timestamp_us = self.timestamp_micros, "Releasing video frame");
        drop(self);
    }
}

impl fmt::Debug for DecodedVideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedVideoFrame")
            .field("timestamp_micros", &self.timestamp_micros)
            .field("display_width", &self.display_width)
            .field("display_height", &self.display_height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Sample encodings a decoder can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Unsigned 8-bit
    U8,
    /// Unsigned 16-bit
    U16,
    /// Unsigned 32-bit
    U32,
    /// Signed 8-bit
    I8,
    /// Signed 16-bit
    I16,
    /// Signed 32-bit
    I32,
    /// 32-bit float
    F32,
}

/// Typed sample storage, one variant per [`SampleFormat`]
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    /// Unsigned 8-bit samples
    U8(Vec<u8>),
    /// Unsigned 16-bit samples
    U16(Vec<u16>),
    /// Unsigned 32-bit samples
    U32(Vec<u32>),
    /// Signed 8-bit samples
    I8(Vec<i8>),
    /// Signed 16-bit samples
    I16(Vec<i16>),
    /// Signed 32-bit samples
    I32(Vec<i32>),
    /// 32-bit float samples
    F32(Vec<f32>),
}

fn u8_to_f32(x: u8) -> f32 {
    (x as f32 - 128.0) / 128.0
}

fn u16_to_f32(x: u16) -> f32 {
    (x as f32 - 32_768.0) / 32_768.0
}

fn u32_to_f32(x: u32) -> f32 {
    ((x as f64 - 2_147_483_648.0) / 2_147_483_648.0) as f32
}

fn i8_to_f32(x: i8) -> f32 {
    x as f32 / 128.0
}

fn i16_to_f32(x: i16) -> f32 {
    x as f32 / 32_768.0
}

fn i32_to_f32(x: i32) -> f32 {
    (x as f64 / 2_147_483_648.0) as f32
}

impl SampleData {
    /// Format tag of the stored samples
    pub fn format(&self) -> SampleFormat {
        match self {
            SampleData::U8(_) => SampleFormat::U8,
            SampleData::U16(_) => SampleFormat::U16,
            SampleData::U32(_) => SampleFormat::U32,
            SampleData::I8(_) => SampleFormat::I8,
            SampleData::I16(_) => SampleFormat::I16,
            SampleData::I32(_) => SampleFormat::I32,
            SampleData::F32(_) => SampleFormat::F32,
        }
    }

    /// Number of stored samples
    pub fn len(&self) -> usize {
        match self {
            SampleData::U8(v) => v.len(),
            SampleData::U16(v) => v.len(),
            SampleData::U32(v) => v.len(),
            SampleData::I8(v) => v.len(),
            SampleData::I16(v) => v.len(),
            SampleData::I32(v) => v.len(),
            SampleData::F32(v) => v.len(),
        }
    }

    /// Whether no samples are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample `index` converted to float in `[-1.0, 1.0)`
    ///
    /// Out-of-range indices read as silence.
    pub fn sample_f32(&self, index: usize) -> f32 {
        match self {
            SampleData::U8(v) => v.get(index).map_or(0.0, |x| u8_to_f32(*x)),
            SampleData::U16(v) => v.get(index).map_or(0.0, |x| u16_to_f32(*x)),
            SampleData::U32(v) => v.get(index).map_or(0.0, |x| u32_to_f32(*x)),
            SampleData::I8(v) => v.get(index).map_or(0.0, |x| i8_to_f32(*x)),
            SampleData::I16(v) => v.get(index).map_or(0.0, |x| i16_to_f32(*x)),
            SampleData::I32(v) => v.get(index).map_or(0.0, |x| i32_to_f32(*x)),
            SampleData::F32(v) => v.get(index).copied().unwrap_or(0.0),
        }
    }

    /// Convert every sample to float
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            SampleData::U8(v) => v.iter().copied().map(u8_to_f32).collect(),
            SampleData::U16(v) => v.iter().copied().map(u16_to_f32).collect(),
            SampleData::U32(v) => v.iter().copied().map(u32_to_f32).collect(),
            SampleData::I8(v) => v.iter().copied().map(i8_to_f32).collect(),
            SampleData::I16(v) => v.iter().copied().map(i16_to_f32).collect(),
            SampleData::I32(v) => v.iter().copied().map(i32_to_f32).collect(),
            SampleData::F32(v) => v.clone(),
        }
    }
}

/// Channel arrangement of decoded samples
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSamples {
    /// One buffer per channel
    Planar(Vec<SampleData>),
    /// Single buffer, channels interleaved frame by frame
    Interleaved(SampleData),
}

/// Decoded audio, consumed immediately by the feeder
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioFrame {
    /// Presentation time in microseconds
    pub timestamp_micros: i64,
    /// Samples per channel
    pub sample_count: usize,
    /// Channels present in `samples`
    pub channel_count: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Sample storage
    pub samples: AudioSamples,
}

impl DecodedAudioFrame {
    /// Planar frame; `sample_count` is taken from the first plane
    pub fn planar(timestamp_micros: i64, sample_rate: u32, planes: Vec<SampleData>) -> Self {
        let sample_count = planes.first().map_or(0, SampleData::len);
        Self {
            timestamp_micros,
            sample_count,
            channel_count: planes.len() as u16,
            sample_rate,
            samples: AudioSamples::Planar(planes),
        }
    }

    /// Interleaved frame of `channel_count` channels
    pub fn interleaved(
        timestamp_micros: i64,
        sample_rate: u32,
        channel_count: u16,
        data: SampleData,
    ) -> Self {
        let sample_count = data.len() / channel_count.max(1) as usize;
        Self {
            timestamp_micros,
            sample_count,
            channel_count,
            sample_rate,
            samples: AudioSamples::Interleaved(data),
        }
    }

    /// Format of the stored samples
    pub fn sample_format(&self) -> Option<SampleFormat> {
        match &self.samples {
            AudioSamples::Planar(planes) => planes.first().map(SampleData::format),
            AudioSamples::Interleaved(data) => Some(data.format()),
        }
    }

    /// Sample of `channel` at frame position `frame`, as float
    ///
    /// Missing channels and positions read as silence.
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        if channel >= self.channel_count as usize || frame >= self.sample_count {
            return 0.0;
        }
        match &self.samples {
            AudioSamples::Planar(planes) => planes
                .get(channel)
                .map_or(0.0, |plane| plane.sample_f32(frame)),
            AudioSamples::Interleaved(data) => {
                data.sample_f32(frame * self.channel_count as usize + channel)
            }
        }
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample_count as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_conversions_center_on_zero() {
        assert_eq!(SampleData::U8(vec![128]).sample_f32(0), 0.0);
        assert_eq!(SampleData::U8(vec![0]).sample_f32(0), -1.0);
        assert_eq!(SampleData::U16(vec![32_768]).sample_f32(0), 0.0);
        assert_eq!(SampleData::U16(vec![0]).sample_f32(0), -1.0);
        assert_eq!(SampleData::U32(vec![2_147_483_648]).sample_f32(0), 0.0);
        assert_eq!(SampleData::U32(vec![0]).sample_f32(0), -1.0);
    }

    #[test]
    fn test_signed_conversions() {
        assert_eq!(SampleData::I8(vec![-128]).sample_f32(0), -1.0);
        assert_eq!(SampleData::I8(vec![64]).sample_f32(0), 0.5);
        assert_eq!(SampleData::I16(vec![-32_768, 16_384]).to_f32(), vec![-1.0, 0.5]);
        assert_eq!(SampleData::I32(vec![i32::MIN]).sample_f32(0), -1.0);
        assert_eq!(SampleData::F32(vec![0.25]).sample_f32(0), 0.25);
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(SampleData::U32(vec![]).format(), SampleFormat::U32);
        assert_eq!(SampleData::I16(vec![1, 2]).format(), SampleFormat::I16);
        assert!(SampleData::F32(vec![]).is_empty());
    }

    #[test]
    fn test_interleaved_frame_indexing() {
        let frame = DecodedAudioFrame::interleaved(
            0,
            48_000,
            2,
            SampleData::F32(vec![0.1, 0.2, 0.3, 0.4]),
        );
        assert_eq!(frame.sample_count, 2);
        assert_eq!(frame.sample(0, 1), 0.3);
        assert_eq!(frame.sample(1, 1), 0.4);
        assert_eq!(frame.sample(2, 0), 0.0);
    }

    #[test]
    fn test_planar_frame_indexing() {
        let frame = DecodedAudioFrame::planar(
            0,
            44_100,
            vec![SampleData::I16(vec![0, 16_384]), SampleData::I16(vec![-16_384, 0])],
        );
        assert_eq!(frame.channel_count, 2);
        assert_eq!(frame.sample_count, 2);
        assert_eq!(frame.sample(0, 1), 0.5);
        assert_eq!(frame.sample(1, 0), -0.5);
        assert_eq!(frame.sample_format(), Some(SampleFormat::I16));
    }
}
