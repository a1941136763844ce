//! Conversion of decoded audio into the ring buffer's sample format
//!
//! Every decoded frame is converted to interleaved `f32` in the output's
//! channel layout and written to the [`SampleProducer`] in one call. Extra
//! source channels are dropped; missing ones are written as silence.

use crate::frame::{AudioSamples, DecodedAudioFrame};
use playsync_core::{PlaybackError, PlaybackResult, RingBufferStats, SampleProducer};
use tracing::{debug, trace, warn};

/// Counters for observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioFeederStats {
    /// Decoded frames consumed
    pub frames_consumed: u64,
    /// Samples written to the ring buffer
    pub samples_written: u64,
    /// Writes that did not fit completely
    pub overflows: u64,
    /// Samples lost to overflows
    pub samples_dropped: u64,
}

/// Writer side of the audio path
pub struct AudioFeeder {
    producer: SampleProducer,
    channel_count: u16,
    sample_rate: u32,
    scratch: Vec<f32>,
    stats: AudioFeederStats,
}

impl AudioFeeder {
    /// Create a feeder writing `channel_count` interleaved channels
    pub fn new(producer: SampleProducer, channel_count: u16, sample_rate: u32) -> PlaybackResult<Self> {
        if channel_count == 0 || sample_rate == 0 {
            return Err(PlaybackError::config(format!(
                "audio output needs channels and a sample rate, got {} channels at {} Hz",
                channel_count, sample_rate
            )));
        }
        Ok(Self {
            producer,
            channel_count,
            sample_rate,
            scratch: Vec::new(),
            stats: AudioFeederStats::default(),
        })
    }

    /// Output channel count
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Convert `frame` and write it to the ring buffer
    ///
    /// Returns the number of samples written. A write that does not fit is
    /// reported as [`PlaybackError::RingBufferOverflow`]; the samples that did
    /// fit stay in the buffer.
    pub fn write_frame(&mut self, frame: DecodedAudioFrame) -> PlaybackResult<usize> {
        if frame.sample_rate != self.sample_rate {
            debug!(
                frame_rate = frame.sample_rate,
                output_rate = self.sample_rate,
                "Audio frame sample rate differs from output"
            );
        }

        self.interleave(&frame);
        let requested = self.scratch.len();
        let written = self.producer.write(&self.scratch);

        self.stats.frames_consumed += 1;
        self.stats.samples_written += written as u64;
        trace!(
            timestamp_us = frame.timestamp_micros,
            requested,
            written,
            "Buffered audio samples"
        );

        if written < requested {
            self.stats.overflows += 1;
            self.stats.samples_dropped += (requested - written) as u64;
            warn!(requested, written, "Buffer full, dropping audio samples");
            return Err(PlaybackError::RingBufferOverflow { requested, written });
        }
        Ok(written)
    }

    fn interleave(&mut self, frame: &DecodedAudioFrame) {
        let out_channels = self.channel_count as usize;
        let frames = frame.sample_count;
        self.scratch.clear();
        self.scratch.reserve(frames * out_channels);

        match &frame.samples {
            AudioSamples::Interleaved(data) if frame.channel_count == self.channel_count => {
                for index in 0..frames * out_channels {
                    self.scratch.push(data.sample_f32(index));
                }
            }
            AudioSamples::Planar(_) | AudioSamples::Interleaved(_) => {
                for position in 0..frames {
                    for channel in 0..out_channels {
                        self.scratch.push(frame.sample(channel, position));
                    }
                }
            }
        }
    }

    /// Buffered audio in seconds
    pub fn fill_seconds(&self) -> f64 {
        self.producer.fill_seconds(self.channel_count, self.sample_rate)
    }

    /// Samples waiting for the consumer
    pub fn buffered_samples(&self) -> usize {
        self.producer.available_read()
    }

    /// Discard every buffered sample; returns how many were discarded
    pub fn drain(&self) -> usize {
        self.producer.drain()
    }

    /// Feeder counters
    pub fn stats(&self) -> AudioFeederStats {
        self.stats.clone()
    }

    /// Ring buffer counters
    pub fn ring_stats(&self) -> RingBufferStats {
        self.producer.stats()
    }
}

impl std::fmt::Debug for AudioFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFeeder")
            .field("channel_count", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("buffered_samples", &self.buffered_samples())
            .field("stats", &self.stats)
            .finish()
    }
}
