//! Pipeline tuning constants and defaults

use crate::error::{PlaybackError, PlaybackResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which stream positions the demuxer on a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeekAuthority {
    /// Audio when present, video otherwise
    #[default]
    PreferAudio,
    /// Video when present, audio otherwise
    PreferVideo,
}

/// Buffering and pacing parameters for the playback pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ring buffer size expressed in seconds of audio
    pub buffer_duration_secs: f64,
    /// Audio is decoded until this many seconds are buffered
    pub decode_target_secs: f64,
    /// Decoder queue depth at which the audio decoder counts as saturated
    pub decoder_queue_max: usize,
    /// Decoded video frames kept ready for display
    pub frame_buffer_target: usize,
    /// Packets each selected stream's queue is refilled to
    pub packet_queue_min: usize,
    /// Byte limit passed to each demuxer read
    pub read_limit_bytes: usize,
    /// Delay between retries when the demuxer would block (milliseconds)
    pub starvation_backoff_ms: u64,
    /// Retries of a would-block demuxer read before giving up for this call
    pub max_transient_retries: u32,
    /// Display tick period (milliseconds)
    pub render_interval_ms: u64,
    /// Seek positioning stream preference
    pub seek_authority: SeekAuthority,
    /// Frames the audio output pulls per callback chunk
    pub render_quantum_frames: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_duration_secs: 0.6,
            decode_target_secs: 0.3,
            decoder_queue_max: 5,
            frame_buffer_target: 3,
            packet_queue_min: 5,
            read_limit_bytes: 32 * 1024,
            starvation_backoff_ms: 10,
            max_transient_retries: 50,
            render_interval_ms: 16,
            seek_authority: SeekAuthority::PreferAudio,
            render_quantum_frames: 128,
        }
    }
}

impl PipelineConfig {
    /// Delay between starvation retries
    pub fn starvation_backoff(&self) -> Duration {
        Duration::from_millis(self.starvation_backoff_ms)
    }

    /// Display tick period
    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }

    /// Check every parameter is usable
    pub fn validate(&self) -> PlaybackResult<()> {
        if !self.buffer_duration_secs.is_finite() || self.buffer_duration_secs <= 0.0 {
            return Err(PlaybackError::config("buffer_duration_secs must be positive"));
        }
        if !self.decode_target_secs.is_finite() || self.decode_target_secs <= 0.0 {
            return Err(PlaybackError::config("decode_target_secs must be positive"));
        }
        if self.decode_target_secs > self.buffer_duration_secs {
            return Err(PlaybackError::config(format!(
                "decode_target_secs ({}) exceeds buffer_duration_secs ({})",
                self.decode_target_secs, self.buffer_duration_secs
            )));
        }
        let counts = [
            ("decoder_queue_max", self.decoder_queue_max),
            ("frame_buffer_target", self.frame_buffer_target),
            ("packet_queue_min", self.packet_queue_min),
            ("read_limit_bytes", self.read_limit_bytes),
            ("render_quantum_frames", self.render_quantum_frames),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(PlaybackError::config(format!("{} must be non-zero", name)));
            }
        }
        if self.render_interval_ms == 0 {
            return Err(PlaybackError::config("render_interval_ms must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_buffer_target, 3);
        assert_eq!(config.packet_queue_min, 5);
        assert_eq!(config.starvation_backoff(), Duration::from_millis(10));
    }

    #[test]
    fn test_rejects_target_above_capacity() {
        let config = PipelineConfig {
            decode_target_secs: 1.0,
            buffer_duration_secs: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PlaybackError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_counts() {
        let config = PipelineConfig {
            packet_queue_min: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
