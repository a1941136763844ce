//! Error types for the playback pipeline
//!
//! The taxonomy separates conditions that are retried locally (transient
//! demux errors, decoder saturation) from conditions that halt the current
//! source (fatal demux/decode failures) and from buffer conditions that are
//! only reported (ring buffer overflow and underrun).

use thiserror::Error;

/// Main error type for playback operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// Demuxer asked to be retried later (would-block)
    #[error("Transient demux error: {reason}")]
    TransientDemux {
        /// Reason reported by the demuxer
        reason: String,
    },

    /// Demuxer reached the end of the source
    #[error("End of stream")]
    EndOfStream,

    /// Demuxer failed and cannot make progress on this source
    #[error("Fatal demux error: {reason}")]
    FatalDemux {
        /// Reason reported by the demuxer
        reason: String,
    },

    /// Decoder failed and cannot make progress on this source
    #[error("Fatal decode error: {codec} - {reason}")]
    FatalDecode {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Decoder does not support the stream configuration
    #[error("Decoder unsupported: {codec}")]
    DecoderUnsupported {
        /// Codec name
        codec: String,
    },

    /// Producer wrote fewer samples than requested
    #[error("Ring buffer overflow: requested {requested} samples, wrote {written}")]
    RingBufferOverflow {
        /// Samples the producer tried to write
        requested: usize,
        /// Samples actually written
        written: usize,
    },

    /// Consumer found fewer samples than requested
    #[error("Ring buffer underrun: requested {requested} samples, read {read}")]
    RingBufferUnderrun {
        /// Samples the consumer asked for
        requested: usize,
        /// Samples actually read
        read: usize,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Operation not allowed in the current state
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Demuxer rejected a seek request
    #[error("Seek to {target_seconds}s failed: {reason}")]
    SeekFailed {
        /// Requested position in seconds
        target_seconds: f64,
        /// Failure reason
        reason: String,
    },

    /// Renderer failed to present a frame
    #[error("Render error: {reason}")]
    Render {
        /// Failure reason
        reason: String,
    },

    /// No stream with the given index and kind exists
    #[error("Stream not found: {index}")]
    StreamNotFound {
        /// Stream index that was requested
        index: usize,
    },

    /// A channel between pipeline parts was closed
    #[error("Channel closed: {channel}")]
    ChannelClosed {
        /// Channel name
        channel: String,
    },
}

/// Result type alias for playback operations
pub type PlaybackResult<T> = Result<T, PlaybackError>;

impl PlaybackError {
    /// Check if error is recoverable without halting the pipeline
    pub fn is_recoverable(&self) -> bool {
        match self {
            PlaybackError::TransientDemux { .. } => true,
            PlaybackError::EndOfStream => true,
            PlaybackError::DecoderUnsupported { .. } => true,
            PlaybackError::RingBufferOverflow { .. } => true,
            PlaybackError::RingBufferUnderrun { .. } => true,
            PlaybackError::Render { .. } => true,
            PlaybackError::InvalidConfiguration { .. } => true,
            PlaybackError::StreamNotFound { .. } => true,
            PlaybackError::FatalDemux { .. } => false,
            PlaybackError::FatalDecode { .. } => false,
            PlaybackError::SeekFailed { .. } => false,
            PlaybackError::InvalidState { .. } => false,
            PlaybackError::ChannelClosed { .. } => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlaybackError::TransientDemux { .. } => ErrorCategory::Demux,
            PlaybackError::EndOfStream => ErrorCategory::Demux,
            PlaybackError::FatalDemux { .. } => ErrorCategory::Demux,
            PlaybackError::SeekFailed { .. } => ErrorCategory::Demux,
            PlaybackError::FatalDecode { .. } => ErrorCategory::Decode,
            PlaybackError::DecoderUnsupported { .. } => ErrorCategory::Decode,
            PlaybackError::RingBufferOverflow { .. } => ErrorCategory::Buffer,
            PlaybackError::RingBufferUnderrun { .. } => ErrorCategory::Buffer,
            PlaybackError::Render { .. } => ErrorCategory::Render,
            PlaybackError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            PlaybackError::StreamNotFound { .. } => ErrorCategory::Configuration,
            PlaybackError::InvalidState { .. } => ErrorCategory::State,
            PlaybackError::ChannelClosed { .. } => ErrorCategory::System,
        }
    }

    /// Shorthand for an `InvalidConfiguration` error
    pub fn config(message: impl Into<String>) -> Self {
        PlaybackError::InvalidConfiguration {
            message: message.into(),
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Demuxer and container errors
    Demux,
    /// Decoder errors
    Decode,
    /// Sample and frame buffer conditions
    Buffer,
    /// Presentation errors
    Render,
    /// Configuration and parameter errors
    Configuration,
    /// State management errors
    State,
    /// Runtime plumbing errors
    System,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let transient = PlaybackError::TransientDemux {
            reason: "EAGAIN".to_string(),
        };
        assert_eq!(transient.category(), ErrorCategory::Demux);
        assert!(transient.is_recoverable());

        let fatal = PlaybackError::FatalDecode {
            codec: "h264".to_string(),
            reason: "corrupt bitstream".to_string(),
        };
        assert_eq!(fatal.category(), ErrorCategory::Decode);
        assert!(!fatal.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = PlaybackError::RingBufferOverflow {
            requested: 3000,
            written: 2800,
        };
        assert_eq!(
            error.to_string(),
            "Ring buffer overflow: requested 3000 samples, wrote 2800"
        );
    }

    #[test]
    fn test_buffer_conditions_do_not_halt() {
        let underrun = PlaybackError::RingBufferUnderrun {
            requested: 256,
            read: 0,
        };
        assert!(underrun.is_recoverable());
        assert_eq!(underrun.category(), ErrorCategory::Buffer);
    }
}
