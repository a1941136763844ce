//! Demuxer collaborator interface
//!
//! Container parsing lives outside this crate. The pipeline only needs a
//! way to learn the stream layout, pull batches of packets bounded by a
//! byte budget, and reposition the source.

use crate::packet::Packet;
use crate::stream::MediaInfo;
use async_trait::async_trait;
use bytes::Bytes;
use playsync_core::PlaybackError;
use std::collections::HashMap;
use thiserror::Error;

/// Packets returned by one read, keyed by stream index
pub type PacketBatch = HashMap<usize, Vec<Packet>>;

/// Failure modes of a demuxer read
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DemuxError {
    /// No more packets in the source
    #[error("End of stream")]
    EndOfStream,

    /// Data is not available yet; retry later
    #[error("Demuxer would block: {reason}")]
    WouldBlock {
        /// Reason reported by the demuxer
        reason: String,
    },

    /// Unrecoverable failure for this source
    #[error("Demuxer failed: {reason}")]
    Fatal {
        /// Reason reported by the demuxer
        reason: String,
    },
}

impl DemuxError {
    /// Whether the read may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(self, DemuxError::WouldBlock { .. })
    }
}

impl From<DemuxError> for PlaybackError {
    fn from(err: DemuxError) -> Self {
        match err {
            DemuxError::EndOfStream => PlaybackError::EndOfStream,
            DemuxError::WouldBlock { reason } => PlaybackError::TransientDemux { reason },
            DemuxError::Fatal { reason } => PlaybackError::FatalDemux { reason },
        }
    }
}

/// Seek positioning flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekFlags {
    /// Land on the closest keyframe at or before the target
    pub backward: bool,
    /// Allow landing on non-keyframes
    pub any_frame: bool,
}

impl SeekFlags {
    /// Keyframe at or before the target, the usual playback seek
    pub fn backward() -> Self {
        Self {
            backward: true,
            any_frame: false,
        }
    }
}

/// Opaque container demuxer
#[async_trait]
pub trait Demuxer: Send {
    /// Parse the container header and describe its streams
    async fn initialize(&mut self, source: Bytes) -> Result<MediaInfo, DemuxError>;

    /// Read packets until roughly `limit_bytes` of payload has been produced
    ///
    /// An empty batch is a valid result and means no packet was ready.
    async fn read_packets(&mut self, limit_bytes: usize) -> Result<PacketBatch, DemuxError>;

    /// Reposition the source
    ///
    /// With `stream_index` set, `timestamp` is in that stream's time base;
    /// otherwise it is in microseconds.
    async fn seek(
        &mut self,
        stream_index: Option<usize>,
        timestamp: i64,
        flags: SeekFlags,
    ) -> Result<(), DemuxError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use playsync_core::ErrorCategory;

    #[test]
    fn test_demux_error_conversion() {
        let transient: PlaybackError = DemuxError::WouldBlock {
            reason: "network".to_string(),
        }
        .into();
        assert!(transient.is_recoverable());
        assert_eq!(transient.category(), ErrorCategory::Demux);

        let fatal: PlaybackError = DemuxError::Fatal {
            reason: "corrupt header".to_string(),
        }
        .into();
        assert!(!fatal.is_recoverable());

        let eos: PlaybackError = DemuxError::EndOfStream.into();
        assert_eq!(eos, PlaybackError::EndOfStream);
    }

    #[test]
    fn test_seek_flags() {
        let flags = SeekFlags::backward();
        assert!(flags.backward);
        assert!(!flags.any_frame);
        assert!(DemuxError::WouldBlock {
            reason: String::new()
        }
        .is_transient());
        assert!(!DemuxError::EndOfStream.is_transient());
    }
}
