//! Requests sent from the host to the player's driver task

use crate::pipeline::PipelineStats;
use crate::seek::SeekReport;
use bytes::Bytes;
use playsync_core::{MediaTimeSync, PlaybackResult, SampleConsumer};
use playsync_media::{MediaInfo, StreamKind};
use tokio::sync::oneshot;

/// Reply channel of a command
pub type Reply<T> = oneshot::Sender<T>;

/// Host command
#[derive(Debug)]
pub enum Command {
    /// Open a source and configure decoders
    Init {
        /// Raw container bytes handed to the demuxer
        source: Bytes,
        /// Stream table on success
        reply: Reply<PlaybackResult<MediaInfo>>,
    },
    /// Start the clock, then apply `sync`
    Start {
        /// Authoritative position to adopt after starting
        sync: Option<MediaTimeSync>,
        /// Completion
        reply: Reply<PlaybackResult<()>>,
    },
    /// Stop the clock, then apply `sync`
    Stop {
        /// Authoritative position to adopt after stopping
        sync: Option<MediaTimeSync>,
        /// Completion
        reply: Reply<PlaybackResult<()>>,
    },
    /// Resynchronize the clock against the audio output
    UpdateMediaTime {
        /// Authoritative position
        sync: MediaTimeSync,
    },
    /// Reposition playback
    Seek {
        /// Target position in seconds
        seconds: f64,
        /// Wall-clock time the target corresponds to; now when `None`
        wall_origin_millis: Option<f64>,
        /// What the seek released and where it resumed
        reply: Reply<PlaybackResult<SeekReport>>,
    },
    /// Play a different stream of the same kind
    ChangeStream {
        /// Stream kind to switch
        kind: StreamKind,
        /// Container index of the new stream
        index: usize,
        /// Completion
        reply: Reply<PlaybackResult<()>>,
    },
    /// Hand the ring buffer's reading side to an audio output
    TakeSampleConsumer {
        /// `None` before initialization, without audio, or when already taken
        reply: Reply<Option<SampleConsumer>>,
    },
    /// Snapshot pipeline counters
    Stats {
        /// Counter snapshot
        reply: Reply<PipelineStats>,
    },
    /// Release everything and end the driver task
    Shutdown,
}

impl Command {
    /// Command name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init { .. } => "init",
            Command::Start { .. } => "start",
            Command::Stop { .. } => "stop",
            Command::UpdateMediaTime { .. } => "update_media_time",
            Command::Seek { .. } => "seek",
            Command::ChangeStream { .. } => "change_stream",
            Command::TakeSampleConsumer { .. } => "take_sample_consumer",
            Command::Stats { .. } => "stats",
            Command::Shutdown => "shutdown",
        }
    }
}
