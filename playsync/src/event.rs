//! Notifications sent from the pipeline to the host

use playsync_media::{StreamDescriptor, StreamKind};
use serde::Serialize;
use tokio::sync::mpsc;

/// Events the host uses to keep its view of playback consistent
///
/// These are advisory: the pipeline's own invariants never depend on the
/// host receiving them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// The source was opened and decoders configured
    InitializationComplete {
        /// Every stream in the container, with selection flags
        streams: Vec<StreamDescriptor>,
        /// Container duration in microseconds
        duration_micros: i64,
    },
    /// The media clock started or stopped
    PlaybackStateChanged {
        /// Whether playback is now running
        playing: bool,
    },
    /// The sample ring buffer is ready for an audio output
    AudioOutputReady {
        /// Interleaved channels per sample frame
        channel_count: u16,
        /// Sample rate in Hz
        sample_rate: u32,
    },
    /// A seek started or finished repositioning
    Buffering {
        /// Whether playback is waiting on the seek
        buffering: bool,
    },
    /// Actual media time the pipeline resumed from after a seek
    MediaTimeOffset {
        /// Time of the first packet after the seek, in seconds
        media_time_seconds: f64,
    },
    /// A different stream is now playing
    StreamChanged {
        /// Stream kind that switched
        kind: StreamKind,
        /// Newly selected container index
        index: usize,
    },
    /// Every stream has been played to the end
    PlaybackEnded,
    /// Something went wrong
    Error {
        /// Human readable description
        message: String,
        /// Whether playback can continue
        recoverable: bool,
    },
}

impl PlayerEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::InitializationComplete { .. } => "initialization_complete",
            PlayerEvent::PlaybackStateChanged { .. } => "playback_state_changed",
            PlayerEvent::AudioOutputReady { .. } => "audio_output_ready",
            PlayerEvent::Buffering { .. } => "buffering",
            PlayerEvent::MediaTimeOffset { .. } => "media_time_offset",
            PlayerEvent::StreamChanged { .. } => "stream_changed",
            PlayerEvent::PlaybackEnded => "playback_ended",
            PlayerEvent::Error { .. } => "error",
        }
    }

    /// Check if this event changes what is playing or whether it plays
    pub fn is_playback_event(&self) -> bool {
        matches!(
            self,
            PlayerEvent::PlaybackStateChanged { .. }
                | PlayerEvent::StreamChanged { .. }
                | PlayerEvent::PlaybackEnded
        )
    }

    /// Check if this event belongs to a seek
    pub fn is_seek_event(&self) -> bool {
        matches!(
            self,
            PlayerEvent::Buffering { .. } | PlayerEvent::MediaTimeOffset { .. }
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, PlayerEvent::Error { .. })
    }
}

/// Stream of player events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<PlayerEvent>,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<PlayerEvent>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<PlayerEvent> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<PlayerEvent>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(mpsc::error::TryRecvError::Disconnected)
            }
        }
    }

    /// Every event already delivered, without waiting
    pub fn drain(&mut self) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Create a connected sender and [`EventStream`]
pub fn event_channel() -> (mpsc::UnboundedSender<PlayerEvent>, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, EventStream::new(rx))
}
