//! # playsync - Audio/Video Playback Synchronization
//!
//! playsync keeps a demultiplexed, decoded audio/video source flowing to its
//! outputs with correct relative timing and bounded memory. It paces two
//! independent decode pipelines against a shared media clock, hands audio to
//! a real-time output through a lock-free ring buffer, and flushes and
//! repositions everything consistently on seeks.
//!
//! ## Key Features
//!
//! - **Backpressure-aware decoding**: decoders are fed only while their queue
//!   and the output buffers have room
//! - **Lock-free audio hand-off**: a single-producer/single-consumer ring
//!   buffer that never blocks the real-time side
//! - **Clock-driven frame selection**: the frame nearest the media clock is
//!   shown and stale frames are released
//! - **Consistent seeks**: decoders, queues, frames and samples are flushed
//!   before the demuxer repositions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use playsync::synthetic::{
//!     AudioDecodeMode, SyntheticAudioDecoder, SyntheticDemuxer, SyntheticMedia,
//!     SyntheticVideoDecoder,
//! };
//! use playsync::Player;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), playsync::PlaybackError> {
//!     let (player, mut events) = Player::builder(SyntheticDemuxer::new(SyntheticMedia::default()))
//!         .video_decoder(SyntheticVideoDecoder::new())
//!         .audio_decoder(SyntheticAudioDecoder::new(AudioDecodeMode::Immediate, 1024))
//!         .spawn()?;
//!
//!     let info = player.init(Bytes::new()).await?;
//!     println!("Opened {} streams", info.streams.len());
//!
//!     player.start(None).await?;
//!     while let Some(event) = events.next().await {
//!         println!("Player event: {:?}", event);
//!         if event.event_type() == "playback_ended" {
//!             break;
//!         }
//!     }
//!
//!     player.shutdown().await
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use playsync_core::{
    ClockState, ErrorCategory, ManualTime, MediaClock, MediaTimeSync, MonotonicTime,
    PipelineConfig, PlaybackError, PlaybackResult, ReadOutcome, RingBufferStats, SampleConsumer,
    SeekAuthority, TimeSource,
};

pub use playsync_media::{
    synthetic, AudioDecoder, AudioSinkConfig, CpalAudioSink, DecodedAudioFrame,
    DecodedVideoFrame, Decoder, DemuxError, Demuxer, FrameRenderer, MediaInfo, MediaTimeTracker,
    Packet, RenderBackend, SampleFormat, SoftwareRenderer, StreamDescriptor, StreamKind,
    VideoDecoder,
};

// Public API modules
pub mod command;
pub mod config;
pub mod event;
pub mod logging;
pub mod pipeline;
pub mod player;
pub mod seek;

// Re-export main API types
pub use command::Command;
pub use config::PlayerConfig;
pub use event::{event_channel, EventStream, PlayerEvent};
pub use logging::{init_logging, init_logging_with};
pub use pipeline::{Collaborators, DecoderOutput, Pipeline, PipelineState, PipelineStats};
pub use player::{Player, PlayerBuilder};
pub use seek::{SeekController, SeekGuard, SeekPlan, SeekReport, SeekState};
