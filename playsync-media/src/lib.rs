//! # playsync media
//!
//! Collaborator contracts and the components that move media between them:
//! packet queues fed by the demuxer, decode schedulers pacing the decoders,
//! the video frame buffer, the audio feeder writing into the ring buffer,
//! and the output side that presents frames and plays samples.

#![warn(clippy::all)]

pub mod audio_feeder;
pub mod decoder;
pub mod demuxer;
pub mod frame;
pub mod frame_buffer;
pub mod packet;
pub mod packet_queue;
pub mod render;
pub mod scheduler;
pub mod stream;
pub mod synthetic;

// Re-export main types
pub use audio_feeder::{AudioFeeder, AudioFeederStats};
pub use decoder::{
    is_saturated, output_channel, AudioDecoder, Decoder, FrameReceiver, FrameSender, VideoDecoder,
};
pub use demuxer::{DemuxError, Demuxer, PacketBatch, SeekFlags};
pub use frame::{AudioSamples, DecodedAudioFrame, DecodedVideoFrame, SampleData, SampleFormat};
pub use frame_buffer::{FrameBufferStats, FrameSelection, VideoFrameBuffer};
pub use packet::{Packet, TimeBase, MICROS_PER_SECOND};
pub use packet_queue::{PacketQueueManager, PacketQueueStats, RefillOutcome};
pub use render::{
    AudioSinkConfig, CpalAudioSink, FrameRenderer, MediaTimeTracker, RenderBackend, RenderStats,
    SoftwareRenderer,
};
pub use scheduler::{
    recheck_delay, AudioDecodeScheduler, AudioFeedOutcome, SchedulerStats, VideoDecodeScheduler,
    VideoFeedOutcome,
};
pub use stream::{MediaInfo, StreamDescriptor, StreamKind, StreamParams, StreamSelection};
