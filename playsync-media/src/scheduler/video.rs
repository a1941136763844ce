use super::{absorb_decode_error, SchedulerStats};
use crate::decoder::{is_saturated, Decoder, FrameReceiver};
use crate::demuxer::Demuxer;
use crate::frame::DecodedVideoFrame;
use crate::frame_buffer::VideoFrameBuffer;
use crate::packet_queue::PacketQueueManager;
use crate::stream::StreamKind;
use playsync_core::{InFlight, PipelineConfig, PlaybackResult};
use tracing::trace;

/// Why a video feed stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFeedOutcome {
    /// The frame buffer holds the target number of frames
    TargetReached,
    /// The decoder has as much queued work as it may hold
    Saturated,
    /// No packet was available even after a refill
    Starved,
    /// The source has ended and the video queue is empty
    Ended,
    /// Another feed was in flight
    Skipped,
}

/// Paces the video decoder against the frame buffer
#[derive(Debug)]
pub struct VideoDecodeScheduler {
    decoder_queue_max: usize,
    feeding: InFlight,
    stats: SchedulerStats,
}

impl VideoDecodeScheduler {
    /// Create a scheduler from the pipeline tuning
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            decoder_queue_max: config.decoder_queue_max,
            feeding: InFlight::new(),
            stats: SchedulerStats::default(),
        }
    }

    /// Whether a feed is in flight
    pub fn is_feeding(&self) -> bool {
        self.feeding.is_active()
    }

    /// Move every decoded frame that is ready into the frame buffer
    pub fn collect(
        &mut self,
        output: &mut FrameReceiver<DecodedVideoFrame>,
        frames: &mut VideoFrameBuffer,
    ) -> usize {
        let mut collected = 0;
        while let Some(frame) = output.try_recv() {
            frames.push(frame);
            collected += 1;
        }
        collected
    }

    /// Submit packets until the frame buffer reaches its target
    ///
    /// Every dequeued packet counts as consumed once handed to the decoder,
    /// whether or not decoding succeeds.
    pub async fn feed(
        &mut self,
        queues: &mut PacketQueueManager,
        demuxer: &mut dyn Demuxer,
        decoder: &mut dyn Decoder<Output = DecodedVideoFrame>,
        output: &mut FrameReceiver<DecodedVideoFrame>,
        frames: &mut VideoFrameBuffer,
    ) -> PlaybackResult<VideoFeedOutcome> {
        let Some(_feeding) = self.feeding.try_enter() else {
            self.stats.skipped += 1;
            return Ok(VideoFeedOutcome::Skipped);
        };
        self.stats.feeds += 1;
        self.feed_internal(queues, demuxer, decoder, output, frames)
            .await
    }

    async fn feed_internal(
        &mut self,
        queues: &mut PacketQueueManager,
        demuxer: &mut dyn Demuxer,
        decoder: &mut dyn Decoder<Output = DecodedVideoFrame>,
        output: &mut FrameReceiver<DecodedVideoFrame>,
        frames: &mut VideoFrameBuffer,
    ) -> PlaybackResult<VideoFeedOutcome> {
        self.collect(output, frames);

        loop {
            if frames.is_full() {
                return Ok(VideoFeedOutcome::TargetReached);
            }
            if is_saturated(&*decoder, self.decoder_queue_max) {
                return Ok(VideoFeedOutcome::Saturated);
            }

            let packet = match queues.next_packet(StreamKind::Video, demuxer).await? {
                Some(packet) => packet,
                None if queues.is_ended() => return Ok(VideoFeedOutcome::Ended),
                None => return Ok(VideoFeedOutcome::Starved),
            };

            trace!(pts = packet.pts, "Submitting video packet");
            self.stats.packets_submitted += 1;
            if let Err(err) = decoder.decode(packet).await {
                absorb_decode_error(&mut self.stats, decoder.codec(), err)?;
            }

            tokio::task::yield_now().await;
            self.collect(output, frames);
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }
}
