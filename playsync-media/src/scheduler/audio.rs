use super::{absorb_decode_error, SchedulerStats};
use crate::audio_feeder::AudioFeeder;
use crate::decoder::{is_saturated, Decoder, FrameReceiver};
use crate::demuxer::Demuxer;
use crate::frame::DecodedAudioFrame;
use crate::packet_queue::PacketQueueManager;
use crate::stream::StreamKind;
use playsync_core::{InFlight, PipelineConfig, PlaybackResult};
use std::time::Duration;
use tracing::{debug, trace};

const MIN_RECHECK_DELAY: Duration = Duration::from_millis(1);

/// Why an audio feed stopped
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioFeedOutcome {
    /// Enough audio is buffered and playback is paused; no recheck needed
    TargetReached,
    /// Enough audio is buffered; feed again after the delay
    RecheckAfter(Duration),
    /// The decoder has as much queued work as it may hold
    Saturated,
    /// No packet was available even after a refill
    Starved,
    /// The source has ended and the audio queue is empty
    Ended,
    /// Another feed was in flight
    Skipped,
}

/// Paces the audio decoder against decoder saturation and ring buffer fill
#[derive(Debug)]
pub struct AudioDecodeScheduler {
    decode_target_secs: f64,
    decoder_queue_max: usize,
    feeding: InFlight,
    last_outcome: Option<AudioFeedOutcome>,
    stats: SchedulerStats,
}

/// Delay before rechecking a buffer holding `used_secs` of audio
///
/// Half the backlog, so the check lands while plenty is still buffered.
pub fn recheck_delay(used_secs: f64) -> Duration {
    if !used_secs.is_finite() || used_secs <= 0.0 {
        return MIN_RECHECK_DELAY;
    }
    Duration::from_secs_f64(used_secs / 2.0).max(MIN_RECHECK_DELAY)
}

impl AudioDecodeScheduler {
    /// Create a scheduler from the pipeline tuning
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            decode_target_secs: config.decode_target_secs,
            decoder_queue_max: config.decoder_queue_max,
            feeding: InFlight::new(),
            last_outcome: None,
            stats: SchedulerStats::default(),
        }
    }

    /// Whether a feed is in flight
    pub fn is_feeding(&self) -> bool {
        self.feeding.is_active()
    }

    /// Whether the last feed ran dry before reaching its target
    pub fn is_starved(&self) -> bool {
        matches!(self.last_outcome, Some(AudioFeedOutcome::Starved))
    }

    /// Write every decoded frame that is ready into the ring buffer
    ///
    /// Returns the number of frames consumed. Overflows are reported by the
    /// feeder and do not stop collection.
    pub fn collect(
        &mut self,
        output: &mut FrameReceiver<DecodedAudioFrame>,
        feeder: &mut AudioFeeder,
    ) -> usize {
        let mut collected = 0;
        while let Some(frame) = output.try_recv() {
            if let Err(err) = feeder.write_frame(frame) {
                trace!("Audio frame only partially buffered: {}", err);
            }
            collected += 1;
        }
        collected
    }

    /// Submit packets until the ring buffer holds the decode target
    ///
    /// `playing` decides whether reaching the target asks for a recheck.
    pub async fn feed(
        &mut self,
        queues: &mut PacketQueueManager,
        demuxer: &mut dyn Demuxer,
        decoder: &mut dyn Decoder<Output = DecodedAudioFrame>,
        output: &mut FrameReceiver<DecodedAudioFrame>,
        feeder: &mut AudioFeeder,
        playing: bool,
    ) -> PlaybackResult<AudioFeedOutcome> {
        let Some(_feeding) = self.feeding.try_enter() else {
            self.stats.skipped += 1;
            return Ok(AudioFeedOutcome::Skipped);
        };
        self.stats.feeds += 1;
        let outcome = self
            .feed_internal(queues, demuxer, decoder, output, feeder, playing)
            .await;

        if let Ok(done) = &outcome {
            self.last_outcome = Some(*done);
        }
        outcome
    }

    async fn feed_internal(
        &mut self,
        queues: &mut PacketQueueManager,
        demuxer: &mut dyn Demuxer,
        decoder: &mut dyn Decoder<Output = DecodedAudioFrame>,
        output: &mut FrameReceiver<DecodedAudioFrame>,
        feeder: &mut AudioFeeder,
        playing: bool,
    ) -> PlaybackResult<AudioFeedOutcome> {
        self.collect(output, feeder);

        let mut used_secs = feeder.fill_seconds();
        while used_secs < self.decode_target_secs {
            if is_saturated(&*decoder, self.decoder_queue_max) {
                trace!(depth = decoder.queue_depth(), "Audio decoder saturated");
                return Ok(AudioFeedOutcome::Saturated);
            }

            let packet = match queues.next_packet(StreamKind::Audio, demuxer).await? {
                Some(packet) => packet,
                None if queues.is_ended() => return Ok(AudioFeedOutcome::Ended),
                None => {
                    debug!(buffered_secs = used_secs, "No more audio packets available");
                    return Ok(AudioFeedOutcome::Starved);
                }
            };

            trace!(pts = packet.pts, "Submitting audio packet");
            self.stats.packets_submitted += 1;
            if let Err(err) = decoder.decode(packet).await {
                absorb_decode_error(&mut self.stats, decoder.codec(), err)?;
            }

            tokio::task::yield_now().await;
            self.collect(output, feeder);
            used_secs = feeder.fill_seconds();
        }

        if playing {
            Ok(AudioFeedOutcome::RecheckAfter(recheck_delay(used_secs)))
        } else {
            Ok(AudioFeedOutcome::TargetReached)
        }
    }

    /// Forget the last outcome after a reposition
    pub fn reset(&mut self) {
        self.last_outcome = None;
    }

    /// Counter snapshot
    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }
}
