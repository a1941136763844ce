//! Explicit pipeline context
//!
//! A [`Pipeline`] owns every component of one playback session and is driven
//! from a single task. Plain `&mut self` access is the only synchronization
//! between its parts; the sample ring buffer is the one object shared with
//! another context (the audio output).

use crate::config::PlayerConfig;
use crate::event::PlayerEvent;
use crate::seek::{await_first_packet, SeekController, SeekPlan, SeekReport};
use bytes::Bytes;
use futures::future::pending;
use playsync_core::{
    ring_buffer, MediaClock, MediaTimeSync, MonotonicTime, PlaybackError, PlaybackResult,
    SampleConsumer, TimeSource,
};
use playsync_media::{
    output_channel, AudioDecodeScheduler, AudioDecoder, AudioFeedOutcome, AudioFeeder,
    DecodedAudioFrame, DecodedVideoFrame, Demuxer, FrameReceiver, FrameRenderer, MediaInfo,
    PacketQueueManager, SeekFlags, SoftwareRenderer, StreamDescriptor, StreamKind,
    StreamSelection, VideoDecodeScheduler, VideoDecoder, VideoFrameBuffer,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Externally supplied parts of a pipeline
pub struct Collaborators {
    /// Container demuxer
    pub demuxer: Box<dyn Demuxer>,
    /// Video decoder, required when the source has video
    pub video_decoder: Option<VideoDecoder>,
    /// Audio decoders in order of preference
    ///
    /// The first one that accepts the stream is used; the rest are kept for
    /// stream switches.
    pub audio_decoders: Vec<AudioDecoder>,
    /// Frame presentation backend
    pub renderer: Box<dyn FrameRenderer>,
    /// Wall-clock source for the media clock
    pub time: Arc<dyn TimeSource>,
}

impl Collaborators {
    /// Collaborators with a software renderer and the monotonic system clock
    pub fn new(demuxer: Box<dyn Demuxer>) -> Self {
        Self {
            demuxer,
            video_decoder: None,
            audio_decoders: Vec::new(),
            renderer: Box::new(SoftwareRenderer::new()),
            time: Arc::new(MonotonicTime::new()),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("video_decoder", &self.video_decoder.as_ref().map(|d| d.codec().to_string()))
            .field(
                "audio_decoders",
                &self
                    .audio_decoders
                    .iter()
                    .map(|d| d.codec().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("renderer", &self.renderer.backend())
            .finish()
    }
}

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// No source opened yet
    Uninitialized,
    /// Ready for playback commands
    Idle,
    /// A seek is flushing and repositioning components
    Seeking,
    /// A fatal error stopped playback for good
    Halted,
}

/// Counter snapshot of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    /// Lifecycle state
    pub state: PipelineState,
    /// Whether the clock is running
    pub playing: bool,
    /// Clock position in milliseconds
    pub position_millis: f64,
    /// Packets waiting in the video queue
    pub video_packets_queued: usize,
    /// Packets waiting in the audio queue
    pub audio_packets_queued: usize,
    /// Decoded frames waiting for display
    pub frames_buffered: usize,
    /// Decoded frames released without being kept for display
    pub frames_released: u64,
    /// Frames handed to the renderer
    pub frames_drawn: u64,
    /// Audio waiting in the ring buffer, in seconds
    pub buffered_audio_secs: f64,
    /// Ring buffer writes that did not fit
    pub ring_overflows: u64,
    /// Audio output reads that found too few samples
    pub ring_underruns: u64,
    /// Packets handed to the decoders
    pub packets_decoded: u64,
    /// Packets the decoders rejected without halting
    pub decode_errors: u64,
    /// Seeks completed
    pub seeks_completed: u64,
    /// Seeks whose future was dropped before they finished
    pub seeks_abandoned: u64,
}

/// Frame delivered by one of the decoders
#[derive(Debug)]
pub enum DecoderOutput {
    /// Decoded picture
    Video(DecodedVideoFrame),
    /// Decoded samples
    Audio(DecodedAudioFrame),
}

struct VideoPath {
    stream_index: usize,
    decoder: VideoDecoder,
    output: FrameReceiver<DecodedVideoFrame>,
    scheduler: VideoDecodeScheduler,
    frames: VideoFrameBuffer,
    last_drawn: Option<i64>,
}

struct AudioPath {
    stream_index: usize,
    decoder: AudioDecoder,
    spare: Vec<AudioDecoder>,
    output: FrameReceiver<DecodedAudioFrame>,
    scheduler: AudioDecodeScheduler,
    feeder: AudioFeeder,
    consumer: Option<SampleConsumer>,
    reported_underruns: u64,
}

// Where a reposition landed and what its flush released
struct Landing {
    media_time_seconds: f64,
    packets_released: usize,
    frames_released: usize,
    samples_drained: usize,
}

/// Every component of a playback session
pub struct Pipeline {
    config: PlayerConfig,
    demuxer: Box<dyn Demuxer>,
    renderer: Box<dyn FrameRenderer>,
    clock: MediaClock,
    queues: PacketQueueManager,
    info: Option<MediaInfo>,
    video: Option<VideoPath>,
    audio: Option<AudioPath>,
    idle_video_decoder: Option<VideoDecoder>,
    idle_audio_decoders: Vec<AudioDecoder>,
    seek: SeekController,
    audio_recheck: Option<Instant>,
    halted: bool,
    ended_notified: bool,
    frames_discarded: u64,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl Pipeline {
    /// Assemble a pipeline; nothing is read until [`Pipeline::initialize`]
    pub fn new(
        config: PlayerConfig,
        collaborators: Collaborators,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> PlaybackResult<Self> {
        config.validate()?;
        let Collaborators {
            demuxer,
            video_decoder,
            audio_decoders,
            renderer,
            time,
        } = collaborators;

        Ok(Self {
            queues: PacketQueueManager::new(&config.pipeline, StreamSelection::default()),
            seek: SeekController::new(config.pipeline.seek_authority),
            clock: MediaClock::new(time),
            config,
            demuxer,
            renderer,
            info: None,
            video: None,
            audio: None,
            idle_video_decoder: video_decoder,
            idle_audio_decoders: audio_decoders,
            audio_recheck: None,
            halted: false,
            ended_notified: false,
            frames_discarded: 0,
            events,
        })
    }

    /// Lifecycle state
    pub fn state(&self) -> PipelineState {
        if self.halted {
            PipelineState::Halted
        } else if self.seek.is_seeking() {
            PipelineState::Seeking
        } else if self.info.is_none() {
            PipelineState::Uninitialized
        } else {
            PipelineState::Idle
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Media clock
    pub fn clock(&self) -> &MediaClock {
        &self.clock
    }

    /// Stream table, once initialized
    pub fn media_info(&self) -> Option<&MediaInfo> {
        self.info.as_ref()
    }

    /// Packet queues
    pub fn queues(&self) -> &PacketQueueManager {
        &self.queues
    }

    /// Video frame buffer, when a video stream is playing
    pub fn frame_buffer(&self) -> Option<&VideoFrameBuffer> {
        self.video.as_ref().map(|video| &video.frames)
    }

    /// Seconds of audio waiting in the ring buffer
    pub fn buffered_audio_secs(&self) -> f64 {
        self.audio
            .as_ref()
            .map_or(0.0, |audio| audio.feeder.fill_seconds())
    }

    /// When the audio path wants to be fed again
    pub fn audio_recheck_deadline(&self) -> Option<Instant> {
        self.audio_recheck
    }

    /// Hand the ring buffer's reading side to an audio output
    ///
    /// Returns `None` without an audio stream or when already taken.
    pub fn take_sample_consumer(&mut self) -> Option<SampleConsumer> {
        self.audio.as_mut().and_then(|audio| audio.consumer.take())
    }

    fn emit(&self, event: PlayerEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }

    fn is_running(&self) -> bool {
        self.info.is_some() && !self.halted
    }

    fn ensure_running(&self) -> PlaybackResult<()> {
        match self.state() {
            PipelineState::Idle => Ok(()),
            other => Err(PlaybackError::InvalidState {
                expected: "idle".to_string(),
                actual: format!("{:?}", other).to_lowercase(),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------------

    /// Open `source`, select default streams and configure decoders
    ///
    /// Any failure here halts the pipeline.
    pub async fn initialize(&mut self, source: Bytes) -> PlaybackResult<MediaInfo> {
        if self.state() != PipelineState::Uninitialized {
            return Err(PlaybackError::InvalidState {
                expected: "uninitialized".to_string(),
                actual: format!("{:?}", self.state()).to_lowercase(),
            });
        }
        match self.initialize_internal(source).await {
            Ok(info) => Ok(info),
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn initialize_internal(&mut self, source: Bytes) -> PlaybackResult<MediaInfo> {
        let mut info = self.demuxer.initialize(source).await?;
        let selection = info.select_defaults();
        info!(
            streams = info.streams.len(),
            duration_secs = info.duration_seconds(),
            video = ?selection.video,
            audio = ?selection.audio,
            "Source opened"
        );
        self.queues = PacketQueueManager::new(&self.config.pipeline, selection);

        if let Some(index) = selection.video {
            let stream = Self::descriptor(&info, index)?;
            self.open_video(&stream).await?;
        }
        if let Some(index) = selection.audio {
            let stream = Self::descriptor(&info, index)?;
            self.open_audio(&stream).await?;
        }

        self.info = Some(info.clone());
        self.emit(PlayerEvent::InitializationComplete {
            streams: info.streams.clone(),
            duration_micros: info.duration_micros,
        });

        // Prime the buffers so the first frame can be shown before playback
        self.queues.refill(self.demuxer.as_mut()).await?;
        self.feed_video().await?;
        self.feed_audio().await?;
        Ok(info)
    }

    fn descriptor(info: &MediaInfo, index: usize) -> PlaybackResult<StreamDescriptor> {
        info.stream(index)
            .cloned()
            .ok_or(PlaybackError::StreamNotFound { index })
    }

    async fn open_video(&mut self, stream: &StreamDescriptor) -> PlaybackResult<()> {
        let mut decoder =
            self.idle_video_decoder
                .take()
                .ok_or_else(|| PlaybackError::DecoderUnsupported {
                    codec: stream.codec.clone(),
                })?;
        let (tx, output) = output_channel(self.config.decoder_output_capacity);
        if !decoder.configure(stream, tx).await? {
            return Err(PlaybackError::DecoderUnsupported {
                codec: stream.codec.clone(),
            });
        }
        debug!(
            stream_index = stream.index,
            codec = decoder.codec(),
            "Video decoder configured"
        );

        self.video = Some(VideoPath {
            stream_index: stream.index,
            decoder,
            output,
            scheduler: VideoDecodeScheduler::new(&self.config.pipeline),
            frames: VideoFrameBuffer::new(self.config.pipeline.frame_buffer_target),
            last_drawn: None,
        });
        Ok(())
    }

    async fn open_audio(&mut self, stream: &StreamDescriptor) -> PlaybackResult<()> {
        let (channel_count, sample_rate) = stream.audio_params().unwrap_or((0, 0));
        if channel_count == 0 || sample_rate == 0 {
            return Err(PlaybackError::config(format!(
                "audio stream {} has {} channels at {} Hz",
                stream.index, channel_count, sample_rate
            )));
        }

        let (producer, consumer) = ring_buffer::with_duration(
            self.config.pipeline.buffer_duration_secs,
            sample_rate,
            channel_count,
        )?;
        let feeder = AudioFeeder::new(producer, channel_count, sample_rate)?;

        let mut candidates = std::mem::take(&mut self.idle_audio_decoders);
        let capacity = self.config.decoder_output_capacity;
        let (chosen, output) = match configure_first(&mut candidates, stream, capacity).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                self.idle_audio_decoders = candidates;
                return Err(PlaybackError::DecoderUnsupported {
                    codec: stream.codec.clone(),
                });
            }
            Err(err) => {
                self.idle_audio_decoders = candidates;
                return Err(err);
            }
        };
        let decoder = candidates.remove(chosen);

        self.audio = Some(AudioPath {
            stream_index: stream.index,
            decoder,
            spare: candidates,
            output,
            scheduler: AudioDecodeScheduler::new(&self.config.pipeline),
            feeder,
            consumer: Some(consumer),
            reported_underruns: 0,
        });
        self.emit(PlayerEvent::AudioOutputReady {
            channel_count,
            sample_rate,
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Playback control
    // ------------------------------------------------------------------------

    /// Start the clock, then adopt `sync` when given
    pub async fn start(&mut self, sync: Option<MediaTimeSync>) -> PlaybackResult<()> {
        self.ensure_running()?;
        if self.clock.start() {
            info!(position_ms = self.clock.current_position_millis(), "Playback started");
            self.emit(PlayerEvent::PlaybackStateChanged { playing: true });
        }
        if let Some(sync) = sync {
            self.clock.sync(sync);
        }
        self.feed_audio().await
    }

    /// Stop the clock, then adopt `sync` when given
    pub fn stop(&mut self, sync: Option<MediaTimeSync>) -> PlaybackResult<()> {
        self.ensure_running()?;
        self.audio_recheck = None;
        if self.clock.stop() {
            info!(position_ms = self.clock.current_position_millis(), "Playback stopped");
            self.emit(PlayerEvent::PlaybackStateChanged { playing: false });
        }
        if let Some(sync) = sync {
            self.clock.sync(sync);
        }
        Ok(())
    }

    /// Resynchronize the clock against an external authority
    pub fn update_media_time(&mut self, sync: MediaTimeSync) -> PlaybackResult<()> {
        self.ensure_running()?;
        self.clock.sync(sync);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Driver hooks
    // ------------------------------------------------------------------------

    /// Display tick: present a frame, keep video decoding and revive starved audio
    pub async fn on_render_tick(&mut self) -> PlaybackResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        if self.seek.is_seeking() {
            warn!("Render tick during seek, skipping");
            return Ok(());
        }

        self.present_frame();
        self.feed_video().await?;
        if self
            .audio
            .as_ref()
            .is_some_and(|audio| audio.scheduler.is_starved())
        {
            self.feed_audio().await?;
        }
        self.report_underruns();
        self.check_end_of_playback();
        Ok(())
    }

    /// The audio recheck deadline passed
    pub async fn on_audio_recheck(&mut self) -> PlaybackResult<()> {
        self.audio_recheck = None;
        if !self.is_running() {
            return Ok(());
        }
        self.feed_audio().await
    }

    /// Wait for the next decoded frame from either decoder
    ///
    /// Never completes when no decoder can deliver anything.
    pub async fn next_output(&mut self) -> DecoderOutput {
        let video = self.video.as_mut().map(|video| &mut video.output);
        let audio = self.audio.as_mut().map(|audio| &mut audio.output);
        match (video, audio) {
            (Some(video), Some(audio)) => tokio::select! {
                Some(frame) = video.recv() => DecoderOutput::Video(frame),
                Some(frame) = audio.recv() => DecoderOutput::Audio(frame),
                else => pending().await,
            },
            (Some(video), None) => match video.recv().await {
                Some(frame) => DecoderOutput::Video(frame),
                None => pending().await,
            },
            (None, Some(audio)) => match audio.recv().await {
                Some(frame) => DecoderOutput::Audio(frame),
                None => pending().await,
            },
            (None, None) => pending().await,
        }
    }

    /// Route a decoded frame to its buffer
    pub async fn on_decoder_output(&mut self, output: DecoderOutput) -> PlaybackResult<()> {
        match output {
            DecoderOutput::Video(frame) => match self.video.as_mut() {
                Some(video) => video.frames.push(frame),
                None => {
                    frame.release();
                    self.frames_discarded += 1;
                }
            },
            DecoderOutput::Audio(frame) => {
                if let Some(audio) = self.audio.as_mut() {
                    if let Err(err) = audio.feeder.write_frame(frame) {
                        debug!("Late audio frame only partially buffered: {}", err);
                    }
                }
                if self.is_running() && !self.seek.is_seeking() {
                    self.feed_audio().await?;
                }
            }
        }
        Ok(())
    }

    fn present_frame(&mut self) {
        let position = self.clock.current_position_micros();
        let Some(video) = self.video.as_mut() else {
            return;
        };
        video.scheduler.collect(&mut video.output, &mut video.frames);

        let Some(selection) = video.frames.select(position) else {
            return;
        };
        if selection.evicted > 0 {
            trace!(evicted = selection.evicted, "Dropped stale video frames");
        }
        let timestamp = selection.frame.timestamp_micros;
        if video.last_drawn == Some(timestamp) {
            return;
        }
        match self.renderer.draw(selection.frame) {
            Ok(()) => video.last_drawn = Some(timestamp),
            Err(err) => warn!(timestamp_us = timestamp, "Failed to draw frame: {}", err),
        }
    }

    async fn feed_video(&mut self) -> PlaybackResult<()> {
        if self.seek.is_seeking() {
            warn!("Video feed during seek, skipping");
            return Ok(());
        }
        let Some(video) = self.video.as_mut() else {
            return Ok(());
        };
        let outcome = video
            .scheduler
            .feed(
                &mut self.queues,
                self.demuxer.as_mut(),
                video.decoder.as_mut(),
                &mut video.output,
                &mut video.frames,
            )
            .await;
        match outcome {
            Ok(outcome) => {
                trace!(?outcome, "Video feed finished");
                Ok(())
            }
            Err(err) => Err(self.escalate(err).await),
        }
    }

    async fn feed_audio(&mut self) -> PlaybackResult<()> {
        if self.seek.is_seeking() {
            warn!("Audio feed during seek, skipping");
            return Ok(());
        }
        let playing = self.clock.is_playing();
        let Some(audio) = self.audio.as_mut() else {
            return Ok(());
        };
        let outcome = audio
            .scheduler
            .feed(
                &mut self.queues,
                self.demuxer.as_mut(),
                audio.decoder.as_mut(),
                &mut audio.output,
                &mut audio.feeder,
                playing,
            )
            .await;
        match outcome {
            Ok(AudioFeedOutcome::RecheckAfter(delay)) => {
                trace!(delay_ms = delay.as_millis() as u64, "Audio recheck scheduled");
                self.audio_recheck = Some(Instant::now() + delay);
                Ok(())
            }
            Ok(AudioFeedOutcome::Skipped) => Ok(()),
            Ok(outcome) => {
                trace!(?outcome, "Audio feed finished");
                self.audio_recheck = None;
                Ok(())
            }
            Err(err) => Err(self.escalate(err).await),
        }
    }

    fn report_underruns(&mut self) {
        let Some(audio) = self.audio.as_mut() else {
            return;
        };
        let underruns = audio.feeder.ring_stats().underrun_count;
        if underruns > audio.reported_underruns {
            warn!(
                new = underruns - audio.reported_underruns,
                total = underruns,
                "Audio output ran out of samples"
            );
            audio.reported_underruns = underruns;
        }
    }

    fn check_end_of_playback(&mut self) {
        if self.ended_notified || !self.queues.is_ended() || !self.queues.is_empty() {
            return;
        }
        let video_done = self.video.as_ref().map_or(true, |video| {
            video.decoder.queue_depth() == 0
                && match video.frames.len() {
                    0 => true,
                    1 => video.last_drawn == video.frames.timestamps().next(),
                    _ => false,
                }
        });
        let audio_done = self.audio.as_ref().map_or(true, |audio| {
            audio.decoder.queue_depth() == 0 && audio.feeder.buffered_samples() == 0
        });
        if !video_done || !audio_done {
            return;
        }

        if let Some(video) = self.video.as_mut() {
            video.frames.clear();
        }
        self.ended_notified = true;
        self.audio_recheck = None;
        if self.clock.stop() {
            self.emit(PlayerEvent::PlaybackStateChanged { playing: false });
        }
        info!(position_ms = self.clock.current_position_millis(), "Playback ended");
        self.emit(PlayerEvent::PlaybackEnded);
    }

    // ------------------------------------------------------------------------
    // Seeking
    // ------------------------------------------------------------------------

    /// Flush every component and resume from `target_seconds`
    ///
    /// `wall_origin_millis` is the wall-clock time the target corresponds to;
    /// the clock's current time when `None`. A failure after flushing has
    /// started halts the pipeline. Dropping the returned future part way
    /// through leaves the pipeline `Idle` with whatever was already flushed
    /// released; seeking again repositions it.
    pub async fn seek(
        &mut self,
        target_seconds: f64,
        wall_origin_millis: Option<f64>,
    ) -> PlaybackResult<SeekReport> {
        self.ensure_running()?;
        let info = self.info.as_ref().ok_or_else(|| PlaybackError::InvalidState {
            expected: "initialized".to_string(),
            actual: "uninitialized".to_string(),
        })?;
        let plan = self.seek.plan(target_seconds, self.queues.selection(), info)?;

        let seek = self.seek.begin(&plan)?;
        info!(
            target_seconds,
            stream_index = ?plan.stream_index,
            timestamp = plan.timestamp,
            "Seeking"
        );
        self.emit(PlayerEvent::Buffering { buffering: true });

        let landed = match self.reposition(&plan, wall_origin_millis).await {
            Ok(landed) => landed,
            Err(err) => {
                seek.abort();
                return Err(self.fail(err).await);
            }
        };
        seek.complete();
        let report = SeekReport {
            target_seconds: plan.target_seconds,
            media_time_seconds: landed.media_time_seconds,
            packets_released: landed.packets_released,
            frames_released: landed.frames_released,
            samples_drained: landed.samples_drained,
            on_resume: self.stats(),
        };
        debug!(?report, "Seek complete");
        self.emit(PlayerEvent::MediaTimeOffset {
            media_time_seconds: report.media_time_seconds,
        });
        self.emit(PlayerEvent::Buffering { buffering: false });

        self.feed_video().await?;
        self.feed_audio().await?;
        Ok(report)
    }

    async fn reposition(
        &mut self,
        plan: &SeekPlan,
        wall_origin_millis: Option<f64>,
    ) -> PlaybackResult<Landing> {
        // Decoder work must settle before anything downstream is cleared
        let mut frames_released = self.discard_decoder_output();
        self.flush_decoders().await?;
        frames_released += self.discard_decoder_output();
        self.audio_recheck = None;
        if let Some(audio) = self.audio.as_mut() {
            audio.scheduler.reset();
        }

        let packets_released = self.queues.reset();
        if let Some(video) = self.video.as_mut() {
            frames_released += video.frames.clear();
            video.last_drawn = None;
        }
        let samples_drained = self.audio.as_ref().map_or(0, |audio| audio.feeder.drain());
        debug!(
            packets_released,
            frames_released, samples_drained, "Pipeline flushed for seek"
        );

        self.demuxer
            .seek(plan.stream_index, plan.timestamp, SeekFlags::backward())
            .await
            .map_err(|e| PlaybackError::SeekFailed {
                target_seconds: plan.target_seconds,
                reason: e.to_string(),
            })?;

        let origin = wall_origin_millis.unwrap_or_else(|| self.clock.now_millis());
        self.clock.retime(plan.target_seconds * 1000.0, origin);
        self.ended_notified = false;

        self.queues.refill(self.demuxer.as_mut()).await?;
        let first_packet = match plan.authority {
            Some(kind) => {
                await_first_packet(
                    &mut self.queues,
                    self.demuxer.as_mut(),
                    kind,
                    self.config.pipeline.starvation_backoff(),
                    self.config.pipeline.max_transient_retries,
                )
                .await?
            }
            None => None,
        };

        Ok(Landing {
            media_time_seconds: first_packet.unwrap_or(plan.target_seconds),
            packets_released,
            frames_released,
            samples_drained,
        })
    }

    async fn flush_decoders(&mut self) -> PlaybackResult<()> {
        if let Some(video) = self.video.as_mut() {
            video.decoder.flush().await?;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.flush().await?;
        }
        Ok(())
    }

    fn discard_decoder_output(&mut self) -> usize {
        let mut released = 0;
        if let Some(video) = self.video.as_mut() {
            while let Some(frame) = video.output.try_recv() {
                frame.release();
                released += 1;
            }
        }
        if let Some(audio) = self.audio.as_mut() {
            while audio.output.try_recv().is_some() {}
        }
        self.frames_discarded += released as u64;
        released
    }

    // ------------------------------------------------------------------------
    // Stream switching
    // ------------------------------------------------------------------------

    /// Play stream `index` in place of the current stream of `kind`
    ///
    /// The new stream starts at the current clock position. An audio stream
    /// must match the ring buffer's channel count and sample rate.
    pub async fn change_stream(&mut self, kind: StreamKind, index: usize) -> PlaybackResult<()> {
        self.ensure_running()?;
        let info = self.info.as_ref().ok_or_else(|| PlaybackError::InvalidState {
            expected: "initialized".to_string(),
            actual: "uninitialized".to_string(),
        })?;
        let stream = info
            .stream(index)
            .filter(|stream| stream.kind == kind)
            .cloned()
            .ok_or(PlaybackError::StreamNotFound { index })?;

        match kind {
            StreamKind::Video => {
                let video = self
                    .video
                    .as_ref()
                    .ok_or_else(|| PlaybackError::config("source has no video to switch"))?;
                if video.stream_index == index {
                    return Ok(());
                }
            }
            StreamKind::Audio => {
                let audio = self
                    .audio
                    .as_ref()
                    .ok_or_else(|| PlaybackError::config("source has no audio to switch"))?;
                if audio.stream_index == index {
                    return Ok(());
                }
                let layout = (audio.feeder.channel_count(), audio.feeder.sample_rate());
                if stream.audio_params() != Some(layout) {
                    return Err(PlaybackError::config(format!(
                        "audio stream {} does not match the output layout of {} channels at {} Hz",
                        index, layout.0, layout.1
                    )));
                }
            }
            other => {
                return Err(PlaybackError::config(format!(
                    "{} streams cannot be played",
                    other
                )))
            }
        }

        if let Err(err) = self.reconfigure(&stream).await {
            return Err(self.fail(err).await);
        }
        if let Some(info) = self.info.as_mut() {
            info.select(kind, index)?;
        }
        let released = self.queues.retarget(kind, index)?;
        info!(%kind, stream_index = index, released, "Stream changed");
        self.emit(PlayerEvent::StreamChanged { kind, index });

        let position_secs = (self.clock.current_position_millis() / 1000.0).max(0.0);
        self.seek(position_secs, None).await.map(|_| ())
    }

    async fn reconfigure(&mut self, stream: &StreamDescriptor) -> PlaybackResult<()> {
        let capacity = self.config.decoder_output_capacity;
        self.discard_decoder_output();

        match stream.kind {
            StreamKind::Video => {
                let Some(video) = self.video.as_mut() else {
                    return Ok(());
                };
                video.decoder.flush().await?;
                while let Some(frame) = video.output.try_recv() {
                    frame.release();
                }
                let (tx, output) = output_channel(capacity);
                if !video.decoder.configure(stream, tx).await? {
                    return Err(PlaybackError::DecoderUnsupported {
                        codec: stream.codec.clone(),
                    });
                }
                video.output = output;
                video.stream_index = stream.index;
            }
            StreamKind::Audio => {
                let Some(audio) = self.audio.as_mut() else {
                    return Ok(());
                };
                audio.decoder.flush().await?;
                while audio.output.try_recv().is_some() {}

                let (tx, output) = output_channel(capacity);
                if audio.decoder.configure(stream, tx).await? {
                    audio.output = output;
                } else {
                    warn!(
                        codec = audio.decoder.codec(),
                        stream_index = stream.index,
                        "Audio decoder does not support stream, trying alternates"
                    );
                    let (chosen, output) = configure_first(&mut audio.spare, stream, capacity)
                        .await?
                        .ok_or_else(|| PlaybackError::DecoderUnsupported {
                            codec: stream.codec.clone(),
                        })?;
                    std::mem::swap(&mut audio.decoder, &mut audio.spare[chosen]);
                    audio.output = output;
                }
                audio.stream_index = stream.index;
            }
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Errors and teardown
    // ------------------------------------------------------------------------

    async fn escalate(&mut self, err: PlaybackError) -> PlaybackError {
        if err.is_recoverable() {
            warn!("Recoverable playback error: {}", err);
            self.emit(PlayerEvent::Error {
                message: err.to_string(),
                recoverable: true,
            });
            err
        } else {
            self.fail(err).await
        }
    }

    async fn fail(&mut self, err: PlaybackError) -> PlaybackError {
        if !self.halted {
            error!(category = ?err.category(), "Playback halted: {}", err);
            self.release_all().await;
            self.halted = true;
            self.emit(PlayerEvent::Error {
                message: err.to_string(),
                recoverable: false,
            });
        }
        err
    }

    async fn release_all(&mut self) {
        self.discard_decoder_output();
        if let Err(err) = self.flush_decoders().await {
            debug!("Decoder flush failed during teardown: {}", err);
        }
        self.discard_decoder_output();

        self.queues.clear();
        if let Some(video) = self.video.as_mut() {
            video.frames.clear();
        }
        if let Some(audio) = self.audio.as_ref() {
            audio.feeder.drain();
        }
        self.audio_recheck = None;
        self.seek.abort();
        if self.clock.stop() {
            self.emit(PlayerEvent::PlaybackStateChanged { playing: false });
        }
    }

    /// Release every buffered packet, frame and sample
    pub async fn shutdown(&mut self) {
        if !self.halted {
            self.release_all().await;
        }
        info!("Pipeline shut down");
    }

    /// Counter snapshot
    pub fn stats(&self) -> PipelineStats {
        let (frames_buffered, frames_released) = self.video.as_ref().map_or((0, 0), |video| {
            (video.frames.len(), video.frames.stats().frames_released)
        });
        let mut packets_decoded = 0;
        let mut decode_errors = 0;
        if let Some(video) = self.video.as_ref() {
            let stats = video.scheduler.stats();
            packets_decoded += stats.packets_submitted;
            decode_errors += stats.decode_errors;
        }
        let (ring_overflows, ring_underruns) = match self.audio.as_ref() {
            Some(audio) => {
                let stats = audio.scheduler.stats();
                packets_decoded += stats.packets_submitted;
                decode_errors += stats.decode_errors;
                (
                    audio.feeder.stats().overflows,
                    audio.feeder.ring_stats().underrun_count,
                )
            }
            None => (0, 0),
        };

        PipelineStats {
            state: self.state(),
            playing: self.clock.is_playing(),
            position_millis: self.clock.current_position_millis(),
            video_packets_queued: self.queues.len(StreamKind::Video),
            audio_packets_queued: self.queues.len(StreamKind::Audio),
            frames_buffered,
            frames_released: frames_released + self.frames_discarded,
            frames_drawn: self.renderer.stats().frames_drawn,
            buffered_audio_secs: self.buffered_audio_secs(),
            ring_overflows,
            ring_underruns,
            packets_decoded,
            decode_errors,
            seeks_completed: self.seek.completed(),
            seeks_abandoned: self.seek.abandoned(),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state())
            .field("clock", &self.clock.snapshot())
            .field("queues", &self.queues)
            .finish_non_exhaustive()
    }
}

/// Configure the first decoder in `candidates` that accepts `stream`
///
/// Returns its position and the receiver for its output.
async fn configure_first(
    candidates: &mut [AudioDecoder],
    stream: &StreamDescriptor,
    capacity: usize,
) -> PlaybackResult<Option<(usize, FrameReceiver<DecodedAudioFrame>)>> {
    for (position, decoder) in candidates.iter_mut().enumerate() {
        let (tx, output) = output_channel(capacity);
        if decoder.configure(stream, tx).await? {
            if position > 0 {
                info!(codec = decoder.codec(), "Using fallback audio decoder");
            }
            debug!(
                stream_index = stream.index,
                codec = decoder.codec(),
                "Audio decoder configured"
            );
            return Ok(Some((position, output)));
        }
        warn!(
            codec = decoder.codec(),
            stream_index = stream.index,
            "Audio decoder does not support stream"
        );
    }
    Ok(None)
}
