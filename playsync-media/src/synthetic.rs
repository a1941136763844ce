//! Deterministic collaborators for headless runs and tests
//!
//! [`SyntheticDemuxer`] generates a timeline of packets for configurable
//! video and audio streams; [`ScriptedDemuxer`] replays a fixed list of read
//! results. The decoders turn packets into frames without real codecs, and
//! [`RecordingRenderer`] remembers what it was asked to draw. Every
//! collaborator exposes a cloneable probe for inspecting it after it has
//! been moved into a pipeline.

use crate::decoder::{Decoder, FrameSender};
use crate::demuxer::{DemuxError, Demuxer, PacketBatch, SeekFlags};
use crate::frame::{DecodedAudioFrame, DecodedVideoFrame, SampleData, SampleFormat};
use crate::packet::{Packet, TimeBase, MICROS_PER_SECOND};
use crate::render::{FrameRenderer, RenderBackend, RenderStats};
use crate::stream::{MediaInfo, StreamDescriptor, StreamKind};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use playsync_core::{PlaybackError, PlaybackResult};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

// ============================================================================
// DEMUXERS
// ============================================================================

/// Recorded demuxer activity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemuxerActivity {
    /// Calls to `read_packets`
    pub reads: u64,
    /// Packets handed out
    pub packets: u64,
    /// Seek requests as `(stream_index, timestamp)`
    pub seeks: Vec<(Option<usize>, i64)>,
}

/// Shared view of a demuxer's activity
#[derive(Debug, Clone, Default)]
pub struct DemuxerProbe {
    activity: Arc<Mutex<DemuxerActivity>>,
}

impl DemuxerProbe {
    /// Number of reads issued so far
    pub fn reads(&self) -> u64 {
        self.activity.lock().reads
    }

    /// Packets handed out so far
    pub fn packets(&self) -> u64 {
        self.activity.lock().packets
    }

    /// Seek requests so far
    pub fn seeks(&self) -> Vec<(Option<usize>, i64)> {
        self.activity.lock().seeks.clone()
    }

    /// Full activity snapshot
    pub fn snapshot(&self) -> DemuxerActivity {
        self.activity.lock().clone()
    }
}

/// One scripted demuxer read
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    /// Return these packets, grouped by stream index
    Batch(Vec<(usize, Vec<Packet>)>),
    /// Ask to be retried
    WouldBlock,
    /// Report end of stream
    EndOfStream,
    /// Fail unrecoverably
    Fatal(String),
}

/// Demuxer replaying a fixed sequence of reads
///
/// Once the script is exhausted every read reports end of stream.
#[derive(Debug)]
pub struct ScriptedDemuxer {
    info: MediaInfo,
    script: VecDeque<ScriptedRead>,
    probe: DemuxerProbe,
}

impl ScriptedDemuxer {
    /// Create a demuxer with an empty stream list
    pub fn new(script: Vec<ScriptedRead>) -> Self {
        Self {
            info: MediaInfo::new(Vec::new(), 0),
            script: script.into(),
            probe: DemuxerProbe::default(),
        }
    }

    /// Report `info` from `initialize`
    pub fn with_media_info(mut self, info: MediaInfo) -> Self {
        self.info = info;
        self
    }

    /// Append a read to the script
    pub fn push(&mut self, read: ScriptedRead) {
        self.script.push_back(read);
    }

    /// Activity probe
    pub fn probe(&self) -> DemuxerProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl Demuxer for ScriptedDemuxer {
    async fn initialize(&mut self, _source: Bytes) -> Result<MediaInfo, DemuxError> {
        Ok(self.info.clone())
    }

    async fn read_packets(&mut self, _limit_bytes: usize) -> Result<PacketBatch, DemuxError> {
        let mut activity = self.probe.activity.lock();
        activity.reads += 1;
        match self.script.pop_front().unwrap_or(ScriptedRead::EndOfStream) {
            ScriptedRead::Batch(groups) => {
                let mut batch = PacketBatch::new();
                for (stream_index, packets) in groups {
                    activity.packets += packets.len() as u64;
                    batch.entry(stream_index).or_default().extend(packets);
                }
                Ok(batch)
            }
            ScriptedRead::WouldBlock => Err(DemuxError::WouldBlock {
                reason: "scripted".to_string(),
            }),
            ScriptedRead::EndOfStream => Err(DemuxError::EndOfStream),
            ScriptedRead::Fatal(reason) => Err(DemuxError::Fatal { reason }),
        }
    }

    async fn seek(
        &mut self,
        stream_index: Option<usize>,
        timestamp: i64,
        _flags: SeekFlags,
    ) -> Result<(), DemuxError> {
        self.probe.activity.lock().seeks.push((stream_index, timestamp));
        Ok(())
    }
}

/// Video stream generated by [`SyntheticDemuxer`]
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticVideo {
    /// Frames per second
    pub fps: u32,
    /// Picture width
    pub width: u32,
    /// Picture height
    pub height: u32,
    /// Every n-th frame is a keyframe
    pub keyframe_interval: u32,
}

impl Default for SyntheticVideo {
    fn default() -> Self {
        Self {
            fps: 25,
            width: 64,
            height: 36,
            keyframe_interval: 25,
        }
    }
}

/// Audio stream generated by [`SyntheticDemuxer`]
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticAudio {
    /// Channels
    pub channel_count: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frames per channel carried by each packet
    pub frames_per_packet: u32,
}

impl Default for SyntheticAudio {
    fn default() -> Self {
        Self {
            channel_count: 2,
            sample_rate: 48_000,
            frames_per_packet: 1_024,
        }
    }
}

/// Layout of a generated source
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticMedia {
    /// Source duration in seconds
    pub duration_secs: f64,
    /// Video streams, indexed first
    pub video: Vec<SyntheticVideo>,
    /// Audio streams, indexed after video
    pub audio: Vec<SyntheticAudio>,
    /// Append a subtitle stream that produces no packets
    pub subtitles: bool,
    /// Payload size of every packet
    pub packet_bytes: usize,
}

impl Default for SyntheticMedia {
    fn default() -> Self {
        Self {
            duration_secs: 2.0,
            video: vec![SyntheticVideo::default()],
            audio: vec![SyntheticAudio::default()],
            subtitles: false,
            packet_bytes: 512,
        }
    }
}

impl SyntheticMedia {
    /// Stream table matching the generated packets
    pub fn media_info(&self) -> MediaInfo {
        let mut streams = Vec::new();
        for video in &self.video {
            streams.push(StreamDescriptor::video(
                streams.len(),
                "synthetic_video",
                video.width,
                video.height,
            ));
        }
        for audio in &self.audio {
            streams.push(StreamDescriptor::audio(
                streams.len(),
                "synthetic_audio",
                audio.channel_count,
                audio.sample_rate,
            ));
        }
        if self.subtitles {
            streams.push(StreamDescriptor::other(
                streams.len(),
                StreamKind::Subtitle,
                "subrip",
            ));
        }
        MediaInfo::new(
            streams,
            (self.duration_secs * MICROS_PER_SECOND as f64).round() as i64,
        )
    }
}

#[derive(Debug, Clone)]
enum Track {
    Video {
        params: SyntheticVideo,
        time_base: TimeBase,
        next: u64,
    },
    Audio {
        params: SyntheticAudio,
        time_base: TimeBase,
        next: u64,
    },
}

impl Track {
    fn next_seconds(&self) -> f64 {
        match self {
            Track::Video { params, next, .. } => *next as f64 / params.fps.max(1) as f64,
            Track::Audio { params, next, .. } => {
                *next as f64 * params.frames_per_packet as f64 / params.sample_rate.max(1) as f64
            }
        }
    }

    fn time_base(&self) -> TimeBase {
        match self {
            Track::Video { time_base, .. } | Track::Audio { time_base, .. } => *time_base,
        }
    }

    fn take_packet(&mut self, stream_index: usize, payload: Bytes) -> Packet {
        match self {
            Track::Video {
                params,
                time_base,
                next,
            } => {
                let pts = time_base.seconds_to_ticks(*next as f64 / params.fps.max(1) as f64);
                let keyframe = *next % params.keyframe_interval.max(1) as u64 == 0;
                *next += 1;
                let packet = Packet::new(stream_index, pts, *time_base, payload);
                if keyframe {
                    packet.keyframe()
                } else {
                    packet
                }
            }
            Track::Audio {
                params,
                time_base,
                next,
            } => {
                let pts = (*next * params.frames_per_packet as u64) as i64;
                *next += 1;
                Packet::new(stream_index, pts, *time_base, payload).keyframe()
            }
        }
    }

    fn reposition(&mut self, target_secs: f64) {
        let target_secs = target_secs.max(0.0);
        match self {
            Track::Video { params, next, .. } => {
                let frame = (target_secs * params.fps as f64).floor() as u64;
                let interval = params.keyframe_interval.max(1) as u64;
                *next = frame - frame % interval;
            }
            Track::Audio { params, next, .. } => {
                let per_packet = params.frames_per_packet.max(1) as f64;
                *next = (target_secs * params.sample_rate as f64 / per_packet).floor() as u64;
            }
        }
    }
}

/// Fault injection for [`SyntheticDemuxer`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemuxerFaults {
    /// Reads that answer would-block before data is produced
    pub would_block_reads: u32,
    /// Fail every read after this many successful ones
    pub fatal_after_reads: Option<u64>,
    /// Reject every seek
    pub fail_seeks: bool,
    /// Reads that answer would-block after each successful seek
    pub would_block_after_seek: u32,
}

/// Demuxer generating interleaved packets on a fixed timeline
#[derive(Debug)]
pub struct SyntheticDemuxer {
    media: SyntheticMedia,
    info: MediaInfo,
    tracks: Vec<Track>,
    faults: DemuxerFaults,
    blocked_reads: u32,
    stalls_after_seek: u32,
    successful_reads: u64,
    probe: DemuxerProbe,
}

impl SyntheticDemuxer {
    /// Create a demuxer for `media`
    pub fn new(media: SyntheticMedia) -> Self {
        let info = media.media_info();
        let mut tracks = Vec::new();
        for params in &media.video {
            tracks.push(Track::Video {
                params: params.clone(),
                time_base: TimeBase::new(1, 90_000),
                next: 0,
            });
        }
        for params in &media.audio {
            tracks.push(Track::Audio {
                params: params.clone(),
                time_base: TimeBase::new(1, params.sample_rate.max(1) as i32),
                next: 0,
            });
        }
        Self {
            media,
            info,
            tracks,
            faults: DemuxerFaults::default(),
            blocked_reads: 0,
            stalls_after_seek: 0,
            successful_reads: 0,
            probe: DemuxerProbe::default(),
        }
    }

    /// Inject faults
    pub fn with_faults(mut self, faults: DemuxerFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Activity probe
    pub fn probe(&self) -> DemuxerProbe {
        self.probe.clone()
    }

    fn next_track(&self) -> Option<usize> {
        let duration = self.media.duration_secs;
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, track)| track.next_seconds() < duration)
            .min_by(|(_, a), (_, b)| a.next_seconds().total_cmp(&b.next_seconds()))
            .map(|(index, _)| index)
    }
}

#[async_trait]
impl Demuxer for SyntheticDemuxer {
    async fn initialize(&mut self, source: Bytes) -> Result<MediaInfo, DemuxError> {
        debug!(
            source_bytes = source.len(),
            streams = self.info.streams.len(),
            "Synthetic demuxer initialized"
        );
        Ok(self.info.clone())
    }

    async fn read_packets(&mut self, limit_bytes: usize) -> Result<PacketBatch, DemuxError> {
        self.probe.activity.lock().reads += 1;

        if self.blocked_reads < self.faults.would_block_reads {
            self.blocked_reads += 1;
            return Err(DemuxError::WouldBlock {
                reason: "synthetic stall".to_string(),
            });
        }
        if self.stalls_after_seek > 0 {
            self.stalls_after_seek -= 1;
            return Err(DemuxError::WouldBlock {
                reason: "synthetic stall after seek".to_string(),
            });
        }
        if let Some(limit) = self.faults.fatal_after_reads {
            if self.successful_reads >= limit {
                return Err(DemuxError::Fatal {
                    reason: "synthetic read failure".to_string(),
                });
            }
        }

        let mut batch = PacketBatch::new();
        let mut bytes = 0usize;
        let mut produced = 0u64;
        while bytes < limit_bytes.max(1) {
            let Some(track_index) = self.next_track() else {
                break;
            };
            let payload = Bytes::from(vec![track_index as u8; self.media.packet_bytes]);
            let packet = self.tracks[track_index].take_packet(track_index, payload);
            bytes += packet.size().max(1);
            produced += 1;
            batch.entry(track_index).or_default().push(packet);
        }

        if produced == 0 {
            return Err(DemuxError::EndOfStream);
        }
        self.successful_reads += 1;
        self.probe.activity.lock().packets += produced;
        trace!(packets = produced, bytes, "Synthetic read");
        Ok(batch)
    }

    async fn seek(
        &mut self,
        stream_index: Option<usize>,
        timestamp: i64,
        _flags: SeekFlags,
    ) -> Result<(), DemuxError> {
        self.probe
            .activity
            .lock()
            .seeks
            .push((stream_index, timestamp));
        if self.faults.fail_seeks {
            return Err(DemuxError::Fatal {
                reason: "synthetic seek failure".to_string(),
            });
        }

        let target_secs = match stream_index {
            Some(index) => {
                let track = self.tracks.get(index).ok_or_else(|| DemuxError::Fatal {
                    reason: format!("no stream {}", index),
                })?;
                track.time_base().ticks_to_seconds(timestamp)
            }
            None => timestamp as f64 / MICROS_PER_SECOND as f64,
        };
        for track in &mut self.tracks {
            track.reposition(target_secs);
        }
        self.stalls_after_seek = self.faults.would_block_after_seek;
        debug!(target_secs, "Synthetic demuxer repositioned");
        Ok(())
    }
}

// ============================================================================
// DECODERS
// ============================================================================

/// Recorded decoder activity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoderActivity {
    /// Stream indices the decoder was configured for
    pub configured: Vec<usize>,
    /// Packet timestamps submitted, in order
    pub decoded_pts: Vec<i64>,
    /// Frames emitted
    pub frames_emitted: u64,
    /// Flush calls
    pub flushes: u64,
}

#[derive(Debug, Default)]
struct DecoderShared {
    activity: DecoderActivity,
    pending: VecDeque<Packet>,
}

/// Shared view of a decoder's activity
#[derive(Debug, Clone, Default)]
pub struct DecoderProbe {
    shared: Arc<Mutex<DecoderShared>>,
}

impl DecoderProbe {
    /// Activity snapshot
    pub fn snapshot(&self) -> DecoderActivity {
        self.shared.lock().activity.clone()
    }

    /// Packets accepted but not yet emitted
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Number of flushes so far
    pub fn flushes(&self) -> u64 {
        self.shared.lock().activity.flushes
    }
}

/// Decoder turning each video packet into one frame immediately
#[derive(Debug)]
pub struct SyntheticVideoDecoder {
    supported: bool,
    fail_at_pts: Option<i64>,
    size: (u32, u32),
    output: Option<FrameSender<DecodedVideoFrame>>,
    probe: DecoderProbe,
}

impl SyntheticVideoDecoder {
    /// Create a decoder that supports every stream
    pub fn new() -> Self {
        Self {
            supported: true,
            fail_at_pts: None,
            size: (0, 0),
            output: None,
            probe: DecoderProbe::default(),
        }
    }

    /// Report every configuration as unsupported
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Fail unrecoverably on the packet with this timestamp
    pub fn failing_at(mut self, pts: i64) -> Self {
        self.fail_at_pts = Some(pts);
        self
    }

    /// Activity probe
    pub fn probe(&self) -> DecoderProbe {
        self.probe.clone()
    }
}

impl Default for SyntheticVideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Decoder for SyntheticVideoDecoder {
    type Output = DecodedVideoFrame;

    fn codec(&self) -> &str {
        "synthetic_video"
    }

    async fn configure(
        &mut self,
        stream: &StreamDescriptor,
        output: FrameSender<DecodedVideoFrame>,
    ) -> PlaybackResult<bool> {
        self.probe.shared.lock().activity.configured.push(stream.index);
        if !self.supported {
            return Ok(false);
        }
        self.size = stream.video_params().unwrap_or((1, 1));
        self.output = Some(output);
        Ok(true)
    }

    async fn decode(&mut self, packet: Packet) -> PlaybackResult<()> {
        let output = self.output.as_ref().ok_or_else(|| PlaybackError::InvalidState {
            expected: "configured".to_string(),
            actual: "unconfigured".to_string(),
        })?;
        self.probe
            .shared
            .lock()
            .activity
            .decoded_pts
            .push(packet.pts);

        if self.fail_at_pts == Some(packet.pts) {
            return Err(PlaybackError::FatalDecode {
                codec: "synthetic_video".to_string(),
                reason: format!("corrupt packet at pts {}", packet.pts),
            });
        }

        let frame = DecodedVideoFrame::new(packet.pts_micros(), self.size.0, self.size.1, packet.data);
        output.send(frame).await?;
        self.probe.shared.lock().activity.frames_emitted += 1;
        Ok(())
    }

    async fn flush(&mut self) -> PlaybackResult<()> {
        self.probe.shared.lock().activity.flushes += 1;
        Ok(())
    }

    fn queue_depth(&self) -> usize {
        0
    }
}

/// How [`SyntheticAudioDecoder`] emits frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioDecodeMode {
    /// Emit a frame for every packet during `decode`
    Immediate,
    /// Hold packets until [`AudioDecoderControl::complete`] or `flush`
    Deferred,
    /// Emit immediately and report no queue depth
    Fallback,
}

/// Decoder turning each audio packet into one frame of silence-level ramp
#[derive(Debug)]
pub struct SyntheticAudioDecoder {
    mode: AudioDecodeMode,
    supported: bool,
    format: SampleFormat,
    frames_per_packet: usize,
    layout: Arc<Mutex<(u16, u32)>>,
    output: Arc<Mutex<Option<FrameSender<DecodedAudioFrame>>>>,
    probe: DecoderProbe,
}

/// Handle completing deferred audio decodes from outside the pipeline
#[derive(Debug, Clone)]
pub struct AudioDecoderControl {
    shared: Arc<Mutex<DecoderShared>>,
    output: Arc<Mutex<Option<FrameSender<DecodedAudioFrame>>>>,
    format: SampleFormat,
    frames_per_packet: usize,
    layout: Arc<Mutex<(u16, u32)>>,
}

impl SyntheticAudioDecoder {
    /// Create a decoder in the given mode emitting `frames_per_packet` frames
    pub fn new(mode: AudioDecodeMode, frames_per_packet: usize) -> Self {
        Self {
            mode,
            supported: true,
            format: SampleFormat::F32,
            frames_per_packet,
            layout: Arc::new(Mutex::new((0, 0))),
            output: Arc::new(Mutex::new(None)),
            probe: DecoderProbe::default(),
        }
    }

    /// Report every configuration as unsupported
    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    /// Emit samples in `format` (F32 planar, integers interleaved)
    pub fn with_format(mut self, format: SampleFormat) -> Self {
        self.format = format;
        self
    }

    /// Activity probe
    pub fn probe(&self) -> DecoderProbe {
        self.probe.clone()
    }

    /// Control handle for deferred decodes
    pub fn control(&self) -> AudioDecoderControl {
        AudioDecoderControl {
            shared: self.probe.shared.clone(),
            output: self.output.clone(),
            format: self.format,
            frames_per_packet: self.frames_per_packet,
            layout: self.layout.clone(),
        }
    }

    fn emit_now(&self, packet: &Packet) -> DecodedAudioFrame {
        let (channel_count, sample_rate) = *self.layout.lock();
        synthesize_audio(
            packet,
            self.format,
            self.frames_per_packet,
            channel_count,
            sample_rate,
        )
    }

    fn sender(&self) -> PlaybackResult<FrameSender<DecodedAudioFrame>> {
        self.output
            .lock()
            .clone()
            .ok_or_else(|| PlaybackError::InvalidState {
                expected: "configured".to_string(),
                actual: "unconfigured".to_string(),
            })
    }
}

fn synthesize_audio(
    packet: &Packet,
    format: SampleFormat,
    frames: usize,
    channel_count: u16,
    sample_rate: u32,
) -> DecodedAudioFrame {
    let channels = channel_count.max(1) as usize;
    let timestamp = packet.pts_micros();
    let ramp = |i: usize| ((i % 64) as f32 / 64.0) * 0.25;

    match format {
        SampleFormat::F32 => DecodedAudioFrame::planar(
            timestamp,
            sample_rate,
            (0..channels)
                .map(|_| SampleData::F32((0..frames).map(ramp).collect()))
                .collect(),
        ),
        SampleFormat::I16 => DecodedAudioFrame::interleaved(
            timestamp,
            sample_rate,
            channel_count,
            SampleData::I16(
                (0..frames * channels)
                    .map(|i| (ramp(i / channels) * 32_767.0) as i16)
                    .collect(),
            ),
        ),
        SampleFormat::U8 => DecodedAudioFrame::interleaved(
            timestamp,
            sample_rate,
            channel_count,
            SampleData::U8(
                (0..frames * channels)
                    .map(|i| (128.0 + ramp(i / channels) * 127.0) as u8)
                    .collect(),
            ),
        ),
        other => DecodedAudioFrame::interleaved(
            timestamp,
            sample_rate,
            channel_count,
            match other {
                SampleFormat::U16 => SampleData::U16(vec![32_768; frames * channels]),
                SampleFormat::U32 => SampleData::U32(vec![1 << 31; frames * channels]),
                SampleFormat::I8 => SampleData::I8(vec![0; frames * channels]),
                _ => SampleData::I32(vec![0; frames * channels]),
            },
        ),
    }
}

#[async_trait]
impl Decoder for SyntheticAudioDecoder {
    type Output = DecodedAudioFrame;

    fn codec(&self) -> &str {
        match self.mode {
            AudioDecodeMode::Fallback => "synthetic_audio_fallback",
            _ => "synthetic_audio",
        }
    }

    async fn configure(
        &mut self,
        stream: &StreamDescriptor,
        output: FrameSender<DecodedAudioFrame>,
    ) -> PlaybackResult<bool> {
        self.probe.shared.lock().activity.configured.push(stream.index);
        if !self.supported {
            return Ok(false);
        }
        *self.layout.lock() = stream.audio_params().unwrap_or((2, 48_000));
        *self.output.lock() = Some(output);
        Ok(true)
    }

    async fn decode(&mut self, packet: Packet) -> PlaybackResult<()> {
        let sender = self.sender()?;
        self.probe
            .shared
            .lock()
            .activity
            .decoded_pts
            .push(packet.pts);

        if self.mode == AudioDecodeMode::Deferred {
            self.probe.shared.lock().pending.push_back(packet);
            return Ok(());
        }

        let frame = self.emit_now(&packet);
        sender.send(frame).await?;
        self.probe.shared.lock().activity.frames_emitted += 1;
        Ok(())
    }

    async fn flush(&mut self) -> PlaybackResult<()> {
        let pending: Vec<Packet> = {
            let mut shared = self.probe.shared.lock();
            shared.activity.flushes += 1;
            shared.pending.drain(..).collect()
        };
        if pending.is_empty() {
            return Ok(());
        }
        let sender = self.sender()?;
        for packet in pending {
            sender.send(self.emit_now(&packet)).await?;
            self.probe.shared.lock().activity.frames_emitted += 1;
        }
        Ok(())
    }

    fn queue_depth(&self) -> usize {
        self.probe.shared.lock().pending.len()
    }

    fn reports_queue_depth(&self) -> bool {
        self.mode != AudioDecodeMode::Fallback
    }
}

impl AudioDecoderControl {
    /// Emit up to `count` deferred frames; returns how many were emitted
    pub async fn complete(&self, count: usize) -> PlaybackResult<usize> {
        let packets: Vec<Packet> = {
            let mut shared = self.shared.lock();
            let take = count.min(shared.pending.len());
            shared.pending.drain(..take).collect()
        };
        let sender = self
            .output
            .lock()
            .clone()
            .ok_or_else(|| PlaybackError::InvalidState {
                expected: "configured".to_string(),
                actual: "unconfigured".to_string(),
            })?;

        let (channel_count, sample_rate) = *self.layout.lock();
        let emitted = packets.len();
        for packet in packets {
            let frame = synthesize_audio(
                &packet,
                self.format,
                self.frames_per_packet,
                channel_count,
                sample_rate,
            );
            sender.send(frame).await?;
        }
        self.shared.lock().activity.frames_emitted += emitted as u64;
        Ok(emitted)
    }
}

// ============================================================================
// RENDERER
// ============================================================================

/// Renderer remembering the timestamp of every drawn frame
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    drawn: Arc<Mutex<Vec<i64>>>,
}

impl RecordingRenderer {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamps drawn so far, in order
    pub fn drawn(&self) -> Vec<i64> {
        self.drawn.lock().clone()
    }
}

impl FrameRenderer for RecordingRenderer {
    fn backend(&self) -> RenderBackend {
        RenderBackend::Software
    }

    fn draw(&mut self, frame: &DecodedVideoFrame) -> PlaybackResult<()> {
        self.drawn.lock().push(frame.timestamp_micros);
        Ok(())
    }

    fn stats(&self) -> RenderStats {
        let drawn = self.drawn.lock();
        RenderStats {
            frames_drawn: drawn.len() as u64,
            draw_errors: 0,
            last_timestamp_micros: drawn.last().copied(),
            surface_size: (0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::output_channel;

    #[tokio::test]
    async fn test_synthetic_demuxer_reaches_end() {
        let media = SyntheticMedia {
            duration_secs: 0.2,
            ..SyntheticMedia::default()
        };
        let mut demuxer = SyntheticDemuxer::new(media);
        let mut total = 0usize;
        loop {
            match demuxer.read_packets(4_096).await {
                Ok(batch) => total += batch.values().map(Vec::len).sum::<usize>(),
                Err(DemuxError::EndOfStream) => break,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        // 5 video frames at 25 fps, 10 audio packets of 1024 frames at 48 kHz
        assert_eq!(total, 5 + 10);
        assert_eq!(demuxer.probe().packets(), 15);
    }

    #[tokio::test]
    async fn test_synthetic_demuxer_seeks_to_keyframe() {
        let media = SyntheticMedia {
            duration_secs: 10.0,
            audio: Vec::new(),
            ..SyntheticMedia::default()
        };
        let mut demuxer = SyntheticDemuxer::new(media);
        demuxer
            .seek(Some(0), 90_000 * 3 + 45_000, SeekFlags::backward())
            .await
            .unwrap();

        let batch = demuxer.read_packets(1).await.unwrap();
        let first = &batch[&0][0];
        assert_eq!(first.pts_seconds(), 3.0);
        assert!(first.is_keyframe);
    }

    #[tokio::test]
    async fn test_deferred_audio_decoder_holds_work() {
        let (tx, mut rx) = output_channel(8);
        let mut decoder = SyntheticAudioDecoder::new(AudioDecodeMode::Deferred, 16);
        let stream = StreamDescriptor::audio(1, "synthetic_audio", 2, 48_000);
        assert!(decoder.configure(&stream, tx).await.unwrap());
        let control = decoder.control();

        for pts in 0..3 {
            let packet = Packet::new(1, pts, TimeBase::new(1, 48_000), Bytes::new());
            decoder.decode(packet).await.unwrap();
        }
        assert_eq!(decoder.queue_depth(), 3);
        assert!(rx.try_recv().is_none());

        assert_eq!(control.complete(2).await.unwrap(), 2);
        assert_eq!(decoder.queue_depth(), 1);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.sample_count, 16);
        assert_eq!(frame.channel_count, 2);
    }
}
