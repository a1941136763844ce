//! Video presentation and audio output
//!
//! Video frames are presented through a [`FrameRenderer`]. Audio leaves the
//! pipeline through the ring buffer: [`CpalAudioSink`] pulls fixed quanta
//! from the [`SampleConsumer`] on the device's real-time thread and keeps
//! the media time the host uses to resynchronize the clock.

use crate::frame::DecodedVideoFrame;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use playsync_core::{MediaTimeSync, PlaybackError, PlaybackResult, SampleConsumer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Interchangeable presentation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderBackend {
    /// CPU copy into a pixel surface
    #[default]
    Software,
    /// OpenGL texture upload
    OpenGl,
    /// wgpu texture upload
    Wgpu,
}

impl RenderBackend {
    /// Whether the backend draws on the GPU
    pub fn is_gpu(&self) -> bool {
        !matches!(self, RenderBackend::Software)
    }
}

/// Presentation counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Frames drawn
    pub frames_drawn: u64,
    /// Draw calls that failed
    pub draw_errors: u64,
    /// Timestamp of the last drawn frame
    pub last_timestamp_micros: Option<i64>,
    /// Current surface size
    pub surface_size: (u32, u32),
}

/// Consumer of decoded video frames
///
/// `draw` may be called with the same frame on consecutive ticks and must
/// not keep the frame beyond the call.
pub trait FrameRenderer: Send {
    /// Backend this renderer uses
    fn backend(&self) -> RenderBackend;

    /// Present `frame`
    fn draw(&mut self, frame: &DecodedVideoFrame) -> PlaybackResult<()>;

    /// Presentation counters
    fn stats(&self) -> RenderStats;
}

/// CPU renderer copying frames into an RGBA surface
pub struct SoftwareRenderer {
    surface: Vec<u8>,
    stats: Arc<Mutex<RenderStats>>,
}

impl SoftwareRenderer {
    /// Bytes per surface pixel
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Create a renderer with an empty surface
    pub fn new() -> Self {
        Self {
            surface: Vec::new(),
            stats: Arc::new(Mutex::new(RenderStats::default())),
        }
    }

    /// Shared view of the counters, readable while the renderer is in use
    pub fn stats_handle(&self) -> Arc<Mutex<RenderStats>> {
        self.stats.clone()
    }

    /// Current surface contents
    pub fn surface(&self) -> &[u8] {
        &self.surface
    }
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SoftwareRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareRenderer")
            .field("surface_bytes", &self.surface.len())
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

impl FrameRenderer for SoftwareRenderer {
    fn backend(&self) -> RenderBackend {
        RenderBackend::Software
    }

    fn draw(&mut self, frame: &DecodedVideoFrame) -> PlaybackResult<()> {
        let mut stats = self.stats.lock();
        if frame.display_width == 0 || frame.display_height == 0 {
            stats.draw_errors += 1;
            return Err(PlaybackError::Render {
                reason: format!(
                    "frame at {}us has an empty display size",
                    frame.timestamp_micros
                ),
            });
        }

        let size = (frame.display_width, frame.display_height);
        let len = size.0 as usize * size.1 as usize * Self::BYTES_PER_PIXEL;
        if stats.surface_size != size {
            debug!(width = size.0, height = size.1, "Resizing render surface");
            self.surface.resize(len, 0);
            stats.surface_size = size;
        }

        let copied = frame.data.len().min(len);
        self.surface[..copied].copy_from_slice(&frame.data[..copied]);
        self.surface[copied..].fill(0);

        stats.frames_drawn += 1;
        stats.last_timestamp_micros = Some(frame.timestamp_micros);
        Ok(())
    }

    fn stats(&self) -> RenderStats {
        self.stats.lock().clone()
    }
}

/// Media time derived from the audio frames the output has played
///
/// Updated from the real-time thread; read from anywhere.
#[derive(Debug)]
pub struct MediaTimeTracker {
    sample_rate: u32,
    output_latency_secs: f64,
    frames_played: AtomicU64,
    offset_bits: AtomicU64,
}

impl MediaTimeTracker {
    /// Create a tracker for output at `sample_rate`
    pub fn new(sample_rate: u32, output_latency_secs: f64) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            output_latency_secs: output_latency_secs.max(0.0),
            frames_played: AtomicU64::new(0),
            offset_bits: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    /// Count `frames` as played
    pub fn record_frames(&self, frames: u64) {
        self.frames_played.fetch_add(frames, Ordering::Relaxed);
    }

    /// Seconds of audio the device has consumed
    pub fn device_seconds(&self) -> f64 {
        self.frames_played.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    /// Anchor media time so that it reads `media_time_seconds` now
    pub fn apply_media_time_offset(&self, media_time_seconds: f64) {
        let offset = media_time_seconds - self.device_seconds();
        self.offset_bits.store(offset.to_bits(), Ordering::Relaxed);
    }

    /// Media time currently audible, never negative
    pub fn media_time_seconds(&self) -> f64 {
        let offset = f64::from_bits(self.offset_bits.load(Ordering::Relaxed));
        (self.device_seconds() - self.output_latency_secs + offset).max(0.0)
    }

    /// Position report for [`playsync_core::MediaClock::sync`]
    pub fn sync_point(&self, wall_origin_millis: f64) -> MediaTimeSync {
        MediaTimeSync {
            position_seconds: self.media_time_seconds(),
            wall_origin_millis,
        }
    }
}

/// Audio output parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSinkConfig {
    /// Interleaved channels in the ring buffer
    pub channel_count: u16,
    /// Sample rate of the ring buffer contents
    pub sample_rate: u32,
    /// Frames pulled from the ring buffer per read
    pub quantum_frames: usize,
    /// Output latency subtracted from the media time
    pub output_latency_secs: f64,
}

struct SinkShared {
    tracker: MediaTimeTracker,
    playing: AtomicBool,
    underruns: AtomicU64,
}

/// Audio output on the default cpal device
///
/// The device callback reads exactly one quantum per chunk from the ring
/// buffer. Shortfalls are played as silence and counted; nothing is logged
/// from the callback.
pub struct CpalAudioSink {
    stream: cpal::Stream,
    shared: Arc<SinkShared>,
    config: AudioSinkConfig,
}

impl CpalAudioSink {
    /// Open the default output device and start pulling from `consumer`
    ///
    /// The stream starts paused.
    pub fn open(consumer: SampleConsumer, config: AudioSinkConfig) -> PlaybackResult<Self> {
        if config.channel_count == 0 || config.sample_rate == 0 || config.quantum_frames == 0 {
            return Err(PlaybackError::config(format!(
                "unusable audio output: {} channels, {} Hz, {} frame quantum",
                config.channel_count, config.sample_rate, config.quantum_frames
            )));
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Render {
                reason: "no default audio output device".to_string(),
            })?;
        let supported = device
            .default_output_config()
            .map_err(|e| PlaybackError::Render {
                reason: format!("Failed to get default output config: {}", e),
            })?;

        let stream_config = cpal::StreamConfig {
            channels: config.channel_count as cpal::ChannelCount,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::new(SinkShared {
            tracker: MediaTimeTracker::new(config.sample_rate, config.output_latency_secs),
            playing: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
        });
        let quantum_samples = config.quantum_frames * config.channel_count as usize;
        let channels = config.channel_count as usize;

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(
                &device,
                &stream_config,
                consumer,
                shared.clone(),
                quantum_samples,
                channels,
            ),
            cpal::SampleFormat::I16 => build_stream::<i16>(
                &device,
                &stream_config,
                consumer,
                shared.clone(),
                quantum_samples,
                channels,
            ),
            cpal::SampleFormat::U16 => build_stream::<u16>(
                &device,
                &stream_config,
                consumer,
                shared.clone(),
                quantum_samples,
                channels,
            ),
            sample_format => {
                return Err(PlaybackError::Render {
                    reason: format!("Unsupported sample format: {:?}", sample_format),
                });
            }
        }
        .map_err(|e| PlaybackError::Render {
            reason: format!("Failed to build output stream: {}", e),
        })?;

        stream.pause().map_err(|e| PlaybackError::Render {
            reason: format!("Failed to pause stream: {}", e),
        })?;

        info!(
            channels = config.channel_count,
            sample_rate = config.sample_rate,
            "Audio output opened"
        );

        Ok(Self {
            stream,
            shared,
            config,
        })
    }

    /// Start pulling samples
    pub fn play(&self) -> PlaybackResult<()> {
        self.stream.play().map_err(|e| PlaybackError::Render {
            reason: format!("Failed to start stream: {}", e),
        })?;
        self.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop pulling samples
    pub fn pause(&self) -> PlaybackResult<()> {
        self.shared.playing.store(false, Ordering::Release);
        self.stream.pause().map_err(|e| PlaybackError::Render {
            reason: format!("Failed to pause stream: {}", e),
        })
    }

    /// Media time currently audible
    pub fn media_time_seconds(&self) -> f64 {
        self.shared.tracker.media_time_seconds()
    }

    /// Anchor media time after a seek
    pub fn apply_media_time_offset(&self, media_time_seconds: f64) {
        self.shared.tracker.apply_media_time_offset(media_time_seconds);
    }

    /// Position report for the pipeline clock
    pub fn sync_point(&self, wall_origin_millis: f64) -> MediaTimeSync {
        self.shared.tracker.sync_point(wall_origin_millis)
    }

    /// Reads that came up short while playing
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    /// Output parameters
    pub fn config(&self) -> &AudioSinkConfig {
        &self.config
    }
}

impl fmt::Debug for CpalAudioSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalAudioSink")
            .field("config", &self.config)
            .field("media_time_seconds", &self.media_time_seconds())
            .field("underruns", &self.underruns())
            .finish()
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    consumer: SampleConsumer,
    shared: Arc<SinkShared>,
    quantum_samples: usize,
    channels: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch = vec![0.0f32; quantum_samples];

    device.build_output_stream(
        stream_config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            fill_output(data, &consumer, &shared, &mut scratch, channels);
        },
        move |err| {
            error!("Audio output stream error: {}", err);
        },
        None,
    )
}

/// Device callback body: one ring read per `scratch`-sized chunk
///
/// While paused the device gets silence and the ring buffer is left alone,
/// for hosts that keep invoking the callback after `pause`.
fn fill_output<T>(
    data: &mut [T],
    consumer: &SampleConsumer,
    shared: &SinkShared,
    scratch: &mut [f32],
    channels: usize,
) where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    if !shared.playing.load(Ordering::Acquire) {
        data.fill(T::from_sample(0.0f32));
        return;
    }

    for chunk in data.chunks_mut(scratch.len().max(1)) {
        let window = &mut scratch[..chunk.len()];
        if consumer.read(window).is_starved() {
            shared.underruns.fetch_add(1, Ordering::Relaxed);
        }
        for (out, sample) in chunk.iter_mut().zip(window.iter()) {
            *out = T::from_sample(*sample);
        }
    }
    shared
        .tracker
        .record_frames((data.len() / channels.max(1)) as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_software_renderer_draws_and_counts() {
        let mut renderer = SoftwareRenderer::new();
        let frame = DecodedVideoFrame::new(40_000, 2, 2, Bytes::from(vec![7u8; 20]));

        renderer.draw(&frame).unwrap();
        renderer.draw(&frame).unwrap();

        let stats = renderer.stats();
        assert_eq!(stats.frames_drawn, 2);
        assert_eq!(stats.last_timestamp_micros, Some(40_000));
        assert_eq!(stats.surface_size, (2, 2));
        assert_eq!(renderer.surface().len(), 16);
        assert!(renderer.surface().iter().all(|b| *b == 7));
    }

    #[test]
    fn test_software_renderer_rejects_empty_frame() {
        let mut renderer = SoftwareRenderer::new();
        let frame = DecodedVideoFrame::new(0, 0, 10, Bytes::new());
        assert!(matches!(
            renderer.draw(&frame),
            Err(PlaybackError::Render { .. })
        ));
        assert_eq!(renderer.stats_handle().lock().draw_errors, 1);
    }

    #[test]
    fn test_media_time_tracker_offset() {
        let tracker = MediaTimeTracker::new(48_000, 0.0);
        tracker.record_frames(48_000);
        assert_eq!(tracker.device_seconds(), 1.0);

        tracker.apply_media_time_offset(10.0);
        assert_eq!(tracker.media_time_seconds(), 10.0);

        tracker.record_frames(24_000);
        assert_eq!(tracker.media_time_seconds(), 10.5);

        let sync = tracker.sync_point(123.0);
        assert_eq!(sync.position_seconds, 10.5);
        assert_eq!(sync.wall_origin_millis, 123.0);
    }

    #[test]
    fn test_media_time_never_negative() {
        let tracker = MediaTimeTracker::new(44_100, 0.05);
        assert_eq!(tracker.media_time_seconds(), 0.0);
    }

    fn sink_shared(playing: bool) -> SinkShared {
        SinkShared {
            tracker: MediaTimeTracker::new(48_000, 0.0),
            playing: AtomicBool::new(playing),
            underruns: AtomicU64::new(0),
        }
    }

    #[test]
    fn test_paused_output_plays_silence_without_consuming() {
        let (producer, consumer) = playsync_core::ring_buffer::channel(16).unwrap();
        producer.write(&[0.5; 8]);
        let shared = sink_shared(false);
        let mut scratch = vec![0.0f32; 4];
        let mut data = vec![1.0f32; 8];

        fill_output(&mut data, &consumer, &shared, &mut scratch, 2);

        assert!(data.iter().all(|s| *s == 0.0));
        assert_eq!(consumer.available_read(), 8);
        assert_eq!(shared.tracker.device_seconds(), 0.0);
        assert_eq!(shared.underruns.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_playing_output_reads_quanta_and_counts_underruns() {
        let (producer, consumer) = playsync_core::ring_buffer::channel(16).unwrap();
        producer.write(&[0.5; 6]);
        let shared = sink_shared(true);
        let mut scratch = vec![0.0f32; 4];
        let mut data = vec![1.0f32; 8];

        fill_output(&mut data, &consumer, &shared, &mut scratch, 2);

        assert_eq!(&data[..6], &[0.5; 6]);
        assert_eq!(&data[6..], &[0.0; 2]);
        assert_eq!(consumer.available_read(), 0);
        assert_eq!(shared.underruns.load(Ordering::Relaxed), 1);
        assert_eq!(shared.tracker.device_seconds(), 4.0 / 48_000.0);
    }

    #[test]
    fn test_backend_classification() {
        assert!(!RenderBackend::Software.is_gpu());
        assert!(RenderBackend::Wgpu.is_gpu());
        assert_eq!(RenderBackend::default(), RenderBackend::Software);
    }
}
