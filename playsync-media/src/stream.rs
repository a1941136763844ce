//! Stream descriptors and default stream selection

use crate::packet::TimeBase;
use playsync_core::{PlaybackError, PlaybackResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of elementary stream in a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Video stream
    Video,
    /// Audio stream
    Audio,
    /// Subtitle stream (listed, never decoded)
    Subtitle,
    /// Attached file such as a font
    Attachment,
    /// Opaque data stream
    Data,
    /// Unrecognized stream type
    Unknown,
}

impl StreamKind {
    /// Whether the pipeline decodes streams of this kind
    pub fn is_playable(&self) -> bool {
        matches!(self, StreamKind::Video | StreamKind::Audio)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitle => "subtitle",
            StreamKind::Attachment => "attachment",
            StreamKind::Data => "data",
            StreamKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Codec parameters relevant to playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamParams {
    /// Audio layout
    Audio {
        /// Number of channels
        channel_count: u16,
        /// Sample rate in Hz
        sample_rate: u32,
    },
    /// Picture size
    Video {
        /// Coded width in pixels
        width: u32,
        /// Coded height in pixels
        height: u32,
    },
    /// No playback parameters
    None,
}

/// Static per-stream metadata
///
/// Immutable after initialization except for `selected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Container stream index
    pub index: usize,
    /// Stream kind
    pub kind: StreamKind,
    /// Codec name
    pub codec: String,
    /// Time base of the stream's packets
    pub time_base: TimeBase,
    /// Playback parameters
    pub params: StreamParams,
    /// Container metadata (language, title, ...)
    pub metadata: BTreeMap<String, String>,
    /// Whether this stream is the one being played for its kind
    pub selected: bool,
}

impl StreamDescriptor {
    /// Audio stream descriptor
    pub fn audio(index: usize, codec: &str, channel_count: u16, sample_rate: u32) -> Self {
        Self {
            index,
            kind: StreamKind::Audio,
            codec: codec.to_string(),
            time_base: TimeBase::new(1, sample_rate.max(1) as i32),
            params: StreamParams::Audio {
                channel_count,
                sample_rate,
            },
            metadata: BTreeMap::new(),
            selected: false,
        }
    }

    /// Video stream descriptor
    pub fn video(index: usize, codec: &str, width: u32, height: u32) -> Self {
        Self {
            index,
            kind: StreamKind::Video,
            codec: codec.to_string(),
            time_base: TimeBase::new(1, 90_000),
            params: StreamParams::Video { width, height },
            metadata: BTreeMap::new(),
            selected: false,
        }
    }

    /// Descriptor for a stream the pipeline only lists
    pub fn other(index: usize, kind: StreamKind, codec: &str) -> Self {
        Self {
            index,
            kind,
            codec: codec.to_string(),
            time_base: TimeBase::MICROS,
            params: StreamParams::None,
            metadata: BTreeMap::new(),
            selected: false,
        }
    }

    /// Override the time base
    pub fn with_time_base(mut self, time_base: TimeBase) -> Self {
        self.time_base = time_base;
        self
    }

    /// `(channel_count, sample_rate)` for audio streams
    pub fn audio_params(&self) -> Option<(u16, u32)> {
        match self.params {
            StreamParams::Audio {
                channel_count,
                sample_rate,
            } => Some((channel_count, sample_rate)),
            _ => None,
        }
    }

    /// `(width, height)` for video streams
    pub fn video_params(&self) -> Option<(u32, u32)> {
        match self.params {
            StreamParams::Video { width, height } => Some((width, height)),
            _ => None,
        }
    }
}

/// Stream indices the pipeline is playing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSelection {
    /// Selected video stream
    pub video: Option<usize>,
    /// Selected audio stream
    pub audio: Option<usize>,
}

impl StreamSelection {
    /// Selected index for a playable kind
    pub fn get(&self, kind: StreamKind) -> Option<usize> {
        match kind {
            StreamKind::Video => self.video,
            StreamKind::Audio => self.audio,
            _ => None,
        }
    }
}

/// Result of demuxer initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Every stream in the container
    pub streams: Vec<StreamDescriptor>,
    /// Container duration in microseconds
    pub duration_micros: i64,
}

impl MediaInfo {
    /// Create media info
    pub fn new(streams: Vec<StreamDescriptor>, duration_micros: i64) -> Self {
        Self {
            streams,
            duration_micros,
        }
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.duration_micros as f64 / 1_000_000.0
    }

    /// Look up a stream by container index
    pub fn stream(&self, index: usize) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.index == index)
    }

    /// Streams of one kind in container order
    pub fn streams_of(&self, kind: StreamKind) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    /// Select the first video and first audio stream
    pub fn select_defaults(&mut self) -> StreamSelection {
        let selection = StreamSelection {
            video: self.streams_of(StreamKind::Video).next().map(|s| s.index),
            audio: self.streams_of(StreamKind::Audio).next().map(|s| s.index),
        };
        for stream in &mut self.streams {
            stream.selected =
                Some(stream.index) == selection.get(stream.kind) && stream.kind.is_playable();
        }
        selection
    }

    /// Mark `index` as the selected stream of `kind`
    pub fn select(&mut self, kind: StreamKind, index: usize) -> PlaybackResult<&StreamDescriptor> {
        if !kind.is_playable() {
            return Err(PlaybackError::config(format!(
                "{} streams cannot be selected for playback",
                kind
            )));
        }
        if !self
            .streams
            .iter()
            .any(|s| s.index == index && s.kind == kind)
        {
            return Err(PlaybackError::StreamNotFound { index });
        }
        for stream in self.streams.iter_mut().filter(|s| s.kind == kind) {
            stream.selected = stream.index == index;
        }
        self.stream(index)
            .ok_or(PlaybackError::StreamNotFound { index })
    }
}
