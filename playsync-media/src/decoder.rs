//! Decoder collaborator interface and its output channel
//!
//! A decoder accepts compressed packets and delivers decoded frames
//! asynchronously, in submission order, through a bounded [`FrameSender`].
//! The pipeline owns the matching [`FrameReceiver`] and polls it.

use crate::frame::{DecodedAudioFrame, DecodedVideoFrame};
use crate::packet::Packet;
use crate::stream::StreamDescriptor;
use async_trait::async_trait;
use playsync_core::{PlaybackError, PlaybackResult};
use tokio::sync::mpsc;

/// Sending half of a decoder output channel
#[derive(Debug)]
pub struct FrameSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> Clone for FrameSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Receiving half of a decoder output channel
#[derive(Debug)]
pub struct FrameReceiver<T> {
    inner: mpsc::Receiver<T>,
}

/// Create a bounded decoder output channel
pub fn output_channel<T>(capacity: usize) -> (FrameSender<T>, FrameReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FrameSender { inner: tx }, FrameReceiver { inner: rx })
}

impl<T: Send> FrameSender<T> {
    /// Deliver a decoded frame, waiting while the channel is full
    pub async fn send(&self, frame: T) -> PlaybackResult<()> {
        self.inner
            .send(frame)
            .await
            .map_err(|_| PlaybackError::ChannelClosed {
                channel: "decoder output".to_string(),
            })
    }

    /// Whether the pipeline has dropped the receiver
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<T> FrameReceiver<T> {
    /// Wait for the next decoded frame
    pub async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await
    }

    /// Take a frame that is already available
    pub fn try_recv(&mut self) -> Option<T> {
        self.inner.try_recv().ok()
    }
}

/// Opaque decoder for one stream type
#[async_trait]
pub trait Decoder: Send {
    /// Decoded frame type
    type Output: Send + 'static;

    /// Codec name, for logging and errors
    fn codec(&self) -> &str;

    /// Configure for `stream`; decoded frames go to `output`
    ///
    /// Returns `Ok(false)` when the stream's configuration is not supported.
    async fn configure(
        &mut self,
        stream: &StreamDescriptor,
        output: FrameSender<Self::Output>,
    ) -> PlaybackResult<bool>;

    /// Submit one packet; ownership passes to the decoder
    async fn decode(&mut self, packet: Packet) -> PlaybackResult<()>;

    /// Wait until every submitted packet has been emitted or discarded
    async fn flush(&mut self) -> PlaybackResult<()>;

    /// Packets submitted but not yet returned as frames
    fn queue_depth(&self) -> usize;

    /// Whether `queue_depth` is meaningful for backpressure
    ///
    /// Synchronous fallback decoders never queue work and return `false`.
    fn reports_queue_depth(&self) -> bool {
        true
    }
}

/// Boxed video decoder
pub type VideoDecoder = Box<dyn Decoder<Output = DecodedVideoFrame>>;

/// Boxed audio decoder
pub type AudioDecoder = Box<dyn Decoder<Output = DecodedAudioFrame>>;

/// Whether a decoder has reached the saturation threshold
pub fn is_saturated<D>(decoder: &D, queue_max: usize) -> bool
where
    D: Decoder + ?Sized,
{
    decoder.reports_queue_depth() && decoder.queue_depth() >= queue_max
}
