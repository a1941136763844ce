//! Player handle and its driver task
//!
//! [`PlayerBuilder::spawn`] moves a [`Pipeline`] into a task that owns it
//! for the rest of the session. The task multiplexes host commands, the
//! display tick, the audio recheck deadline and decoder output; every
//! handler runs to completion before the next one starts, so no two
//! operations ever touch the pipeline at once.

use crate::command::{Command, Reply};
use crate::config::PlayerConfig;
use crate::event::{event_channel, EventStream};
use crate::pipeline::{Collaborators, Pipeline, PipelineStats};
use crate::seek::SeekReport;
use bytes::Bytes;
use futures::future::pending;
use playsync_core::{MediaTimeSync, PlaybackError, PlaybackResult, SampleConsumer, TimeSource};
use playsync_media::{
    DecodedAudioFrame, DecodedVideoFrame, Decoder, Demuxer, FrameRenderer, MediaInfo, StreamKind,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Builder assembling a player from its collaborators
pub struct PlayerBuilder {
    collaborators: Collaborators,
    fallback_audio_decoders: Vec<playsync_media::AudioDecoder>,
    config: PlayerConfig,
}

impl PlayerBuilder {
    /// Start from a demuxer, with a software renderer and the system clock
    pub fn new(demuxer: impl Demuxer + 'static) -> Self {
        Self {
            collaborators: Collaborators::new(Box::new(demuxer)),
            fallback_audio_decoders: Vec::new(),
            config: PlayerConfig::default(),
        }
    }

    /// Decoder for the video stream
    pub fn video_decoder(mut self, decoder: impl Decoder<Output = DecodedVideoFrame> + 'static) -> Self {
        self.collaborators.video_decoder = Some(Box::new(decoder));
        self
    }

    /// Preferred decoder for the audio stream
    pub fn audio_decoder(mut self, decoder: impl Decoder<Output = DecodedAudioFrame> + 'static) -> Self {
        self.collaborators.audio_decoders = vec![Box::new(decoder)];
        self
    }

    /// Decoder tried when the preferred one rejects an audio stream
    pub fn fallback_audio_decoder(
        mut self,
        decoder: impl Decoder<Output = DecodedAudioFrame> + 'static,
    ) -> Self {
        self.fallback_audio_decoders.push(Box::new(decoder));
        self
    }

    /// Frame presentation backend
    pub fn renderer(mut self, renderer: impl FrameRenderer + 'static) -> Self {
        self.collaborators.renderer = Box::new(renderer);
        self
    }

    /// Wall-clock source for the media clock
    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.collaborators.time = time;
        self
    }

    /// Player configuration
    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the pipeline without spawning a driver for it
    pub fn build_pipeline(self) -> PlaybackResult<(Pipeline, EventStream)> {
        let PlayerBuilder {
            mut collaborators,
            fallback_audio_decoders,
            config,
        } = self;
        collaborators.audio_decoders.extend(fallback_audio_decoders);

        let (events_tx, events) = event_channel();
        let pipeline = Pipeline::new(config, collaborators, events_tx)?;
        Ok((pipeline, events))
    }

    /// Spawn the driver task on the current tokio runtime
    pub fn spawn(self) -> PlaybackResult<(Player, EventStream)> {
        let command_capacity = self.config.command_capacity;
        let (pipeline, events) = self.build_pipeline()?;
        let (commands, receiver) = mpsc::channel(command_capacity);
        let task = tokio::spawn(drive(pipeline, receiver));
        info!("Player started");
        Ok((Player { commands, task }, events))
    }
}

impl std::fmt::Debug for PlayerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerBuilder")
            .field("collaborators", &self.collaborators)
            .field("fallback_audio_decoders", &self.fallback_audio_decoders.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Handle to a running player
///
/// Every method is a request to the driver task and returns once the task
/// has handled it.
#[derive(Debug)]
pub struct Player {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl Player {
    /// Begin assembling a player around `demuxer`
    pub fn builder(demuxer: impl Demuxer + 'static) -> PlayerBuilder {
        PlayerBuilder::new(demuxer)
    }

    /// Open `source` and configure decoders
    pub async fn init(&self, source: Bytes) -> PlaybackResult<MediaInfo> {
        self.request(|reply| Command::Init { source, reply }).await?
    }

    /// Start playback, optionally adopting an authoritative position
    pub async fn start(&self, sync: Option<MediaTimeSync>) -> PlaybackResult<()> {
        self.request(|reply| Command::Start { sync, reply }).await?
    }

    /// Stop playback, optionally adopting an authoritative position
    pub async fn stop(&self, sync: Option<MediaTimeSync>) -> PlaybackResult<()> {
        self.request(|reply| Command::Stop { sync, reply }).await?
    }

    /// Resynchronize the clock against the audio output
    pub async fn update_media_time(&self, sync: MediaTimeSync) -> PlaybackResult<()> {
        self.send(Command::UpdateMediaTime { sync }).await
    }

    /// Seek to `seconds`, anchored at the current wall-clock time
    pub async fn seek(&self, seconds: f64) -> PlaybackResult<SeekReport> {
        self.request(|reply| Command::Seek {
            seconds,
            wall_origin_millis: None,
            reply,
        })
        .await?
    }

    /// Seek to `seconds`, anchored at `wall_origin_millis`
    pub async fn seek_at(&self, seconds: f64, wall_origin_millis: f64) -> PlaybackResult<SeekReport> {
        self.request(|reply| Command::Seek {
            seconds,
            wall_origin_millis: Some(wall_origin_millis),
            reply,
        })
        .await?
    }

    /// Play stream `index` in place of the current stream of `kind`
    pub async fn change_stream(&self, kind: StreamKind, index: usize) -> PlaybackResult<()> {
        self.request(|reply| Command::ChangeStream { kind, index, reply })
            .await?
    }

    /// Take the ring buffer's reading side for an audio output
    pub async fn take_sample_consumer(&self) -> PlaybackResult<Option<SampleConsumer>> {
        self.request(|reply| Command::TakeSampleConsumer { reply })
            .await
    }

    /// Snapshot pipeline counters
    pub async fn stats(&self) -> PlaybackResult<PipelineStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Release everything and wait for the driver task to finish
    pub async fn shutdown(self) -> PlaybackResult<()> {
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!("Driver already stopped");
        }
        self.task.await.map_err(|e| PlaybackError::ChannelClosed {
            channel: format!("player driver: {}", e),
        })
    }

    async fn send(&self, command: Command) -> PlaybackResult<()> {
        self.commands.send(command).await.map_err(|_| closed())
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> PlaybackResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply)).await?;
        response.await.map_err(|_| closed())
    }
}

fn closed() -> PlaybackError {
    PlaybackError::ChannelClosed {
        channel: "player commands".to_string(),
    }
}

/// Own `pipeline` until shutdown, dispatching whatever becomes ready first
async fn drive(mut pipeline: Pipeline, mut commands: mpsc::Receiver<Command>) {
    let mut render = tokio::time::interval(pipeline.config().pipeline.render_interval());
    render.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let recheck = pipeline.audio_recheck_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => handle(&mut pipeline, command).await,
            },
            _ = render.tick() => {
                if let Err(err) = pipeline.on_render_tick().await {
                    debug!("Render tick failed: {}", err);
                }
            }
            _ = deadline(recheck) => {
                if let Err(err) = pipeline.on_audio_recheck().await {
                    debug!("Audio recheck failed: {}", err);
                }
            }
            output = pipeline.next_output() => {
                if let Err(err) = pipeline.on_decoder_output(output).await {
                    debug!("Decoder output handling failed: {}", err);
                }
            }
        }
    }

    pipeline.shutdown().await;
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => pending().await,
    }
}

async fn handle(pipeline: &mut Pipeline, command: Command) {
    let name = command.name();
    debug!(command = name, "Handling command");

    let delivered = match command {
        Command::Init { source, reply } => reply.send(pipeline.initialize(source).await).is_ok(),
        Command::Start { sync, reply } => reply.send(pipeline.start(sync).await).is_ok(),
        Command::Stop { sync, reply } => reply.send(pipeline.stop(sync)).is_ok(),
        Command::UpdateMediaTime { sync } => {
            if let Err(err) = pipeline.update_media_time(sync) {
                warn!("Media time update ignored: {}", err);
            }
            true
        }
        Command::Seek {
            seconds,
            wall_origin_millis,
            reply,
        } => reply
            .send(pipeline.seek(seconds, wall_origin_millis).await)
            .is_ok(),
        Command::ChangeStream { kind, index, reply } => reply
            .send(pipeline.change_stream(kind, index).await)
            .is_ok(),
        Command::TakeSampleConsumer { reply } => reply.send(pipeline.take_sample_consumer()).is_ok(),
        Command::Stats { reply } => reply.send(pipeline.stats()).is_ok(),
        Command::Shutdown => true,
    };

    if !delivered {
        debug!(command = name, "Requester went away before the reply");
    }
}
