//! Headless playback example for playsync
//!
//! This example plays a generated two-second source through the full
//! pipeline without any devices: a task stands in for the audio output,
//! pulling render quanta from the ring buffer and reporting the audible
//! media time back to the player.

use anyhow::Context;
use bytes::Bytes;
use playsync::synthetic::{
    AudioDecodeMode, RecordingRenderer, SyntheticAudioDecoder, SyntheticDemuxer, SyntheticMedia,
    SyntheticVideoDecoder,
};
use playsync::{
    init_logging, MediaTimeTracker, MonotonicTime, Player, PlayerConfig, PlayerEvent,
    SampleConsumer, TimeSource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let time = Arc::new(MonotonicTime::new());
    let renderer = RecordingRenderer::new();
    let config = PlayerConfig::default();
    let quantum_frames = config.pipeline.render_quantum_frames;

    let (player, mut events) = Player::builder(SyntheticDemuxer::new(SyntheticMedia::default()))
        .video_decoder(SyntheticVideoDecoder::new())
        .audio_decoder(SyntheticAudioDecoder::new(AudioDecodeMode::Immediate, 1024))
        .renderer(renderer.clone())
        .time_source(time.clone())
        .config(config)
        .spawn()?;

    println!("📂 Opening synthetic source...");
    let info = player.init(Bytes::new()).await?;
    for stream in &info.streams {
        println!(
            "   stream {} {} ({}) selected={}",
            stream.index, stream.kind, stream.codec, stream.selected
        );
    }

    let consumer = player
        .take_sample_consumer()
        .await?
        .context("source has no audio stream")?;
    let tracker = Arc::new(MediaTimeTracker::new(48_000, 0.0));
    let (running_tx, running_rx) = watch::channel(false);
    let output = tokio::spawn(audio_output(
        consumer,
        tracker.clone(),
        running_rx,
        quantum_frames,
        2,
    ));

    println!("▶️  Playing...");
    player.start(None).await?;
    running_tx.send(true)?;

    let mut sync = tokio::time::interval(Duration::from_millis(250));
    let mut seeked = false;
    let deadline = tokio::time::sleep(Duration::from_secs(6));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                match &event {
                    PlayerEvent::MediaTimeOffset { media_time_seconds } => {
                        tracker.apply_media_time_offset(*media_time_seconds);
                        println!("⏩ Resumed at {:.3}s", media_time_seconds);
                    }
                    PlayerEvent::PlaybackEnded => {
                        println!("🏁 Playback ended");
                        break;
                    }
                    PlayerEvent::Error { message, .. } => {
                        println!("❌ {}", message);
                        break;
                    }
                    other => println!("📣 {}", other.event_type()),
                }
            }
            _ = sync.tick() => {
                player.update_media_time(tracker.sync_point(time.now_millis())).await?;
                let stats = player.stats().await?;
                println!(
                    "⏱️  position {:>7.1} ms, {} frames ready, {:.3}s audio buffered",
                    stats.position_millis, stats.frames_buffered, stats.buffered_audio_secs
                );
                if !seeked && stats.position_millis > 500.0 {
                    seeked = true;
                    let report = player.seek(1.0).await?;
                    println!(
                        "🔁 Seek released {} packets, {} frames, {} samples",
                        report.packets_released, report.frames_released, report.samples_drained
                    );
                }
            }
            _ = &mut deadline => {
                println!("⌛ Gave up waiting for the end of playback");
                break;
            }
        }
    }

    running_tx.send(false)?;
    let stats = player.stats().await?;
    player.shutdown().await?;
    output.await?;

    println!(
        "✅ Drew {} frames, {} ring underruns, {} overflows",
        renderer.drawn().len(),
        stats.ring_underruns,
        stats.ring_overflows
    );
    Ok(())
}

/// Pull one render quantum at the device cadence while `running` is set
async fn audio_output(
    consumer: SampleConsumer,
    tracker: Arc<MediaTimeTracker>,
    mut running: watch::Receiver<bool>,
    quantum_frames: usize,
    channel_count: usize,
) {
    let mut quantum = vec![0.0f32; quantum_frames * channel_count];
    let period = Duration::from_secs_f64(quantum_frames as f64 / 48_000.0);
    let mut clock = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = clock.tick() => {
                if !*running.borrow() {
                    continue;
                }
                // Starved reads leave silence in the quantum
                let _ = consumer.read(&mut quantum);
                tracker.record_frames(quantum_frames as u64);
            }
            changed = running.changed() => {
                if changed.is_err() || !*running.borrow() {
                    break;
                }
            }
        }
    }
}
