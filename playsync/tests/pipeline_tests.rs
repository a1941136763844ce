//! Integration tests for the playback pipeline
//!
//! This module contains tests for initialization, playback control, seeking,
//! stream switching, end of playback and halting, driven through the
//! pipeline context with a manually advanced clock.

use bytes::Bytes;
use playsync::synthetic::{
    AudioDecodeMode, DemuxerFaults, DemuxerProbe, RecordingRenderer, ScriptedDemuxer,
    SyntheticAudio, SyntheticAudioDecoder, SyntheticDemuxer, SyntheticMedia,
    SyntheticVideoDecoder,
};
use playsync::*;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    pipeline: Pipeline,
    events: EventStream,
    time: Arc<ManualTime>,
    demuxer: DemuxerProbe,
    renderer: RecordingRenderer,
}

fn harness_with(demuxer: SyntheticDemuxer, video: SyntheticVideoDecoder) -> Harness {
    let probe = demuxer.probe();
    let time = Arc::new(ManualTime::starting_at(0.0));
    let renderer = RecordingRenderer::new();
    let (pipeline, events) = PlayerBuilder::new(demuxer)
        .video_decoder(video)
        .audio_decoder(SyntheticAudioDecoder::new(AudioDecodeMode::Immediate, 1024))
        .renderer(renderer.clone())
        .time_source(time.clone())
        .build_pipeline()
        .unwrap();
    Harness {
        pipeline,
        events,
        time,
        demuxer: probe,
        renderer,
    }
}

fn harness(media: SyntheticMedia) -> Harness {
    harness_with(SyntheticDemuxer::new(media), SyntheticVideoDecoder::new())
}

async fn initialized(media: SyntheticMedia) -> Harness {
    let mut h = harness(media);
    h.pipeline.initialize(Bytes::new()).await.unwrap();
    h.events.drain();
    h
}

fn frame_timestamps(pipeline: &Pipeline) -> Vec<i64> {
    pipeline
        .frame_buffer()
        .map(|frames| frames.timestamps().collect())
        .unwrap_or_default()
}

fn error_events(events: &[PlayerEvent]) -> Vec<&PlayerEvent> {
    events.iter().filter(|e| e.is_error_event()).collect()
}

// ============================================================================
// INITIALIZATION
// ============================================================================

#[tokio::test]
async fn test_initialize_primes_buffers() {
    let mut h = harness(SyntheticMedia::default());
    let info = h.pipeline.initialize(Bytes::new()).await.unwrap();

    assert_eq!(info.streams.len(), 2);
    assert!(info.streams.iter().all(|s| s.selected));
    assert_eq!(h.pipeline.state(), PipelineState::Idle);
    assert_eq!(frame_timestamps(&h.pipeline), vec![0, 40_000, 80_000]);
    assert!(h.pipeline.buffered_audio_secs() >= 0.3);

    let events = h.events.drain();
    assert_eq!(
        events[0],
        PlayerEvent::AudioOutputReady {
            channel_count: 2,
            sample_rate: 48_000
        }
    );
    assert_eq!(events[1].event_type(), "initialization_complete");
}

#[tokio::test]
async fn test_initialize_twice_is_rejected() {
    let mut h = initialized(SyntheticMedia::default()).await;
    assert!(matches!(
        h.pipeline.initialize(Bytes::new()).await,
        Err(PlaybackError::InvalidState { .. })
    ));
    assert_eq!(h.pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_unsupported_audio_falls_back() {
    let primary = SyntheticAudioDecoder::new(AudioDecodeMode::Immediate, 1024).unsupported();
    let fallback = SyntheticAudioDecoder::new(AudioDecodeMode::Fallback, 1024);
    let primary_probe = primary.probe();
    let fallback_probe = fallback.probe();

    let (mut pipeline, _events) = PlayerBuilder::new(SyntheticDemuxer::new(SyntheticMedia::default()))
        .video_decoder(SyntheticVideoDecoder::new())
        .audio_decoder(primary)
        .fallback_audio_decoder(fallback)
        .time_source(Arc::new(ManualTime::starting_at(0.0)))
        .build_pipeline()
        .unwrap();
    pipeline.initialize(Bytes::new()).await.unwrap();

    assert_eq!(primary_probe.snapshot().configured, vec![1]);
    assert_eq!(fallback_probe.snapshot().configured, vec![1]);
    assert!(fallback_probe.snapshot().frames_emitted > 0);
    assert!(pipeline.buffered_audio_secs() >= 0.3);
}

#[tokio::test]
async fn test_unsupported_audio_without_fallback_halts() {
    let (mut pipeline, mut events) =
        PlayerBuilder::new(SyntheticDemuxer::new(SyntheticMedia::default()))
            .video_decoder(SyntheticVideoDecoder::new())
            .audio_decoder(SyntheticAudioDecoder::new(AudioDecodeMode::Immediate, 1024).unsupported())
            .build_pipeline()
            .unwrap();

    let result = pipeline.initialize(Bytes::new()).await;
    assert!(matches!(result, Err(PlaybackError::DecoderUnsupported { .. })));
    assert_eq!(pipeline.state(), PipelineState::Halted);

    let events = events.drain();
    assert_eq!(
        error_events(&events),
        vec![&PlayerEvent::Error {
            message: "Decoder unsupported: synthetic_audio".to_string(),
            recoverable: false,
        }]
    );
}

#[tokio::test]
async fn test_unsupported_video_is_fatal() {
    let mut h = harness_with(
        SyntheticDemuxer::new(SyntheticMedia::default()),
        SyntheticVideoDecoder::unsupported(),
    );
    let result = h.pipeline.initialize(Bytes::new()).await;
    assert!(matches!(result, Err(PlaybackError::DecoderUnsupported { .. })));
    assert_eq!(h.pipeline.state(), PipelineState::Halted);
}

#[tokio::test]
async fn test_zero_channel_audio_is_invalid() {
    let info = MediaInfo::new(vec![StreamDescriptor::audio(0, "pcm_s16le", 0, 48_000)], 1_000_000);
    let demuxer = ScriptedDemuxer::new(Vec::new()).with_media_info(info);
    let (mut pipeline, _events) = PlayerBuilder::new(demuxer)
        .audio_decoder(SyntheticAudioDecoder::new(AudioDecodeMode::Immediate, 1024))
        .build_pipeline()
        .unwrap();

    assert!(matches!(
        pipeline.initialize(Bytes::new()).await,
        Err(PlaybackError::InvalidConfiguration { .. })
    ));
}

#[tokio::test]
async fn test_commands_before_initialize_are_rejected() {
    let mut h = harness(SyntheticMedia::default());
    assert!(matches!(
        h.pipeline.start(None).await,
        Err(PlaybackError::InvalidState { .. })
    ));
    assert!(matches!(
        h.pipeline.seek(1.0, None).await,
        Err(PlaybackError::InvalidState { .. })
    ));
    assert!(h.pipeline.take_sample_consumer().is_none());
}

// ============================================================================
// PLAYBACK CONTROL
// ============================================================================

#[tokio::test]
async fn test_start_stop_drives_clock() {
    let mut h = initialized(SyntheticMedia::default()).await;

    h.pipeline.start(None).await.unwrap();
    assert!(h.pipeline.clock().is_playing());
    assert!(h.pipeline.audio_recheck_deadline().is_some());

    h.time.advance(500.0);
    assert_eq!(h.pipeline.clock().current_position_millis(), 500.0);

    h.pipeline.stop(None).unwrap();
    assert!(h.pipeline.audio_recheck_deadline().is_none());
    h.time.advance(1_000.0);
    assert_eq!(h.pipeline.clock().current_position_millis(), 500.0);

    assert_eq!(
        h.events.drain(),
        vec![
            PlayerEvent::PlaybackStateChanged { playing: true },
            PlayerEvent::PlaybackStateChanged { playing: false },
        ]
    );
}

#[tokio::test]
async fn test_start_applies_sync_after_starting() {
    let mut h = initialized(SyntheticMedia::default()).await;
    let sync = MediaTimeSync {
        position_seconds: 1.25,
        wall_origin_millis: h.time.now_millis(),
    };

    h.pipeline.start(Some(sync)).await.unwrap();
    assert_eq!(h.pipeline.clock().current_position_millis(), 1_250.0);

    h.time.advance(100.0);
    assert_eq!(h.pipeline.clock().current_position_millis(), 1_350.0);

    // A repeated start only resynchronizes
    h.pipeline.start(None).await.unwrap();
    let started = h
        .events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, PlayerEvent::PlaybackStateChanged { playing: true }))
        .count();
    assert_eq!(started, 1);
}

#[tokio::test]
async fn test_update_media_time_retimes_clock() {
    let mut h = initialized(SyntheticMedia::default()).await;
    h.pipeline.start(None).await.unwrap();
    h.time.advance(300.0);

    h.pipeline
        .update_media_time(MediaTimeSync {
            position_seconds: 0.25,
            wall_origin_millis: 250.0,
        })
        .unwrap();
    assert_eq!(h.pipeline.clock().current_position_millis(), 300.0);
}

#[tokio::test]
async fn test_render_tick_draws_each_frame_once() {
    let mut h = initialized(SyntheticMedia::default()).await;
    h.pipeline.start(None).await.unwrap();

    h.pipeline.on_render_tick().await.unwrap();
    h.pipeline.on_render_tick().await.unwrap();
    assert_eq!(h.renderer.drawn(), vec![0]);

    h.time.advance(40.0);
    h.pipeline.on_render_tick().await.unwrap();
    assert_eq!(h.renderer.drawn(), vec![0, 40_000]);

    // The stale frame was released and decoding topped the buffer up again
    assert_eq!(frame_timestamps(&h.pipeline), vec![40_000, 80_000, 120_000]);
    assert_eq!(h.pipeline.stats().frames_drawn, 2);
}

#[tokio::test]
async fn test_audio_recheck_refills_drained_ring() {
    let mut h = initialized(SyntheticMedia::default()).await;
    let consumer = h.pipeline.take_sample_consumer().unwrap();
    assert!(h.pipeline.take_sample_consumer().is_none());
    h.pipeline.start(None).await.unwrap();

    let mut quantum = vec![0.0f32; 19_200];
    assert!(!consumer.read(&mut quantum).is_starved());
    assert!(h.pipeline.buffered_audio_secs() < 0.3);

    h.pipeline.on_audio_recheck().await.unwrap();
    assert!(h.pipeline.buffered_audio_secs() >= 0.3);
    assert!(h.pipeline.audio_recheck_deadline().is_some());
}

// ============================================================================
// SEEKING
// ============================================================================

#[tokio::test]
async fn test_seek_releases_stale_media() {
    let mut h = initialized(SyntheticMedia::default()).await;
    assert_eq!(frame_timestamps(&h.pipeline), vec![0, 40_000, 80_000]);

    let report = h.pipeline.seek(1.0, None).await.unwrap();
    assert_eq!(report.target_seconds, 1.0);
    assert_eq!(report.frames_released, 3);
    assert!(report.packets_released > 0);
    assert!(report.samples_drained > 0);

    // Audio decides the landing point: packet 46 starts just before 1.0 s
    let expected = 46.0 * 1024.0 / 48_000.0;
    assert!((report.media_time_seconds - expected).abs() < 1e-9);
    assert_eq!(h.demuxer.seeks(), vec![(Some(1), 48_000)]);

    // Back in idle with every stale frame and sample gone, before decoding resumes
    assert_eq!(report.on_resume.state, PipelineState::Idle);
    assert_eq!(report.on_resume.frames_buffered, 0);
    assert_eq!(report.on_resume.buffered_audio_secs, 0.0);
    assert_eq!(report.on_resume.seeks_completed, 1);

    assert_eq!(h.pipeline.state(), PipelineState::Idle);
    assert_eq!(h.pipeline.clock().current_position_millis(), 1_000.0);
    assert_eq!(
        frame_timestamps(&h.pipeline),
        vec![1_000_000, 1_040_000, 1_080_000]
    );
    let queues = h.pipeline.queues();
    assert!(queues.front(StreamKind::Video).unwrap().pts >= 90_000);
    assert!(queues.front(StreamKind::Audio).unwrap().pts >= 46 * 1024);
    assert!(h.pipeline.buffered_audio_secs() >= 0.3);

    let seek_events: Vec<_> = h
        .events
        .drain()
        .into_iter()
        .filter(|e| e.is_seek_event())
        .collect();
    assert_eq!(
        seek_events,
        vec![
            PlayerEvent::Buffering { buffering: true },
            PlayerEvent::MediaTimeOffset {
                media_time_seconds: report.media_time_seconds
            },
            PlayerEvent::Buffering { buffering: false },
        ]
    );
    assert_eq!(h.pipeline.stats().seeks_completed, 1);
}

#[tokio::test]
async fn test_repeated_seek_is_idempotent() {
    let mut h = initialized(SyntheticMedia::default()).await;

    let snapshot = |pipeline: &Pipeline| {
        let queues = pipeline.queues();
        (
            queues.len(StreamKind::Video),
            queues.len(StreamKind::Audio),
            queues.front(StreamKind::Video).map(|p| p.pts),
            queues.front(StreamKind::Audio).map(|p| p.pts),
            frame_timestamps(pipeline),
            pipeline.buffered_audio_secs(),
            pipeline.clock().current_position_millis(),
            pipeline.clock().is_playing(),
        )
    };

    let first = h.pipeline.seek(1.5, None).await.unwrap();
    let once = snapshot(&h.pipeline);
    let second = h.pipeline.seek(1.5, None).await.unwrap();
    let twice = snapshot(&h.pipeline);

    assert_eq!(once, twice);
    assert_eq!(first.media_time_seconds, second.media_time_seconds);
}

#[tokio::test]
async fn test_seek_while_playing_keeps_playing() {
    let mut h = initialized(SyntheticMedia::default()).await;
    h.pipeline.start(None).await.unwrap();
    h.time.advance(200.0);

    h.pipeline.seek(0.5, Some(h.time.now_millis())).await.unwrap();
    assert!(h.pipeline.clock().is_playing());
    assert_eq!(h.pipeline.clock().current_position_millis(), 500.0);

    h.time.advance(40.0);
    assert_eq!(h.pipeline.clock().current_position_millis(), 540.0);
}

#[tokio::test]
async fn test_seek_to_negative_target_is_rejected() {
    let mut h = initialized(SyntheticMedia::default()).await;
    assert!(matches!(
        h.pipeline.seek(-1.0, None).await,
        Err(PlaybackError::SeekFailed { .. })
    ));
    assert_eq!(h.pipeline.state(), PipelineState::Idle);
    assert!(h.demuxer.seeks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_seek_returns_to_idle() {
    let demuxer = SyntheticDemuxer::new(SyntheticMedia::default()).with_faults(DemuxerFaults {
        would_block_after_seek: 3,
        ..DemuxerFaults::default()
    });
    let mut h = harness_with(demuxer, SyntheticVideoDecoder::new());
    h.pipeline.initialize(Bytes::new()).await.unwrap();
    h.events.drain();

    // Dropped while the refill after the demuxer seek is backing off
    let cancelled =
        tokio::time::timeout(Duration::from_millis(5), h.pipeline.seek(1.0, None)).await;
    assert!(cancelled.is_err());
    assert_eq!(h.pipeline.state(), PipelineState::Idle);
    assert!(!h.pipeline.queues().is_refilling());
    let stats = h.pipeline.stats();
    assert_eq!(stats.seeks_abandoned, 1);
    assert_eq!(stats.seeks_completed, 0);

    let report = h.pipeline.seek(1.0, None).await.unwrap();
    assert_eq!(report.on_resume.state, PipelineState::Idle);
    assert_eq!(h.pipeline.stats().seeks_completed, 1);
    assert_eq!(h.demuxer.seeks().len(), 2);
    assert_eq!(
        frame_timestamps(&h.pipeline),
        vec![1_000_000, 1_040_000, 1_080_000]
    );
}

#[tokio::test]
async fn test_failed_demuxer_seek_halts() {
    let demuxer = SyntheticDemuxer::new(SyntheticMedia::default()).with_faults(DemuxerFaults {
        fail_seeks: true,
        ..DemuxerFaults::default()
    });
    let mut h = harness_with(demuxer, SyntheticVideoDecoder::new());
    h.pipeline.initialize(Bytes::new()).await.unwrap();
    h.events.drain();

    assert!(matches!(
        h.pipeline.seek(1.0, None).await,
        Err(PlaybackError::SeekFailed { .. })
    ));
    assert_eq!(h.pipeline.state(), PipelineState::Halted);

    let events = h.events.drain();
    assert_eq!(events[0], PlayerEvent::Buffering { buffering: true });
    assert_eq!(error_events(&events).len(), 1);
}

// ============================================================================
// STREAM SWITCHING
// ============================================================================

fn two_audio_streams(second: SyntheticAudio) -> SyntheticMedia {
    SyntheticMedia {
        audio: vec![SyntheticAudio::default(), second],
        ..SyntheticMedia::default()
    }
}

#[tokio::test]
async fn test_change_audio_stream() {
    let mut h = initialized(two_audio_streams(SyntheticAudio::default())).await;

    h.pipeline.change_stream(StreamKind::Audio, 2).await.unwrap();

    let info = h.pipeline.media_info().unwrap();
    assert!(!info.stream(1).unwrap().selected);
    assert!(info.stream(2).unwrap().selected);
    assert_eq!(h.pipeline.queues().selection().audio, Some(2));
    assert_eq!(
        h.pipeline.queues().front(StreamKind::Audio).unwrap().stream_index,
        2
    );
    assert_eq!(h.demuxer.seeks(), vec![(Some(2), 0)]);

    let events = h.events.drain();
    assert!(events.contains(&PlayerEvent::StreamChanged {
        kind: StreamKind::Audio,
        index: 2
    }));
    assert!(events.contains(&PlayerEvent::Buffering { buffering: false }));
}

#[tokio::test]
async fn test_change_to_different_audio_layout_is_rejected() {
    let mono = SyntheticAudio {
        channel_count: 1,
        sample_rate: 44_100,
        frames_per_packet: 1_024,
    };
    let mut h = initialized(two_audio_streams(mono)).await;

    assert!(matches!(
        h.pipeline.change_stream(StreamKind::Audio, 2).await,
        Err(PlaybackError::InvalidConfiguration { .. })
    ));
    assert_eq!(h.pipeline.state(), PipelineState::Idle);
    assert_eq!(h.pipeline.queues().selection().audio, Some(1));
}

#[tokio::test]
async fn test_change_stream_checks_kind() {
    let mut h = initialized(SyntheticMedia::default()).await;
    assert!(matches!(
        h.pipeline.change_stream(StreamKind::Video, 1).await,
        Err(PlaybackError::StreamNotFound { index: 1 })
    ));
    assert_eq!(h.pipeline.state(), PipelineState::Idle);
}

// ============================================================================
// END OF PLAYBACK AND HALTING
// ============================================================================

#[tokio::test]
async fn test_playback_ends_after_last_frame() {
    let media = SyntheticMedia {
        duration_secs: 0.2,
        audio: Vec::new(),
        ..SyntheticMedia::default()
    };
    let mut h = initialized(media).await;
    h.pipeline.start(None).await.unwrap();

    for _ in 0..20 {
        h.pipeline.on_render_tick().await.unwrap();
        h.time.advance(40.0);
    }

    assert_eq!(
        h.renderer.drawn(),
        vec![0, 40_000, 80_000, 120_000, 160_000]
    );
    let events = h.events.drain();
    let ended = events
        .iter()
        .filter(|e| **e == PlayerEvent::PlaybackEnded)
        .count();
    assert_eq!(ended, 1);
    assert!(events.contains(&PlayerEvent::PlaybackStateChanged { playing: false }));
    assert!(!h.pipeline.clock().is_playing());
    assert_eq!(frame_timestamps(&h.pipeline), Vec::<i64>::new());
}

#[tokio::test]
async fn test_fatal_decode_halts_pipeline() {
    let mut h = harness_with(
        SyntheticDemuxer::new(SyntheticMedia::default()),
        SyntheticVideoDecoder::new().failing_at(36_000),
    );
    h.pipeline.initialize(Bytes::new()).await.unwrap();
    h.pipeline.start(None).await.unwrap();
    h.events.drain();

    let mut failure = None;
    for _ in 0..30 {
        h.time.advance(40.0);
        if let Err(err) = h.pipeline.on_render_tick().await {
            failure = Some(err);
            break;
        }
    }

    assert!(matches!(failure, Some(PlaybackError::FatalDecode { .. })));
    assert_eq!(h.pipeline.state(), PipelineState::Halted);

    let stats = h.pipeline.stats();
    assert!(!stats.playing);
    assert_eq!(stats.video_packets_queued, 0);
    assert_eq!(stats.audio_packets_queued, 0);
    assert_eq!(stats.frames_buffered, 0);
    assert_eq!(stats.buffered_audio_secs, 0.0);

    let events = h.events.drain();
    assert_eq!(error_events(&events).len(), 1);
    assert!(events.contains(&PlayerEvent::PlaybackStateChanged { playing: false }));

    // Further ticks are inert and commands are refused
    h.pipeline.on_render_tick().await.unwrap();
    assert!(matches!(
        h.pipeline.start(None).await,
        Err(PlaybackError::InvalidState { .. })
    ));
    assert!(h.events.drain().is_empty());
}

#[tokio::test]
async fn test_fatal_read_halts_pipeline() {
    let demuxer = SyntheticDemuxer::new(SyntheticMedia::default()).with_faults(DemuxerFaults {
        fatal_after_reads: Some(0),
        ..DemuxerFaults::default()
    });
    let mut h = harness_with(demuxer, SyntheticVideoDecoder::new());

    assert!(matches!(
        h.pipeline.initialize(Bytes::new()).await,
        Err(PlaybackError::FatalDemux { .. })
    ));
    assert_eq!(h.pipeline.state(), PipelineState::Halted);
    assert_eq!(error_events(&h.events.drain()).len(), 1);
}
