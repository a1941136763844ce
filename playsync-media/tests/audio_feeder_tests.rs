//! Integration tests for the audio feeder
//!
//! This module contains tests for sample conversion into the ring buffer,
//! overflow reporting and fill level accounting.

use playsync_core::{ring_buffer, PlaybackError};
use playsync_media::*;

fn stereo_frame(timestamp_micros: i64, frames: usize, value: f32) -> DecodedAudioFrame {
    DecodedAudioFrame::interleaved(
        timestamp_micros,
        48_000,
        2,
        SampleData::F32(vec![value; frames * 2]),
    )
}

// ============================================================================
// OVERFLOW TESTS
// ============================================================================

#[test]
fn test_overflow_reports_requested_and_written() {
    let (producer, _consumer) = ring_buffer::channel(4_800).unwrap();
    let mut feeder = AudioFeeder::new(producer, 2, 48_000).unwrap();

    assert_eq!(feeder.write_frame(stereo_frame(0, 1_000, 0.25)).unwrap(), 2_000);

    let result = feeder.write_frame(stereo_frame(20_833, 1_500, 0.25));
    assert_eq!(
        result,
        Err(PlaybackError::RingBufferOverflow {
            requested: 3_000,
            written: 2_800,
        })
    );

    let stats = feeder.stats();
    assert_eq!(stats.frames_consumed, 2);
    assert_eq!(stats.samples_written, 4_800);
    assert_eq!(stats.overflows, 1);
    assert_eq!(stats.samples_dropped, 200);
    assert_eq!(feeder.buffered_samples(), 4_800);
}

#[test]
fn test_overflow_is_recoverable() {
    let error = PlaybackError::RingBufferOverflow {
        requested: 3_000,
        written: 2_800,
    };
    assert!(error.is_recoverable());
}

// ============================================================================
// FILL LEVEL TESTS
// ============================================================================

#[test]
fn test_fill_seconds_tracks_writes_and_reads() {
    let (producer, consumer) = ring_buffer::with_duration(0.6, 48_000, 2).unwrap();
    let mut feeder = AudioFeeder::new(producer, 2, 48_000).unwrap();

    feeder.write_frame(stereo_frame(0, 4_800, 0.0)).unwrap();
    assert!((feeder.fill_seconds() - 0.1).abs() < 1e-9);

    let mut out = vec![0.0f32; 4_800];
    assert!(!consumer.read(&mut out).is_starved());
    assert!((feeder.fill_seconds() - 0.05).abs() < 1e-9);
}

#[test]
fn test_drain_discards_buffered_samples() {
    let (producer, consumer) = ring_buffer::channel(1_024).unwrap();
    let mut feeder = AudioFeeder::new(producer, 2, 48_000).unwrap();
    feeder.write_frame(stereo_frame(0, 256, 0.5)).unwrap();

    assert_eq!(feeder.drain(), 512);
    assert_eq!(feeder.buffered_samples(), 0);

    let mut out = [1.0f32; 8];
    let outcome = consumer.read(&mut out);
    assert!(outcome.is_starved());
    assert_eq!(out, [0.0; 8]);
}

// ============================================================================
// CONVERSION TESTS
// ============================================================================

#[test]
fn test_integer_planar_frames_reach_consumer_as_f32() {
    let (producer, consumer) = ring_buffer::channel(64).unwrap();
    let mut feeder = AudioFeeder::new(producer, 2, 44_100).unwrap();

    let frame = DecodedAudioFrame::planar(
        0,
        44_100,
        vec![
            SampleData::I32(vec![i32::MIN, 0]),
            SampleData::U16(vec![49_152, 32_768]),
        ],
    );
    assert_eq!(frame.sample_format(), Some(SampleFormat::I32));
    feeder.write_frame(frame).unwrap();

    let mut out = [0.0f32; 4];
    consumer.read(&mut out);
    assert_eq!(out, [-1.0, 0.5, 0.0, 0.0]);
}
