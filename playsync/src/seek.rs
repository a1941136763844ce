//! Seek state machine
//!
//! [`SeekController`] tracks the `Idle -> Seeking -> Idle` cycle and decides
//! which stream positions the demuxer. The flush and reposition work itself
//! runs in [`crate::Pipeline::seek`], which owns every component touched.

use playsync_core::{PlaybackError, PlaybackResult, SeekAuthority};
use playsync_media::{
    Demuxer, MediaInfo, PacketQueueManager, StreamKind, StreamSelection, MICROS_PER_SECOND,
};
use crate::pipeline::PipelineStats;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Where the controller is in a seek
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SeekState {
    /// No seek in progress
    Idle,
    /// Components are being flushed and repositioned
    Seeking {
        /// Requested position in seconds
        target_seconds: f64,
    },
}

/// Demuxer seek arguments for a target position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekPlan {
    /// Requested position in seconds
    pub target_seconds: f64,
    /// Stream whose time base `timestamp` is expressed in; `None` seeks in microseconds
    pub stream_index: Option<usize>,
    /// Stream kind whose queue decides when the seek has landed
    pub authority: Option<StreamKind>,
    /// Target in the authoritative stream's time base
    pub timestamp: i64,
}

/// What a completed seek released and where it resumed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeekReport {
    /// Requested position in seconds
    pub target_seconds: f64,
    /// Time of the first authoritative packet after the seek, in seconds
    pub media_time_seconds: f64,
    /// Queued packets released by the flush
    pub packets_released: usize,
    /// Buffered and in-flight video frames released by the flush
    pub frames_released: usize,
    /// Audio samples discarded from the ring buffer
    pub samples_drained: usize,
    /// Pipeline counters the moment the seek returned to idle, before
    /// decoding resumed
    pub on_resume: PipelineStats,
}

#[derive(Debug)]
struct Progress {
    state: SeekState,
    completed: u64,
    abandoned: u64,
}

/// Seek state machine
///
/// `Seeking` is held by the [`SeekGuard`] returned from
/// [`SeekController::begin`]. A guard dropped before [`SeekGuard::complete`]
/// puts the controller back in `Idle`, so a cancelled seek never leaves it
/// stuck.
#[derive(Debug)]
pub struct SeekController {
    authority: SeekAuthority,
    progress: Arc<Mutex<Progress>>,
}

impl SeekController {
    /// Create an idle controller
    pub fn new(authority: SeekAuthority) -> Self {
        Self {
            authority,
            progress: Arc::new(Mutex::new(Progress {
                state: SeekState::Idle,
                completed: 0,
                abandoned: 0,
            })),
        }
    }

    /// Current state
    pub fn state(&self) -> SeekState {
        self.progress.lock().state
    }

    /// Whether a seek is in progress
    pub fn is_seeking(&self) -> bool {
        matches!(self.state(), SeekState::Seeking { .. })
    }

    /// Seeks that reached `Idle` again
    pub fn completed(&self) -> u64 {
        self.progress.lock().completed
    }

    /// Seeks dropped before they finished or failed
    pub fn abandoned(&self) -> u64 {
        self.progress.lock().abandoned
    }

    /// Resolve the demuxer arguments for `target_seconds`
    ///
    /// The authoritative stream follows the configured preference and falls
    /// back to the other kind when the preferred one is not selected.
    pub fn plan(
        &self,
        target_seconds: f64,
        selection: StreamSelection,
        info: &MediaInfo,
    ) -> PlaybackResult<SeekPlan> {
        if !target_seconds.is_finite() || target_seconds < 0.0 {
            return Err(PlaybackError::SeekFailed {
                target_seconds,
                reason: "target must be a non-negative number of seconds".to_string(),
            });
        }

        let order = match self.authority {
            SeekAuthority::PreferAudio => [StreamKind::Audio, StreamKind::Video],
            SeekAuthority::PreferVideo => [StreamKind::Video, StreamKind::Audio],
        };
        let chosen = order
            .into_iter()
            .find_map(|kind| selection.get(kind).map(|index| (kind, index)));

        let plan = match chosen {
            Some((kind, index)) => {
                let stream = info
                    .stream(index)
                    .ok_or(PlaybackError::StreamNotFound { index })?;
                SeekPlan {
                    target_seconds,
                    stream_index: Some(index),
                    authority: Some(kind),
                    timestamp: stream.time_base.seconds_to_ticks(target_seconds),
                }
            }
            None => SeekPlan {
                target_seconds,
                stream_index: None,
                authority: None,
                timestamp: (target_seconds * MICROS_PER_SECOND as f64).round() as i64,
            },
        };
        trace!(?plan, "Seek planned");
        Ok(plan)
    }

    /// Enter `Seeking`; the returned guard holds the state until it ends
    pub fn begin(&mut self, plan: &SeekPlan) -> PlaybackResult<SeekGuard> {
        let mut progress = self.progress.lock();
        if let SeekState::Seeking { target_seconds } = progress.state {
            return Err(PlaybackError::InvalidState {
                expected: "idle".to_string(),
                actual: format!("seeking to {:.3}s", target_seconds),
            });
        }
        progress.state = SeekState::Seeking {
            target_seconds: plan.target_seconds,
        };
        debug!(target_seconds = plan.target_seconds, "Seek started");
        Ok(SeekGuard {
            progress: Arc::clone(&self.progress),
            finished: false,
        })
    }

    /// Force `Idle`, whatever guard is outstanding
    pub fn abort(&mut self) {
        self.progress.lock().state = SeekState::Idle;
    }
}

/// Ownership of an in-progress seek
#[derive(Debug)]
#[must_use = "dropping the guard abandons the seek"]
pub struct SeekGuard {
    progress: Arc<Mutex<Progress>>,
    finished: bool,
}

impl SeekGuard {
    /// Return to `Idle` after a successful seek
    pub fn complete(mut self) {
        let mut progress = self.progress.lock();
        if matches!(progress.state, SeekState::Seeking { .. }) {
            progress.completed += 1;
        }
        progress.state = SeekState::Idle;
        self.finished = true;
    }

    /// Return to `Idle` after a failed seek
    pub fn abort(mut self) {
        self.progress.lock().state = SeekState::Idle;
        self.finished = true;
    }
}

impl Drop for SeekGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut progress = self.progress.lock();
        if let SeekState::Seeking { target_seconds } = progress.state {
            warn!(target_seconds, "Seek abandoned before completion");
            progress.abandoned += 1;
        }
        progress.state = SeekState::Idle;
    }
}

/// Wait until the queue of `kind` holds a packet, and return its time in seconds
///
/// Refills between waits of `backoff`, giving up after `max_waits` rounds or
/// once the demuxer has reached end of stream.
pub async fn await_first_packet(
    queues: &mut PacketQueueManager,
    demuxer: &mut dyn Demuxer,
    kind: StreamKind,
    backoff: Duration,
    max_waits: u32,
) -> PlaybackResult<Option<f64>> {
    let mut waits = 0;
    loop {
        if let Some(packet) = queues.front(kind) {
            return Ok(Some(packet.pts_seconds()));
        }
        if queues.is_ended() || waits >= max_waits {
            debug!(%kind, waits, ended = queues.is_ended(), "No packet after seek");
            return Ok(None);
        }
        queues.refill(demuxer).await?;
        if queues.front(kind).is_none() && !queues.is_ended() {
            waits += 1;
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playsync_media::StreamDescriptor;

    fn info() -> MediaInfo {
        MediaInfo::new(
            vec![
                StreamDescriptor::video(0, "h264", 640, 360),
                StreamDescriptor::audio(1, "aac", 2, 44_100),
            ],
            30_000_000,
        )
    }

    fn both() -> StreamSelection {
        StreamSelection {
            video: Some(0),
            audio: Some(1),
        }
    }

    #[test]
    fn test_audio_is_preferred_authority() {
        let controller = SeekController::new(SeekAuthority::PreferAudio);
        let plan = controller.plan(2.0, both(), &info()).unwrap();
        assert_eq!(plan.stream_index, Some(1));
        assert_eq!(plan.authority, Some(StreamKind::Audio));
        assert_eq!(plan.timestamp, 88_200);
    }

    #[test]
    fn test_video_authority_when_audio_missing() {
        let controller = SeekController::new(SeekAuthority::PreferAudio);
        let selection = StreamSelection {
            video: Some(0),
            audio: None,
        };
        let plan = controller.plan(1.0, selection, &info()).unwrap();
        assert_eq!(plan.stream_index, Some(0));
        assert_eq!(plan.timestamp, 90_000);
    }

    #[test]
    fn test_video_preference_is_configurable() {
        let controller = SeekController::new(SeekAuthority::PreferVideo);
        let plan = controller.plan(1.0, both(), &info()).unwrap();
        assert_eq!(plan.authority, Some(StreamKind::Video));
    }

    #[test]
    fn test_no_selection_seeks_in_microseconds() {
        let controller = SeekController::new(SeekAuthority::PreferAudio);
        let plan = controller
            .plan(0.25, StreamSelection::default(), &info())
            .unwrap();
        assert_eq!(plan.stream_index, None);
        assert_eq!(plan.timestamp, 250_000);
    }

    #[test]
    fn test_negative_target_is_rejected() {
        let controller = SeekController::new(SeekAuthority::PreferAudio);
        assert!(matches!(
            controller.plan(-1.0, both(), &info()),
            Err(PlaybackError::SeekFailed { .. })
        ));
    }

    #[test]
    fn test_state_machine_cycle() {
        let mut controller = SeekController::new(SeekAuthority::PreferAudio);
        let plan = controller.plan(3.0, both(), &info()).unwrap();

        let seek = controller.begin(&plan).unwrap();
        assert!(controller.is_seeking());
        assert!(controller.begin(&plan).is_err());

        seek.complete();
        assert_eq!(controller.state(), SeekState::Idle);
        assert_eq!(controller.completed(), 1);

        controller.begin(&plan).unwrap().abort();
        assert_eq!(controller.state(), SeekState::Idle);
        assert_eq!(controller.completed(), 1);
        assert_eq!(controller.abandoned(), 0);
    }

    #[test]
    fn test_dropped_guard_returns_to_idle() {
        let mut controller = SeekController::new(SeekAuthority::PreferAudio);
        let plan = controller.plan(3.0, both(), &info()).unwrap();

        drop(controller.begin(&plan).unwrap());
        assert_eq!(controller.state(), SeekState::Idle);
        assert_eq!(controller.abandoned(), 1);
        assert_eq!(controller.completed(), 0);

        controller.begin(&plan).unwrap().complete();
        assert_eq!(controller.completed(), 1);
    }
}
