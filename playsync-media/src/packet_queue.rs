//! Per-stream packet queues fed from the demuxer
//!
//! The manager keeps the queue of each selected stream topped up to a
//! minimum length. Reads are bounded by a byte budget; packets belonging to
//! unselected streams are dropped on arrival.

use crate::demuxer::{DemuxError, Demuxer};
use crate::packet::Packet;
use crate::stream::{StreamKind, StreamSelection};
use playsync_core::{InFlight, PipelineConfig, PlaybackError, PlaybackResult};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Result of a refill attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    /// Every selected queue holds at least the minimum
    Filled,
    /// A refill was already in flight or the source had ended
    Skipped,
    /// The demuxer reached the end of the source during this refill
    EndOfStream,
    /// The demuxer kept asking to be retried; try again later
    Starved,
}

/// Counters for observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketQueueStats {
    /// Demuxer reads issued
    pub reads: u64,
    /// Packets appended to a queue
    pub packets_queued: u64,
    /// Packets dropped because their stream is not selected
    pub packets_ignored: u64,
    /// Packets released by a clear
    pub packets_cleared: u64,
    /// Would-block results that were retried
    pub transient_retries: u64,
}

/// Bounded per-stream packet queues
#[derive(Debug)]
pub struct PacketQueueManager {
    video: VecDeque<Packet>,
    audio: VecDeque<Packet>,
    selection: StreamSelection,
    min_size: usize,
    read_limit_bytes: usize,
    backoff: Duration,
    max_retries: u32,
    ended: bool,
    refilling: InFlight,
    stats: PacketQueueStats,
}

impl PacketQueueManager {
    /// Create empty queues for the given selection
    pub fn new(config: &PipelineConfig, selection: StreamSelection) -> Self {
        Self {
            video: VecDeque::new(),
            audio: VecDeque::new(),
            selection,
            min_size: config.packet_queue_min,
            read_limit_bytes: config.read_limit_bytes,
            backoff: config.starvation_backoff(),
            max_retries: config.max_transient_retries,
            ended: false,
            refilling: InFlight::new(),
            stats: PacketQueueStats::default(),
        }
    }

    /// Streams whose packets are being queued
    pub fn selection(&self) -> StreamSelection {
        self.selection
    }

    /// Route packets of `kind` from a different stream
    ///
    /// Packets already queued for the previous stream are released.
    pub fn retarget(&mut self, kind: StreamKind, index: usize) -> PlaybackResult<usize> {
        let released = match kind {
            StreamKind::Video => {
                self.selection.video = Some(index);
                Self::release_all(&mut self.video)
            }
            StreamKind::Audio => {
                self.selection.audio = Some(index);
                Self::release_all(&mut self.audio)
            }
            other => {
                return Err(PlaybackError::config(format!(
                    "{} streams have no packet queue",
                    other
                )))
            }
        };
        self.stats.packets_cleared += released as u64;
        debug!(%kind, stream_index = index, released, "Packet queue retargeted");
        Ok(released)
    }

    /// Whether any selected stream's queue is below the minimum
    pub fn needs_refill(&self) -> bool {
        let video_low = self.selection.video.is_some() && self.video.len() < self.min_size;
        let audio_low = self.selection.audio.is_some() && self.audio.len() < self.min_size;
        video_low || audio_low
    }

    /// Whether the demuxer has reported end of stream
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Whether a refill is in flight
    pub fn is_refilling(&self) -> bool {
        self.refilling.is_active()
    }

    /// Top up every selected queue to the minimum length
    ///
    /// A would-block read backs off and retries a bounded number of times,
    /// then returns [`RefillOutcome::Starved`]. A fatal read error is
    /// returned and leaves the queues as they were before that read.
    pub async fn refill(&mut self, demuxer: &mut dyn Demuxer) -> PlaybackResult<RefillOutcome> {
        if self.ended {
            trace!("Refill skipped after end of stream");
            return Ok(RefillOutcome::Skipped);
        }
        let Some(_refilling) = self.refilling.try_enter() else {
            trace!("Refill already in flight");
            return Ok(RefillOutcome::Skipped);
        };
        self.refill_internal(demuxer).await
    }

    async fn refill_internal(
        &mut self,
        demuxer: &mut dyn Demuxer,
    ) -> PlaybackResult<RefillOutcome> {
        let mut retries = 0u32;

        while self.needs_refill() {
            self.stats.reads += 1;
            match demuxer.read_packets(self.read_limit_bytes).await {
                Ok(batch) if batch.values().all(Vec::is_empty) => {
                    if !self.back_off(&mut retries, "empty read").await {
                        return Ok(RefillOutcome::Starved);
                    }
                }
                Ok(batch) => {
                    retries = 0;
                    for (stream_index, packets) in batch {
                        self.enqueue(stream_index, packets);
                    }
                }
                Err(DemuxError::EndOfStream) => {
                    info!(
                        video_queued = self.video.len(),
                        audio_queued = self.audio.len(),
                        "Demuxer reached end of stream"
                    );
                    self.ended = true;
                    return Ok(RefillOutcome::EndOfStream);
                }
                Err(DemuxError::WouldBlock { reason }) => {
                    if !self.back_off(&mut retries, &reason).await {
                        return Ok(RefillOutcome::Starved);
                    }
                }
                Err(DemuxError::Fatal { reason }) => {
                    error!("Error reading packets: {}", reason);
                    return Err(PlaybackError::FatalDemux { reason });
                }
            }
        }

        Ok(RefillOutcome::Filled)
    }

    async fn back_off(&mut self, retries: &mut u32, reason: &str) -> bool {
        if *retries >= self.max_retries {
            debug!(retries = *retries, "Demuxer starved, giving up for now");
            return false;
        }
        *retries += 1;
        self.stats.transient_retries += 1;
        trace!(reason, retry = *retries, "Demuxer would block, backing off");
        tokio::time::sleep(self.backoff).await;
        true
    }

    fn enqueue(&mut self, stream_index: usize, packets: Vec<Packet>) {
        let queue = if Some(stream_index) == self.selection.video {
            &mut self.video
        } else if Some(stream_index) == self.selection.audio {
            &mut self.audio
        } else {
            self.stats.packets_ignored += packets.len() as u64;
            return;
        };
        self.stats.packets_queued += packets.len() as u64;
        queue.extend(packets);
    }

    /// Take the next packet of `kind`, refilling first if its queue is empty
    pub async fn next_packet(
        &mut self,
        kind: StreamKind,
        demuxer: &mut dyn Demuxer,
    ) -> PlaybackResult<Option<Packet>> {
        if self.len(kind) == 0 {
            self.refill(demuxer).await?;
        }
        Ok(self.pop(kind))
    }

    /// Take the next queued packet of `kind`
    pub fn pop(&mut self, kind: StreamKind) -> Option<Packet> {
        match kind {
            StreamKind::Video => self.video.pop_front(),
            StreamKind::Audio => self.audio.pop_front(),
            _ => None,
        }
    }

    /// Peek at the next queued packet of `kind`
    pub fn front(&self, kind: StreamKind) -> Option<&Packet> {
        match kind {
            StreamKind::Video => self.video.front(),
            StreamKind::Audio => self.audio.front(),
            _ => None,
        }
    }

    /// Queued packets of `kind`
    pub fn len(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Video => self.video.len(),
            StreamKind::Audio => self.audio.len(),
            _ => 0,
        }
    }

    /// Whether both queues are empty
    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty()
    }

    /// Release every queued packet; returns how many were released
    pub fn clear(&mut self) -> usize {
        if self.refilling.is_active() {
            warn!("Clearing packet queues while a refill is in flight");
        }
        let released = Self::release_all(&mut self.video) + Self::release_all(&mut self.audio);
        self.stats.packets_cleared += released as u64;
        released
    }

    /// Clear the queues and forget end of stream after a reposition
    pub fn reset(&mut self) -> usize {
        let released = self.clear();
        self.ended = false;
        released
    }

    /// Counter snapshot
    pub fn stats(&self) -> PacketQueueStats {
        self.stats.clone()
    }

    fn release_all(queue: &mut VecDeque<Packet>) -> usize {
        let released = queue.len();
        queue.clear();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TimeBase;
    use crate::synthetic::{ScriptedDemuxer, ScriptedRead};
    use bytes::Bytes;

    fn packet(stream_index: usize, pts: i64) -> Packet {
        Packet::new(stream_index, pts, TimeBase::MICROS, Bytes::from_static(b"pkt"))
    }

    fn selection() -> StreamSelection {
        StreamSelection {
            video: Some(0),
            audio: Some(1),
        }
    }

    #[tokio::test]
    async fn test_refill_ignores_unselected_streams() {
        let mut demuxer = ScriptedDemuxer::new(vec![ScriptedRead::Batch(vec![
            (0, (0..5).map(|i| packet(0, i)).collect()),
            (1, (0..5).map(|i| packet(1, i)).collect()),
            (2, (0..3).map(|i| packet(2, i)).collect()),
        ])]);
        let mut queues = PacketQueueManager::new(&PipelineConfig::default(), selection());

        let outcome = queues.refill(&mut demuxer).await.unwrap();
        assert_eq!(outcome, RefillOutcome::Filled);
        assert_eq!(queues.len(StreamKind::Video), 5);
        assert_eq!(queues.len(StreamKind::Audio), 5);
        assert_eq!(queues.stats().packets_ignored, 3);
    }

    #[tokio::test]
    async fn test_end_of_stream_makes_refill_a_no_op() {
        let mut demuxer = ScriptedDemuxer::new(vec![ScriptedRead::EndOfStream]);
        let mut queues = PacketQueueManager::new(&PipelineConfig::default(), selection());

        assert_eq!(
            queues.refill(&mut demuxer).await.unwrap(),
            RefillOutcome::EndOfStream
        );
        assert!(queues.is_ended());
        assert_eq!(
            queues.refill(&mut demuxer).await.unwrap(),
            RefillOutcome::Skipped
        );
        assert_eq!(demuxer.probe().reads(), 1);

        queues.reset();
        assert!(!queues.is_ended());
    }

    #[tokio::test]
    async fn test_absent_stream_does_not_force_reads() {
        let mut demuxer = ScriptedDemuxer::new(vec![ScriptedRead::Batch(vec![(
            0,
            (0..5).map(|i| packet(0, i)).collect(),
        )])]);
        let mut queues = PacketQueueManager::new(
            &PipelineConfig::default(),
            StreamSelection {
                video: Some(0),
                audio: None,
            },
        );

        assert_eq!(
            queues.refill(&mut demuxer).await.unwrap(),
            RefillOutcome::Filled
        );
        assert_eq!(demuxer.probe().reads(), 1);
        assert!(!queues.needs_refill());
    }

    #[tokio::test]
    async fn test_retarget_releases_old_packets() {
        let mut queues = PacketQueueManager::new(&PipelineConfig::default(), selection());
        queues.enqueue(1, vec![packet(1, 0), packet(1, 1)]);

        assert_eq!(queues.retarget(StreamKind::Audio, 3).unwrap(), 2);
        assert_eq!(queues.len(StreamKind::Audio), 0);
        assert_eq!(queues.selection().audio, Some(3));
        assert!(queues.retarget(StreamKind::Subtitle, 4).is_err());
    }
}
