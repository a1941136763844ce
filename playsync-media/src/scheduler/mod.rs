//! Decode scheduling
//!
//! Each scheduler moves packets from its packet queue into its decoder,
//! paced by the decoder's queue depth and by how much decoded output is
//! already waiting downstream. Both keep an explicit in-progress flag: at
//! most one logical invocation of `feed` is in flight at a time.

mod audio;
mod video;

pub use audio::{recheck_delay, AudioDecodeScheduler, AudioFeedOutcome};
pub use video::{VideoDecodeScheduler, VideoFeedOutcome};

use playsync_core::{PlaybackError, PlaybackResult};
use tracing::warn;

/// Counters shared by both schedulers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Feed invocations that ran
    pub feeds: u64,
    /// Feed invocations skipped because one was in flight
    pub skipped: u64,
    /// Packets handed to the decoder
    pub packets_submitted: u64,
    /// Packets the decoder rejected without halting
    pub decode_errors: u64,
}

/// Decide what a failed `decode` means for the pipeline
///
/// The packet is consumed either way. Unrecoverable failures propagate.
pub(crate) fn absorb_decode_error(
    stats: &mut SchedulerStats,
    codec: &str,
    err: PlaybackError,
) -> PlaybackResult<()> {
    if !err.is_recoverable() {
        return Err(err);
    }
    stats.decode_errors += 1;
    warn!(codec, "Dropping packet after decode error: {}", err);
    Ok(())
}
