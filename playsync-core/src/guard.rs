//! Re-entry markers for cooperative operations
//!
//! An [`InFlight`] marker allows at most one logical invocation of an async
//! operation at a time. It is a state flag for a single cooperative context,
//! not a lock. The flag is cleared when the [`InFlightGuard`] drops, so an
//! invocation whose future is cancelled mid-await releases the marker too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Marker for an operation that must not overlap itself
#[derive(Debug, Default)]
pub struct InFlight {
    active: Arc<AtomicBool>,
}

impl InFlight {
    /// Create an inactive marker
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an invocation currently holds the marker
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claim the marker, or `None` when another invocation holds it
    pub fn try_enter(&self) -> Option<InFlightGuard> {
        if self.active.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(InFlightGuard {
            active: Arc::clone(&self.active),
        })
    }
}

/// Proof of holding an [`InFlight`] marker; releases it on drop
#[derive(Debug)]
#[must_use = "the marker is released as soon as the guard drops"]
pub struct InFlightGuard {
    active: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_entry_is_refused_while_held() {
        let marker = InFlight::new();
        let guard = marker.try_enter();
        assert!(guard.is_some());
        assert!(marker.is_active());
        assert!(marker.try_enter().is_none());

        drop(guard);
        assert!(!marker.is_active());
        assert!(marker.try_enter().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_holder_releases_marker() {
        let marker = InFlight::new();
        let held = async {
            let _guard = marker.try_enter();
            std::future::pending::<()>().await;
        };
        let result = tokio::time::timeout(std::time::Duration::from_millis(5), held).await;
        assert!(result.is_err());
        assert!(!marker.is_active());
    }
}
