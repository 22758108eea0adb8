//! Wait for a connection handle to reach a state, bounded by a timeout

use crate::audio::traits::{AudioSinkHandle, LinkState, ListenerId, StateListener};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// How a [`wait_for_state`] call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The handle is in the target state
    Reached,
    /// The timeout elapsed first; the caller should re-read the state
    TimedOut,
    /// The cancellation token fired
    Cancelled,
}

/// Unregisters a state listener when dropped
struct ListenerGuard<'a> {
    handle: &'a dyn AudioSinkHandle,
    id: ListenerId,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.handle.unsubscribe_state(self.id);
    }
}

/// Suspend until `handle` reports `target`, `timeout` elapses or `cancel` fires.
///
/// The listener is registered before the current state is read, so a
/// transition racing with registration is never missed.
pub async fn wait_for_state(
    handle: &dyn AudioSinkHandle,
    target: LinkState,
    timeout: Duration,
    cancel: &CancellationToken,
) -> WaitOutcome {
    let reached = Arc::new(Notify::new());
    let signal = Arc::clone(&reached);
    let listener: StateListener = Arc::new(move |state| {
        if state == target {
            signal.notify_one();
        }
    });

    let _guard = match handle.subscribe_state(listener) {
        Ok(id) => ListenerGuard { handle, id },
        Err(e) => {
            warn!("Could not watch connection state, reading it once: {}", e);
            return if handle.state() == target {
                WaitOutcome::Reached
            } else {
                WaitOutcome::TimedOut
            };
        }
    };

    if handle.state() == target {
        return WaitOutcome::Reached;
    }

    let outcome = tokio::select! {
        biased;
        _ = reached.notified() => WaitOutcome::Reached,
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
        _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
    };
    debug!("Waiting for {:?} ended: {:?}", target, outcome);
    outcome
}
