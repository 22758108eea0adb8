//! Connection orchestrator: owns the single audio sink session
//!
//! Open requests are serialized by an async operation lock. Session fields
//! live behind a short-lived mutex that platform state callbacks also take;
//! it is never held across an await.

use crate::audio::session::{SessionInfo, SessionState, StreamState};
use crate::audio::traits::{
    AudioSinkHandle, AudioSinkPlatform, LinkState, ListenerId, OpenResult, StateListener,
};
use crate::audio::wait::{wait_for_state, WaitOutcome};
use crate::error::AppError;
use crate::events::{EventBus, SessionEvent};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default number of connection attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between failed attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default time to wait for the platform to report the opened state
pub const DEFAULT_STATE_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Retry and timeout settings for connection establishment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub state_wait_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            state_wait_timeout: DEFAULT_STATE_WAIT_TIMEOUT,
        }
    }
}

/// Called with `(device_id, streaming)` whenever the session's streaming flag
/// changes, outside of any orchestrator lock
pub type StreamingObserver = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Why a single attempt did not produce an open connection
#[derive(Debug)]
enum AttemptError {
    Unavailable,
    OpenFailed(OpenResult),
    Platform(AppError),
    Cancelled,
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Unavailable => write!(
                f,
                "Could not create audio connection. \
                 Device may not support the audio sink profile (A2DP)."
            ),
            AttemptError::OpenFailed(result) => {
                write!(f, "Failed to open audio connection: {}", result.status)?;
                if let Some(ref detail) = result.extended_error {
                    write!(f, " ({})", detail)?;
                }
                Ok(())
            }
            AttemptError::Platform(e) => write!(f, "Error opening connection: {}", e),
            AttemptError::Cancelled => write!(f, "Connection attempt cancelled"),
        }
    }
}

/// Handle acquired during one attempt.
///
/// Dropping the guard unsubscribes and releases the handle, so every early
/// return out of an attempt cleans up.
struct AttemptGuard {
    handle: Arc<dyn AudioSinkHandle>,
    listener: Option<ListenerId>,
    armed: bool,
}

impl AttemptGuard {
    fn new(handle: Arc<dyn AudioSinkHandle>) -> Self {
        Self {
            handle,
            listener: None,
            armed: true,
        }
    }

    /// Hand the handle over to the session
    fn disarm(mut self) -> ActiveHandle {
        self.armed = false;
        ActiveHandle {
            handle: Arc::clone(&self.handle),
            listener: self.listener.take(),
        }
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if self.armed {
            release(&self.handle, self.listener.take());
        }
    }
}

/// Unsubscribe and close a handle, logging (not propagating) failures
fn release(handle: &Arc<dyn AudioSinkHandle>, listener: Option<ListenerId>) {
    if let Some(id) = listener {
        handle.unsubscribe_state(id);
    }
    if let Err(e) = handle.close() {
        warn!("Failed to release audio connection: {}", e);
    }
}

struct ActiveHandle {
    handle: Arc<dyn AudioSinkHandle>,
    listener: Option<ListenerId>,
}

struct Slot {
    /// Bumped whenever a session starts or ends; state callbacks carry the
    /// generation they were registered under
    generation: u64,
    device_id: Option<String>,
    active: Option<ActiveHandle>,
    state: SessionState,
    streaming: bool,
    last_error: Option<String>,
}

struct Shared {
    slot: Mutex<Slot>,
    events: EventBus,
    observer: Mutex<Option<StreamingObserver>>,
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_observer(&self, device_id: &str, streaming: bool) {
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer(device_id, streaming);
        }
    }

    /// Platform state callback for the session registered under `generation`
    fn on_link_state(&self, generation: u64, state: LinkState) {
        let transition = {
            let mut slot = self.lock_slot();
            if slot.generation != generation || slot.active.is_none() {
                return;
            }

            let streaming = state == LinkState::Opened;
            if streaming == slot.streaming {
                return;
            }

            slot.streaming = streaming;
            slot.state = if streaming {
                SessionState::Streaming
            } else {
                SessionState::Open
            };
            debug!("Audio connection state changed: {:?}", state);
            self.events.emit(SessionEvent::StreamingStateChanged(
                StreamState::from_streaming(streaming),
            ));
            slot.device_id.clone().map(|id| (id, streaming))
        };

        if let Some((device_id, streaming)) = transition {
            self.notify_observer(&device_id, streaming);
        }
    }
}

/// Opens, supervises and tears down the audio sink session
pub struct ConnectionOrchestrator {
    platform: Arc<dyn AudioSinkPlatform>,
    policy: RetryPolicy,
    op_lock: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
    shared: Arc<Shared>,
}

impl ConnectionOrchestrator {
    pub fn new(platform: Arc<dyn AudioSinkPlatform>, events: EventBus) -> Self {
        Self::with_policy(platform, events, RetryPolicy::default())
    }

    pub fn with_policy(
        platform: Arc<dyn AudioSinkPlatform>,
        events: EventBus,
        policy: RetryPolicy,
    ) -> Self {
        let policy = RetryPolicy {
            max_attempts: policy.max_attempts.max(1),
            ..policy
        };
        Self {
            platform,
            policy,
            op_lock: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    generation: 0,
                    device_id: None,
                    active: None,
                    state: SessionState::Idle,
                    streaming: false,
                    last_error: None,
                }),
                events,
                observer: Mutex::new(None),
            }),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Register the observer notified of streaming changes
    pub fn set_streaming_observer(&self, observer: StreamingObserver) {
        *self
            .shared
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(observer);
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock_slot().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.lock_slot().streaming
    }

    pub fn current_device_id(&self) -> Option<String> {
        self.shared.lock_slot().device_id.clone()
    }

    pub fn session_info(&self) -> SessionInfo {
        let slot = self.shared.lock_slot();
        SessionInfo {
            device_id: slot.device_id.clone(),
            state: slot.state,
            last_error: slot.last_error.clone(),
        }
    }

    /// Open an audio sink connection to `device_id`, retrying on failure.
    ///
    /// Any existing session is closed first. Returns whether a connection
    /// was established; failures are reported through an `Error` event.
    pub async fn open_connection(&self, device_id: &str) -> bool {
        self.open_connection_with_cancel(device_id, &CancellationToken::new())
            .await
    }

    /// Like [`open_connection`](Self::open_connection), abandoning the
    /// attempt (and releasing its handle) once `cancel` fires
    pub async fn open_connection_with_cancel(
        &self,
        device_id: &str,
        cancel: &CancellationToken,
    ) -> bool {
        let _op = self.op_lock.lock().await;

        if self.disposed.load(Ordering::SeqCst) {
            warn!("Open requested after shutdown, ignoring");
            return false;
        }

        self.close_connection();

        let generation = {
            let mut slot = self.shared.lock_slot();
            slot.generation += 1;
            slot.state = SessionState::Opening;
            slot.device_id = Some(device_id.to_string());
            slot.last_error = None;
            slot.generation
        };

        info!("Opening audio connection to {}", device_id);
        let max_attempts = self.policy.max_attempts;
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            match self.try_open(device_id, generation, cancel).await {
                Ok(guard) => return self.install(device_id, generation, guard),
                Err(AttemptError::Cancelled) => return self.abandon(device_id),
                Err(e) => {
                    warn!(
                        "Attempt {}/{} to open {} failed: {}",
                        attempt, max_attempts, device_id, e
                    );
                    last_failure = Some(e);
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return self.abandon(device_id),
                    _ = tokio::time::sleep(self.policy.retry_delay) => {}
                }
            }
        }

        let message = last_failure.map(|e| e.to_string()).unwrap_or_else(|| {
            "Could not establish connection after multiple attempts.".to_string()
        });
        warn!("Giving up on {}: {}", device_id, message);

        let mut slot = self.shared.lock_slot();
        slot.state = SessionState::Failed;
        slot.device_id = None;
        slot.last_error = Some(message.clone());
        self.shared.events.emit(SessionEvent::Error(message));
        false
    }

    /// One establishment attempt; the returned guard owns an open handle
    async fn try_open(
        &self,
        device_id: &str,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<AttemptGuard, AttemptError> {
        let handle = match self.platform.try_create_handle(device_id) {
            Ok(Some(handle)) => handle,
            Ok(None) => return Err(AttemptError::Unavailable),
            Err(e) => return Err(AttemptError::Platform(e)),
        };
        let mut guard = AttemptGuard::new(handle);

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let listener: StateListener = Arc::new(move |state| {
            if let Some(shared) = weak.upgrade() {
                shared.on_link_state(generation, state);
            }
        });
        guard.listener = Some(
            guard
                .handle
                .subscribe_state(listener)
                .map_err(AttemptError::Platform)?,
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            started = guard.handle.start() => started.map_err(AttemptError::Platform)?,
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            opened = guard.handle.open() => opened.map_err(AttemptError::Platform)?,
        };
        if !result.is_success() {
            return Err(AttemptError::OpenFailed(result));
        }

        match wait_for_state(
            guard.handle.as_ref(),
            LinkState::Opened,
            self.policy.state_wait_timeout,
            cancel,
        )
        .await
        {
            WaitOutcome::Reached => debug!("Audio connection reported opened"),
            WaitOutcome::TimedOut => debug!("Opened state not reported in time, continuing"),
            WaitOutcome::Cancelled => return Err(AttemptError::Cancelled),
        }

        Ok(guard)
    }

    /// Make an established handle the current session
    fn install(&self, device_id: &str, generation: u64, guard: AttemptGuard) -> bool {
        let streaming = {
            let mut slot = self.shared.lock_slot();
            if self.disposed.load(Ordering::SeqCst) || slot.generation != generation {
                drop(slot);
                info!("Session for {} superseded before it opened", device_id);
                return false;
            }

            let active = guard.disarm();
            // Read under the lock: callbacks ignored before this point are
            // reflected in the current state
            let streaming = active.handle.state() == LinkState::Opened;
            slot.active = Some(active);
            slot.device_id = Some(device_id.to_string());
            slot.streaming = streaming;
            slot.state = if streaming {
                SessionState::Streaming
            } else {
                SessionState::Open
            };

            self.shared.events.emit(SessionEvent::ConnectionStateChanged(true));
            self.shared.events.emit(SessionEvent::StreamingStateChanged(
                StreamState::from_streaming(streaming),
            ));
            streaming
        };

        info!(
            "Audio connection to {} established ({})",
            device_id,
            StreamState::from_streaming(streaming)
        );
        self.shared.notify_observer(device_id, streaming);
        true
    }

    fn abandon(&self, device_id: &str) -> bool {
        info!("Connection attempt to {} cancelled", device_id);
        let mut slot = self.shared.lock_slot();
        slot.state = SessionState::Idle;
        slot.device_id = None;
        false
    }

    /// Close the current session. Does nothing if there is none.
    pub fn close_connection(&self) {
        let (active, device_id, was_streaming) = {
            let mut slot = self.shared.lock_slot();
            let Some(active) = slot.active.take() else {
                return;
            };
            slot.generation += 1;
            slot.state = SessionState::Closed;
            let was_streaming = std::mem::replace(&mut slot.streaming, false);
            (active, slot.device_id.take(), was_streaming)
        };

        info!("Closing audio connection to {}", device_id.as_deref().unwrap_or("?"));
        release(&active.handle, active.listener);
        self.shared.events.emit(SessionEvent::ConnectionStateChanged(false));
        drop(active);

        if was_streaming {
            if let Some(ref id) = device_id {
                self.shared.notify_observer(id, false);
            }
        }
    }

    /// Synchronous best-effort teardown for shutdown; never panics
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let active = {
            let mut slot = self.shared.lock_slot();
            slot.generation += 1;
            slot.device_id = None;
            slot.streaming = false;
            if slot.active.is_some() {
                slot.state = SessionState::Closed;
            }
            slot.active.take()
        };

        if let Some(active) = active {
            debug!("Releasing audio connection on shutdown");
            release(&active.handle, active.listener);
        }
    }
}

impl Drop for ConnectionOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}
