//! Trait abstractions over the platform audio playback connection API
//! These traits allow mocking the platform handle in unit tests

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// State reported by a platform connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not (or no longer) rendering audio
    Closed,
    /// Open and rendering audio from the remote device
    Opened,
}

/// Outcome of a platform open request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    Success,
    RequestTimedOut,
    DeniedBySystem,
    UnknownFailure,
}

impl std::fmt::Display for OpenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenStatus::Success => write!(f, "Success"),
            OpenStatus::RequestTimedOut => write!(f, "RequestTimedOut"),
            OpenStatus::DeniedBySystem => write!(f, "DeniedBySystem"),
            OpenStatus::UnknownFailure => write!(f, "UnknownFailure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenResult {
    pub status: OpenStatus,
    /// Platform detail accompanying a failed open, if any
    pub extended_error: Option<String>,
}

impl OpenResult {
    pub fn success() -> Self {
        Self {
            status: OpenStatus::Success,
            extended_error: None,
        }
    }

    pub fn failed(status: OpenStatus, extended_error: Option<String>) -> Self {
        Self {
            status,
            extended_error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OpenStatus::Success
    }
}

/// Callback for handle state changes, invoked on a platform thread
pub type StateListener = Arc<dyn Fn(LinkState) + Send + Sync>;

/// Token identifying a registered [`StateListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// One audio sink connection to a remote device
#[async_trait]
pub trait AudioSinkHandle: Send + Sync {
    /// Activate the connection so it can be opened
    async fn start(&self) -> Result<()>;
    /// Ask the platform to open the connection
    async fn open(&self) -> Result<OpenResult>;
    /// Currently reported state
    fn state(&self) -> LinkState;
    fn subscribe_state(&self, listener: StateListener) -> Result<ListenerId>;
    fn unsubscribe_state(&self, id: ListenerId);
    /// Release the platform resource
    fn close(&self) -> Result<()>;
}

/// Factory for audio sink handles
pub trait AudioSinkPlatform: Send + Sync {
    /// Create a handle for `device_id`.
    ///
    /// `Ok(None)` means the device cannot act as an audio source for this
    /// host (e.g. it does not support the audio sink profile).
    fn try_create_handle(&self, device_id: &str) -> Result<Option<Arc<dyn AudioSinkHandle>>>;
}

/// Mock implementations for testing
/// Available in tests and with the "test-mocks" feature
#[cfg(any(test, feature = "test-mocks"))]
pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// How a mock handle behaves when opened
    #[derive(Debug, Clone)]
    pub struct HandleScript {
        pub open_status: OpenStatus,
        /// State the handle switches to once open succeeds
        pub state_after_open: Option<LinkState>,
        /// Time the open call takes
        pub open_delay: Option<Duration>,
        /// Error returned from `start`
        pub start_error: Option<String>,
        /// Error returned from `open`, after the delay
        pub open_error: Option<String>,
        pub fail_close: bool,
    }

    impl Default for HandleScript {
        fn default() -> Self {
            Self {
                open_status: OpenStatus::Success,
                state_after_open: Some(LinkState::Opened),
                open_delay: None,
                start_error: None,
                open_error: None,
                fail_close: false,
            }
        }
    }

    impl HandleScript {
        pub fn opens_streaming() -> Self {
            Self::default()
        }

        /// Opens successfully but never reports the `Opened` state
        pub fn opens_silent() -> Self {
            Self {
                state_after_open: None,
                ..Self::default()
            }
        }

        pub fn open_fails(status: OpenStatus) -> Self {
            Self {
                open_status: status,
                state_after_open: None,
                ..Self::default()
            }
        }

        pub fn start_errors(message: &str) -> Self {
            Self {
                start_error: Some(message.to_string()),
                state_after_open: None,
                ..Self::default()
            }
        }

        pub fn open_errors(message: &str) -> Self {
            Self {
                open_error: Some(message.to_string()),
                state_after_open: None,
                ..Self::default()
            }
        }
    }

    /// What the mock platform does for one `try_create_handle` call
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Return `Ok(None)`
        Unavailable,
        /// Return an error
        Error(String),
        /// Return a handle following the script
        Handle(HandleScript),
    }

    pub struct MockSinkHandle {
        pub device_id: String,
        script: HandleScript,
        state: Mutex<LinkState>,
        listeners: Mutex<HashMap<u64, StateListener>>,
        next_listener: AtomicU64,
        closed: AtomicBool,
        pub start_calls: AtomicUsize,
        pub open_calls: AtomicUsize,
    }

    impl MockSinkHandle {
        pub fn new(device_id: &str, script: HandleScript) -> Self {
            Self {
                device_id: device_id.to_string(),
                script,
                state: Mutex::new(LinkState::Closed),
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                start_calls: AtomicUsize::new(0),
                open_calls: AtomicUsize::new(0),
            }
        }

        /// Change the reported state and notify listeners, like a platform thread would
        pub fn set_state(&self, state: LinkState) {
            *self.state.lock().unwrap() = state;
            let listeners: Vec<StateListener> =
                self.listeners.lock().unwrap().values().cloned().collect();
            for listener in listeners {
                listener(state);
            }
        }

        pub fn listener_count(&self) -> usize {
            self.listeners.lock().unwrap().len()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AudioSinkHandle for MockSinkHandle {
        async fn start(&self) -> Result<()> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            match self.script.start_error {
                Some(ref msg) => Err(AppError::PlatformError(msg.clone())),
                None => Ok(()),
            }
        }

        async fn open(&self) -> Result<OpenResult> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.script.open_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(ref msg) = self.script.open_error {
                return Err(AppError::PlatformError(msg.clone()));
            }
            if self.script.open_status != OpenStatus::Success {
                return Ok(OpenResult::failed(
                    self.script.open_status,
                    Some("mock failure".to_string()),
                ));
            }
            if let Some(state) = self.script.state_after_open {
                self.set_state(state);
            }
            Ok(OpenResult::success())
        }

        fn state(&self) -> LinkState {
            *self.state.lock().unwrap()
        }

        fn subscribe_state(&self, listener: StateListener) -> Result<ListenerId> {
            let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
            self.listeners.lock().unwrap().insert(id, listener);
            Ok(ListenerId(id))
        }

        fn unsubscribe_state(&self, id: ListenerId) {
            self.listeners.lock().unwrap().remove(&id.0);
        }

        fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            if self.script.fail_close {
                return Err(AppError::PlatformError("mock close failure".to_string()));
            }
            Ok(())
        }
    }

    /// Platform returning scripted handles, one behavior per creation attempt
    pub struct MockAudioSink {
        behaviors: Mutex<VecDeque<MockBehavior>>,
        fallback: MockBehavior,
        created: Mutex<Vec<Arc<MockSinkHandle>>>,
        pub create_calls: AtomicUsize,
    }

    impl MockAudioSink {
        /// Every attempt behaves like `fallback`
        pub fn always(fallback: MockBehavior) -> Self {
            Self {
                behaviors: Mutex::new(VecDeque::new()),
                fallback,
                created: Mutex::new(Vec::new()),
                create_calls: AtomicUsize::new(0),
            }
        }

        /// Attempts follow `behaviors` in order, then `fallback`
        pub fn scripted(behaviors: Vec<MockBehavior>, fallback: MockBehavior) -> Self {
            let sink = Self::always(fallback);
            *sink.behaviors.lock().unwrap() = behaviors.into();
            sink
        }

        pub fn create_count(&self) -> usize {
            self.create_calls.load(Ordering::SeqCst)
        }

        pub fn handles(&self) -> Vec<Arc<MockSinkHandle>> {
            self.created.lock().unwrap().clone()
        }

        /// Handles that were created and not yet closed
        pub fn live_handles(&self) -> usize {
            self.created
                .lock()
                .unwrap()
                .iter()
                .filter(|h| !h.is_closed())
                .count()
        }
    }

    impl AudioSinkPlatform for MockAudioSink {
        fn try_create_handle(&self, device_id: &str) -> Result<Option<Arc<dyn AudioSinkHandle>>> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            let behavior = self
                .behaviors
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            match behavior {
                MockBehavior::Unavailable => Ok(None),
                MockBehavior::Error(msg) => Err(AppError::PlatformError(msg)),
                MockBehavior::Handle(script) => {
                    let handle = Arc::new(MockSinkHandle::new(device_id, script));
                    self.created.lock().unwrap().push(Arc::clone(&handle));
                    Ok(Some(handle))
                }
            }
        }
    }
}
