//! Audio sink session states

/// Lifecycle of the single audio sink session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection has been requested yet
    Idle,
    /// Establishing a connection
    Opening,
    /// Connected, no audio flowing
    Open,
    /// Connected and rendering audio
    Streaming,
    /// Closed by request
    Closed,
    /// Every attempt failed; a new open resets to `Opening`
    Failed,
}

impl SessionState {
    /// Whether a confirmed connection exists
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Open | SessionState::Streaming)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Opening => write!(f, "Opening"),
            SessionState::Open => write!(f, "Open"),
            SessionState::Streaming => write!(f, "Streaming"),
            SessionState::Closed => write!(f, "Closed"),
            SessionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Sub-state of a connected session, reported with `StreamingStateChanged`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connected,
    Streaming,
}

impl StreamState {
    pub fn from_streaming(streaming: bool) -> Self {
        if streaming {
            StreamState::Streaming
        } else {
            StreamState::Connected
        }
    }

    pub fn is_streaming(&self) -> bool {
        *self == StreamState::Streaming
    }

    /// Get localized display string for UI
    pub fn display_localized(&self) -> String {
        match self {
            StreamState::Connected => rust_i18n::t!("status_connected").to_string(),
            StreamState::Streaming => rust_i18n::t!("status_streaming").to_string(),
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::Connected => write!(f, "Connected"),
            StreamState::Streaming => write!(f, "Streaming"),
        }
    }
}

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub device_id: Option<String>,
    pub state: SessionState,
    pub last_error: Option<String>,
}
