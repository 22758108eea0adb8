//! Audio sink connection module
//!
//! Opens the platform audio playback connection to a remote device and
//! tracks whether audio is flowing.

pub mod orchestrator;
pub mod session;
pub mod traits;
pub mod wait;

pub use orchestrator::{ConnectionOrchestrator, RetryPolicy, StreamingObserver};
pub use session::{SessionInfo, SessionState, StreamState};
pub use traits::{AudioSinkHandle, AudioSinkPlatform, LinkState, ListenerId, OpenResult, OpenStatus};
pub use wait::{wait_for_state, WaitOutcome};
