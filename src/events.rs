//! Events published by the receiver core and their delivery

use crate::audio::session::StreamState;
use crate::bluetooth::device::Device;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Events sent from the watcher and the connection orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A device appeared in the registry
    DeviceAdded(Device),
    /// A known device changed; carries the new value
    DeviceUpdated(Device),
    /// A device left the registry
    DeviceRemoved(String),
    /// The initial device listing is complete
    EnumerationCompleted,
    /// The audio connection was established (`true`) or closed (`false`)
    ConnectionStateChanged(bool),
    /// The connected session switched between connected and streaming
    StreamingStateChanged(StreamState),
    /// A connection attempt failed
    Error(String),
}

/// Multicast delivery of [`SessionEvent`]s.
///
/// Each subscriber gets its own channel. Events are sent from whichever thread
/// raised them; a subscriber bound to one thread drains its receiver there.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<SessionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    /// Send an event to every live subscriber, dropping disconnected ones
    pub fn emit(&self, event: SessionEvent) {
        log::trace!("Emitting {:?}", event);
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Drain every event currently queued on `rx` (non-blocking)
pub fn drain(rx: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
    rx.try_iter().collect()
}
