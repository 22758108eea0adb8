//! Receiver facade: device discovery plus the audio sink session behind one API
//!
//! The presentation layer talks only to [`AudioReceiver`]: it issues commands
//! and drains the [`SessionEvent`] channel it got from [`AudioReceiver::subscribe`].

use crate::audio::traits::AudioSinkPlatform;
use crate::audio::{ConnectionOrchestrator, RetryPolicy, SessionInfo, StreamingObserver};
use crate::bluetooth::{Device, DeviceFeed, DeviceRegistry, DeviceWatcher, UNKNOWN_DEVICE};
use crate::events::{EventBus, SessionEvent};
use crate::settings::AppConfig;
use log::{debug, info};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// Composition-time settings for [`AudioReceiver`]
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    pub retry_policy: RetryPolicy,
    /// Display name for devices that report none
    pub unknown_label: String,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            unknown_label: UNKNOWN_DEVICE.to_string(),
        }
    }
}

impl ReceiverOptions {
    /// Options from persisted settings, with the placeholder name in the
    /// current locale
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            retry_policy: config.connection.retry_policy(),
            unknown_label: crate::i18n::text("unknown_device"),
        }
    }
}

pub struct AudioReceiver {
    registry: Arc<DeviceRegistry>,
    watcher: Arc<DeviceWatcher>,
    orchestrator: ConnectionOrchestrator,
    events: EventBus,
}

impl AudioReceiver {
    pub fn new(feed: Arc<dyn DeviceFeed>, platform: Arc<dyn AudioSinkPlatform>) -> Self {
        Self::with_options(feed, platform, ReceiverOptions::default())
    }

    pub fn with_options(
        feed: Arc<dyn DeviceFeed>,
        platform: Arc<dyn AudioSinkPlatform>,
        options: ReceiverOptions,
    ) -> Self {
        let events = EventBus::new();
        let registry = Arc::new(DeviceRegistry::new());
        let watcher = Arc::new(
            DeviceWatcher::new(feed, Arc::clone(&registry), events.clone())
                .with_unknown_label(options.unknown_label),
        );
        let orchestrator =
            ConnectionOrchestrator::with_policy(platform, events.clone(), options.retry_policy);

        // Streaming changes of the session show up on the registry entry
        let weak: Weak<DeviceWatcher> = Arc::downgrade(&watcher);
        let observer: StreamingObserver = Arc::new(move |device_id: &str, streaming: bool| {
            if let Some(watcher) = weak.upgrade() {
                watcher.mark_streaming(device_id, streaming);
            }
        });
        orchestrator.set_streaming_observer(observer);

        Self {
            registry,
            watcher,
            orchestrator,
            events,
        }
    }

    /// Get a new event channel; events raised before this call are not replayed
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn start_watching(&self) {
        self.watcher.start();
    }

    pub fn stop_watching(&self) {
        self.watcher.stop();
    }

    /// Drop the device list and enumerate again
    pub fn refresh_devices(&self) {
        self.watcher.refresh();
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_watching()
    }

    pub fn enumeration_completed(&self) -> bool {
        self.watcher.enumeration_completed()
    }

    /// Known devices, sorted by name
    pub fn list_devices(&self) -> Vec<Device> {
        self.registry.snapshot()
    }

    pub fn device(&self, id: &str) -> Option<Device> {
        self.registry.get(id)
    }

    /// Open the audio sink connection to `device_id`, replacing any current one
    pub async fn open_connection(&self, device_id: &str) -> bool {
        self.orchestrator.open_connection(device_id).await
    }

    pub async fn open_connection_with_cancel(
        &self,
        device_id: &str,
        cancel: &CancellationToken,
    ) -> bool {
        self.orchestrator
            .open_connection_with_cancel(device_id, cancel)
            .await
    }

    pub fn close_connection(&self) {
        self.orchestrator.close_connection();
    }

    pub fn is_connected(&self) -> bool {
        self.orchestrator.is_connected()
    }

    pub fn is_streaming(&self) -> bool {
        self.orchestrator.is_streaming()
    }

    pub fn current_device(&self) -> Option<Device> {
        self.orchestrator
            .current_device_id()
            .and_then(|id| self.registry.get(&id))
    }

    pub fn session_info(&self) -> SessionInfo {
        self.orchestrator.session_info()
    }

    /// The remembered device to reconnect to, if auto-connect is on and the
    /// device is currently listed
    pub fn auto_connect_target(&self, config: &AppConfig) -> Option<Device> {
        let id = config.auto_connect_device()?;
        let device = self.registry.get(id);
        if device.is_none() {
            debug!("Auto-connect device {} is not listed", id);
        }
        device
    }

    /// Stop watching and release the session without raising events
    pub fn shutdown(&self) {
        info!("Shutting down receiver");
        self.watcher.stop();
        self.orchestrator.dispose();
    }
}

impl Drop for AudioReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
