//! Device watcher: turns feed notifications into registry updates and events

use crate::bluetooth::device::{sanitize_device_name, Device, UNKNOWN_DEVICE};
use crate::bluetooth::feed::{
    connectivity, DeviceFeed, FeedNotification, FeedSink, RawDevice, RawDeviceUpdate,
};
use crate::bluetooth::registry::{DeviceRegistry, Upserted};
use crate::events::{EventBus, SessionEvent};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Per-watch-session bookkeeping
#[derive(Debug, Default)]
struct WatchState {
    active: bool,
    /// Incremented on every start; callbacks carry the value they were
    /// created with and are ignored once it no longer matches
    generation: u64,
    enumeration_completed: bool,
    /// Device the audio session is streaming from; survives restarts so a
    /// re-listed entry gets its flag back
    streaming_device: Option<String>,
}

struct WatcherInner {
    feed: Arc<dyn DeviceFeed>,
    registry: Arc<DeviceRegistry>,
    events: EventBus,
    unknown_label: String,
    state: Mutex<WatchState>,
}

/// Watches the device feed and maintains the [`DeviceRegistry`]
pub struct DeviceWatcher {
    inner: Arc<WatcherInner>,
}

impl DeviceWatcher {
    pub fn new(feed: Arc<dyn DeviceFeed>, registry: Arc<DeviceRegistry>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                feed,
                registry,
                events,
                unknown_label: UNKNOWN_DEVICE.to_string(),
                state: Mutex::new(WatchState::default()),
            }),
        }
    }

    /// Use `label` for devices that report no usable name
    ///
    /// Only takes effect before the first `start`, while no feed callback
    /// holds a reference to the watcher.
    pub fn with_unknown_label(mut self, label: impl Into<String>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.unknown_label = label.into(),
            None => warn!("Unknown-device label set on a running watcher, ignoring"),
        }
        self
    }

    /// Subscribe to the feed. Does nothing if already watching.
    ///
    /// A feed that fails to start is stopped again and logged; the watcher is
    /// then simply idle with whatever devices the registry holds.
    pub fn start(&self) {
        let generation = {
            let mut state = self.inner.lock_state();
            if state.active {
                debug!("Device watcher already started");
                return;
            }
            state.generation += 1;
            state.active = true;
            state.enumeration_completed = false;
            state.generation
        };

        let weak: Weak<WatcherInner> = Arc::downgrade(&self.inner);
        let sink: FeedSink = Arc::new(move |notification| {
            if let Some(inner) = weak.upgrade() {
                inner.handle(generation, notification);
            }
        });

        match self.inner.feed.start(sink) {
            Ok(()) => info!("Device watcher started"),
            Err(e) => {
                warn!("Device feed failed to start, no devices will be listed: {}", e);
                self.stop();
            }
        }
    }

    /// Unsubscribe from the feed. Does nothing if not watching.
    pub fn stop(&self) {
        if !self.inner.lock_state().active {
            return;
        }

        // Unsubscribe first so no new callback starts after the state is cleared
        self.inner.feed.stop();

        let mut state = self.inner.lock_state();
        state.active = false;
        state.enumeration_completed = false;
        info!("Device watcher stopped");
    }

    /// Restart enumeration from an empty registry
    pub fn refresh(&self) {
        info!("Refreshing device list");
        self.stop();
        for device in self.inner.registry.clear() {
            self.inner.events.emit(SessionEvent::DeviceRemoved(device.id));
        }
        self.start();
    }

    pub fn is_watching(&self) -> bool {
        self.inner.lock_state().active
    }

    /// Whether the initial listing of the current watch session has finished
    pub fn enumeration_completed(&self) -> bool {
        self.inner.lock_state().enumeration_completed
    }

    /// Reflect the audio session's streaming flag onto a registry entry.
    ///
    /// The flag is remembered, so a device listed again after a refresh
    /// shows up as streaming.
    pub fn mark_streaming(&self, id: &str, streaming: bool) {
        let mut state = self.inner.lock_state();
        if streaming {
            state.streaming_device = Some(id.to_string());
        } else if state.streaming_device.as_deref() == Some(id) {
            state.streaming_device = None;
        }

        let mut changed = false;
        let updated = self.inner.registry.update(id, |device| {
            changed = device.is_audio_streaming != streaming;
            device.is_audio_streaming = streaming;
        });

        if let Some(device) = updated {
            if changed {
                self.inner.events.emit(SessionEvent::DeviceUpdated(device));
            }
        }
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WatcherInner {
    fn lock_state(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Process one notification from the feed.
    ///
    /// The state lock is held for the whole call so that `stop` cannot
    /// complete while a callback is half-way through the registry.
    fn handle(&self, generation: u64, notification: FeedNotification) {
        let mut state = self.lock_state();
        if !state.active || state.generation != generation {
            debug!("Ignoring late feed notification: {:?}", notification);
            return;
        }

        match notification {
            FeedNotification::Added(raw) => {
                let streaming = state.streaming_device.as_deref() == Some(raw.id.as_str());
                self.on_added(raw, streaming);
            }
            FeedNotification::Updated(update) => self.on_updated(update),
            FeedNotification::Removed(id) => self.on_removed(&id),
            FeedNotification::EnumerationCompleted => {
                if state.enumeration_completed {
                    return;
                }
                state.enumeration_completed = true;
                info!("Device enumeration completed with {} device(s)", self.registry.len());
                self.events.emit(SessionEvent::EnumerationCompleted);
            }
        }
    }

    fn on_added(&self, raw: RawDevice, streaming: bool) {
        let name = sanitize_device_name(raw.name.as_deref(), &self.unknown_label);
        let is_connected = connectivity(&raw.properties).unwrap_or(false);
        let mut device = Device::new(raw.id, name, is_connected);
        device.is_audio_streaming = streaming;

        match self.registry.upsert(device) {
            Upserted::Inserted(device) => {
                debug!("Device added: {} ({})", device.name, device.id);
                self.events.emit(SessionEvent::DeviceAdded(device));
            }
            Upserted::Updated(device) => {
                debug!("Device re-added, treating as update: {}", device.id);
                self.events.emit(SessionEvent::DeviceUpdated(device));
            }
        }
    }

    fn on_updated(&self, update: RawDeviceUpdate) {
        let connected = connectivity(&update.properties);
        let updated = self.registry.update(&update.id, |device| {
            if let Some(connected) = connected {
                device.is_connected = connected;
            }
        });

        match updated {
            Some(device) => {
                debug!("Device updated: {} -> {}", device.id, device.status());
                self.events.emit(SessionEvent::DeviceUpdated(device));
            }
            None => debug!("Ignoring update for unknown device {}", update.id),
        }
    }

    fn on_removed(&self, id: &str) {
        if self.registry.remove(id).is_some() {
            debug!("Device removed: {}", id);
            self.events.emit(SessionEvent::DeviceRemoved(id.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::device::DeviceStatus;
    use crate::bluetooth::feed::mocks::MockDeviceFeed;
    use crate::events::drain;

    type Fixture = (
        Arc<MockDeviceFeed>,
        Arc<DeviceRegistry>,
        DeviceWatcher,
        std::sync::mpsc::Receiver<SessionEvent>,
    );

    fn setup() -> Fixture {
        let feed = Arc::new(MockDeviceFeed::new());
        let registry = Arc::new(DeviceRegistry::new());
        let events = EventBus::new();
        let rx = events.subscribe();
        let watcher = DeviceWatcher::new(feed.clone(), Arc::clone(&registry), events);
        (feed, registry, watcher, rx)
    }

    #[test]
    fn test_added_updated_removed_scenario() {
        let (feed, registry, watcher, rx) = setup();
        watcher.start();

        feed.push(FeedNotification::Added(RawDevice::new("dev1", Some("  Phone  "))));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "Phone");
        assert!(!snapshot[0].is_connected);

        feed.push(FeedNotification::Updated(
            RawDeviceUpdate::new("dev1").with_connected(true),
        ));
        assert!(registry.get("dev1").unwrap().is_connected);

        feed.push(FeedNotification::Removed("dev1".into()));
        assert!(registry.is_empty());

        let events = drain(&rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], SessionEvent::DeviceAdded(d) if d.name == "Phone"));
        assert!(matches!(
            &events[1],
            SessionEvent::DeviceUpdated(d) if d.status() == DeviceStatus::Connected
        ));
        assert_eq!(events[2], SessionEvent::DeviceRemoved("dev1".into()));
    }

    #[test]
    fn test_stale_update_and_remove_are_ignored() {
        let (feed, registry, watcher, rx) = setup();
        watcher.start();

        feed.push(FeedNotification::Updated(
            RawDeviceUpdate::new("ghost").with_connected(true),
        ));
        feed.push(FeedNotification::Removed("ghost".into()));

        assert!(registry.is_empty());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_update_without_connectivity_keeps_flag() {
        let (feed, registry, watcher, _rx) = setup();
        watcher.start();

        feed.push(FeedNotification::Added(
            RawDevice::new("dev1", Some("Phone")).with_connected(true),
        ));
        feed.push(FeedNotification::Updated(RawDeviceUpdate::new("dev1")));

        assert!(registry.get("dev1").unwrap().is_connected);
    }

    #[test]
    fn test_readded_device_is_an_update() {
        let (feed, registry, watcher, rx) = setup();
        watcher.start();

        feed.push(FeedNotification::Added(RawDevice::new("dev1", Some("Phone"))));
        feed.push(FeedNotification::Added(
            RawDevice::new("dev1", Some("Other")).with_connected(true),
        ));

        assert_eq!(registry.len(), 1);
        let device = registry.get("dev1").unwrap();
        assert_eq!(device.name, "Phone");
        assert!(device.is_connected);

        let events = drain(&rx);
        assert!(matches!(events[1], SessionEvent::DeviceUpdated(_)));
    }

    #[test]
    fn test_enumeration_completed_once_per_session() {
        let (feed, _registry, watcher, rx) = setup();
        watcher.start();

        feed.push(FeedNotification::EnumerationCompleted);
        feed.push(FeedNotification::EnumerationCompleted);
        assert!(watcher.enumeration_completed());

        watcher.stop();
        watcher.start();
        feed.push(FeedNotification::EnumerationCompleted);

        let completions = drain(&rx)
            .into_iter()
            .filter(|e| *e == SessionEvent::EnumerationCompleted)
            .count();
        assert_eq!(completions, 2);
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let (feed, _registry, watcher, _rx) = setup();

        watcher.start();
        watcher.start();
        assert_eq!(feed.start_count(), 1);

        watcher.stop();
        watcher.stop();
        assert_eq!(feed.stop_count(), 1);
        assert!(!feed.is_subscribed());
    }

    #[test]
    fn test_late_callback_after_stop_is_ignored() {
        let (feed, registry, watcher, rx) = setup();
        watcher.start();
        watcher.stop();

        feed.push_late(FeedNotification::Added(RawDevice::new("late", Some("Late"))));

        assert!(registry.is_empty());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_failed_start_leaves_no_subscription() {
        let feed = Arc::new(MockDeviceFeed::failing());
        let registry = Arc::new(DeviceRegistry::new());
        let watcher = DeviceWatcher::new(feed.clone(), registry, EventBus::new());

        watcher.start();

        assert!(!watcher.is_watching());
        assert!(!feed.is_subscribed());
        assert_eq!(feed.stop_count(), 1);
    }

    #[test]
    fn test_unknown_label_is_used_for_blank_names() {
        let feed = Arc::new(MockDeviceFeed::new());
        let registry = Arc::new(DeviceRegistry::new());
        let watcher = DeviceWatcher::new(feed.clone(), Arc::clone(&registry), EventBus::new())
            .with_unknown_label("Appareil inconnu");
        watcher.start();

        feed.push(FeedNotification::Added(RawDevice::new("dev1", Some("\t\n"))));

        assert_eq!(registry.get("dev1").unwrap().name, "Appareil inconnu");
    }

    #[test]
    fn test_refresh_clears_and_restarts() {
        let (feed, registry, watcher, rx) = setup();
        watcher.start();
        feed.push(FeedNotification::Added(RawDevice::new("dev1", Some("Phone"))));
        drain(&rx);

        watcher.refresh();

        assert!(registry.is_empty());
        assert_eq!(feed.start_count(), 2);
        assert!(watcher.is_watching());
        assert_eq!(drain(&rx), vec![SessionEvent::DeviceRemoved("dev1".into())]);
    }

    #[test]
    fn test_mark_streaming_emits_only_on_change() {
        let (feed, registry, watcher, rx) = setup();
        watcher.start();
        feed.push(FeedNotification::Added(
            RawDevice::new("dev1", Some("Phone")).with_connected(true),
        ));
        drain(&rx);

        watcher.mark_streaming("dev1", true);
        watcher.mark_streaming("dev1", true);
        watcher.mark_streaming("missing", true);

        assert_eq!(registry.get("dev1").unwrap().status(), DeviceStatus::Streaming);
        assert_eq!(drain(&rx).len(), 1);
    }

    #[test]
    fn test_streaming_flag_survives_refresh() {
        let (feed, registry, watcher, rx) = setup();
        watcher.start();
        feed.push(FeedNotification::Added(RawDevice::new("dev1", Some("Phone"))));
        feed.push(FeedNotification::Added(RawDevice::new("dev2", Some("Tablet"))));
        watcher.mark_streaming("dev1", true);

        watcher.refresh();
        drain(&rx);
        feed.push(FeedNotification::Added(RawDevice::new("dev1", Some("Phone"))));
        feed.push(FeedNotification::Added(RawDevice::new("dev2", Some("Tablet"))));

        assert!(registry.get("dev1").unwrap().is_audio_streaming);
        assert!(!registry.get("dev2").unwrap().is_audio_streaming);
        let events = drain(&rx);
        assert!(matches!(&events[0], SessionEvent::DeviceAdded(d) if d.is_audio_streaming));

        watcher.mark_streaming("dev2", false);
        assert!(registry.get("dev1").unwrap().is_audio_streaming);

        watcher.mark_streaming("dev1", false);
        watcher.refresh();
        feed.push(FeedNotification::Added(RawDevice::new("dev1", Some("Phone"))));
        assert!(!registry.get("dev1").unwrap().is_audio_streaming);
    }
}
