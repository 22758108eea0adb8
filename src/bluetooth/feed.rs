//! Trait abstraction over the platform device-enumeration feed
//! The watcher only sees these types, which keeps it testable without a radio

use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Property reporting whether an association endpoint is connected
pub const IS_CONNECTED_PROPERTY: &str = "System.Devices.Aep.IsConnected";

/// A single value from a device property bag
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

pub type PropertyBag = HashMap<String, PropertyValue>;

/// Read the connectivity flag from a property bag.
///
/// `None` when the property is absent. A present but non-boolean value reads
/// as not connected.
pub fn connectivity(properties: &PropertyBag) -> Option<bool> {
    properties
        .get(IS_CONNECTED_PROPERTY)
        .map(|value| matches!(value, PropertyValue::Bool(true)))
}

/// A device as first reported by the feed
#[derive(Debug, Clone, PartialEq)]
pub struct RawDevice {
    pub id: String,
    pub name: Option<String>,
    pub properties: PropertyBag,
}

impl RawDevice {
    pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            properties: PropertyBag::new(),
        }
    }

    pub fn with_connected(mut self, connected: bool) -> Self {
        self.properties.insert(
            IS_CONNECTED_PROPERTY.to_string(),
            PropertyValue::Bool(connected),
        );
        self
    }
}

/// Changed properties of a known device
#[derive(Debug, Clone, PartialEq)]
pub struct RawDeviceUpdate {
    pub id: String,
    pub properties: PropertyBag,
}

impl RawDeviceUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: PropertyBag::new(),
        }
    }

    pub fn with_connected(mut self, connected: bool) -> Self {
        self.properties.insert(
            IS_CONNECTED_PROPERTY.to_string(),
            PropertyValue::Bool(connected),
        );
        self
    }
}

/// Notifications delivered by a [`DeviceFeed`]
#[derive(Debug, Clone, PartialEq)]
pub enum FeedNotification {
    Added(RawDevice),
    Updated(RawDeviceUpdate),
    Removed(String),
    EnumerationCompleted,
}

/// Callback the feed invokes for each notification, from any thread
pub type FeedSink = Arc<dyn Fn(FeedNotification) + Send + Sync>;

/// Subscription-based source of audio-capable paired devices
pub trait DeviceFeed: Send + Sync {
    /// Subscribe `sink` and begin enumeration
    fn start(&self, sink: FeedSink) -> Result<()>;
    /// Unsubscribe the sink and stop enumeration; safe to call repeatedly
    fn stop(&self);
}

/// Mock implementations for testing
/// Available in tests and with the "test-mocks" feature
#[cfg(any(test, feature = "test-mocks"))]
pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Feed driven by the test through [`MockDeviceFeed::push`]
    #[derive(Default)]
    pub struct MockDeviceFeed {
        sink: Mutex<Option<FeedSink>>,
        /// Sink captured on the last successful start, kept after stop so
        /// tests can simulate a late callback
        last_sink: Mutex<Option<FeedSink>>,
        pub fail_start: AtomicBool,
        pub start_calls: AtomicUsize,
        pub stop_calls: AtomicUsize,
    }

    impl MockDeviceFeed {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let feed = Self::default();
            feed.fail_start.store(true, Ordering::SeqCst);
            feed
        }

        /// Deliver a notification to the subscribed sink, if any
        pub fn push(&self, notification: FeedNotification) {
            let sink = self.sink.lock().unwrap().clone();
            if let Some(sink) = sink {
                sink(notification);
            }
        }

        /// Deliver a notification to the most recent sink even after stop
        pub fn push_late(&self, notification: FeedNotification) {
            let sink = self.last_sink.lock().unwrap().clone();
            if let Some(sink) = sink {
                sink(notification);
            }
        }

        pub fn is_subscribed(&self) -> bool {
            self.sink.lock().unwrap().is_some()
        }

        pub fn start_count(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }

        pub fn stop_count(&self) -> usize {
            self.stop_calls.load(Ordering::SeqCst)
        }
    }

    impl DeviceFeed for MockDeviceFeed {
        fn start(&self, sink: FeedSink) -> Result<()> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock().unwrap() = Some(Arc::clone(&sink));
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(AppError::WatcherError("radio is off".to_string()));
            }
            *self.last_sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock().unwrap() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_absent_is_none() {
        assert_eq!(connectivity(&PropertyBag::new()), None);
    }

    #[test]
    fn test_connectivity_reads_bool() {
        let raw = RawDevice::new("a", None).with_connected(true);
        assert_eq!(connectivity(&raw.properties), Some(true));
        let update = RawDeviceUpdate::new("a").with_connected(false);
        assert_eq!(connectivity(&update.properties), Some(false));
    }

    #[test]
    fn test_connectivity_non_bool_is_false() {
        let mut props = PropertyBag::new();
        props.insert(
            IS_CONNECTED_PROPERTY.to_string(),
            PropertyValue::Text("yes".into()),
        );
        assert_eq!(connectivity(&props), Some(false));
    }
}
