//! Bluetooth device discovery module
//!
//! Maintains the registry of paired audio-capable devices from the platform
//! device feed.

pub mod device;
pub mod feed;
pub mod registry;
pub mod watcher;

pub use device::{sanitize_device_name, Device, DeviceStatus, UNKNOWN_DEVICE};
pub use feed::{DeviceFeed, FeedNotification, FeedSink, PropertyValue, RawDevice, RawDeviceUpdate};
pub use registry::{DeviceRegistry, Upserted};
pub use watcher::DeviceWatcher;
