//! Windows Runtime backend: `DeviceWatcher` over the audio playback connection
//! selector and `AudioPlaybackConnection` handles

use crate::audio::traits::{
    AudioSinkHandle, AudioSinkPlatform, LinkState, ListenerId, OpenResult, OpenStatus,
    StateListener,
};
use crate::bluetooth::feed::{
    DeviceFeed, FeedNotification, FeedSink, PropertyBag, PropertyValue, RawDevice,
    RawDeviceUpdate, IS_CONNECTED_PROPERTY,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use windows::core::{IInspectable, Interface, HSTRING};
use windows::Devices::Enumeration::{
    DeviceInformation, DeviceInformationKind, DeviceInformationUpdate,
    DeviceWatcher as PlatformWatcher, DeviceWatcherStatus,
};
use windows::Foundation::Collections::{IIterable, IMapView};
use windows::Foundation::{EventRegistrationToken, IReference, TypedEventHandler};
use windows::Media::Audio::{
    AudioPlaybackConnection, AudioPlaybackConnectionOpenResultStatus,
    AudioPlaybackConnectionState,
};
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};

/// Paired devices are association endpoints, not the radio's device interfaces
const WATCHED_KIND: DeviceInformationKind = DeviceInformationKind::AssociationEndpoint;

/// Watcher over audio-sink-capable devices, reporting their connectivity
fn platform_watcher() -> windows::core::Result<PlatformWatcher> {
    let selector = AudioPlaybackConnection::GetDeviceSelector()?;
    let requested: IIterable<HSTRING> =
        IIterable::try_from(vec![HSTRING::from(IS_CONNECTED_PROPERTY)])?;
    DeviceInformation::CreateWatcherWithKindAqsFilterAndAdditionalProperties(
        &selector,
        &requested,
        WATCHED_KIND,
    )
}

/// Join the multithreaded apartment; WinRT callbacks arrive on pool threads
pub fn init_apartment() -> Result<()> {
    let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
    if hr.is_err() && hr != RPC_E_CHANGED_MODE {
        return Err(AppError::PlatformError(format!("CoInitializeEx failed: {:?}", hr)));
    }
    Ok(())
}

/// Run a blocking WinRT wait off the async runtime
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> windows::core::Result<T> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::PlatformError(format!("platform call aborted: {}", e)))?;
    Ok(joined?)
}

fn read_properties(properties: &IMapView<HSTRING, IInspectable>) -> PropertyBag {
    let mut bag = PropertyBag::new();
    let key = HSTRING::from(IS_CONNECTED_PROPERTY);
    if let Ok(Some(value)) = properties.HasKey(&key).and_then(|has| {
        if has {
            properties.Lookup(&key).map(Some)
        } else {
            Ok(None)
        }
    }) {
        if let Some(value) = property_value(&value) {
            bag.insert(IS_CONNECTED_PROPERTY.to_string(), value);
        }
    }
    bag
}

fn property_value(value: &IInspectable) -> Option<PropertyValue> {
    if let Ok(v) = value.cast::<IReference<bool>>().and_then(|r| r.Value()) {
        return Some(PropertyValue::Bool(v));
    }
    if let Ok(v) = value.cast::<IReference<i32>>().and_then(|r| r.Value()) {
        return Some(PropertyValue::Int(v as i64));
    }
    if let Ok(v) = value.cast::<IReference<HSTRING>>().and_then(|r| r.Value()) {
        return Some(PropertyValue::Text(v.to_string_lossy()));
    }
    None
}

fn raw_device(info: &DeviceInformation) -> windows::core::Result<RawDevice> {
    let name = info.Name().ok().map(|n| n.to_string_lossy());
    Ok(RawDevice {
        id: info.Id()?.to_string_lossy(),
        name,
        properties: read_properties(&info.Properties()?),
    })
}

fn raw_update(update: &DeviceInformationUpdate) -> windows::core::Result<RawDeviceUpdate> {
    Ok(RawDeviceUpdate {
        id: update.Id()?.to_string_lossy(),
        properties: read_properties(&update.Properties()?),
    })
}

struct ActiveWatch {
    watcher: PlatformWatcher,
    added: EventRegistrationToken,
    updated: EventRegistrationToken,
    removed: EventRegistrationToken,
    completed: EventRegistrationToken,
}

impl ActiveWatch {
    fn stop(self) {
        let _ = self.watcher.RemoveAdded(self.added);
        let _ = self.watcher.RemoveUpdated(self.updated);
        let _ = self.watcher.RemoveRemoved(self.removed);
        let _ = self.watcher.RemoveEnumerationCompleted(self.completed);

        match self.watcher.Status() {
            Ok(status)
                if status == DeviceWatcherStatus::Started
                    || status == DeviceWatcherStatus::EnumerationCompleted =>
            {
                if let Err(e) = self.watcher.Stop() {
                    warn!("Failed to stop device watcher: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read device watcher status: {}", e),
        }
    }
}

/// Device feed backed by a WinRT `DeviceWatcher`
pub struct WinRtDeviceFeed {
    active: Mutex<Option<ActiveWatch>>,
}

impl WinRtDeviceFeed {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    fn create_watch(sink: FeedSink) -> windows::core::Result<ActiveWatch> {
        let watcher = platform_watcher()?;

        let on_added = Arc::clone(&sink);
        let added = watcher.Added(&TypedEventHandler::<PlatformWatcher, DeviceInformation>::new(
            move |_, info| {
                if let Some(info) = info.as_ref() {
                    match raw_device(info) {
                        Ok(raw) => on_added(FeedNotification::Added(raw)),
                        Err(e) => warn!("Unreadable device notification: {}", e),
                    }
                }
                Ok(())
            },
        ))?;

        let on_updated = Arc::clone(&sink);
        let updated = watcher.Updated(&TypedEventHandler::<
            PlatformWatcher,
            DeviceInformationUpdate,
        >::new(move |_, update| {
            if let Some(update) = update.as_ref() {
                match raw_update(update) {
                    Ok(raw) => on_updated(FeedNotification::Updated(raw)),
                    Err(e) => warn!("Unreadable device update: {}", e),
                }
            }
            Ok(())
        }))?;

        let on_removed = Arc::clone(&sink);
        let removed = watcher.Removed(&TypedEventHandler::<
            PlatformWatcher,
            DeviceInformationUpdate,
        >::new(move |_, update| {
            if let Some(update) = update.as_ref() {
                match update.Id() {
                    Ok(id) => on_removed(FeedNotification::Removed(id.to_string_lossy())),
                    Err(e) => warn!("Unreadable device removal: {}", e),
                }
            }
            Ok(())
        }))?;

        let on_completed = sink;
        let completed = watcher.EnumerationCompleted(&TypedEventHandler::<
            PlatformWatcher,
            IInspectable,
        >::new(move |_, _| {
            on_completed(FeedNotification::EnumerationCompleted);
            Ok(())
        }))?;

        let watch = ActiveWatch {
            watcher,
            added,
            updated,
            removed,
            completed,
        };
        if let Err(e) = watch.watcher.Start() {
            watch.stop();
            return Err(e);
        }
        Ok(watch)
    }
}

impl Default for WinRtDeviceFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceFeed for WinRtDeviceFeed {
    fn start(&self, sink: FeedSink) -> Result<()> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = active.take() {
            previous.stop();
        }
        *active = Some(Self::create_watch(sink)?);
        debug!("WinRT device watcher started");
        Ok(())
    }

    fn stop(&self) {
        let watch = self.active.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(watch) = watch {
            watch.stop();
            debug!("WinRT device watcher stopped");
        }
    }
}

impl Drop for WinRtDeviceFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn link_state(state: AudioPlaybackConnectionState) -> LinkState {
    if state == AudioPlaybackConnectionState::Opened {
        LinkState::Opened
    } else {
        LinkState::Closed
    }
}

fn open_status(status: AudioPlaybackConnectionOpenResultStatus) -> OpenStatus {
    if status == AudioPlaybackConnectionOpenResultStatus::Success {
        OpenStatus::Success
    } else if status == AudioPlaybackConnectionOpenResultStatus::RequestTimedOut {
        OpenStatus::RequestTimedOut
    } else if status == AudioPlaybackConnectionOpenResultStatus::DeniedBySystem {
        OpenStatus::DeniedBySystem
    } else {
        OpenStatus::UnknownFailure
    }
}

/// One `AudioPlaybackConnection`
pub struct WinRtSinkHandle {
    connection: AudioPlaybackConnection,
    listeners: Mutex<HashMap<u64, EventRegistrationToken>>,
    next_listener: AtomicU64,
}

impl WinRtSinkHandle {
    fn new(connection: AudioPlaybackConnection) -> Self {
        Self {
            connection,
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl AudioSinkHandle for WinRtSinkHandle {
    async fn start(&self) -> Result<()> {
        let op = self.connection.StartAsync()?;
        blocking(move || op.get()).await
    }

    async fn open(&self) -> Result<OpenResult> {
        let op = self.connection.OpenAsync()?;
        let (status, extended) = blocking(move || {
            let result = op.get()?;
            Ok((result.Status()?, result.ExtendedError()?))
        })
        .await?;

        let extended_error = if extended.is_err() {
            Some(windows::core::Error::from(extended).to_string())
        } else {
            None
        };
        Ok(OpenResult {
            status: open_status(status),
            extended_error,
        })
    }

    fn state(&self) -> LinkState {
        match self.connection.State() {
            Ok(state) => link_state(state),
            Err(e) => {
                warn!("Could not read audio connection state: {}", e);
                LinkState::Closed
            }
        }
    }

    fn subscribe_state(&self, listener: StateListener) -> Result<ListenerId> {
        let handler = TypedEventHandler::<AudioPlaybackConnection, IInspectable>::new(
            move |sender, _| {
                if let Some(connection) = sender.as_ref() {
                    match connection.State() {
                        Ok(state) => listener(link_state(state)),
                        Err(e) => warn!("Could not read audio connection state: {}", e),
                    }
                }
                Ok(())
            },
        );
        let token = self.connection.StateChanged(&handler)?;
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, token);
        Ok(ListenerId(id))
    }

    fn unsubscribe_state(&self, id: ListenerId) {
        let token = self
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id.0);
        if let Some(token) = token {
            if let Err(e) = self.connection.RemoveStateChanged(token) {
                debug!("Failed to remove state handler: {}", e);
            }
        }
    }

    fn close(&self) -> Result<()> {
        self.connection.Close()?;
        Ok(())
    }
}

/// Creates `AudioPlaybackConnection`s by device id
pub struct WinRtAudioSink;

impl AudioSinkPlatform for WinRtAudioSink {
    fn try_create_handle(&self, device_id: &str) -> Result<Option<Arc<dyn AudioSinkHandle>>> {
        match AudioPlaybackConnection::TryCreateFromId(&HSTRING::from(device_id)) {
            Ok(connection) => {
                info!("Created audio playback connection for {}", device_id);
                Ok(Some(Arc::new(WinRtSinkHandle::new(connection))))
            }
            // A null connection comes back as an error carrying S_OK
            Err(e) if e.code().is_ok() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
