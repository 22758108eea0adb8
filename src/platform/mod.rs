//! Platform backends for the device feed and the audio sink

use crate::audio::traits::AudioSinkPlatform;
use crate::bluetooth::DeviceFeed;
use crate::error::Result;
use std::sync::Arc;

#[cfg(windows)]
pub mod winrt;

/// Feed and sink of the host platform
pub struct Backend {
    pub feed: Arc<dyn DeviceFeed>,
    pub sink: Arc<dyn AudioSinkPlatform>,
}

/// Backend for the current OS
#[cfg(windows)]
pub fn default_backend() -> Result<Backend> {
    winrt::init_apartment()?;
    Ok(Backend {
        feed: Arc::new(winrt::WinRtDeviceFeed::new()),
        sink: Arc::new(winrt::WinRtAudioSink),
    })
}

/// Backend for the current OS
#[cfg(not(windows))]
pub fn default_backend() -> Result<Backend> {
    Err(crate::error::AppError::PlatformError(format!(
        "audio playback connections are not supported on {}",
        std::env::consts::OS
    )))
}
