//! Paired Bluetooth device model and display-name sanitization

/// Maximum number of characters kept from a platform-provided device name
pub const MAX_DEVICE_NAME_CHARS: usize = 100;

/// Placeholder used when the platform reports no usable name.
///
/// The watcher is normally given the localized text instead; this constant is
/// the English fallback.
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// Connection status of a device as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Paired but not connected
    Paired,
    /// Connected to this host
    Connected,
    /// Audio is being received from the device
    Streaming,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Paired => write!(f, "Paired"),
            DeviceStatus::Connected => write!(f, "Connected"),
            DeviceStatus::Streaming => write!(f, "Streaming"),
        }
    }
}

impl DeviceStatus {
    /// Get localized display string for UI
    ///
    /// The Display trait implementation above returns English for logs.
    pub fn display_localized(&self) -> String {
        match self {
            DeviceStatus::Paired => rust_i18n::t!("status_paired").to_string(),
            DeviceStatus::Connected => rust_i18n::t!("status_connected").to_string(),
            DeviceStatus::Streaming => rust_i18n::t!("status_streaming").to_string(),
        }
    }
}

/// A paired device that can stream audio to this host.
///
/// Devices are plain values: the registry hands out copies and every change is
/// published as a new value, so a stale copy never changes under a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub is_connected: bool,
    pub is_audio_streaming: bool,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, is_connected: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_connected,
            is_audio_streaming: false,
        }
    }

    /// Streaming wins over connected, connected wins over paired
    pub fn status(&self) -> DeviceStatus {
        if self.is_audio_streaming {
            DeviceStatus::Streaming
        } else if self.is_connected {
            DeviceStatus::Connected
        } else {
            DeviceStatus::Paired
        }
    }
}

/// Sanitize a platform-provided device name for display.
///
/// Control characters are removed, surrounding whitespace trimmed and the
/// result capped at [`MAX_DEVICE_NAME_CHARS`] characters. Names that end up
/// empty are replaced by `placeholder`.
pub fn sanitize_device_name(raw: Option<&str>, placeholder: &str) -> String {
    let Some(raw) = raw else {
        return placeholder.to_string();
    };

    let stripped: String = raw.chars().filter(|c| !c.is_control()).collect();
    let sanitized: String = stripped
        .trim()
        .chars()
        .take(MAX_DEVICE_NAME_CHARS)
        .collect();

    if sanitized.trim().is_empty() {
        placeholder.to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize(raw: Option<&str>) -> String {
        sanitize_device_name(raw, UNKNOWN_DEVICE)
    }

    #[test]
    fn test_sanitize_keeps_simple_name() {
        assert_eq!(sanitize(Some("SimpleName")), "SimpleName");
    }

    #[test]
    fn test_sanitize_trims_whitespace() {
        assert_eq!(sanitize(Some("   TrimMe   ")), "TrimMe");
        assert_eq!(sanitize(Some(" Name ")), "Name");
    }

    #[test]
    fn test_sanitize_missing_or_blank() {
        assert_eq!(sanitize(None), UNKNOWN_DEVICE);
        assert_eq!(sanitize(Some("")), UNKNOWN_DEVICE);
        assert_eq!(sanitize(Some("   ")), UNKNOWN_DEVICE);
        assert_eq!(sanitize(Some("\t\n\r")), UNKNOWN_DEVICE);
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(
            sanitize(Some("Normal\tName\nWith\rControls")),
            "NormalNameWithControls"
        );
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "a".repeat(150);
        assert_eq!(sanitize(Some(&long)), "a".repeat(100));
    }

    #[test]
    fn test_sanitize_counts_characters_not_bytes() {
        let long = "ü".repeat(120);
        let result = sanitize(Some(&long));
        assert_eq!(result.chars().count(), MAX_DEVICE_NAME_CHARS);
    }

    #[test]
    fn test_sanitize_uses_given_placeholder() {
        assert_eq!(sanitize_device_name(None, "Unbekanntes Gerät"), "Unbekanntes Gerät");
    }

    #[test]
    fn test_device_status_priority() {
        let mut device = Device::new("dev1", "Phone", false);
        assert_eq!(device.status(), DeviceStatus::Paired);

        device.is_connected = true;
        assert_eq!(device.status(), DeviceStatus::Connected);

        device.is_audio_streaming = true;
        assert_eq!(device.status(), DeviceStatus::Streaming);
    }

    #[test]
    fn test_device_status_display() {
        assert_eq!(format!("{}", DeviceStatus::Paired), "Paired");
        assert_eq!(format!("{}", DeviceStatus::Connected), "Connected");
        assert_eq!(format!("{}", DeviceStatus::Streaming), "Streaming");
    }
}
