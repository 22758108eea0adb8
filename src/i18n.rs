//! Internationalization support using rust-i18n
//!
//! Provides locale detection from the operating system and initialization of
//! the i18n system.

use log::{info, warn};

/// Detect the user's OS locale using Windows API
///
/// Returns the locale string (e.g., "en-US", "zh-CN") or falls back to "en" on failure.
#[cfg(windows)]
pub fn detect_locale() -> String {
    use windows::Win32::Globalization::GetUserDefaultLocaleName;

    unsafe {
        let mut buffer = [0u16; 85]; // LOCALE_NAME_MAX_LENGTH
        let len = GetUserDefaultLocaleName(&mut buffer);

        if len > 0 && len <= buffer.len() as i32 {
            // Convert UTF-16 to String, removing the null terminator
            match String::from_utf16(&buffer[..len as usize - 1]) {
                Ok(locale) => {
                    info!("Detected system locale: {}", locale);
                    locale
                }
                Err(e) => {
                    warn!("Failed to convert locale to UTF-8: {}, falling back to 'en'", e);
                    "en".to_string()
                }
            }
        } else {
            warn!(
                "GetUserDefaultLocaleName failed or returned invalid length, falling back to 'en'"
            );
            "en".to_string()
        }
    }
}

/// Detect the user's locale from the POSIX locale environment
///
/// Returns the locale string (e.g., "en-US", "zh-CN") or falls back to "en".
#[cfg(not(windows))]
pub fn detect_locale() -> String {
    let raw = ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty());

    match raw.as_deref().and_then(normalize_posix_locale) {
        Some(locale) => {
            info!("Detected system locale: {}", locale);
            locale
        }
        None => {
            warn!("No usable locale in the environment, falling back to 'en'");
            "en".to_string()
        }
    }
}

/// Turn `zh_CN.UTF-8@variant` into `zh-CN`; `C` and `POSIX` have no language
#[cfg_attr(windows, allow(dead_code))]
fn normalize_posix_locale(raw: &str) -> Option<String> {
    let name = raw.split(['.', '@']).next().unwrap_or_default();
    if name.is_empty() || name == "C" || name == "POSIX" {
        return None;
    }
    Some(name.replace('_', "-"))
}

/// Initialize the i18n system with optional language override
///
/// If `config_language` is Some, uses that locale. Otherwise, detects the system locale.
pub fn init(config_language: Option<&str>) {
    let locale = match config_language {
        Some(lang) if !lang.is_empty() => {
            info!("Using configured language: {}", lang);
            lang.to_string()
        }
        _ => detect_locale(),
    };

    rust_i18n::set_locale(&locale);
    info!("Locale set to: {}", locale);
}

/// Look up `key` in the current locale
pub fn text(key: &str) -> String {
    rust_i18n::t!(key).to_string()
}

/// Look up `key` in `locale`, falling back to English
pub fn text_in(key: &str, locale: &str) -> String {
    rust_i18n::t!(key, locale = locale).to_string()
}

/// Get list of supported languages with their display names
///
/// Returns a vector of (locale_code, display_name) tuples.
/// The first entry is empty string for "System Default".
pub fn get_language_display_names() -> Vec<(&'static str, &'static str)> {
    vec![
        ("", "System Default"),
        ("en", "English"),
        ("zh-CN", "简体中文"),
        ("zh-TW", "繁體中文"),
        ("es", "Español"),
        ("de", "Deutsch"),
        ("fr", "Français"),
        ("ja", "日本語"),
    ]
}
