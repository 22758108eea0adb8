//! Bluetooth Audio Receiver Library
//!
//! Discovers paired audio-capable devices and opens an audio sink connection
//! so this machine plays the audio a phone streams to it.

// Initialize i18n with locales directory and English fallback
rust_i18n::i18n!("locales", fallback = "en");

pub mod audio;
pub mod bluetooth;
pub mod error;
pub mod events;
pub mod i18n;
pub mod logging;
pub mod platform;
pub mod receiver;
pub mod settings;

pub use error::{AppError, ErrorSeverity, Result};
pub use events::SessionEvent;
pub use receiver::{AudioReceiver, ReceiverOptions};
