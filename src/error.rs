use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Device watcher error: {0}")]
    WatcherError(String),
    #[error("Audio connection error: {0}")]
    ConnectionError(String),
    #[error("Platform error: {0}")]
    PlatformError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsApiError(#[from] windows::core::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Fatal,
    Recoverable,
    Minor,
}

impl AppError {
    /// How the presentation layer should treat this error.
    ///
    /// Connection failures are recoverable (the user may retry) and watcher
    /// hiccups only degrade the device list. Without a platform backend there
    /// is nothing to do.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AppError::ConnectionError(_) => ErrorSeverity::Recoverable,
            AppError::PlatformError(_) => ErrorSeverity::Fatal,
            AppError::WatcherError(_) => ErrorSeverity::Minor,
            AppError::ConfigError(_) | AppError::IoError(_) => ErrorSeverity::Recoverable,
            #[cfg(windows)]
            AppError::WindowsApiError(_) => ErrorSeverity::Minor,
        }
    }
}
