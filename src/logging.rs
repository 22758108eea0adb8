//! Logging setup with rotation support

use crate::error::{AppError, Result};
use log::LevelFilter;
use simplelog::{CombinedLogger, ConfigBuilder, SharedLogger, WriteLogger};
#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default log filename
const LOG_FILENAME: &str = "receiver.log";

/// Crash report filename
pub const CRASH_LOG_FILENAME: &str = "crash_log.txt";

/// Crash log size past which it is moved to `.bak`
pub const MAX_CRASH_LOG_SIZE: u64 = 5 * 1024 * 1024;

/// Logging configuration
pub struct LoggingConfig {
    pub level: LevelFilter,
    pub log_dir: PathBuf,
    pub max_file_size: u64,
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            log_dir: PathBuf::from("."),
            max_file_size: 5 * 1024 * 1024, // 5MB
            max_files: 3,
        }
    }
}

impl LoggingConfig {
    /// Build from the persisted `[logging]` settings
    pub fn from_settings(settings: &crate::settings::LoggingConfig, log_dir: PathBuf) -> Self {
        Self {
            level: parse_log_level(&settings.level),
            log_dir,
            max_file_size: settings.max_file_size,
            max_files: settings.max_files,
        }
    }
}

/// Initialize the logging system
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    // Ensure log directory exists
    fs::create_dir_all(&config.log_dir)?;

    let log_path = config.log_dir.join(LOG_FILENAME);

    // Rotate logs if needed
    rotate_logs(&log_path, config.max_file_size, config.max_files)?;

    // Create log file
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(AppError::IoError)?;

    // Build logger configuration
    let log_config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .set_location_level(LevelFilter::Debug)
        .set_thread_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    // Terminal logger (for debug builds)
    #[cfg(debug_assertions)]
    {
        loggers.push(TermLogger::new(
            config.level,
            log_config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }

    // File logger
    loggers.push(WriteLogger::new(config.level, log_config, log_file));

    CombinedLogger::init(loggers)
        .map_err(|e| AppError::ConfigError(format!("Logger init failed: {}", e)))?;

    log::info!("Logging initialized at level {:?}", config.level);
    log::info!("Log file: {:?}", log_path);

    Ok(())
}

/// Rotate log files if the current log exceeds max size
fn rotate_logs(log_path: &Path, max_size: u64, max_files: u32) -> Result<()> {
    if !log_path.exists() {
        return Ok(());
    }

    let metadata = fs::metadata(log_path)?;
    if metadata.len() < max_size {
        return Ok(());
    }

    log::debug!("Rotating logs, current size: {} bytes", metadata.len());

    // Delete oldest file if at max
    let oldest = log_path.with_extension(format!("log.{}", max_files));
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    // Rotate existing files
    for i in (1..max_files).rev() {
        let old_name = log_path.with_extension(format!("log.{}", i));
        let new_name = log_path.with_extension(format!("log.{}", i + 1));
        if old_name.exists() {
            fs::rename(&old_name, &new_name)?;
        }
    }

    // Rename current log to .log.1
    let backup = log_path.with_extension("log.1");
    fs::rename(log_path, &backup)?;

    Ok(())
}

/// Install a panic hook that appends a crash report to `crash_log.txt`
/// in `log_dir` before running the previous hook
pub fn install_crash_hook(log_dir: PathBuf) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let thread = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();

        let report = format_crash_report(&thread, &message, &location);
        log::error!("Panic in thread '{}' at {}: {}", thread, location, message);
        if let Err(e) = write_crash_report(&log_dir, &report) {
            log::error!("Could not write crash log: {}", e);
        }

        previous(info);
    }));
}

fn format_crash_report(thread: &str, message: &str, location: &str) -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!(
        "==== Crash (unix time {}) ====\nVersion: {}\nThread: {}\nLocation: {}\nMessage: {}\n\n",
        timestamp,
        env!("CARGO_PKG_VERSION"),
        thread,
        location,
        message
    )
}

/// Append `report` to the crash log, moving an oversized log to `.bak` first
fn write_crash_report(log_dir: &Path, report: &str) -> Result<()> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(CRASH_LOG_FILENAME);

    if let Ok(metadata) = fs::metadata(&path) {
        if metadata.len() > MAX_CRASH_LOG_SIZE {
            fs::rename(&path, path.with_extension("txt.bak"))?;
        }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    file.write_all(report.as_bytes())?;
    Ok(())
}

/// Parse log level from string
pub fn parse_log_level(level_str: &str) -> LevelFilter {
    match level_str.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Get log level as string
pub fn log_level_to_string(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Trace => "trace",
        LevelFilter::Debug => "debug",
        LevelFilter::Info => "info",
        LevelFilter::Warn => "warn",
        LevelFilter::Error => "error",
        LevelFilter::Off => "off",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("info"), LevelFilter::Info);
        assert_eq!(parse_log_level("DEBUG"), LevelFilter::Debug);
        assert_eq!(parse_log_level("Warning"), LevelFilter::Warn);
        assert_eq!(parse_log_level("invalid"), LevelFilter::Info);
    }

    #[test]
    fn test_log_level_to_string() {
        assert_eq!(log_level_to_string(LevelFilter::Info), "info");
        assert_eq!(log_level_to_string(LevelFilter::Debug), "debug");
        assert_eq!(parse_log_level(log_level_to_string(LevelFilter::Trace)), LevelFilter::Trace);
    }

    #[test]
    fn test_rotate_logs_shifts_backups() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join(LOG_FILENAME);
        fs::write(&log_path, vec![b'x'; 64]).unwrap();
        fs::write(log_path.with_extension("log.1"), "older").unwrap();

        rotate_logs(&log_path, 32, 3).unwrap();

        assert!(!log_path.exists());
        assert_eq!(fs::read(log_path.with_extension("log.1")).unwrap().len(), 64);
        assert_eq!(
            fs::read_to_string(log_path.with_extension("log.2")).unwrap(),
            "older"
        );
    }

    #[test]
    fn test_rotate_logs_drops_oldest_at_max() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join(LOG_FILENAME);
        fs::write(&log_path, vec![b'x'; 64]).unwrap();
        fs::write(log_path.with_extension("log.1"), "one").unwrap();
        fs::write(log_path.with_extension("log.2"), "two").unwrap();

        rotate_logs(&log_path, 32, 2).unwrap();

        assert_eq!(fs::read_to_string(log_path.with_extension("log.2")).unwrap(), "one");
        assert_eq!(fs::read(log_path.with_extension("log.1")).unwrap().len(), 64);
        assert!(!log_path.with_extension("log.3").exists());
    }

    #[test]
    fn test_rotate_logs_keeps_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join(LOG_FILENAME);
        fs::write(&log_path, "short").unwrap();

        rotate_logs(&log_path, 1024, 3).unwrap();

        assert!(log_path.exists());
    }

    #[test]
    fn test_crash_report_appends() {
        let dir = tempfile::tempdir().unwrap();
        let report = format_crash_report("main", "boom", "src/main.rs:1");

        write_crash_report(dir.path(), &report).unwrap();
        write_crash_report(dir.path(), &report).unwrap();

        let content = fs::read_to_string(dir.path().join(CRASH_LOG_FILENAME)).unwrap();
        assert_eq!(content.matches("Message: boom").count(), 2);
        assert!(content.contains("Location: src/main.rs:1"));
    }

    #[test]
    fn test_oversized_crash_log_moves_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CRASH_LOG_FILENAME);
        let file = fs::File::create(&path).unwrap();
        file.set_len(MAX_CRASH_LOG_SIZE + 1).unwrap();

        write_crash_report(dir.path(), "fresh\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh\n");
        assert!(path.with_extension("txt.bak").exists());
    }
}
