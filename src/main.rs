//! Bluetooth Audio Receiver - Main Entry Point
//!
//! Console front end: lists paired audio devices and connects to one so this
//! machine plays what the phone streams.

// Initialize i18n for the binary (shares locales with library)
rust_i18n::i18n!("locales", fallback = "en");

use bt_audio_receiver::error::{AppError, ErrorSeverity, Result};
use bt_audio_receiver::logging::{init_logging, install_crash_hook, LoggingConfig};
use bt_audio_receiver::platform;
use bt_audio_receiver::settings::{AppConfig, ConfigManager};
use bt_audio_receiver::{i18n, AudioReceiver, ReceiverOptions, SessionEvent};
use log::{debug, error, info, warn};
use rust_i18n::t;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often the event channel is drained
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Command line options
#[derive(Debug, Default)]
struct Args {
    /// Print the device list once enumeration completes, then exit
    list: bool,
    /// Device id to connect to, overriding auto-connect
    connect: Option<String>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--list" => parsed.list = true,
                "--connect" => {
                    let id = args.next().ok_or_else(|| {
                        AppError::ConfigError("--connect requires a device id".to_string())
                    })?;
                    parsed.connect = Some(id);
                }
                other => {
                    return Err(AppError::ConfigError(format!("Unknown argument: {}", other)));
                }
            }
        }
        Ok(parsed)
    }
}

/// Main application state
struct App {
    config_manager: ConfigManager,
    config: AppConfig,
    args: Args,
    receiver: AudioReceiver,
    events: Receiver<SessionEvent>,
    shutdown: CancellationToken,
    /// Whether the startup connection has been attempted
    initial_connect_done: bool,
}

impl App {
    /// Print a status line, or only log it when notifications are turned off
    fn notify(&self, message: &str) {
        if self.config.general.show_notifications {
            println!("{}", message);
        } else {
            info!("{}", message);
        }
    }

    /// Drain queued events; returns a device id to connect to, if any
    fn process_events(&mut self) -> Option<String> {
        let mut connect_to = None;
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::DeviceAdded(device) => {
                    self.notify(&t!("device_added", name = device.name));
                }
                SessionEvent::DeviceUpdated(device) => {
                    info!("{} is now {}", device.name, device.status());
                }
                SessionEvent::DeviceRemoved(id) => {
                    self.notify(&t!("device_removed", id = id));
                }
                SessionEvent::EnumerationCompleted => {
                    connect_to = self.on_enumeration_completed();
                }
                SessionEvent::ConnectionStateChanged(true) => {
                    info!("Audio connection established");
                }
                SessionEvent::ConnectionStateChanged(false) => {
                    self.notify(&t!("connection_closed"));
                }
                SessionEvent::StreamingStateChanged(state) => {
                    let name = self.current_device_name();
                    if state.is_streaming() {
                        self.notify(&t!("receiving_audio_from", name = name));
                    } else {
                        self.notify(&t!("audio_ready_from", name = name));
                    }
                }
                SessionEvent::Error(message) => {
                    println!("{}", t!("connection_failed", error = message));
                }
            }
        }
        connect_to
    }

    fn on_enumeration_completed(&mut self) -> Option<String> {
        let devices = self.receiver.list_devices();
        if devices.is_empty() {
            println!("{}", t!("no_devices"));
        } else {
            println!("{}", t!("devices_found", count = devices.len()));
        }

        if self.args.list {
            for device in &devices {
                let status = device.status().display_localized();
                println!("  {}  [{}]  {}", device.name, status, device.id);
            }
            self.shutdown.cancel();
            return None;
        }

        if self.initial_connect_done {
            return None;
        }
        self.initial_connect_done = true;

        match self.args.connect.clone() {
            Some(id) => Some(id),
            None => self
                .receiver
                .auto_connect_target(&self.config)
                .map(|device| device.id),
        }
    }

    fn current_device_name(&self) -> String {
        self.receiver
            .current_device()
            .map(|device| device.name)
            .unwrap_or_else(|| i18n::text("unknown_device"))
    }

    /// Open a connection and remember the device on success
    async fn connect(&mut self, device_id: &str) -> Result<()> {
        let name = self
            .receiver
            .device(device_id)
            .map(|device| device.name)
            .unwrap_or_else(|| device_id.to_string());
        println!("{}", t!("opening_connection_to", name = name.as_str()));

        if !self
            .receiver
            .open_connection_with_cancel(device_id, &self.shutdown)
            .await
        {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            let reason = self
                .receiver
                .session_info()
                .last_error
                .unwrap_or_else(|| format!("could not connect to {}", name));
            return Err(AppError::ConnectionError(reason));
        }

        self.config_manager
            .remember_device(&mut self.config, device_id, &name)
    }

    async fn run(&mut self) -> Result<()> {
        self.receiver.start_watching();
        println!("{}", t!("scanning"));

        let mut tick = tokio::time::interval(EVENT_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }

            if let Some(device_id) = self.process_events() {
                if let Err(e) = self.connect(&device_id).await {
                    report(e)?;
                }
            }
        }

        // Report whatever was queued before the shutdown request
        self.process_events();
        self.receiver.shutdown();
        Ok(())
    }
}

/// Log an error by severity; only fatal errors are handed back
fn report(e: AppError) -> Result<()> {
    match e.severity() {
        ErrorSeverity::Fatal => Err(e),
        ErrorSeverity::Recoverable => {
            warn!("{}", e);
            Ok(())
        }
        ErrorSeverity::Minor => {
            debug!("{}", e);
            Ok(())
        }
    }
}

fn load_config(config_manager: &ConfigManager) -> AppConfig {
    match config_manager.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Could not load settings, using defaults: {}", e);
            AppConfig::default()
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;

    let config_manager = ConfigManager::new()?;
    let config = load_config(&config_manager);

    let log_dir = config_manager.log_dir();
    if let Err(e) = init_logging(LoggingConfig::from_settings(&config.logging, log_dir.clone())) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    install_crash_hook(log_dir);

    info!("Starting Bluetooth Audio Receiver v{}", env!("CARGO_PKG_VERSION"));
    i18n::init(config.general.language.as_deref());

    let backend = match platform::default_backend() {
        Ok(backend) => backend,
        Err(e) => {
            error!("No platform backend: {}", e);
            println!("{}", t!("no_backend"));
            return Err(e);
        }
    };

    let receiver = AudioReceiver::with_options(
        backend.feed,
        backend.sink,
        ReceiverOptions::from_config(&config),
    );
    let events = receiver.subscribe();

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => warn!("Could not listen for Ctrl+C: {}", e),
        }
        on_signal.cancel();
    });

    let mut app = App {
        config_manager,
        config,
        args,
        receiver,
        events,
        shutdown,
        initial_connect_done: false,
    };
    app.run().await?;

    info!("Bluetooth Audio Receiver exiting");
    Ok(())
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            error!("Fatal error: {}", e);
            eprintln!("Error: {}", e);
            1
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let args = parse(&["--list"]).unwrap();
        assert!(args.list);
        assert!(args.connect.is_none());

        let args = parse(&["--connect", "dev1"]).unwrap();
        assert_eq!(args.connect.as_deref(), Some("dev1"));
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse(&["--connect"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }

    #[test]
    fn test_report_passes_only_fatal_errors() {
        assert!(report(AppError::ConnectionError("timed out".into())).is_ok());
        assert!(report(AppError::WatcherError("radio is off".into())).is_ok());
        assert!(matches!(
            report(AppError::PlatformError("no backend".into())),
            Err(AppError::PlatformError(_))
        ));
    }
}
