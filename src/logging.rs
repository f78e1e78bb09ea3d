//! Logging setup
//! `setup_logging` is the plain terminal logger. `ChannelLogger` is for host
//! apps that want log lines on their own channel as well as on stderr.

use std::sync::OnceLock;

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

static LOGGER: OnceLock<ChannelLogger> = OnceLock::new();

/// Initializes env_logger at `info` unless `RUST_LOG` says otherwise.
pub fn setup_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    log::info!("Logging initialized");
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

impl LogMessage {
    fn from_record(record: &Record) -> Self {
        Self {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

pub struct ChannelLogger {
    sender: UnboundedSender<LogMessage>,
    level: Level,
}

impl ChannelLogger {
    pub fn new(sender: UnboundedSender<LogMessage>, level: Level) -> Self {
        Self { sender, level }
    }

    /// Installs the logger process-wide. Fails if any logger is already set.
    pub fn init(sender: UnboundedSender<LogMessage>, level: Level) -> Result<(), SetLoggerError> {
        let logger = LOGGER.get_or_init(|| ChannelLogger::new(sender, level));
        log::set_logger(logger).map(|()| log::set_max_level(level_filter(logger.level)))
    }
}

fn level_filter(level: Level) -> LevelFilter {
    match level {
        Level::Error => LevelFilter::Error,
        Level::Warn => LevelFilter::Warn,
        Level::Info => LevelFilter::Info,
        Level::Debug => LevelFilter::Debug,
        Level::Trace => LevelFilter::Trace,
    }
}

impl log::Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());

            // The receiving side may be gone on shutdown.
            let _ = self.sender.send(LogMessage::from_record(record));
        }
    }

    fn flush(&self) {}
}
