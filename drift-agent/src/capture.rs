//! Buffers log records so they travel in the response envelope instead of
//! mixing with it on stdout.

use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;

static LINES: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(Vec::new()));

struct CaptureLogger {
    level: Level,
}

static LOGGER: Lazy<CaptureLogger> = Lazy::new(|| CaptureLogger {
    level: std::env::var("DRIFT_AGENT_LOG")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(Level::Debug),
});

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Ok(mut lines) = LINES.lock() {
            lines.push(format!("{:<5} [{}] {}", record.level(), record.target(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Installs the capturing logger. Level comes from `DRIFT_AGENT_LOG`.
pub fn init() -> Result<(), log::SetLoggerError> {
    log::set_logger(&*LOGGER)?;
    log::set_max_level(LevelFilter::Trace);
    Ok(())
}

/// Takes every captured line.
pub fn drain() -> String {
    match LINES.lock() {
        Ok(mut lines) => std::mem::take(&mut *lines).join("\n"),
        Err(_) => String::new(),
    }
}
