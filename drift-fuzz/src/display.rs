//! Terminal status line fed by a log channel and status snapshots.

use std::io::Write;
use std::time::Duration;

use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::execution::Status;

pub const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Crates whose records are shown at every level; everything else only
/// from warn up.
const OWN_TARGETS: [&str; 4] = ["drift", "drift_fuzz", "drift_types", "drift_wrappers"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub text: String,
}

/// Appends formatted records to the display channel. The orchestrator only
/// ever appends; the display drains.
pub struct ChannelLogger {
    level: LevelFilter,
    sender: mpsc::UnboundedSender<LogLine>,
}

impl ChannelLogger {
    pub fn new(level: LevelFilter) -> (Self, mpsc::UnboundedReceiver<LogLine>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { level, sender }, receiver)
    }

    /// Installs a channel logger as the global logger.
    pub fn install(level: LevelFilter) -> Result<mpsc::UnboundedReceiver<LogLine>, SetLoggerError> {
        let (logger, receiver) = Self::new(level);
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(level);
        Ok(receiver)
    }
}

fn is_own_target(target: &str) -> bool {
    let root = target.split("::").next().unwrap_or(target);
    OWN_TARGETS.contains(&root)
}

impl Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && (metadata.level() <= Level::Warn || is_own_target(metadata.target()))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = LogLine {
            level: record.level(),
            text: format!("{}", record.args()),
        };
        // The display may already be gone during shutdown
        let _ = self.sender.send(line);
    }

    fn flush(&self) {}
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn status_line(status: &Status) -> String {
    let base_image = status.base_image.map(|image| image.to_string()).unwrap_or_default();
    let errors = format!("errors {}", status.errors);
    let errors = if status.errors > 0 {
        errors.bold().red().to_string()
    } else {
        errors
    };
    format!(
        "{} {} | wrapper {}/{} | round {}/{} | {} | {} | {}{}",
        "drift".bold().bright_blue(),
        format_elapsed(status.elapsed()),
        status.wrapper,
        status.wrappers_per_round,
        status.round,
        status.total_rounds,
        errors,
        base_image,
        status.mode,
        if status.replay { " | replay" } else { "" },
    )
}

pub fn format_log_line(line: &LogLine) -> String {
    match line.level {
        Level::Error => line.text.bold().red().to_string(),
        Level::Warn => line.text.yellow().to_string(),
        Level::Debug | Level::Trace => line.text.dimmed().to_string(),
        Level::Info => line.text.clone(),
    }
}

/// Re-renders the log tail and the status line every [`REFRESH_INTERVAL`].
pub struct StatusDisplay {
    status: watch::Receiver<Status>,
    logs: mpsc::UnboundedReceiver<LogLine>,
}

impl StatusDisplay {
    pub fn new(status: watch::Receiver<Status>, logs: mpsc::UnboundedReceiver<LogLine>) -> Self {
        Self { status, logs }
    }

    pub async fn run(mut self, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => self.render(),
            }
        }
        self.render();
        println!();
    }

    fn render(&mut self) {
        let mut stdout = std::io::stdout().lock();
        while let Ok(line) = self.logs.try_recv() {
            let _ = writeln!(stdout, "\r\x1b[2K{}", format_log_line(&line));
        }
        let status = self.status.borrow().clone();
        let _ = write!(stdout, "\r\x1b[2K{}", status_line(&status));
        let _ = stdout.flush();
    }
}
