//! Logging infrastructure
//!
//! This module provides logging via the `log` crate, writing one line per
//! record to a board-supplied [`Console`] (usually the debug UART).
//! Each line carries the scheduler tick at which it was emitted.

use crate::time::Tick;
use core::fmt::{self, Write};
use log::{Level, LevelFilter, Metadata, Record};
use spin::Once;

/// Character sink for log output
pub trait Console: Sync {
    /// Write a string fragment
    fn write_str(&self, s: &str);

    /// Timestamp prefixed to every line
    fn timestamp(&self) -> Tick;
}

/// Adapter so `write!` can target a [`Console`]
struct ConsoleWriter<'a>(&'a dyn Console);

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// Logger forwarding records to the registered console
struct ConsoleLogger {
    console: Once<&'static dyn Console>,
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(console) = self.console.get() else {
            return;
        };

        // Level strings with ANSI colors
        let level_str = match record.level() {
            Level::Error => "\x1b[31mERROR\x1b[0m",
            Level::Warn => "\x1b[33mWARN\x1b[0m ",
            Level::Info => "\x1b[32mINFO\x1b[0m ",
            Level::Debug => "\x1b[34mDEBUG\x1b[0m",
            Level::Trace => "\x1b[35mTRACE\x1b[0m",
        };

        let mut writer = ConsoleWriter(*console);
        let _ = writeln!(
            writer,
            "[{:>10}] [{}] {}",
            console.timestamp(),
            level_str,
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger {
    console: Once::new(),
};

/// Initialize the logging subsystem
///
/// Fails if another logger was already installed.
pub fn init(console: &'static dyn Console) -> Result<(), log::SetLoggerError> {
    LOGGER.console.call_once(|| console);
    log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Debug))
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
