//! Console logging for machine builds.
//!
//! Records go to stderr as `[LEVEL target] message`, coloured by level. Builders trace through
//! [debug_ex!], which disappears from release builds.

use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record, set_logger, set_max_level};

/// ANSI foreground colour of a level.
fn level_color(level: Level) -> u8 {
    match level {
        Level::Error => 31,
        Level::Warn => 93,
        Level::Info => 37,
        Level::Debug => 32,
        Level::Trace => 90,
    }
}

pub struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let target = record
            .target()
            .strip_prefix("board::")
            .unwrap_or(record.target());
        // a closed stderr is not worth failing a build over
        let _ = writeln!(
            std::io::stderr().lock(),
            "\u{1B}[{}m[{:<5} {target}] {}\u{1B}[0m",
            level_color(record.level()),
            record.level(),
            record.args(),
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install [Logger] as the global logger at `level`.
///
/// A second call keeps the installed logger and only changes the level.
pub fn init(level: LevelFilter) {
    static LOGGER: Logger = Logger;
    if set_logger(&LOGGER).is_err() {
        log::trace!("Logger already installed, level now {level}");
    }
    set_max_level(level);
}

/// `log::debug!` that only exists in builds with debug assertions.
#[macro_export]
macro_rules! debug_ex {
    (target: $target:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            log::log!(target: $target, log::Level::Debug, $($arg)+)
        }
    };

    ($($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            log::log!(log::Level::Debug, $($arg)+)
        }
    }
}
