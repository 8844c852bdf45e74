use core::fmt::Arguments;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, set_logger, set_max_level};
use spin::Once;

/// Output device for log records, usually the boot console.
pub trait LogSink: Sync {
    fn write_line(&self, args: Arguments<'_>);
}

pub struct Logger {
    sink: &'static dyn LogSink,
}

impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 20,  // White
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        self.sink.write_line(format_args!(
            "\u{1B}[{}m[{:}] {}\u{1B}[0m",
            color,
            record.level(),
            record.args(),
        ));
    }

    fn flush(&self) {}
}

static LOGGER: Once<Logger> = Once::new();

/// Route `log` records to `sink`. Only the first call installs a logger.
pub fn init(sink: &'static dyn LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| Logger { sink });
    set_logger(logger)?;
    set_max_level(level);
    Ok(())
}

/// Improved debug macro,
/// only compiled in debug mode.
#[macro_export]
macro_rules! debug_ex {
    // debug_ex!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            log::log!(target: $target, log::Level::Debug, $($arg)+)
        }
    };

    // debug_ex!("a {} event", "log")
    ($($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            log::log!(log::Level::Debug, $($arg)+)
        }
    }
}
