//! Kernel log sink with a runtime level filter.
//!
//! Messages reach the serial port on bare metal. Hosted builds route them to
//! stderr while testing and discard them otherwise, so the scheduling code can
//! log unconditionally from either environment.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info.priority());

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Panic,
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Panic => "PANIC",
            LogLevel::Fatal => "FATAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    fn serial_color(self) -> &'static str {
        match self {
            LogLevel::Panic => "\x1b[1;37;41m",
            LogLevel::Fatal => "\x1b[1;37;41m",
            LogLevel::Error => "\x1b[1;31m",
            LogLevel::Warn => "\x1b[33m",
            LogLevel::Info => "\x1b[32m",
            LogLevel::Debug => "\x1b[36m",
            LogLevel::Trace => "\x1b[90m",
        }
    }

    const fn priority(self) -> u8 {
        match self {
            LogLevel::Panic => 0,
            LogLevel::Fatal => 1,
            LogLevel::Error => 2,
            LogLevel::Warn => 3,
            LogLevel::Info => 4,
            LogLevel::Debug => 5,
            LogLevel::Trace => 6,
        }
    }

    fn from_priority(value: u8) -> Self {
        match value {
            0 => LogLevel::Panic,
            1 => LogLevel::Fatal,
            2 => LogLevel::Error,
            3 => LogLevel::Warn,
            4 => LogLevel::Info,
            5 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("panic") {
            Some(LogLevel::Panic)
        } else if value.eq_ignore_ascii_case("fatal") {
            Some(LogLevel::Fatal)
        } else if value.eq_ignore_ascii_case("error") {
            Some(LogLevel::Error)
        } else if value.eq_ignore_ascii_case("warn") || value.eq_ignore_ascii_case("warning") {
            Some(LogLevel::Warn)
        } else if value.eq_ignore_ascii_case("info") {
            Some(LogLevel::Info)
        } else if value.eq_ignore_ascii_case("debug") {
            Some(LogLevel::Debug)
        } else if value.eq_ignore_ascii_case("trace") {
            Some(LogLevel::Trace)
        } else {
            None
        }
    }
}

/// Cheap pre-filter used by the `klog!` macro before formatting anything.
#[inline]
pub fn enabled(level: LogLevel) -> bool {
    level.priority() <= LOG_LEVEL.load(Ordering::Relaxed)
}

pub fn set_max_level(level: LogLevel) {
    LOG_LEVEL.store(level.priority(), Ordering::Relaxed);
}

pub fn max_level() -> LogLevel {
    LogLevel::from_priority(LOG_LEVEL.load(Ordering::Relaxed))
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    crate::serial::_print(format_args!(
        "{}[{:<5}]\x1b[0m {}\n",
        level.serial_color(),
        level.as_str(),
        args
    ));
}

#[cfg(all(test, not(target_os = "none")))]
pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    eprintln!("[{:<5}] {}", level.as_str(), args);
}

#[cfg(all(not(test), not(target_os = "none")))]
pub fn log(_level: LogLevel, _args: fmt::Arguments<'_>) {}

#[cfg(all(target_os = "none", not(target_arch = "x86_64")))]
pub fn log(_level: LogLevel, _args: fmt::Arguments<'_>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_roundtrip() {
        for name in ["panic", "fatal", "error", "warn", "info", "debug", "trace"] {
            let level = LogLevel::from_str(name).unwrap();
            assert!(level.as_str().eq_ignore_ascii_case(name));
        }
        assert_eq!(LogLevel::from_str("verbose"), None);
    }

    #[test]
    fn filter_honors_max_level() {
        let prev = max_level();
        set_max_level(LogLevel::Warn);
        assert!(enabled(LogLevel::Error));
        assert!(enabled(LogLevel::Warn));
        assert!(!enabled(LogLevel::Info));
        set_max_level(prev);
    }
}
