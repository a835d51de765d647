//! Leveled diagnostic logging for the `vlad` allocator.
//!
//! A small, zero-dependency logger: one global [`Logger`] with an atomic
//! minimum level, macros that capture the calling module path, and optional
//! ANSI coloring. `ERROR` and `WARN` lines go to stderr, everything else to
//! stdout.
//!
//! The default level is [`Level::Warn`], so a library embedding the allocator
//! only hears about exhaustion and corruption unless it opts in.
//!
//! # Example
//!
//! ```
//! use vlad_log::{debug, error, info, warn, Level};
//!
//! vlad_log::set_level(Level::Debug);
//!
//! let free = 916;
//! info!("arena ready, {} bytes free", free);
//! debug!("free list: {:?}", [0u32, 108]);
//! warn!("request of {} bytes exhausted the arena", 4096);
//! error!("free list head is not tagged FREE");
//! ```

use std::fmt::{self, Arguments};
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Severity of a log line.
///
/// Ordered from most severe ([`Level::Error`]) to least severe
/// ([`Level::Trace`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Allocator invariants were violated.
    Error = 0,
    /// Recoverable failures such as arena exhaustion.
    Warn = 1,
    /// Lifecycle events: init and shutdown.
    Info = 2,
    /// Per-operation detail: allocations, frees, splits and merges.
    Debug = 3,
    /// Free-list walks, node by node.
    Trace = 4,
}

impl Level {
    /// All levels, most severe first.
    pub const ALL: [Level; 5] =
        [Level::Error, Level::Warn, Level::Info, Level::Debug, Level::Trace];

    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Upper-case name of the level.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Level {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }

    /// Whether lines at this level are routed to stderr.
    const fn is_diagnostic(self) -> bool {
        matches!(self, Level::Error | Level::Warn)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a [`Level`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError {
    input: String,
}

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log level: {:?}", self.input)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    /// Parses a level name, ignoring case.
    ///
    /// ```
    /// use vlad_log::Level;
    ///
    /// assert_eq!("debug".parse::<Level>(), Ok(Level::Debug));
    /// assert_eq!("WARN".parse::<Level>(), Ok(Level::Warn));
    /// assert!("loud".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseLevelError { input: s.to_owned() })
    }
}

/// Process-wide logger state.
///
/// Obtained through [`get_logger`]. Both fields are atomics so the logger
/// can be reconfigured from any thread.
pub struct Logger {
    level: AtomicU8,
    color: AtomicBool,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            color: AtomicBool::new(true),
        }
    }

    /// Sets the minimum level; less severe lines are dropped.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
    }

    /// Current minimum level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Turns ANSI coloring on or off.
    pub fn set_color(&self, enabled: bool) {
        self.color.store(enabled, Ordering::Relaxed);
    }

    /// Whether a line at `level` would be written.
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }

    fn format_line(&self, level: Level, target: &str, args: Arguments) -> String {
        if self.color.load(Ordering::Relaxed) {
            const RESET: &str = "\x1b[0m";
            let color = level.color_code();
            format!("{color}[{level}]{RESET} {target}: {args}")
        } else {
            format!("[{level}] {target}: {args}")
        }
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the global logger, creating it at [`Level::Warn`] on first use.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Warn))
}

/// Sets the global minimum level.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Sets the global minimum level from its name.
///
/// ```
/// vlad_log::set_level_from_str("trace").unwrap();
/// assert!(vlad_log::set_level_from_str("chatty").is_err());
/// ```
pub fn set_level_from_str(s: &str) -> Result<(), ParseLevelError> {
    set_level(s.parse()?);
    Ok(())
}

/// Turns ANSI coloring of the global logger on or off.
pub fn set_color(enabled: bool) {
    get_logger().set_color(enabled);
}

/// Writes one line. Called by the macros after the level check.
#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments) {
    let logger = get_logger();
    if !logger.enabled(level) {
        return;
    }

    let line = logger.format_line(level, target, args);
    if level.is_diagnostic() {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }
}

/// Logs at an explicit level.
///
/// ```
/// use vlad_log::{log, Level};
///
/// log!(level: Level::Info, "arena size {} bytes", 1024);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            if $crate::get_logger().enabled($level) {
                $crate::__log_with_target(
                    $level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn test_level_parse_ignores_case() {
        assert_eq!("error".parse::<Level>(), Ok(Level::Error));
        assert_eq!("WARN".parse::<Level>(), Ok(Level::Warn));
        assert_eq!("Info".parse::<Level>(), Ok(Level::Info));
        assert_eq!("dEbUg".parse::<Level>(), Ok(Level::Debug));
        assert_eq!("trace".parse::<Level>(), Ok(Level::Trace));

        let err = "verbose".parse::<Level>().unwrap_err();
        assert_eq!(err.to_string(), "invalid log level: \"verbose\"");
    }

    #[test]
    fn test_level_round_trips_through_u8() {
        for level in Level::ALL {
            assert_eq!(Level::from_u8(level as u8), level);
        }
    }

    #[test]
    fn test_logger_level_filtering() {
        let logger = Logger::new(Level::Warn);

        assert!(logger.enabled(Level::Error));
        assert!(logger.enabled(Level::Warn));
        assert!(!logger.enabled(Level::Info));

        logger.set_level(Level::Trace);
        assert!(logger.enabled(Level::Trace));
        assert_eq!(logger.level(), Level::Trace);
    }

    #[test]
    fn test_format_line_without_color() {
        let logger = Logger::new(Level::Info);
        logger.set_color(false);

        let line = logger.format_line(
            Level::Info,
            "vlad_mem::arena",
            format_args!("arena ready: {} bytes", 1024),
        );
        assert_eq!(line, "[INFO] vlad_mem::arena: arena ready: 1024 bytes");
    }

    #[test]
    fn test_format_line_with_color() {
        let logger = Logger::new(Level::Info);

        let line = logger.format_line(Level::Error, "t", format_args!("boom"));
        assert!(line.starts_with("\x1b[31m[ERROR]\x1b[0m"));
        assert!(line.ends_with("t: boom"));
    }

    #[test]
    fn test_diagnostic_routing() {
        assert!(Level::Error.is_diagnostic());
        assert!(Level::Warn.is_diagnostic());
        assert!(!Level::Info.is_diagnostic());
        assert!(!Level::Trace.is_diagnostic());
    }

    #[test]
    fn test_global_logger_singleton() {
        let logger1 = get_logger();
        let logger2 = get_logger();
        assert!(std::ptr::eq(logger1, logger2));
        assert!(set_level_from_str("nonsense").is_err());
    }

    #[test]
    fn test_macros_from_threads() {
        use std::thread;

        let handles: Vec<_> = (0..4)
            .map(|i| {
                thread::spawn(move || {
                    warn!("thread {} exhausted its arena", i);
                    trace!("thread {} walk (filtered)", i);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
