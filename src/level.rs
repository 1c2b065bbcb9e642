use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::Level;

const OFF: u8 = 0;
const ERROR: u8 = 1;
const WARN: u8 = 2;
const INFO: u8 = 3;
const DEBUG: u8 = 4;
const TRACE: u8 = 5;

static LOG_LEVEL: Lazy<Arc<LevelVar>> = Lazy::new(|| Arc::new(LevelVar::new()));

/// Concurrency-safe, runtime-adjustable severity threshold.
///
/// Every read observes one complete [`LevelFilter`]; readers and writers
/// never need extra synchronization.
#[derive(Debug)]
pub struct LevelVar {
    level: AtomicU8,
}

impl LevelVar {
    /// A threshold starting at `INFO`.
    pub const fn new() -> Self {
        Self {
            level: AtomicU8::new(INFO),
        }
    }

    pub fn with_level(filter: impl Into<LevelFilter>) -> Self {
        Self {
            level: AtomicU8::new(encode(filter.into())),
        }
    }

    pub fn get(&self) -> LevelFilter {
        decode(self.level.load(Ordering::Acquire))
    }

    pub fn set(&self, filter: impl Into<LevelFilter>) {
        self.level.store(encode(filter.into()), Ordering::Release);
    }

    /// Whether a record at `level` meets the current threshold.
    pub fn enabled(&self, level: &Level) -> bool {
        LevelFilter::from_level(*level) <= self.get()
    }
}

impl Default for LevelVar {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide threshold used by [`crate::init::init`].
///
/// Changing it affects every handler built by the orchestrator, including
/// loggers created before the change.
pub fn log_level() -> Arc<LevelVar> {
    LOG_LEVEL.clone()
}

fn encode(filter: LevelFilter) -> u8 {
    match filter.into_level() {
        None => OFF,
        Some(Level::ERROR) => ERROR,
        Some(Level::WARN) => WARN,
        Some(Level::INFO) => INFO,
        Some(Level::DEBUG) => DEBUG,
        Some(_) => TRACE,
    }
}

fn decode(raw: u8) -> LevelFilter {
    match raw {
        OFF => LevelFilter::OFF,
        ERROR => LevelFilter::ERROR,
        WARN => LevelFilter::WARN,
        INFO => LevelFilter::INFO,
        DEBUG => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Parse a level name, falling back to `INFO` for unknown names.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            eprintln!("unknown log level {other:?}, defaulting to INFO");
            Level::INFO
        }
    }
}

/// All levels, least severe first.
pub fn all_levels() -> [Level; 5] {
    [Level::TRACE, Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR]
}
