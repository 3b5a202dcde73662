//! Logging handle injected into pipeline components.
//!
//! Components never reach for a global logger on their own: each one is handed
//! a [`Logger`] at construction. The default handle forwards to the process-wide
//! `log` facade (installed by the binary through `tracing-subscriber`), tests
//! hand in a [`MemoryLog`] and assert on what was recorded.

pub use log::Level;

use log::{Log, Metadata, Record};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Cheap, clonable handle to a log sink.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    target: &'static str,
}

impl Logger {
    /// Logger forwarding to the global `log` facade.
    pub fn global() -> Self {
        Self::new(Arc::new(GlobalLog))
    }

    pub fn new(sink: Arc<dyn Log>) -> Self {
        Self {
            sink,
            target: "upcast",
        }
    }

    /// Same sink, different record target (usually the component name).
    pub fn with_target(&self, target: &'static str) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            target,
        }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn enabled(&self, level: Level) -> bool {
        let metadata = Metadata::builder().level(level).target(self.target).build();
        self.sink.enabled(&metadata)
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        self.sink.log(
            &Record::builder()
                .args(args)
                .level(level)
                .target(self.target)
                .build(),
        );
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("target", &self.target).finish()
    }
}

struct GlobalLog;

impl Log for GlobalLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        log::logger().log(record);
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

/// Sink that keeps every record in memory.
#[derive(Default)]
pub struct MemoryLog {
    records: Mutex<Vec<(Level, String, String)>>,
}

impl MemoryLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Recorded `(level, target, message)` triples, oldest first.
    pub fn records(&self) -> Vec<(Level, String, String)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a record at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(l, _, msg)| *l == level && msg.contains(needle))
    }
}

impl Log for MemoryLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((
                record.level(),
                record.target().to_string(),
                record.args().to_string(),
            ));
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_log_captures_records() {
        let sink = MemoryLog::new();
        let logger = Logger::new(sink.clone()).with_target("muxer");

        crate::log_warn!(logger, "no header written for {}", "out.mp4");
        crate::log_debug!(logger, "packet {}", 3);

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, Level::Warn);
        assert_eq!(records[0].1, "muxer");
        assert!(sink.contains(Level::Warn, "out.mp4"));
        assert!(!sink.contains(Level::Error, "out.mp4"));
    }
}
