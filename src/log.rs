use std::error::Error;

use parking_lot::Mutex;

/// Destination for the crate's own diagnostics, injected into writers and
/// appenders so nothing depends on a process-wide logger.
pub trait InternalLog: Send + Sync {
    fn debug(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str, error: Option<&(dyn Error + 'static)>);
}

/// Forwards diagnostics to `tracing`.
///
/// If the same process routes its `fmt` output through an appender, filter
/// this crate's target out of that subscriber or every failed send will be
/// queued for delivery as well.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl InternalLog for TracingLog {
    fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str, error: Option<&(dyn Error + 'static)>) {
        match error {
            Some(err) => tracing::error!(error = %err, "{}", message),
            None => tracing::error!("{}", message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    pub error: Option<String>,
}

/// Keeps every entry in memory; intended for tests.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn entries_at(&self, level: Level) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.level == level)
            .cloned()
            .collect()
    }

    fn push(&self, level: Level, message: &str, error: Option<String>) {
        self.entries.lock().push(LogEntry {
            level,
            message: message.to_string(),
            error,
        });
    }
}

impl InternalLog for MemoryLog {
    fn debug(&self, message: &str) {
        self.push(Level::Debug, message, None);
    }

    fn warn(&self, message: &str) {
        self.push(Level::Warn, message, None);
    }

    fn error(&self, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.push(Level::Error, message, error.map(|err| err.to_string()));
    }
}
