use log::Level;
use parking_lot::Mutex;

/// Collects one request's diagnostics so they are emitted contiguously
#[derive(Debug, Default)]
pub struct LogBuffer {
    prefix: Option<String>,
    entries: Mutex<Vec<(Level, String)>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer whose lines are prefixed with the matched route
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        self.entries.lock().push((level, message.into()));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Emit and clear everything buffered so far
    pub fn flush(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock());
        for (level, message) in &entries {
            match &self.prefix {
                Some(prefix) => log::log!(*level, "[{}] {}", prefix, message),
                None => log::log!(*level, "{}", message),
            }
        }
        entries.len()
    }
}
