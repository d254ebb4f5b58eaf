use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use bridge_proto::{LogEntry, LogLevel, MAX_LOGS};

/// A publisher hook invoked whenever a new entry is appended, so the
/// realtime relay can fan it out without the Event Log knowing about
/// websockets. Must be cheap or non-blocking; it runs under the same lock
/// that guards `add`.
pub type LogPublisher = Box<dyn Fn(&LogEntry) + Send + Sync>;

pub struct EventLog {
    entries: Mutex<VecDeque<LogEntry>>,
    publisher: Mutex<Option<LogPublisher>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::with_capacity(MAX_LOGS)), publisher: Mutex::new(None) }
    }

    pub fn set_publisher(&self, publisher: LogPublisher) {
        *self.publisher.lock().unwrap() = Some(publisher);
    }

    pub fn add(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(now_ms(), level, message);
        self.push(entry);
    }

    pub fn add_with_details(&self, level: LogLevel, message: impl Into<String>, details: serde_json::Value) {
        let entry = LogEntry::new(now_ms(), level, message).with_details(details);
        self.push(entry);
    }

    fn push(&self, entry: LogEntry) {
        {
            let mut entries = self.entries.lock().unwrap();
            entries.push_front(entry.clone());
            while entries.len() > MAX_LOGS {
                entries.pop_back();
            }
        }
        if let Some(publisher) = self.publisher.lock().unwrap().as_ref() {
            publisher(&entry);
        }
    }

    /// A consistent snapshot, newest first.
    pub fn read(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        self.add(LogLevel::Info, "Logs cleared");
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_caps_at_max_and_clear_leaves_one_entry() {
        let log = EventLog::new();
        for i in 0..1500 {
            log.add(LogLevel::Info, format!("entry {i}"));
        }
        assert_eq!(log.read().len(), MAX_LOGS);
        assert_eq!(log.read()[0].message, "entry 1499");

        log.clear();
        let after = log.read();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].message, "Logs cleared");
    }
}
