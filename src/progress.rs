//! Progress logs collect the user facing messages of a single goal. Messages are usually written
//! with `llog`, which sends them to both the process logger and a progress log.
use chrono::offset::Utc;
use chrono::DateTime;

use std::sync::{Arc, Mutex, MutexGuard};

/// A sink for the progress messages of a single goal
pub trait ProgressLog: Send + Sync {
    fn name(&self) -> &str;

    fn write(&self, message: &str);
}

/// Writes the message to the process logger at the given level, and to the progress log
pub fn llog(message: &str, level: log::Level, progress_log: &dyn ProgressLog) {
    log::log!(level, "{}", message);
    progress_log.write(message);
}

/// Forwards progress messages to the `log` facade
#[derive(Debug, Clone)]
pub struct LoggingProgressLog {
    name: String,
    level: log::Level,
}

impl LoggingProgressLog {
    pub fn new(name: impl Into<String>, level: log::Level) -> LoggingProgressLog {
        LoggingProgressLog {
            name: name.into(),
            level,
        }
    }
}

impl ProgressLog for LoggingProgressLog {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn write(&self, message: &str) {
        log::log!(self.level, "{}: {}", self.name, message);
    }
}

/// Keeps timestamped progress messages in memory. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct BufferProgressLog {
    name: String,
    entries: Arc<Mutex<Vec<(DateTime<Utc>, String)>>>,
}

impl BufferProgressLog {
    pub fn new(name: impl Into<String>) -> BufferProgressLog {
        BufferProgressLog {
            name: name.into(),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// All the messages, without timestamps, in the order they were written
    pub fn messages(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// All the messages, each prefixed with an RFC 3339 timestamp
    pub fn lines(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|(time, message)| format!("{} {}", time.to_rfc3339(), message))
            .collect()
    }

    fn lock(&self) -> MutexGuard<Vec<(DateTime<Utc>, String)>> {
        // entries are only ever appended, so a poisoned lock still holds valid entries
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProgressLog for BufferProgressLog {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn write(&self, message: &str) {
        self.lock().push((Utc::now(), message.to_owned()));
    }
}

/// Writes every message to all of the wrapped logs
#[derive(Clone)]
pub struct WriteToAllProgressLog {
    name: String,
    logs: Vec<Arc<dyn ProgressLog>>,
}

impl WriteToAllProgressLog {
    pub fn new(name: impl Into<String>, logs: Vec<Arc<dyn ProgressLog>>) -> WriteToAllProgressLog {
        WriteToAllProgressLog {
            name: name.into(),
            logs,
        }
    }
}

impl ProgressLog for WriteToAllProgressLog {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn write(&self, message: &str) {
        for progress_log in self.logs.iter() {
            progress_log.write(message);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn buffer_keeps_messages_in_order() {
        let buffer = BufferProgressLog::new("deploy");
        buffer.write("first");
        buffer.write("second");
        assert_eq!(vec!["first".to_owned(), "second".to_owned()], buffer.messages());

        let lines = buffer.lines();
        assert_eq!(2, lines.len());
        assert!(lines[0].ends_with(" first"));
        // the timestamp must parse back
        let timestamp = lines[0].split(' ').next().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn write_to_all_writes_to_every_log() {
        let one = BufferProgressLog::new("one");
        let two = BufferProgressLog::new("two");
        let all = WriteToAllProgressLog::new(
            "all",
            vec![
                Arc::new(one.clone()) as Arc<dyn ProgressLog>,
                Arc::new(two.clone()),
                Arc::new(LoggingProgressLog::new("logger", log::Level::Debug)),
            ],
        );
        llog("Deploying hounds-of-love/cloudbusting", log::Level::Info, &all);
        assert_eq!(vec!["Deploying hounds-of-love/cloudbusting".to_owned()], one.messages());
        assert_eq!(one.messages(), two.messages());
        assert_eq!("all", all.name());
    }
}
