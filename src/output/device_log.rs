// Per-device run transcript
//
// One file per (configuration, hostname). Every line starts with a local
// timestamp; multi-line command output follows its header line verbatim.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

/// Timestamp format used at the start of every entry
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Path of the log for a device within a run
pub fn log_path(log_dir: &Path, config_name: &str, hostname: &str) -> PathBuf {
    log_dir.join(format!("{}_{}.log", config_name, hostname))
}

/// Append-only, timestamped transcript for one device
pub struct DeviceLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    unit_total: usize,
}

impl DeviceLog {
    /// Start a fresh transcript, truncating any log left by a previous run
    pub fn create(
        log_dir: &Path,
        config_name: &str,
        hostname: &str,
        unit_total: usize,
    ) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_path(log_dir, config_name, hostname);
        let file = File::create(&path)?;
        Ok(DeviceLog {
            path,
            writer: Some(BufWriter::new(file)),
            unit_total,
        })
    }

    /// Reopen an existing transcript to add entries after its pipeline ended
    pub fn append(
        log_dir: &Path,
        config_name: &str,
        hostname: &str,
        unit_total: usize,
    ) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_path(log_dir, config_name, hostname);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(DeviceLog {
            path,
            writer: Some(BufWriter::new(file)),
            unit_total,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a session-level note
    pub fn note(&mut self, message: impl AsRef<str>) -> io::Result<()> {
        self.write_entry(message.as_ref())
    }

    /// Write the single entry that closes out execution unit `index` (zero-based)
    pub fn unit(&mut self, index: usize, message: impl AsRef<str>) -> io::Result<()> {
        let line = format!("[unit {}/{}] {}", index + 1, self.unit_total, message.as_ref());
        self.write_entry(&line)
    }

    fn write_entry(&mut self, message: &str) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "device log is closed"))?;

        let timestamp = Local::now().format(TIMESTAMP_FORMAT);
        writeln!(writer, "[{}] {}", timestamp, message)?;
        // Each entry is on disk before the next unit starts
        writer.flush()
    }

    /// Flush and release the file
    pub fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for DeviceLog {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A parsed transcript entry, used by `dutrun log` and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    /// One-based unit number for unit entries
    pub unit: Option<usize>,
    pub message: String,
}

/// Split transcript text back into entries
///
/// Lines that do not start with a timestamp belong to the previous entry.
pub fn parse_entries(content: &str) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = Vec::new();

    for line in content.lines() {
        match split_timestamp(line) {
            Some((timestamp, rest)) => {
                let (unit, message) = split_unit(rest);
                entries.push(LogEntry {
                    timestamp: timestamp.to_string(),
                    unit,
                    message: message.to_string(),
                });
            }
            None => {
                if let Some(last) = entries.last_mut() {
                    last.message.push('\n');
                    last.message.push_str(line);
                }
            }
        }
    }

    entries
}

fn split_timestamp(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find("] ")?;
    let timestamp = &rest[..end];
    chrono::NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some((timestamp, &rest[end + 2..]))
}

fn split_unit(message: &str) -> (Option<usize>, &str) {
    let parsed = message.strip_prefix("[unit ").and_then(|rest| {
        let end = rest.find("] ")?;
        let (index, _) = rest[..end].split_once('/')?;
        Some((index.parse().ok()?, &rest[end + 2..]))
    });

    match parsed {
        Some((index, body)) => (Some(index), body),
        None => (None, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_path() {
        let path = log_path(Path::new("/var/log/dutrun"), "nightly", "10.0.0.9");
        assert_eq!(path, PathBuf::from("/var/log/dutrun/nightly_10.0.0.9.log"));
    }

    #[test]
    fn test_entries_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let mut log = DeviceLog::create(dir.path(), "cfg", "dut-1", 2).unwrap();
        log.note("Connected to dut-1").unwrap();
        log.unit(0, "Output on dut-1:\nline one\nline two").unwrap();
        log.unit(1, "Slept for 1 seconds").unwrap();
        log.close().unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        let entries = parse_entries(&content);

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].unit, None);
        assert_eq!(entries[1].unit, Some(1));
        assert_eq!(entries[1].message, "Output on dut-1:\nline one\nline two");
        assert_eq!(entries[2].unit, Some(2));
    }

    #[test]
    fn test_create_truncates_and_append_keeps() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = DeviceLog::create(dir.path(), "cfg", "dut", 1).unwrap();
            log.note("first run").unwrap();
        }
        {
            let mut log = DeviceLog::create(dir.path(), "cfg", "dut", 1).unwrap();
            log.note("second run").unwrap();
        }
        {
            let mut log = DeviceLog::append(dir.path(), "cfg", "dut", 1).unwrap();
            log.note("appended").unwrap();
        }

        let content = fs::read_to_string(log_path(dir.path(), "cfg", "dut")).unwrap();
        assert!(!content.contains("first run"));
        assert!(content.contains("second run"));
        assert!(content.contains("appended"));
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let mut log = DeviceLog::create(dir.path(), "cfg", "dut", 1).unwrap();
        log.close().unwrap();
        log.close().unwrap();
        assert!(log.note("late").is_err());
    }
}
