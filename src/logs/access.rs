//! JSONL access-log collaborator.
//!
//! One record per line per completed request. Files rotate on date change
//! or once `max_lines_per_file` lines are written, with a three-digit index
//! that increments within a day:
//! `{service}_{YYYY-MM-DD}_{HHmmss}_{NNN}.log`. Write failures are logged
//! to the console logger and swallowed; they never affect a request.

use crate::models::record::RequestRecord;
use crate::models::settings::AccessLogSettings;
use chrono::{Local, NaiveDate};
use log::error;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// One persisted access-log line.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AccessRecord<'a> {
    timestamp: String,
    level: &'static str,
    service: &'a str,
    method: &'a str,
    path: &'a str,
    status_code: u16,
    #[serde(rename = "responseTime")]
    response_time_ms: u64,
    request_id: String,
    client_id: &'a str,
    ip: &'a str,
    authenticated: bool,
}

/// Log level derived from the response status.
fn derive_level(status: u16) -> &'static str {
    if status < 400 {
        "info"
    } else if status < 500 {
        "warn"
    } else if status == 503 {
        "fatal"
    } else {
        "error"
    }
}

struct LogFile {
    file: File,
    date: NaiveDate,
    lines: u64,
    index: u32,
}

/// Rotating JSONL writer. The open file handle lives behind a mutex; each
/// record is serialized outside any shared gateway state.
pub struct AccessLogger {
    settings: AccessLogSettings,
    current: Mutex<Option<LogFile>>,
}

impl AccessLogger {
    /// Creates the log directory and an idle logger; the first record opens
    /// the first file.
    pub fn new(settings: AccessLogSettings) -> std::io::Result<Self> {
        std::fs::create_dir_all(&settings.directory)?;
        Ok(Self {
            settings,
            current: Mutex::new(None),
        })
    }

    /// Appends one record, rotating first if the date changed or the line
    /// cap was reached. Failures are logged and swallowed.
    pub fn log(&self, record: &RequestRecord) {
        let line = AccessRecord {
            timestamp: record.timestamp.to_rfc3339(),
            level: derive_level(record.status_code),
            service: &self.settings.service,
            method: &record.method,
            path: &record.path,
            status_code: record.status_code,
            response_time_ms: record.response_time_ms,
            request_id: Uuid::new_v4().to_string(),
            client_id: &record.client_id,
            ip: &record.ip,
            authenticated: record.authenticated,
        };
        let json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize access record: {}", e);
                return;
            }
        };

        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = self.write_line(&mut guard, &json) {
            error!("failed to write access log: {}", e);
        }
    }

    fn write_line(&self, slot: &mut Option<LogFile>, json: &str) -> std::io::Result<()> {
        let today = Local::now().date_naive();
        let needs_rotation = match slot.as_ref() {
            None => true,
            Some(current) => {
                current.date != today || current.lines >= self.settings.max_lines_per_file
            }
        };

        if needs_rotation {
            let index = match slot.as_ref() {
                Some(current) if current.date == today => current.index + 1,
                _ => 1,
            };
            *slot = Some(self.open_file(today, index)?);
        }

        if let Some(current) = slot.as_mut() {
            writeln!(current.file, "{}", json)?;
            current.lines += 1;
        }
        Ok(())
    }

    fn open_file(&self, date: NaiveDate, index: u32) -> std::io::Result<LogFile> {
        let filename = format!(
            "{}_{}_{}_{:03}.log",
            self.settings.service,
            date.format("%Y-%m-%d"),
            Local::now().format("%H%M%S"),
            index
        );
        let path: PathBuf = PathBuf::from(&self.settings.directory).join(filename);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(LogFile {
            file,
            date,
            lines: 0,
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn settings(dir: &std::path::Path, max_lines: u64) -> AccessLogSettings {
        AccessLogSettings {
            directory: dir.to_string_lossy().to_string(),
            service: "tollgate".to_string(),
            max_lines_per_file: max_lines,
        }
    }

    fn record(status: u16) -> RequestRecord {
        RequestRecord {
            timestamp: Utc::now(),
            method: "GET".to_string(),
            path: "/api/data".to_string(),
            status_code: status,
            response_time_ms: 5,
            client_id: "10.0.0.1".to_string(),
            ip: "10.0.0.1".to_string(),
            api_key: None,
            authenticated: false,
        }
    }

    #[test]
    fn level_derivation() {
        assert_eq!(derive_level(200), "info");
        assert_eq!(derive_level(301), "info");
        assert_eq!(derive_level(404), "warn");
        assert_eq!(derive_level(429), "warn");
        assert_eq!(derive_level(500), "error");
        assert_eq!(derive_level(503), "fatal");
    }

    #[test]
    fn records_are_written_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AccessLogger::new(settings(dir.path(), 10_000)).unwrap();
        logger.log(&record(200));
        logger.log(&record(503));

        let mut files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(files.pop().unwrap()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["level"], "info");
        assert_eq!(first["service"], "tollgate");
        assert_eq!(first["statusCode"], 200);
        assert!(first["requestId"].as_str().is_some());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["level"], "fatal");
    }

    #[test]
    fn line_cap_rotates_with_incrementing_index() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AccessLogger::new(settings(dir.path(), 2)).unwrap();
        for _ in 0..5 {
            logger.log(&record(200));
        }

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names.len(), 3);
        assert!(names[0].ends_with("_001.log"), "{}", names[0]);
        assert!(names[1].ends_with("_002.log"), "{}", names[1]);
        assert!(names[2].ends_with("_003.log"), "{}", names[2]);
        for name in &names {
            assert!(name.starts_with("tollgate_"), "{}", name);
        }
    }
}
