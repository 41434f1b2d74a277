//! Append-only audit log of answered requests.
//!
//! Connection handlers hand records to an [`AuditLog`] handle, which forwards
//! them over a channel to a single writer task. The writer owns the file, so
//! records are appended one complete line at a time and never interleave.
//! Write failures are reported through `tracing` and never reach clients.

use crate::analysis::AnalysisResult;
use chrono::{DateTime, FixedOffset, Utc};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Timestamp layout, e.g. `7/3/2026, 9:05:02`
const TIMESTAMP_FORMAT: &str = "%-d/%-m/%Y, %-H:%M:%S";

/// One audit line.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub result: AnalysisResult,
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prime = if self.result.is_count_prime {
            "Es numero primo"
        } else {
            "No es numero primo"
        };
        write!(
            f,
            "[{}] Cadena: \"{}\" | Última letra: '{}' | Repeticiones: {} | {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.result.text,
            self.result.last_char,
            self.result.count,
            prime
        )
    }
}

/// Cloneable handle feeding the audit writer task.
///
/// The writer exits once every handle has been dropped and the queue is
/// drained.
#[derive(Debug, Clone)]
pub struct AuditLog {
    records: mpsc::UnboundedSender<AuditRecord>,
    offset: FixedOffset,
}

impl AuditLog {
    /// Start the writer task appending to `path`.
    ///
    /// Timestamps are rendered in the `offset` time zone. Must be called from
    /// within a tokio runtime.
    pub fn spawn(path: PathBuf, offset: FixedOffset) -> (Self, JoinHandle<()>) {
        let (records, queue) = mpsc::unbounded_channel();
        let writer = tokio::spawn(writer_task(path, queue));
        (Self { records, offset }, writer)
    }

    /// Queue a record for a completed request. Never blocks.
    pub fn record(&self, result: &AnalysisResult) {
        let record = AuditRecord {
            timestamp: Utc::now().with_timezone(&self.offset),
            result: result.clone(),
        };

        if self.records.send(record).is_err() {
            error!("Audit writer has stopped, record dropped");
        }
    }
}

async fn writer_task(path: PathBuf, mut queue: mpsc::UnboundedReceiver<AuditRecord>) {
    let mut file: Option<File> = None;

    while let Some(record) = queue.recv().await {
        let line = format!("{record}\n");
        if let Err(e) = append_line(&path, &mut file, line.as_bytes()).await {
            error!(path = %path.display(), error = %e, "Failed to append audit record");
            // Reopen on the next record
            file = None;
        }
    }

    debug!(path = %path.display(), "Audit writer stopped");
}

async fn append_line(path: &Path, file: &mut Option<File>, line: &[u8]) -> io::Result<()> {
    if file.is_none() {
        let opened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        *file = Some(opened);
    }

    if let Some(f) = file.as_mut() {
        f.write_all(line).await?;
        f.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use chrono::TimeZone;

    fn bogota() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    #[test]
    fn test_record_format() {
        let record = AuditRecord {
            timestamp: bogota().with_ymd_and_hms(2026, 3, 7, 9, 5, 2).unwrap(),
            result: analyze("banana").unwrap(),
        };
        assert_eq!(
            record.to_string(),
            "[7/3/2026, 9:05:02] Cadena: \"banana\" | Última letra: 'a' | Repeticiones: 3 | Es numero primo"
        );
    }

    #[test]
    fn test_record_format_not_prime() {
        let record = AuditRecord {
            timestamp: bogota().with_ymd_and_hms(2026, 12, 25, 23, 59, 59).unwrap(),
            result: analyze("aabbaabb").unwrap(),
        };
        assert_eq!(
            record.to_string(),
            "[25/12/2026, 23:59:59] Cadena: \"aabbaabb\" | Última letra: 'b' | Repeticiones: 4 | No es numero primo"
        );
    }

    #[tokio::test]
    async fn test_records_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_log.txt");
        std::fs::write(&path, "existing line\n").unwrap();

        let (audit, writer) = AuditLog::spawn(path.clone(), bogota());
        audit.record(&analyze("banana").unwrap());
        audit.record(&analyze("aabbaabb").unwrap());
        drop(audit);
        writer.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "existing line");
        assert!(lines[1].contains("Cadena: \"banana\""));
        assert!(lines[2].contains("Cadena: \"aabbaabb\""));
    }

    #[tokio::test]
    async fn test_concurrent_records_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.txt");
        let (audit, writer) = AuditLog::spawn(path.clone(), bogota());

        let mut tasks = Vec::new();
        for i in 0..50 {
            let audit = audit.clone();
            tasks.push(tokio::spawn(async move {
                let text = format!("request number {i} {}", "x".repeat(i));
                audit.record(&analyze(&text).unwrap());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        drop(audit);
        writer.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 50);
        for line in lines {
            assert!(line.starts_with('['));
            assert!(line.ends_with("primo"));
        }
    }

    #[tokio::test]
    async fn test_unwritable_path_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("audit.txt");

        let (audit, writer) = AuditLog::spawn(path.clone(), bogota());
        audit.record(&analyze("banana").unwrap());
        drop(audit);
        writer.await.unwrap();

        assert!(!path.exists());
    }
}
