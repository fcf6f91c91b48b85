use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const MAX_JOURNAL_ENTRIES: usize = 10_000;

/// One routed request as seen by the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_model: Option<String>,
}

impl RequestRecord {
    /// `METHOD PATH STATUS ELAPSED[ original_model=… copilot_model=…]`
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} {} {} {}",
            self.method,
            self.path,
            self.status,
            format_elapsed(Duration::from_millis(self.elapsed_ms))
        );
        if self.original_model.is_some() || self.mapped_model.is_some() {
            line.push_str(&format!(
                " original_model={} copilot_model={}",
                self.original_model.as_deref().unwrap_or("-"),
                self.mapped_model.as_deref().unwrap_or("-")
            ));
        }
        line
    }
}

/// Requested model id and the upstream id it was sent as.
///
/// Handlers attach this to their response as an extension; the journal
/// middleware picks it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMapping {
    pub original_model: String,
    pub mapped_model: String,
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{}s", (ms as f64 / 1000.0).round() as u64)
    }
}

/// Ring buffer of recent requests, mirrored to a JSONL file when one is configured.
pub struct Journal {
    entries: VecDeque<RequestRecord>,
    writer: Option<Box<dyn Write + Send>>,
    write_failed: bool,
}

impl Journal {
    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::with_capacity(MAX_JOURNAL_ENTRIES),
            writer: None,
            write_failed: false,
        }
    }

    /// Open (or create) `file_path`, preloading the most recent records it holds.
    pub fn with_file(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut journal = Self::in_memory();

        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(record) = serde_json::from_str::<RequestRecord>(&line) {
                    journal.push(record);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        journal.writer = Some(Box::new(BufWriter::new(file)));
        Ok(journal)
    }

    pub fn record(&mut self, record: RequestRecord) {
        if let Some(ref mut writer) = self.writer {
            let written = serde_json::to_string(&record)
                .map_err(std::io::Error::from)
                .and_then(|json| {
                    writeln!(writer, "{json}")?;
                    writer.flush()
                });
            match written {
                Ok(()) => self.write_failed = false,
                Err(e) if !self.write_failed => {
                    tracing::warn!(error = %e, "Failed to append to the request log file");
                    self.write_failed = true;
                }
                Err(_) => {}
            }
        }
        self.push(record);
    }

    fn push(&mut self, record: RequestRecord) {
        if self.entries.len() >= MAX_JOURNAL_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<RequestRecord> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone)]
pub struct SharedJournal(Arc<Mutex<Journal>>);

impl SharedJournal {
    pub fn new(journal: Journal) -> Self {
        Self(Arc::new(Mutex::new(journal)))
    }

    pub fn in_memory() -> Self {
        Self::new(Journal::in_memory())
    }

    pub fn record(&self, record: RequestRecord) {
        if let Ok(mut journal) = self.0.lock() {
            journal.record(record);
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<RequestRecord> {
        self.0.lock().map(|j| j.recent(limit)).unwrap_or_default()
    }
}

/// Middleware: time the request, log one summary line and journal it.
pub async fn record_requests(
    State(journal): State<SharedJournal>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), |pq| pq.to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let mapping = response.extensions().get::<ModelMapping>();
    let record = RequestRecord {
        timestamp: Utc::now(),
        method,
        path,
        status: response.status().as_u16(),
        elapsed_ms: start.elapsed().as_millis() as u64,
        original_model: mapping.map(|m| m.original_model.clone()),
        mapped_model: mapping.map(|m| m.mapped_model.clone()),
    };
    tracing::info!("{}", record.summary());
    journal.record(record);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, status: u16) -> RequestRecord {
        RequestRecord {
            timestamp: Utc::now(),
            method: "POST".to_string(),
            path: path.to_string(),
            status,
            elapsed_ms: 42,
            original_model: None,
            mapped_model: None,
        }
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(999)), "999ms");
        assert_eq!(format_elapsed(Duration::from_millis(1000)), "1s");
        assert_eq!(format_elapsed(Duration::from_millis(2600)), "3s");
    }

    #[test]
    fn test_summary_line() {
        let mut r = record("/v1/messages", 200);
        assert_eq!(r.summary(), "POST /v1/messages 200 42ms");

        r.original_model = Some("claude-sonnet-4-20250514".to_string());
        r.mapped_model = Some("claude-sonnet-4.5".to_string());
        assert_eq!(
            r.summary(),
            "POST /v1/messages 200 42ms original_model=claude-sonnet-4-20250514 copilot_model=claude-sonnet-4.5"
        );
    }

    #[test]
    fn test_ring_buffer_is_bounded() {
        let mut journal = Journal::in_memory();
        for i in 0..(MAX_JOURNAL_ENTRIES + 5) {
            journal.record(record(&format!("/r/{i}"), 200));
        }
        assert_eq!(journal.len(), MAX_JOURNAL_ENTRIES);
        let newest = journal.recent(1);
        assert_eq!(newest[0].path, format!("/r/{}", MAX_JOURNAL_ENTRIES + 4));
    }

    #[test]
    fn test_file_journal_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");

        {
            let mut journal = Journal::with_file(&path).unwrap();
            journal.record(record("/v1/messages", 200));
            journal.record(record("/v1/embeddings", 400));
        }

        let reopened = Journal::with_file(&path).unwrap();
        let recent = reopened.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].path, "/v1/embeddings");
        assert_eq!(recent[0].status, 400);
    }

    struct BrokenFile;

    impl Write for BrokenFile {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }
    }

    #[test]
    fn test_write_failure_keeps_in_memory_records() {
        let mut journal = Journal::in_memory();
        journal.writer = Some(Box::new(BrokenFile));

        journal.record(record("/v1/messages", 200));
        assert!(journal.write_failed);
        journal.record(record("/v1/messages", 429));

        assert_eq!(journal.len(), 2);
        assert_eq!(journal.recent(1)[0].status, 429);
    }
}
