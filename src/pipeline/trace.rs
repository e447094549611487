// Pipeline tracing - structured observability events
// Sinks receive entries from every stage; JSONL files keep them for later inspection

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during trace operations
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Pipeline stage an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Analysis,
    Structure,
    AgogicMap,
    Rules,
    Validation,
    Curves,
    Midi,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Analysis => "analysis",
            Stage::Structure => "structure",
            Stage::AgogicMap => "agogic_map",
            Stage::Rules => "rules",
            Stage::Validation => "validation",
            Stage::Curves => "curves",
            Stage::Midi => "midi",
        }
    }
}

/// Severity of a trace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single structured event from the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// RFC 3339 timestamp of when this entry was created
    pub timestamp: String,

    pub stage: Stage,

    pub level: TraceLevel,

    /// Human-readable message describing the event
    pub message: String,

    /// Optional structured payload (counts, note indices, rule names)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TraceEntry {
    /// Create a new entry with the current timestamp
    pub fn new(stage: Stage, level: TraceLevel, message: impl Into<String>) -> Self {
        TraceEntry {
            timestamp: Utc::now().to_rfc3339(),
            stage,
            level,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Receiver of pipeline trace entries
pub trait TraceSink {
    fn record(&mut self, entry: TraceEntry);

    fn info(&mut self, stage: Stage, message: &str) {
        self.record(TraceEntry::new(stage, TraceLevel::Info, message));
    }

    fn warn(&mut self, stage: Stage, message: &str) {
        self.record(TraceEntry::new(stage, TraceLevel::Warn, message));
    }
}

/// Helper builder for creating trace entries of one stage
pub struct TraceBuilder {
    stage: Stage,
}

impl TraceBuilder {
    pub fn stage(stage: Stage) -> Self {
        TraceBuilder { stage }
    }

    pub fn debug(&self, message: impl Into<String>) -> TraceEntry {
        TraceEntry::new(self.stage, TraceLevel::Debug, message)
    }

    pub fn info(&self, message: impl Into<String>) -> TraceEntry {
        TraceEntry::new(self.stage, TraceLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> TraceEntry {
        TraceEntry::new(self.stage, TraceLevel::Warn, message)
    }

    pub fn error(&self, message: impl Into<String>) -> TraceEntry {
        TraceEntry::new(self.stage, TraceLevel::Error, message)
    }
}

/// Discards every entry
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&mut self, _entry: TraceEntry) {}
}

/// Forwards entries to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&mut self, entry: TraceEntry) {
        let level = match entry.level {
            TraceLevel::Debug => log::Level::Debug,
            TraceLevel::Info => log::Level::Info,
            TraceLevel::Warn => log::Level::Warn,
            TraceLevel::Error => log::Level::Error,
        };
        match &entry.data {
            Some(data) => log::log!(level, "[{}] {} {}", entry.stage.as_str(), entry.message, data),
            None => log::log!(level, "[{}] {}", entry.stage.as_str(), entry.message),
        }
    }
}

/// Collects entries in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub entries: Vec<TraceEntry>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// Entries of a single stage
    pub fn stage(&self, stage: Stage) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter().filter(move |e| e.stage == stage)
    }

    /// Entries at or above a level
    pub fn at_least(&self, level: TraceLevel) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter().filter(move |e| e.level >= level)
    }
}

impl TraceSink for MemorySink {
    fn record(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }
}

/// Append-only JSONL trace file
///
/// Write failures are reported through `log` and counted; tracing never
/// interrupts the pipeline.
pub struct TraceWriter {
    file_path: PathBuf,
    failed_writes: usize,
}

impl TraceWriter {
    pub fn new(file_path: PathBuf) -> Self {
        TraceWriter {
            file_path,
            failed_writes: 0,
        }
    }

    /// Append a trace entry to the file
    /// Creates file if it doesn't exist
    pub fn write(&self, entry: &TraceEntry) -> Result<(), TraceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        let json_line = entry.to_json_line()?;
        file.write_all(json_line.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    /// Write multiple entries at once
    pub fn write_batch(&self, entries: &[TraceEntry]) -> Result<(), TraceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        for entry in entries {
            let json_line = entry.to_json_line()?;
            file.write_all(json_line.as_bytes())?;
        }

        file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Number of entries that could not be written
    pub fn failed_writes(&self) -> usize {
        self.failed_writes
    }
}

impl TraceSink for TraceWriter {
    fn record(&mut self, entry: TraceEntry) {
        if let Err(e) = self.write(&entry) {
            self.failed_writes += 1;
            log::warn!("Failed to write trace entry to {}: {}", self.file_path.display(), e);
        }
    }
}

/// Read trace entries from a JSONL file
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let entry: TraceEntry = serde_json::from_str(line)?;
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_trace_entry_with_data() {
        let entry = TraceBuilder::stage(Stage::Rules)
            .warn("Rule failed")
            .with_data(serde_json::json!({ "rule": "pre_leap", "note": 4 }));

        assert_eq!(entry.stage, Stage::Rules);
        assert_eq!(entry.level, TraceLevel::Warn);
        assert_eq!(entry.data.unwrap()["note"], 4);
    }

    #[test]
    fn test_memory_sink_filters() {
        let mut sink = MemorySink::new();
        sink.info(Stage::Load, "Loaded 3 voices");
        sink.warn(Stage::Load, "Skipped note");
        sink.record(TraceBuilder::stage(Stage::Validation).error("broken"));

        assert_eq!(sink.stage(Stage::Load).count(), 2);
        assert_eq!(sink.at_least(TraceLevel::Warn).count(), 2);
    }

    #[test]
    fn test_json_line_format() {
        let entry = TraceEntry::new(Stage::Curves, TraceLevel::Info, "Testing");
        let json_line = entry.to_json_line().unwrap();

        assert!(json_line.ends_with('\n'));
        assert!(json_line.contains("\"stage\":\"curves\""));
        assert!(!json_line.contains("\"data\""));

        let parsed: TraceEntry = serde_json::from_str(json_line.trim()).unwrap();
        assert_eq!(parsed.stage, Stage::Curves);
    }

    #[test]
    fn test_trace_writer_as_sink() {
        let temp_dir = TempDir::new().unwrap();
        let trace_path = temp_dir.path().join("trace.jsonl");

        let mut writer = TraceWriter::new(trace_path.clone());
        writer.info(Stage::Structure, "Start");
        writer.info(Stage::Structure, "Done");

        let entries = read_trace_file(&trace_path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].message, "Done");
        assert_eq!(writer.failed_writes(), 0);
    }

    #[test]
    fn test_trace_writer_batch() {
        let temp_dir = TempDir::new().unwrap();
        let trace_path = temp_dir.path().join("trace.jsonl");
        let writer = TraceWriter::new(trace_path.clone());

        let builder = TraceBuilder::stage(Stage::Midi);
        let entries = vec![builder.info("a"), builder.debug("b"), builder.info("c")];
        writer.write_batch(&entries).unwrap();

        let read_entries = read_trace_file(&trace_path).unwrap();
        assert_eq!(read_entries.len(), 3);
        assert_eq!(read_entries[1].level, TraceLevel::Debug);
    }

    #[test]
    fn test_trace_writer_failure_is_counted() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing").join("trace.jsonl");

        let mut writer = TraceWriter::new(missing);
        writer.info(Stage::Load, "lost");
        assert_eq!(writer.failed_writes(), 1);
    }
}
