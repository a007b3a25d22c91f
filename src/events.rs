use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStart,
    RunEnd,
    ModelRequest,
    ToolCallDetected,
    ToolExecStart,
    ToolExecEnd,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: String,
    pub run_id: String,
    pub step: u32,
    pub kind: EventKind,
    pub data: Value,
}

impl Event {
    pub fn new(run_id: String, step: u32, kind: EventKind, data: Value) -> Self {
        Self {
            ts: now_rfc3339(),
            run_id,
            step,
            kind,
            data,
        }
    }
}

pub trait EventSink: Send {
    fn emit(&mut self, event: Event) -> anyhow::Result<()>;
}

/// Opens a JSONL sink for `--log-file`, or nothing when unset. Failures are
/// reported and logging is skipped rather than failing the session.
pub fn file_sink(path: Option<&Path>) -> Option<Box<dyn EventSink>> {
    let path = path?;
    match JsonlFileSink::new(path) {
        Ok(sink) => Some(Box::new(sink)),
        Err(e) => {
            eprintln!("WARN: failed to open log file: {e}");
            None
        }
    }
}

pub struct JsonlFileSink {
    file: std::fs::File,
}

impl JsonlFileSink {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        Ok(Self { file })
    }
}

impl EventSink for JsonlFileSink {
    fn emit(&mut self, event: Event) -> anyhow::Result<()> {
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{line}")?;
        Ok(())
    }
}

pub struct MultiSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn push(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Default for MultiSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MultiSink {
    fn emit(&mut self, event: Event) -> anyhow::Result<()> {
        for sink in &mut self.sinks {
            sink.emit(event.clone())?;
        }
        Ok(())
    }
}
