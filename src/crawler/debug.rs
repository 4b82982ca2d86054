//! Debug event sink
//!
//! Every pipeline stage emits an `Event` to the collector's debugger, if one
//! is installed. Sinks are fire-and-forget: they cannot fail the pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Pipeline stage an event was emitted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Request,
    ResponseHeaders,
    Response,
    Html,
    Xml,
    Error,
    Scraped,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::ResponseHeaders => "responseHeaders",
            Self::Response => "response",
            Self::Html => "html",
            Self::Xml => "xml",
            Self::Error => "error",
            Self::Scraped => "scraped",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured debug event
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub collector_id: u32,
    pub request_id: u32,
    pub values: BTreeMap<String, String>,
}

impl Event {
    pub fn new(kind: EventKind, collector_id: u32, request_id: u32) -> Self {
        Self {
            kind,
            collector_id,
            request_id,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

/// Receiver of debug events
pub trait Debugger: Send + Sync {
    fn event(&self, event: &Event);
}

/// Debugger forwarding events to `tracing` at debug level
#[derive(Debug)]
pub struct LogDebugger {
    started: Instant,
}

impl LogDebugger {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for LogDebugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Debugger for LogDebugger {
    fn event(&self, event: &Event) {
        tracing::debug!(
            collector = event.collector_id,
            request = event.request_id,
            kind = event.kind.as_str(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "{:?}",
            event.values
        );
    }
}

/// Debugger keeping every event in memory
///
/// Mostly useful in tests and for post-mortem inspection of short crawls.
#[derive(Debug, Clone, Default)]
pub struct RecordingDebugger {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingDebugger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl Debugger for RecordingDebugger {
    fn event(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
