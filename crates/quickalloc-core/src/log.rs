//! Structured allocator lifecycle records.
//!
//! Each instance keeps a bounded ring of [`AllocatorLogRecord`]s describing
//! the decisions it took (which path served an allocation, why a free was
//! rejected, ...). Records carry a monotonic decision id and a trace id of
//! the form `quickalloc::<symbol>::<decision_id:016x>` and can be exported as
//! JSONL.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Allocator lifecycle log level.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl AllocatorLogLevel {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "err" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`malloc`, `free`, `realloc`, `calloc`, `create`).
    pub symbol: String,
    /// Event kind (`alloc`, `free`, `invalid_free`, ...).
    pub event: String,
    /// Payload address involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Size-class index involved in the event.
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: String,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: live block count.
    pub live_blocks: usize,
    /// Snapshot: bytes carved from the arena so far.
    pub carved_bytes: usize,
}

/// Fields of a record that the call site supplies.
#[derive(Debug, Clone)]
pub(crate) struct LogEvent {
    pub(crate) level: AllocatorLogLevel,
    pub(crate) symbol: &'static str,
    pub(crate) event: &'static str,
    pub(crate) ptr: Option<usize>,
    pub(crate) size: Option<usize>,
    pub(crate) class: Option<usize>,
    pub(crate) outcome: &'static str,
    pub(crate) details: String,
}

impl LogEvent {
    pub(crate) fn new(
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            level,
            symbol,
            event,
            ptr: None,
            size: None,
            class: None,
            outcome,
            details: String::new(),
        }
    }

    pub(crate) fn ptr(mut self, ptr: usize) -> Self {
        self.ptr = Some(ptr);
        self
    }

    pub(crate) fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) fn class(mut self, class: usize) -> Self {
        self.class = Some(class);
        self
    }

    pub(crate) fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Bounded ring of lifecycle records.
#[derive(Debug)]
pub struct LifecycleLog {
    records: VecDeque<AllocatorLogRecord>,
    capacity: usize,
    min_level: AllocatorLogLevel,
    next_decision_id: u64,
    dropped: u64,
}

impl LifecycleLog {
    #[must_use]
    pub fn new(capacity: usize, min_level: AllocatorLogLevel) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            min_level,
            next_decision_id: 1,
            dropped: 0,
        }
    }

    /// True if a record at `level` would be kept.
    #[must_use]
    pub fn enabled(&self, level: AllocatorLogLevel) -> bool {
        self.capacity > 0 && level >= self.min_level
    }

    pub(crate) fn record(&mut self, event: LogEvent, live_blocks: usize, carved_bytes: usize) {
        if !self.enabled(event.level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(AllocatorLogRecord {
            decision_id,
            trace_id: format!("quickalloc::{}::{:016x}", event.symbol, decision_id),
            level: event.level,
            symbol: event.symbol.to_string(),
            event: event.event.to_string(),
            ptr: event.ptr,
            size: event.size,
            class: event.class,
            outcome: event.outcome.to_string(),
            details: event.details,
            live_blocks,
            carved_bytes,
        });
    }

    /// Copies the retained records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AllocatorLogRecord> {
        self.records.iter().cloned().collect()
    }

    /// Removes and returns the retained records, oldest first.
    pub fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        self.records.drain(..).collect()
    }

    /// Records evicted because the ring was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Renders records as JSON lines.
pub fn to_jsonl(records: &[AllocatorLogRecord]) -> serde_json::Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}
