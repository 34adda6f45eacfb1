//! Lifecycle notifications for observers.
//!
//! Sinks are called synchronously on the thread that caused the transition and
//! must not block for long. They cannot influence control flow.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CommissionStarted,
    CommissionSucceeded,
    CommissionFailed,
    ProvideStarted,
    ProvideCompleted,
    FinishStarted,
    FinishCompleted,
    Notice,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::CommissionStarted => "commission-started",
            EventKind::CommissionSucceeded => "commission-succeeded",
            EventKind::CommissionFailed => "commission-failed",
            EventKind::ProvideStarted => "provide-started",
            EventKind::ProvideCompleted => "provide-completed",
            EventKind::FinishStarted => "finish-started",
            EventKind::FinishCompleted => "finish-completed",
            EventKind::Notice => "notice",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, message: Option<String>) -> Self {
        Self {
            kind,
            message,
            at: Utc::now(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventSink for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event);
    }
}

/// Forwards events to `tracing`. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &Event) {
        let message = event.message.as_deref().unwrap_or("");
        match event.kind {
            EventKind::CommissionFailed => warn!("{}: {message}", event.kind),
            EventKind::CommissionSucceeded | EventKind::FinishCompleted | EventKind::Notice => {
                info!("{}: {message}", event.kind);
            }
            _ => debug!("{}: {message}", event.kind),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: &Event) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
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
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.kind)
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
