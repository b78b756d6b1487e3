//! Session events and the sinks that consume them.
//!
//! The engine emits events from its single decision task, so every sink sees
//! them in order: `BetApplied` ids strictly increase within a session.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::types::{BetOutcome, SessionLimits, SessionSummary, StopReason, WagerSpec};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session_id: Uuid,
        strategy: String,
        limits: SessionLimits,
        start_balance: Decimal,
        currency: String,
    },
    BetPlaced {
        id: u64,
        spec: WagerSpec,
    },
    BetApplied {
        id: u64,
        outcome: BetOutcome,
    },
    /// A request that never came back within the drain grace window.
    BetLost {
        id: u64,
        spec: WagerSpec,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
    SessionEnded {
        reason: StopReason,
        summary: SessionSummary,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarted { .. } => "session_started",
            SessionEvent::BetPlaced { .. } => "bet_placed",
            SessionEvent::BetApplied { .. } => "bet_applied",
            SessionEvent::BetLost { .. } => "bet_lost",
            SessionEvent::Warning { .. } => "warning",
            SessionEvent::Error { .. } => "error",
            SessionEvent::SessionEnded { .. } => "session_ended",
        }
    }
}

/// Consumer of session events. `emit` must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl EventSink for mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: SessionEvent) {
        (**self).emit(event)
    }
}

// ---------------------------------------------------------------------------
// TracingSink
// ---------------------------------------------------------------------------

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::SessionStarted {
                session_id,
                strategy,
                limits,
                start_balance,
                currency,
            } => info!(
                %session_id,
                strategy = %strategy,
                limits = %limits,
                start_balance = %start_balance,
                currency = %currency,
                "Session started"
            ),
            SessionEvent::BetPlaced { id, spec } => debug!(id, wager = %spec, "Bet placed"),
            SessionEvent::BetApplied { outcome, .. } => {
                debug!(outcome = %outcome, "Bet applied")
            }
            SessionEvent::BetLost { id, spec } => {
                warn!(id, wager = %spec, "Bet lost: no response within drain grace")
            }
            SessionEvent::Warning { message } => warn!(message = %message, "Session warning"),
            SessionEvent::Error { message } => error!(message = %message, "Session error"),
            SessionEvent::SessionEnded { reason, summary } => {
                info!(reason = %reason, summary = %summary, "Session ended")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// An event with its position in the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: SessionEvent,
}

struct LogInner {
    next_seq: u64,
    events: VecDeque<LoggedEvent>,
}

/// Bounded in-memory ring of recent events, read by the control API.
pub struct EventLog {
    capacity: usize,
    inner: RwLock<LogInner>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(LogInner {
                next_seq: 0,
                events: VecDeque::with_capacity(capacity),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The newest `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LoggedEvent> {
        let inner = self.inner.read();
        let skip = inner.events.len().saturating_sub(limit);
        inner.events.iter().skip(skip).cloned().collect()
    }

    /// Total events ever recorded, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.inner.read().next_seq
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: SessionEvent) {
        let mut inner = self.inner.write();
        if inner.events.len() == self.capacity {
            inner.events.pop_front();
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.events.push_back(LoggedEvent {
            seq,
            at: Utc::now(),
            event,
        });
    }
}

// ---------------------------------------------------------------------------
// FanoutSink
// ---------------------------------------------------------------------------

/// Forwards every event to each inner sink, in registration order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: SessionEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
