//! End-to-end tests: the dispatch engine against a scripted wager service,
//! with built-in and sandboxed strategies.

mod mock_service;
mod sandbox_scripts;
mod session_scenarios;

use std::sync::Arc;

use dicebot::engine::{DispatchEngine, EngineConfig, SessionEvent};
use dicebot::platforms::WagerService;
use tokio::sync::mpsc;

/// Engine timings short enough for tests.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        request_timeout_ms: 1_000,
        poll_interval_ms: 5,
        drain_grace_ms: 500,
        ..Default::default()
    }
}

/// Engine that records every event into a channel.
pub fn recording_engine(
    service: Arc<dyn WagerService>,
    config: EngineConfig,
) -> (DispatchEngine, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DispatchEngine::new(service, config).with_sink(Arc::new(tx)), rx)
}

pub fn collect(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn placed_ids(events: &[SessionEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::BetPlaced { id, .. } => Some(*id),
            _ => None,
        })
        .collect()
}

/// Ids in the order the strategy saw them, settled or lost.
pub fn resolved_ids(events: &[SessionEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::BetApplied { id, .. } | SessionEvent::BetLost { id, .. } => Some(*id),
            _ => None,
        })
        .collect()
}
