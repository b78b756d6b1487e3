//! Control API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::engine::{ContextSnapshot, EventLog, LoggedEvent, SessionMonitor, StopSignal};
use crate::types::{SessionPhase, SessionSummary};

/// Events returned by `/api/events` when no limit is given.
const DEFAULT_EVENT_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub monitor: SessionMonitor,
    pub events: Arc<EventLog>,
    pub stop: StopSignal,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(monitor: SessionMonitor, events: Arc<EventLog>, stop: StopSignal) -> Self {
        Self {
            monitor,
            events,
            stop,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Human-readable phase, e.g. `running` or `terminated (max_bets)`.
    pub phase: String,
    pub stop_requested: bool,
    pub session: Option<ContextSnapshot>,
    pub last_summary: Option<SessionSummary>,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopResponse {
    pub stopping: bool,
    pub phase: String,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        phase: state.monitor.phase().to_string(),
        stop_requested: state.stop.is_stopped(),
        session: state.monitor.snapshot(),
        last_summary: state.monitor.last_summary(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/events?limit=n
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<LoggedEvent>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(state.events.capacity());
    Json(state.events.recent(limit))
}

/// POST /api/stop
///
/// Requests a cooperative stop. Already-terminated sessions are left alone.
pub async fn post_stop(State(state): State<AppState>) -> (StatusCode, Json<StopResponse>) {
    let phase = state.monitor.phase();
    if matches!(phase, SessionPhase::Terminated(_)) {
        return (
            StatusCode::CONFLICT,
            Json(StopResponse {
                stopping: false,
                phase: phase.to_string(),
            }),
        );
    }

    info!(phase = %phase, "Stop requested via control API");
    state.stop.request_stop();
    (
        StatusCode::ACCEPTED,
        Json(StopResponse {
            stopping: true,
            phase: phase.to_string(),
        }),
    )
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EventSink, SessionEvent};

    fn state() -> AppState {
        Arc::new(DashboardState::new(
            SessionMonitor::new(),
            Arc::new(EventLog::new(5)),
            StopSignal::new(),
        ))
    }

    #[tokio::test]
    async fn test_get_status_before_any_session() {
        let Json(resp) = get_status(State(state())).await;
        assert_eq!(resp.phase, "init");
        assert!(!resp.stop_requested);
        assert!(resp.session.is_none());
        assert!(resp.last_summary.is_none());
    }

    #[tokio::test]
    async fn test_get_events_limit_capped_by_capacity() {
        let state = state();
        for n in 0..8 {
            state.events.emit(SessionEvent::Warning {
                message: format!("w{n}"),
            });
        }
        let Json(events) = get_events(State(state.clone()), Query(EventsQuery { limit: Some(50) })).await;
        assert_eq!(events.len(), 5);
        assert_eq!(events.last().unwrap().seq, 7);

        let Json(events) = get_events(State(state), Query(EventsQuery { limit: Some(2) })).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_post_stop_sets_signal() {
        let state = state();
        let (status, Json(resp)) = post_stop(State(state.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(resp.stopping);
        assert!(state.stop.is_stopped());
    }

    #[test]
    fn test_status_response_serializes() {
        let resp = StatusResponse {
            phase: "running".into(),
            stop_requested: false,
            session: None,
            last_summary: None,
            uptime_secs: 42,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"phase\":\"running\""));
        assert!(json.contains("\"session\":null"));
    }
}
