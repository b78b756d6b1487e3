//! Cooperative stop signal and the read-only session monitor.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::dispatcher::SharedSession;
use crate::strategy::SessionContext;
use crate::types::{SessionPhase, SessionSummary};

// ---------------------------------------------------------------------------
// StopSignal
// ---------------------------------------------------------------------------

/// Shared "please stop" flag.
///
/// Clones observe the same flag. The decision loop checks it every
/// iteration; workers check it before starting a queued request.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn request_stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of this signal, so this
        // only returns once the flag is set.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// SessionMonitor
// ---------------------------------------------------------------------------

/// Point-in-time copy of the running session.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub session_id: Uuid,
    pub strategy: String,
    pub phase: SessionPhase,
    pub context: SessionContext,
}

struct MonitorInner {
    phase: watch::Sender<SessionPhase>,
    current: RwLock<Option<(Uuid, SharedSession)>>,
    last_summary: RwLock<Option<SessionSummary>>,
}

/// Read-only view of the engine's current session, for status endpoints.
#[derive(Clone)]
pub struct SessionMonitor {
    inner: Arc<MonitorInner>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(SessionPhase::Init);
        Self {
            inner: Arc::new(MonitorInner {
                phase,
                current: RwLock::new(None),
                last_summary: RwLock::new(None),
            }),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase.borrow()
    }

    /// Copy of the session context, or `None` before the first session.
    ///
    /// Briefly takes the session lock.
    pub fn snapshot(&self) -> Option<ContextSnapshot> {
        let current = self.inner.current.read();
        let (session_id, session) = current.as_ref()?;
        let state = session.lock();
        Some(ContextSnapshot {
            session_id: *session_id,
            strategy: state.strategy.meta().name.clone(),
            phase: self.phase(),
            context: state.ctx.clone(),
        })
    }

    /// Summary of the most recently finished session.
    pub fn last_summary(&self) -> Option<SessionSummary> {
        self.inner.last_summary.read().clone()
    }

    pub(crate) fn begin(&self, session_id: Uuid, session: SharedSession) {
        *self.inner.current.write() = Some((session_id, session));
        self.set_phase(SessionPhase::Init);
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.inner.phase.send_replace(phase);
    }

    pub(crate) fn finish(&self, summary: SessionSummary) {
        let reason = summary.reason;
        *self.inner.last_summary.write() = Some(summary);
        self.set_phase(SessionPhase::Terminated(reason));
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_signal_shared_between_clones() {
        let signal = StopSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_stopped());

        let waiter = tokio::spawn(async move { observer.wait().await });
        signal.request_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_stopped() {
        let signal = StopSignal::new();
        signal.request_stop();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_wait_pending_until_stop_requested() {
        use tokio_test::{assert_pending, assert_ready, task};

        let signal = StopSignal::new();
        let mut wait = task::spawn(signal.wait());
        assert_pending!(wait.poll());

        signal.request_stop();
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_monitor_starts_idle() {
        let monitor = SessionMonitor::new();
        assert_eq!(monitor.phase(), SessionPhase::Init);
        assert!(monitor.snapshot().is_none());
        assert!(monitor.last_summary().is_none());
    }
}
