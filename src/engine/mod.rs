//! Dispatch engine: runs one strategy session against a wager service.
//!
//! A single decision task owns the session context and the strategy. A pool
//! of worker tasks performs the wager calls in parallel, and a reorder buffer
//! makes sure every outcome is applied exactly once, in submission order,
//! however the responses interleave.

mod dispatcher;
pub mod events;
pub mod sequencer;
pub mod signal;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::platforms::WagerService;
use crate::strategy::context::DEFAULT_MAX_EXTRA_ENTRIES;
use crate::strategy::{SessionContext, Strategy, StrategyParams};
use crate::types::{EngineError, SessionLimits, SessionSummary};
use dispatcher::{Dispatcher, SessionSetup};

pub use events::{EventLog, EventSink, FanoutSink, LoggedEvent, SessionEvent, TracingSink};
pub use signal::{ContextSnapshot, SessionMonitor, StopSignal};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the dispatch engine. All have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-request timeout for a wager call.
    pub request_timeout_ms: u64,
    /// How long the decision loop waits for a result before re-checking
    /// stop conditions.
    pub poll_interval_ms: u64,
    /// How long a stopping session waits for in-flight requests.
    pub drain_grace_ms: u64,
    /// Requests allowed in flight at once. Defaults to the worker count.
    pub max_in_flight: Option<usize>,
    /// Capacity of the work queue. Defaults to the worker count.
    pub queue_capacity: Option<usize>,
    /// Transient failures tolerated in a row before the session ends.
    pub max_consecutive_errors: u32,
    /// Bound on `ctx.extra` entries.
    pub max_extra_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            poll_interval_ms: 25,
            drain_grace_ms: 2_000,
            max_in_flight: None,
            queue_capacity: None,
            max_consecutive_errors: 5,
            max_extra_entries: DEFAULT_MAX_EXTRA_ENTRIES,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct DispatchEngine {
    service: Arc<dyn WagerService>,
    config: EngineConfig,
    currency: String,
    params: StrategyParams,
    sink: Arc<dyn EventSink>,
    monitor: SessionMonitor,
}

impl DispatchEngine {
    /// Engine for `service`, logging events through `tracing` and betting in
    /// `btc` until configured otherwise.
    pub fn new(service: Arc<dyn WagerService>, config: EngineConfig) -> Self {
        Self {
            service,
            config,
            currency: "btc".to_string(),
            params: StrategyParams::new(),
            sink: Arc::new(TracingSink),
            monitor: SessionMonitor::new(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into().to_lowercase();
        self
    }

    /// Parameters handed to the strategy's `init`.
    pub fn with_params(mut self, params: StrategyParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Handle for observing sessions run by this engine.
    pub fn monitor(&self) -> SessionMonitor {
        self.monitor.clone()
    }

    /// Run one session until a stop condition fires, then drain.
    ///
    /// Fails only when the session cannot start: a zero worker count, or the
    /// start balance cannot be read. Everything after that, including
    /// strategy faults, ends up in the summary's stop reason.
    pub async fn run_session(
        &self,
        strategy: Box<dyn Strategy>,
        limits: SessionLimits,
        worker_count: usize,
        stop: StopSignal,
    ) -> Result<SessionSummary, EngineError> {
        if worker_count == 0 {
            return Err(EngineError::InvalidWorkerCount);
        }

        let start_balance = self.service.balance(&self.currency, false).await?;
        info!(
            service = self.service.name(),
            currency = %self.currency,
            balance = %start_balance,
            "Fetched start balance"
        );

        let ctx = SessionContext::new(start_balance, &self.currency, limits)
            .with_max_extra_entries(self.config.max_extra_entries);

        let dispatcher = Dispatcher::new(SessionSetup {
            service: Arc::clone(&self.service),
            config: self.config.clone(),
            sink: Arc::clone(&self.sink),
            monitor: self.monitor.clone(),
            stop,
            strategy,
            ctx,
            params: self.params.clone(),
            worker_count,
        });
        Ok(dispatcher.run(worker_count).await)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
