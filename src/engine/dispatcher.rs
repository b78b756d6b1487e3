//! The decision loop of one session.
//!
//! One task owns the session: it asks the strategy for wagers, hands them to
//! the worker pool and applies outcomes strictly in id order. Strategy calls
//! run on the blocking pool with the session lock held; the lock is never
//! held across an `.await`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::events::{EventSink, SessionEvent};
use super::sequencer::{Next, Sequencer};
use super::signal::{SessionMonitor, StopSignal};
use super::worker::{spawn_pool, WorkerContext};
use super::EngineConfig;
use crate::platforms::WagerService;
use crate::strategy::{SessionContext, Strategy, StrategyParams};
use crate::types::{
    BetOutcome, BetRequest, SessionLimits, SessionPhase, SessionSummary, StopReason,
    StrategyError, TransportErrorKind, WagerSpec,
};

/// Context and strategy of a running session, guarded together.
pub(crate) struct SessionState {
    pub ctx: SessionContext,
    pub strategy: Box<dyn Strategy>,
}

pub(crate) type SharedSession = Arc<Mutex<SessionState>>;

/// What woke the loop while it waited for a submission slot.
enum Wake<'w> {
    Slot(Result<mpsc::Permit<'w, BetRequest>, mpsc::error::SendError<()>>),
    Outcome(Option<BetOutcome>),
    Idle,
}

pub(crate) struct Dispatcher {
    service: Arc<dyn WagerService>,
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
    monitor: SessionMonitor,
    stop: StopSignal,
    session: SharedSession,
    session_id: Uuid,
    strategy_name: String,
    currency: String,
    limits: SessionLimits,
    params: StrategyParams,
    sequencer: Sequencer,
    max_in_flight: usize,
    stop_reason: Option<(StopReason, Option<String>)>,
    consecutive_errors: u32,
    lost: u64,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Everything a dispatcher is built from.
pub(crate) struct SessionSetup {
    pub service: Arc<dyn WagerService>,
    pub config: EngineConfig,
    pub sink: Arc<dyn EventSink>,
    pub monitor: SessionMonitor,
    pub stop: StopSignal,
    pub strategy: Box<dyn Strategy>,
    pub ctx: SessionContext,
    pub params: StrategyParams,
    pub worker_count: usize,
}

impl Dispatcher {
    pub(crate) fn new(setup: SessionSetup) -> Self {
        let strategy_name = setup.strategy.meta().name.clone();
        let currency = setup.ctx.currency().to_string();
        let limits = setup.ctx.limits().clone();
        let max_in_flight = setup
            .config
            .max_in_flight
            .unwrap_or(setup.worker_count)
            .max(1);
        Self {
            service: setup.service,
            config: setup.config,
            sink: setup.sink,
            monitor: setup.monitor,
            stop: setup.stop,
            session: Arc::new(Mutex::new(SessionState {
                ctx: setup.ctx,
                strategy: setup.strategy,
            })),
            session_id: Uuid::new_v4(),
            strategy_name,
            currency,
            limits,
            params: setup.params,
            sequencer: Sequencer::new(),
            max_in_flight,
            stop_reason: None,
            consecutive_errors: 0,
            lost: 0,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Run the session to completion.
    pub(crate) async fn run(mut self, worker_count: usize) -> SessionSummary {
        self.monitor.begin(self.session_id, Arc::clone(&self.session));
        info!(
            session_id = %self.session_id,
            strategy = %self.strategy_name,
            service = self.service.name(),
            workers = worker_count,
            max_in_flight = self.max_in_flight,
            "Starting session"
        );

        let params = self.params.clone();
        let started = self
            .call_strategy(move |s| {
                s.strategy.init(&mut s.ctx, &params)?;
                s.strategy.on_session_start(&mut s.ctx)
            })
            .await;

        match started {
            Ok(()) => {
                let start_balance = self.session.lock().ctx.start_balance();
                self.emit(SessionEvent::SessionStarted {
                    session_id: self.session_id,
                    strategy: self.strategy_name.clone(),
                    limits: self.limits.clone(),
                    start_balance,
                    currency: self.currency.clone(),
                });
                self.monitor.set_phase(SessionPhase::Running);
                self.drive(worker_count).await;
            }
            Err(e) => self.fatal(StopReason::Error, format!("strategy failed to start: {e}")),
        }

        let reason = self
            .stop_reason
            .as_ref()
            .map(|(reason, _)| *reason)
            .unwrap_or(StopReason::Error);

        let ended = self
            .call_strategy(move |s| s.strategy.on_session_end(&mut s.ctx, reason))
            .await;
        if let Err(e) = ended {
            self.report_error(format!("on_session_end failed: {e}"));
        }

        let summary = self.summary(reason);
        self.emit(SessionEvent::SessionEnded {
            reason,
            summary: summary.clone(),
        });
        self.monitor.finish(summary.clone());
        summary
    }

    async fn drive(&mut self, worker_count: usize) {
        let queue = self.config.queue_capacity.unwrap_or(worker_count).max(1);
        let (work_tx, work_rx) = mpsc::channel(queue);
        let (results_tx, mut results_rx) = mpsc::channel(self.max_in_flight + worker_count);

        let workers = spawn_pool(
            worker_count,
            WorkerContext {
                service: Arc::clone(&self.service),
                currency: Arc::from(self.currency.as_str()),
                work: Arc::new(tokio::sync::Mutex::new(work_rx)),
                results: results_tx,
                stop: self.stop.clone(),
                request_timeout: self.config.request_timeout(),
            },
        );

        self.decide(&work_tx, &mut results_rx).await;
        self.drain(work_tx, &mut results_rx, workers).await;
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    async fn decide(
        &mut self,
        work: &mpsc::Sender<BetRequest>,
        results: &mut mpsc::Receiver<BetOutcome>,
    ) {
        loop {
            while let Ok(outcome) = results.try_recv() {
                self.accept(outcome).await;
            }
            if self.check_stop() {
                return;
            }
            if self.window_full() {
                self.wait_for_result(results).await;
                continue;
            }

            let Some(permit) = self.reserve(work, results).await else {
                continue;
            };

            let decision = self.call_strategy(|s| s.strategy.next_bet(&mut s.ctx)).await;
            match decision {
                Ok(Some(spec)) => {
                    let request = self.sequencer.submit(spec.clone());
                    self.emit(SessionEvent::BetPlaced {
                        id: request.id,
                        spec,
                    });
                    permit.send(request);
                }
                Ok(None) => self.record_stop(StopReason::StrategyComplete, None),
                Err(e) => self.fatal(StopReason::Error, format!("next_bet failed: {e}")),
            }
        }
    }

    /// Evaluate stop conditions. The first reason recorded wins.
    fn check_stop(&mut self) -> bool {
        if self.stop.is_stopped() {
            self.record_stop(StopReason::UserStop, None);
        }
        if self.stop_reason.is_some() {
            return true;
        }

        let (profit, bets_placed) = {
            let state = self.session.lock();
            (state.ctx.profit(), state.ctx.bets_placed())
        };
        let limits = &self.limits;
        let reason = if limits.stop_loss.is_some_and(|loss| profit <= -loss) {
            Some(StopReason::StopLoss)
        } else if limits.take_profit.is_some_and(|target| profit >= target) {
            Some(StopReason::TakeProfit)
        } else if limits.max_bets.is_some_and(|max| bets_placed >= max) {
            Some(StopReason::MaxBets)
        } else if limits
            .max_duration_secs
            .is_some_and(|secs| self.started.elapsed() >= Duration::from_secs(secs))
        {
            Some(StopReason::MaxDuration)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.record_stop(reason, None);
        }
        self.stop_reason.is_some()
    }

    /// No room to submit: the in-flight window is full, or every remaining
    /// bet allowed by `max_bets` is already in flight.
    fn window_full(&self) -> bool {
        let in_flight = self.sequencer.in_flight();
        if in_flight >= self.max_in_flight {
            return true;
        }
        match self.limits.max_bets {
            Some(max) => self.session.lock().ctx.bets_placed() + in_flight as u64 >= max,
            None => false,
        }
    }

    async fn wait_for_result(&mut self, results: &mut mpsc::Receiver<BetOutcome>) {
        let received = tokio::select! {
            biased;
            _ = self.stop.wait() => None,
            outcome = results.recv() => Some(outcome),
            _ = tokio::time::sleep(self.config.poll_interval()) => None,
        };
        match received {
            Some(Some(outcome)) => self.accept(outcome).await,
            Some(None) => self.invariant_violation("worker pool exited with requests in flight"),
            None => {}
        }
    }

    /// Wait for room on the work channel, accepting results meanwhile.
    ///
    /// Returns `None` when anything else happened first, so the caller
    /// re-evaluates stop conditions before asking the strategy again.
    async fn reserve<'w>(
        &mut self,
        work: &'w mpsc::Sender<BetRequest>,
        results: &mut mpsc::Receiver<BetOutcome>,
    ) -> Option<mpsc::Permit<'w, BetRequest>> {
        if let Ok(permit) = work.try_reserve() {
            return Some(permit);
        }

        let wake = tokio::select! {
            biased;
            _ = self.stop.wait() => Wake::Idle,
            outcome = results.recv() => Wake::Outcome(outcome),
            slot = work.reserve() => Wake::Slot(slot),
            _ = tokio::time::sleep(self.config.poll_interval()) => Wake::Idle,
        };
        match wake {
            Wake::Slot(Ok(permit)) => Some(permit),
            Wake::Slot(Err(_)) => {
                self.invariant_violation("work channel closed while running");
                None
            }
            Wake::Outcome(Some(outcome)) => {
                self.accept(outcome).await;
                None
            }
            Wake::Outcome(None) => {
                self.invariant_violation("worker pool exited with requests in flight");
                None
            }
            Wake::Idle => None,
        }
    }

    // -----------------------------------------------------------------------
    // Applying outcomes
    // -----------------------------------------------------------------------

    /// Buffer one outcome and apply everything now in sequence.
    async fn accept(&mut self, outcome: BetOutcome) {
        let id = outcome.request_id;
        if let Err(e) = self.sequencer.accept(outcome) {
            error!(
                session_id = %self.session_id,
                id,
                next_expected = self.sequencer.next_expected(),
                submitted = self.sequencer.submitted(),
                buffered = self.sequencer.buffered(),
                error = %e,
                "Reorder buffer rejected an outcome"
            );
            self.invariant_violation(&e.to_string());
            return;
        }
        while let Some((outcome, spec)) = self.sequencer.pop_ready() {
            self.apply(outcome, spec).await;
        }
    }

    async fn apply(&mut self, outcome: BetOutcome, spec: WagerSpec) {
        let id = outcome.request_id;
        let applied = outcome.clone();
        let result = self
            .call_strategy(move |s| {
                s.ctx.record_outcome(&applied, spec.amount());
                s.strategy.on_bet_result(&mut s.ctx, &applied)
            })
            .await;

        self.emit(SessionEvent::BetApplied {
            id,
            outcome: outcome.clone(),
        });
        self.classify(&outcome);

        if let Err(e) = result {
            self.fatal(StopReason::Error, format!("on_bet_result failed: {e}"));
        }
    }

    /// React to a transport failure.
    fn classify(&mut self, outcome: &BetOutcome) {
        if outcome.ok {
            self.consecutive_errors = 0;
            return;
        }
        let kind = outcome.error_kind.unwrap_or(TransportErrorKind::Other);
        let message = format!(
            "request #{} failed ({kind}): {}",
            outcome.request_id,
            outcome.error.as_deref().unwrap_or("no detail")
        );

        if kind.is_fatal() {
            self.fatal(StopReason::InsufficientBalance, message);
            return;
        }
        match kind {
            TransportErrorKind::Closed => {
                self.warn(message.clone());
                self.record_stop(StopReason::Completed, Some(message));
            }
            TransportErrorKind::Cancelled => {}
            _ => {
                self.consecutive_errors += 1;
                self.warn(message.clone());
                if self.consecutive_errors > self.config.max_consecutive_errors {
                    self.fatal(
                        StopReason::Error,
                        format!(
                            "{} consecutive wager failures, last: {message}",
                            self.consecutive_errors
                        ),
                    );
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Draining
    // -----------------------------------------------------------------------

    async fn drain(
        &mut self,
        work: mpsc::Sender<BetRequest>,
        results: &mut mpsc::Receiver<BetOutcome>,
        workers: Vec<JoinHandle<()>>,
    ) {
        self.monitor.set_phase(SessionPhase::Draining);
        drop(work);
        debug!(
            in_flight = self.sequencer.in_flight(),
            grace_ms = self.config.drain_grace_ms,
            "Draining in-flight requests"
        );

        let deadline = Instant::now() + self.config.drain_grace();
        while !self.sequencer.is_settled() {
            match tokio::time::timeout_at(deadline, results.recv()).await {
                Ok(Some(outcome)) => self.accept(outcome).await,
                Ok(None) | Err(_) => break,
            }
        }

        while let Some(next) = self.sequencer.force_next() {
            match next {
                Next::Apply(outcome, spec) => self.apply(outcome, spec).await,
                Next::Lost(id, spec) => {
                    self.lost += 1;
                    self.emit(SessionEvent::BetLost { id, spec });
                }
            }
        }

        for worker in &workers {
            worker.abort();
        }
        futures::future::join_all(workers).await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Run `f` against the session on the blocking pool.
    ///
    /// Strategy code may legitimately block until its own time budget runs
    /// out, so it never runs on the async workers.
    async fn call_strategy<T, F>(&self, f: F) -> Result<T, StrategyError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SessionState) -> Result<T, StrategyError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut state = session.lock();
            f(&mut *state)
        })
        .await
        .unwrap_or_else(|e| Err(StrategyError::execution("strategy", format!("panicked: {e}"))))
    }

    fn emit(&self, event: SessionEvent) {
        self.sink.emit(event);
    }

    fn warn(&self, message: String) {
        self.emit(SessionEvent::Warning { message });
    }

    fn report_error(&self, message: String) {
        debug!(session_id = %self.session_id, message = %message, "Session error");
        self.emit(SessionEvent::Error { message });
    }

    fn record_stop(&mut self, reason: StopReason, message: Option<String>) {
        if self.stop_reason.is_none() {
            debug!(session_id = %self.session_id, reason = %reason, "Stop condition reached");
            self.stop_reason = Some((reason, message));
        }
    }

    /// Report an error and end the session with `reason`.
    fn fatal(&mut self, reason: StopReason, message: String) {
        self.report_error(message.clone());
        self.record_stop(reason, Some(message));
    }

    fn invariant_violation(&mut self, detail: &str) {
        error!(
            session_id = %self.session_id,
            detail,
            in_flight = self.sequencer.in_flight(),
            "Engine invariant violated, aborting session"
        );
        self.fatal(StopReason::Error, format!("engine invariant violated: {detail}"));
    }

    fn summary(&self, reason: StopReason) -> SessionSummary {
        let state = self.session.lock();
        let ctx = &state.ctx;
        SessionSummary {
            session_id: self.session_id,
            strategy: self.strategy_name.clone(),
            reason,
            message: self.stop_reason.as_ref().and_then(|(_, m)| m.clone()),
            currency: self.currency.clone(),
            start_balance: ctx.start_balance(),
            end_balance: ctx.balance(),
            profit: ctx.profit(),
            bets_submitted: self.sequencer.submitted(),
            bets_placed: ctx.bets_placed(),
            wins: ctx.wins(),
            losses: ctx.losses(),
            failed: ctx.failed(),
            lost: self.lost,
            wagered: ctx.wagered(),
            best_streak: ctx.best_streak(),
            worst_streak: ctx.worst_streak(),
            started_at: self.started_at,
            ended_at: Utc::now(),
        }
    }
}
