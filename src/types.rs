//! Shared types for the DICEBOT engine.
//!
//! These types form the data model used across all modules.
//! They are deliberately free of engine internals so that platform,
//! strategy, sandbox and engine modules can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Wager
// ---------------------------------------------------------------------------

/// Which side of the roll a wager is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Win when the roll lands above `100 - chance`.
    #[default]
    Over,
    /// Win when the roll lands below `chance`.
    Under,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Over => write!(f, "over"),
            Direction::Under => write!(f, "under"),
        }
    }
}

/// Parse a direction (case-insensitive, accepts `high`/`low` aliases).
impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "over" | "high" | "hi" => Ok(Direction::Over),
            "under" | "low" | "lo" => Ok(Direction::Under),
            _ => Err(anyhow::anyhow!("Unknown direction: {s}")),
        }
    }
}

/// Reasons a wager proposal can be rejected at construction time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WagerSpecError {
    #[error("amount must be greater than zero (got {0})")]
    NonPositiveAmount(Decimal),

    #[error("win chance must be within (0, 100) (got {0})")]
    ChanceOutOfRange(f64),
}

/// A single stake/probability proposal produced by a strategy.
///
/// Immutable once created; the constructor enforces `amount > 0` and
/// `0 < win_chance < 100`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerSpec {
    amount: Decimal,
    win_chance: f64,
    direction: Direction,
    use_secondary_pool: bool,
}

impl WagerSpec {
    pub fn new(
        amount: Decimal,
        win_chance: f64,
        direction: Direction,
        use_secondary_pool: bool,
    ) -> Result<Self, WagerSpecError> {
        if amount <= Decimal::ZERO {
            return Err(WagerSpecError::NonPositiveAmount(amount));
        }
        if !win_chance.is_finite() || win_chance <= 0.0 || win_chance >= 100.0 {
            return Err(WagerSpecError::ChanceOutOfRange(win_chance));
        }
        Ok(Self {
            amount,
            win_chance,
            direction,
            use_secondary_pool,
        })
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn win_chance(&self) -> f64 {
        self.win_chance
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn use_secondary_pool(&self) -> bool {
        self.use_secondary_pool
    }
}

impl fmt::Display for WagerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {:.2}% {}{}",
            self.amount,
            self.win_chance,
            self.direction,
            if self.use_secondary_pool { " (secondary)" } else { "" },
        )
    }
}

/// A wager as submitted by the dispatch engine.
///
/// `id` is the ordering key for the whole system: it is assigned in strictly
/// increasing order at submission time, starting at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRequest {
    pub id: u64,
    pub spec: WagerSpec,
    pub submitted_at: DateTime<Utc>,
}

impl BetRequest {
    pub fn new(id: u64, spec: WagerSpec) -> Self {
        Self {
            id,
            spec,
            submitted_at: Utc::now(),
        }
    }
}

/// What a wager service reports for one successful wager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerResult {
    pub won: bool,
    /// Net profit of the wager (negative on a loss).
    pub profit: Decimal,
    /// Balance as reported by the service after settling this wager.
    pub balance_after: Decimal,
    pub roll: f64,
    pub multiplier: f64,
}

/// The answer to one `BetRequest`, produced by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetOutcome {
    pub request_id: u64,
    pub ok: bool,
    pub won: bool,
    pub profit: Decimal,
    pub balance_after: Decimal,
    pub roll: f64,
    pub multiplier: f64,
    pub error: Option<String>,
    /// Structured category of `error`, when the wager failed.
    pub error_kind: Option<TransportErrorKind>,
    pub received_at: DateTime<Utc>,
}

impl BetOutcome {
    /// Outcome of a wager the service settled.
    pub fn settled(request_id: u64, result: WagerResult) -> Self {
        Self {
            request_id,
            ok: true,
            won: result.won,
            profit: result.profit,
            balance_after: result.balance_after,
            roll: result.roll,
            multiplier: result.multiplier,
            error: None,
            error_kind: None,
            received_at: Utc::now(),
        }
    }

    /// Outcome of a wager that failed in transport.
    pub fn failed(request_id: u64, err: &TransportError) -> Self {
        Self {
            request_id,
            ok: false,
            won: false,
            profit: Decimal::ZERO,
            balance_after: Decimal::ZERO,
            roll: 0.0,
            multiplier: 0.0,
            error: Some(err.message.clone()),
            error_kind: Some(err.kind),
            received_at: Utc::now(),
        }
    }
}

impl fmt::Display for BetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.ok {
            return write!(
                f,
                "#{} FAILED: {}",
                self.request_id,
                self.error.as_deref().unwrap_or("unknown error")
            );
        }
        write!(
            f,
            "#{} {} roll={:.2} x{:.4} profit={} balance={}",
            self.request_id,
            if self.won { "WIN" } else { "LOSS" },
            self.roll,
            self.multiplier,
            self.profit,
            self.balance_after,
        )
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Structured category of a failed wager call.
///
/// Fatal conditions (such as insufficient funds) are recognised by kind,
/// never by inspecting the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    InsufficientFunds,
    RateLimited,
    Network,
    Timeout,
    /// The service refused the wager (bad amount, chance out of range, ...).
    Rejected,
    /// The service no longer accepts wagers for this session.
    Closed,
    /// The worker observed the stop signal before calling the service.
    Cancelled,
    Other,
}

impl TransportErrorKind {
    /// Whether this error must end the session immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportErrorKind::InsufficientFunds)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::InsufficientFunds => "insufficient_funds",
            TransportErrorKind::RateLimited => "rate_limited",
            TransportErrorKind::Network => "network",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Rejected => "rejected",
            TransportErrorKind::Closed => "closed",
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// A failed call to a wager service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn insufficient_funds(needed: Decimal, available: Decimal) -> Self {
        Self::new(
            TransportErrorKind::InsufficientFunds,
            format!("insufficient balance: need {needed}, have {available}"),
        )
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Limits that end a session. All optional; read-only once the session starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLimits {
    #[serde(default)]
    pub max_bets: Option<u64>,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    /// Loss (as a positive amount) at which the session stops.
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Profit at which the session stops.
    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

impl fmt::Display for SessionLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map_or_else(|| "-".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "max_bets={} max_duration={}s stop_loss={} take_profit={}",
            opt(&self.max_bets),
            opt(&self.max_duration_secs),
            opt(&self.stop_loss),
            opt(&self.take_profit),
        )
    }
}

/// Why a session terminated. Every terminated session carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    StrategyComplete,
    UserStop,
    MaxBets,
    MaxDuration,
    StopLoss,
    TakeProfit,
    InsufficientBalance,
    Error,
}

impl StopReason {
    /// Every stop reason (useful for iteration).
    pub const ALL: &'static [StopReason] = &[
        StopReason::Completed,
        StopReason::StrategyComplete,
        StopReason::UserStop,
        StopReason::MaxBets,
        StopReason::MaxDuration,
        StopReason::StopLoss,
        StopReason::TakeProfit,
        StopReason::InsufficientBalance,
        StopReason::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::StrategyComplete => "strategy_complete",
            StopReason::UserStop => "user_stop",
            StopReason::MaxBets => "max_bets",
            StopReason::MaxDuration => "max_duration",
            StopReason::StopLoss => "stop_loss",
            StopReason::TakeProfit => "take_profit",
            StopReason::InsufficientBalance => "insufficient_balance",
            StopReason::Error => "error",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Init,
    Running,
    Draining,
    Terminated(StopReason),
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Init => write!(f, "init"),
            SessionPhase::Running => write!(f, "running"),
            SessionPhase::Draining => write!(f, "draining"),
            SessionPhase::Terminated(reason) => write!(f, "terminated ({reason})"),
        }
    }
}

/// Final report of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub strategy: String,
    pub reason: StopReason,
    /// Human-readable detail for fatal stop reasons.
    pub message: Option<String>,
    pub currency: String,
    pub start_balance: Decimal,
    pub end_balance: Decimal,
    pub profit: Decimal,
    /// Requests handed to the worker pool.
    pub bets_submitted: u64,
    /// Wagers the service settled.
    pub bets_placed: u64,
    pub wins: u64,
    pub losses: u64,
    /// Requests answered with a transport error.
    pub failed: u64,
    /// Requests that never returned within the drain grace window.
    pub lost: u64,
    pub wagered: Decimal,
    pub best_streak: i64,
    pub worst_streak: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ended ({}) | bets={} (W{}/L{}) failed={} lost={} | wagered={} | profit={} | balance={} {}",
            self.strategy,
            self.reason,
            self.bets_placed,
            self.wins,
            self.losses,
            self.failed,
            self.lost,
            self.wagered,
            self.profit,
            self.end_balance,
            self.currency,
        )
    }
}

impl SessionSummary {
    /// Win rate as a percentage. Returns 0.0 if no bets were settled.
    pub fn win_rate(&self) -> f64 {
        if self.bets_placed == 0 {
            0.0
        } else {
            (self.wins as f64 / self.bets_placed as f64) * 100.0
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Faults raised while calling into a strategy.
///
/// The dispatch engine treats all three identically: fatal to the session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrategyError {
    #[error("{entry} exceeded its {limit_ms}ms time budget")]
    ExecutionTimeout { entry: String, limit_ms: u64 },

    #[error("{entry} raised an error{}: {message}", .line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    ExecutionError {
        entry: String,
        message: String,
        line: Option<usize>,
    },

    #[error("{entry} violated the strategy contract: {message}")]
    ContractViolation { entry: String, message: String },
}

impl StrategyError {
    pub fn contract(entry: &str, message: impl Into<String>) -> Self {
        StrategyError::ContractViolation {
            entry: entry.to_string(),
            message: message.into(),
        }
    }

    pub fn execution(entry: &str, message: impl Into<String>) -> Self {
        StrategyError::ExecutionError {
            entry: entry.to_string(),
            message: message.into(),
            line: None,
        }
    }
}

/// Errors that prevent a session from running at all.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("could not read start balance: {0}")]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // -- Direction tests --

    #[test]
    fn test_direction_display() {
        assert_eq!(format!("{}", Direction::Over), "over");
        assert_eq!(format!("{}", Direction::Under), "under");
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!("OVER".parse::<Direction>().unwrap(), Direction::Over);
        assert_eq!("low".parse::<Direction>().unwrap(), Direction::Under);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Under).unwrap(), "\"under\"");
    }

    // -- WagerSpec tests --

    #[test]
    fn test_wager_spec_valid() {
        let spec = WagerSpec::new(dec!(0.5), 49.5, Direction::Under, false).unwrap();
        assert_eq!(spec.amount(), dec!(0.5));
        assert_eq!(spec.win_chance(), 49.5);
        assert_eq!(spec.direction(), Direction::Under);
        assert!(!spec.use_secondary_pool());
    }

    #[test]
    fn test_wager_spec_rejects_zero_amount() {
        let err = WagerSpec::new(Decimal::ZERO, 50.0, Direction::Over, false).unwrap_err();
        assert_eq!(err, WagerSpecError::NonPositiveAmount(Decimal::ZERO));
    }

    #[test]
    fn test_wager_spec_rejects_chance_bounds() {
        assert!(WagerSpec::new(dec!(1), 0.0, Direction::Over, false).is_err());
        assert!(WagerSpec::new(dec!(1), 100.0, Direction::Over, false).is_err());
        assert!(WagerSpec::new(dec!(1), f64::NAN, Direction::Over, false).is_err());
        assert!(WagerSpec::new(dec!(1), 99.99, Direction::Over, false).is_ok());
    }

    // -- BetOutcome tests --

    #[test]
    fn test_failed_outcome_carries_kind() {
        let err = TransportError::new(TransportErrorKind::RateLimited, "slow down");
        let outcome = BetOutcome::failed(7, &err);
        assert_eq!(outcome.request_id, 7);
        assert!(!outcome.ok);
        assert_eq!(outcome.error_kind, Some(TransportErrorKind::RateLimited));
        assert_eq!(outcome.profit, Decimal::ZERO);
        assert!(format!("{outcome}").contains("FAILED"));
    }

    #[test]
    fn test_settled_outcome() {
        let outcome = BetOutcome::settled(
            3,
            WagerResult {
                won: true,
                profit: dec!(0.98),
                balance_after: dec!(100.98),
                roll: 12.34,
                multiplier: 1.98,
            },
        );
        assert!(outcome.ok);
        assert!(outcome.won);
        assert!(outcome.error.is_none());
    }

    // -- Transport error tests --

    #[test]
    fn test_only_insufficient_funds_is_fatal() {
        assert!(TransportErrorKind::InsufficientFunds.is_fatal());
        assert!(!TransportErrorKind::RateLimited.is_fatal());
        assert!(!TransportErrorKind::Network.is_fatal());
        assert!(!TransportErrorKind::Closed.is_fatal());
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = TransportError::insufficient_funds(dec!(5), dec!(2));
        assert_eq!(err.kind, TransportErrorKind::InsufficientFunds);
        assert!(err.to_string().contains("need 5"));
    }

    // -- StopReason tests --

    #[test]
    fn test_stop_reason_strings_match_serde() {
        for reason in StopReason::ALL {
            let json = serde_json::to_string(reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::Running.to_string(), "running");
        assert_eq!(
            SessionPhase::Terminated(StopReason::StopLoss).to_string(),
            "terminated (stop_loss)"
        );
    }

    // -- StrategyError tests --

    #[test]
    fn test_strategy_error_messages() {
        let timeout = StrategyError::ExecutionTimeout {
            entry: "next_bet".into(),
            limit_ms: 250,
        };
        assert_eq!(timeout.to_string(), "next_bet exceeded its 250ms time budget");

        let raised = StrategyError::ExecutionError {
            entry: "next_bet".into(),
            message: "boom".into(),
            line: Some(4),
        };
        assert_eq!(raised.to_string(), "next_bet raised an error at line 4: boom");

        let violation = StrategyError::contract("next_bet", "missing amount");
        assert!(violation.to_string().contains("violated the strategy contract"));
    }

    #[test]
    fn test_limits_display() {
        let limits = SessionLimits {
            max_bets: Some(5),
            stop_loss: Some(dec!(10)),
            ..Default::default()
        };
        assert_eq!(
            limits.to_string(),
            "max_bets=5 max_duration=-s stop_loss=10 take_profit=-"
        );
    }

    // -- SessionSummary tests --

    fn summary(wins: u64, losses: u64) -> SessionSummary {
        let started_at = Utc::now();
        SessionSummary {
            session_id: Uuid::new_v4(),
            strategy: "fixed".into(),
            reason: StopReason::MaxBets,
            message: None,
            currency: "btc".into(),
            start_balance: dec!(100),
            end_balance: dec!(100),
            profit: Decimal::ZERO,
            bets_submitted: wins + losses,
            bets_placed: wins + losses,
            wins,
            losses,
            failed: 0,
            lost: 0,
            wagered: Decimal::from(wins + losses),
            best_streak: 0,
            worst_streak: 0,
            started_at,
            ended_at: started_at + chrono::Duration::milliseconds(1_500),
        }
    }

    #[test]
    fn test_summary_win_rate() {
        assert_eq!(summary(3, 1).win_rate(), 75.0);
        assert_eq!(summary(0, 0).win_rate(), 0.0);
    }

    #[test]
    fn test_summary_duration() {
        assert_eq!(summary(1, 1).duration().num_milliseconds(), 1_500);
    }
}
