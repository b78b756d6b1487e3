//! Session context: the state a strategy reads while deciding.
//!
//! The dispatch engine is the only writer of the core fields (balance,
//! counters, streak). Strategies may only touch the bounded `extra` map,
//! which holds scalar values keyed by name.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{BetOutcome, SessionLimits};

/// Default cap on the number of `extra` entries.
pub const DEFAULT_MAX_EXTRA_ENTRIES: usize = 128;

/// Longest text value accepted in `extra`.
pub const MAX_EXTRA_TEXT_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// Extension values
// ---------------------------------------------------------------------------

/// A scalar stored in the context's extension map (and in init params).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ExtraValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ExtraValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ExtraValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExtraValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraValue::Bool(b) => write!(f, "{b}"),
            ExtraValue::Number(n) => write!(f, "{n}"),
            ExtraValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for ExtraValue {
    fn from(v: f64) -> Self {
        ExtraValue::Number(v)
    }
}

impl From<bool> for ExtraValue {
    fn from(v: bool) -> Self {
        ExtraValue::Bool(v)
    }
}

impl From<&str> for ExtraValue {
    fn from(v: &str) -> Self {
        ExtraValue::Text(v.to_string())
    }
}

/// Why a write to the extension map was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtraError {
    #[error("extra map is full ({0} entries)")]
    Full(usize),

    #[error("extra key must be 1-64 characters of [A-Za-z0-9_]: {0:?}")]
    InvalidKey(String),

    #[error("extra text value longer than {MAX_EXTRA_TEXT_LEN} characters")]
    TextTooLong,

    #[error("extra number must be finite")]
    NotFinite,
}

// ---------------------------------------------------------------------------
// Session context
// ---------------------------------------------------------------------------

/// Mutable session state exposed to strategies.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    balance: Decimal,
    start_balance: Decimal,
    currency: String,
    bets_placed: u64,
    wins: u64,
    losses: u64,
    failed: u64,
    /// Consecutive wins (positive) or losses (negative).
    streak: i64,
    best_streak: i64,
    worst_streak: i64,
    wagered: Decimal,
    limits: SessionLimits,
    extra: BTreeMap<String, ExtraValue>,
    #[serde(skip)]
    max_extra_entries: usize,
}

impl SessionContext {
    pub fn new(start_balance: Decimal, currency: &str, limits: SessionLimits) -> Self {
        Self {
            balance: start_balance,
            start_balance,
            currency: currency.to_string(),
            bets_placed: 0,
            wins: 0,
            losses: 0,
            failed: 0,
            streak: 0,
            best_streak: 0,
            worst_streak: 0,
            wagered: Decimal::ZERO,
            limits,
            extra: BTreeMap::new(),
            max_extra_entries: DEFAULT_MAX_EXTRA_ENTRIES,
        }
    }

    /// Override the cap on `extra` entries.
    pub fn with_max_extra_entries(mut self, max: usize) -> Self {
        self.max_extra_entries = max;
        self
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn start_balance(&self) -> Decimal {
        self.start_balance
    }

    /// Running profit relative to the start balance.
    pub fn profit(&self) -> Decimal {
        self.balance - self.start_balance
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn bets_placed(&self) -> u64 {
        self.bets_placed
    }

    pub fn wins(&self) -> u64 {
        self.wins
    }

    pub fn losses(&self) -> u64 {
        self.losses
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn streak(&self) -> i64 {
        self.streak
    }

    pub fn best_streak(&self) -> i64 {
        self.best_streak
    }

    pub fn worst_streak(&self) -> i64 {
        self.worst_streak
    }

    pub fn wagered(&self) -> Decimal {
        self.wagered
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub fn extra(&self) -> &BTreeMap<String, ExtraValue> {
        &self.extra
    }

    pub fn max_extra_entries(&self) -> usize {
        self.max_extra_entries
    }

    pub fn get_extra(&self, key: &str) -> Option<&ExtraValue> {
        self.extra.get(key)
    }

    /// Numeric `extra` lookup with a fallback.
    pub fn extra_f64(&self, key: &str, default: f64) -> f64 {
        self.extra.get(key).and_then(ExtraValue::as_f64).unwrap_or(default)
    }

    /// Insert or replace an `extra` entry, enforcing the map bounds.
    pub fn set_extra(&mut self, key: &str, value: ExtraValue) -> Result<(), ExtraError> {
        let key_ok = !key.is_empty()
            && key.len() <= 64
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !key_ok {
            return Err(ExtraError::InvalidKey(key.to_string()));
        }
        match &value {
            ExtraValue::Number(n) if !n.is_finite() => return Err(ExtraError::NotFinite),
            ExtraValue::Text(s) if s.chars().count() > MAX_EXTRA_TEXT_LEN => {
                return Err(ExtraError::TextTooLong)
            }
            _ => {}
        }
        if !self.extra.contains_key(key) && self.extra.len() >= self.max_extra_entries {
            return Err(ExtraError::Full(self.max_extra_entries));
        }
        self.extra.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove_extra(&mut self, key: &str) -> Option<ExtraValue> {
        self.extra.remove(key)
    }

    /// Apply one outcome to the counters. Engine-only.
    ///
    /// Failed outcomes only bump the failure counter; the balance moves by
    /// the settled profit so it always reflects id order.
    pub(crate) fn record_outcome(&mut self, outcome: &BetOutcome, amount: Decimal) {
        if !outcome.ok {
            self.failed += 1;
            return;
        }
        self.bets_placed += 1;
        self.wagered += amount;
        self.balance += outcome.profit;
        if outcome.won {
            self.wins += 1;
            self.streak = if self.streak > 0 { self.streak + 1 } else { 1 };
        } else {
            self.losses += 1;
            self.streak = if self.streak < 0 { self.streak - 1 } else { -1 };
        }
        self.best_streak = self.best_streak.max(self.streak);
        self.worst_streak = self.worst_streak.min(self.streak);
    }

    /// Balance as a float, for script exposure and logging.
    pub fn balance_f64(&self) -> f64 {
        self.balance.to_f64().unwrap_or(0.0)
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "balance={} {} | profit={} | bets={} (W{}/L{}) | streak={}",
            self.balance,
            self.currency,
            self.profit(),
            self.bets_placed,
            self.wins,
            self.losses,
            self.streak,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TransportError, TransportErrorKind, WagerResult};
    use rust_decimal_macros::dec;

    fn ctx() -> SessionContext {
        SessionContext::new(dec!(100), "btc", SessionLimits::default())
    }

    fn settled(id: u64, won: bool, profit: Decimal) -> BetOutcome {
        BetOutcome::settled(
            id,
            WagerResult {
                won,
                profit,
                balance_after: Decimal::ZERO,
                roll: 50.0,
                multiplier: 1.98,
            },
        )
    }

    #[test]
    fn test_new_context() {
        let c = ctx();
        assert_eq!(c.balance(), dec!(100));
        assert_eq!(c.profit(), Decimal::ZERO);
        assert_eq!(c.currency(), "btc");
        assert_eq!(c.streak(), 0);
    }

    #[test]
    fn test_record_win_and_loss_streaks() {
        let mut c = ctx();
        c.record_outcome(&settled(0, true, dec!(0.98)), dec!(1));
        c.record_outcome(&settled(1, true, dec!(0.98)), dec!(1));
        assert_eq!(c.streak(), 2);
        c.record_outcome(&settled(2, false, dec!(-1)), dec!(1));
        assert_eq!(c.streak(), -1);
        c.record_outcome(&settled(3, false, dec!(-1)), dec!(1));
        assert_eq!(c.streak(), -2);

        assert_eq!(c.bets_placed(), 4);
        assert_eq!(c.wins(), 2);
        assert_eq!(c.losses(), 2);
        assert_eq!(c.best_streak(), 2);
        assert_eq!(c.worst_streak(), -2);
        assert_eq!(c.wagered(), dec!(4));
        assert_eq!(c.balance(), dec!(99.96));
        assert_eq!(c.profit(), dec!(-0.04));
    }

    #[test]
    fn test_failed_outcome_only_counts_failure() {
        let mut c = ctx();
        let err = TransportError::new(TransportErrorKind::Network, "reset");
        c.record_outcome(&BetOutcome::failed(0, &err), dec!(1));
        assert_eq!(c.failed(), 1);
        assert_eq!(c.bets_placed(), 0);
        assert_eq!(c.balance(), dec!(100));
        assert_eq!(c.wagered(), Decimal::ZERO);
    }

    #[test]
    fn test_extra_roundtrip() {
        let mut c = ctx();
        c.set_extra("base", ExtraValue::Number(0.5)).unwrap();
        c.set_extra("mode", "safe".into()).unwrap();
        assert_eq!(c.extra_f64("base", 0.0), 0.5);
        assert_eq!(c.extra_f64("missing", 7.0), 7.0);
        assert_eq!(c.get_extra("mode").and_then(ExtraValue::as_str), Some("safe"));
        assert!(c.remove_extra("mode").is_some());
        assert!(c.get_extra("mode").is_none());
    }

    #[test]
    fn test_extra_bounds() {
        let mut c = ctx().with_max_extra_entries(2);
        c.set_extra("a", 1.0.into()).unwrap();
        c.set_extra("b", 2.0.into()).unwrap();
        // Overwriting an existing key is fine even when full.
        c.set_extra("a", 3.0.into()).unwrap();
        assert_eq!(c.set_extra("c", 4.0.into()), Err(ExtraError::Full(2)));
    }

    #[test]
    fn test_extra_rejects_bad_values() {
        let mut c = ctx();
        assert!(matches!(c.set_extra("", 1.0.into()), Err(ExtraError::InvalidKey(_))));
        assert!(matches!(c.set_extra("a b", 1.0.into()), Err(ExtraError::InvalidKey(_))));
        assert_eq!(c.set_extra("n", f64::NAN.into()), Err(ExtraError::NotFinite));
        let long = "x".repeat(MAX_EXTRA_TEXT_LEN + 1);
        assert_eq!(
            c.set_extra("t", ExtraValue::Text(long)),
            Err(ExtraError::TextTooLong)
        );
    }

    #[test]
    fn test_extra_value_untagged_serde() {
        let v: ExtraValue = serde_json::from_str("1.5").unwrap();
        assert_eq!(v, ExtraValue::Number(1.5));
        let v: ExtraValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, ExtraValue::Bool(true));
        let v: ExtraValue = serde_json::from_str("\"hi\"").unwrap();
        assert_eq!(v, ExtraValue::Text("hi".into()));
    }
}
