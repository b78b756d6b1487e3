//! Adapter from a sandboxed [`StrategyUnit`] to the [`Strategy`] contract.

use std::time::Duration;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::debug;

use super::{SessionContext, Strategy, StrategyMeta, StrategyParams};
use crate::sandbox::{EntryPoint, LoadError, Sandbox, StrategyUnit, Value};
use crate::types::{BetOutcome, Direction, StopReason, StrategyError, WagerSpec};

/// Wager amounts are rounded to this many decimal places.
const AMOUNT_DP: u32 = 8;

const WAGER_KEYS: [&str; 4] = ["amount", "chance", "direction", "secondary"];

/// A script strategy running inside the sandbox.
#[derive(Debug)]
pub struct SandboxedStrategy {
    unit: StrategyUnit,
    timeout: Duration,
}

impl SandboxedStrategy {
    pub fn new(unit: StrategyUnit, timeout: Duration) -> Self {
        Self { unit, timeout }
    }

    /// Validate and load `source`, using the sandbox's call timeout.
    pub fn load(sandbox: &Sandbox, meta: StrategyMeta, source: &str) -> Result<Self, LoadError> {
        let unit = sandbox.load(meta, source)?;
        Ok(Self::new(unit, sandbox.config().call_timeout()))
    }

    pub fn unit(&self) -> &StrategyUnit {
        &self.unit
    }

    fn call(
        &mut self,
        entry: EntryPoint,
        ctx: &mut SessionContext,
        args: Vec<Value>,
    ) -> Result<Value, StrategyError> {
        self.unit.call(entry, ctx, args, self.timeout)
    }
}

impl Strategy for SandboxedStrategy {
    fn meta(&self) -> &StrategyMeta {
        self.unit.meta()
    }

    fn init(&mut self, ctx: &mut SessionContext, params: &StrategyParams) -> Result<(), StrategyError> {
        let params = Value::Map(
            params
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v)))
                .collect(),
        );
        self.call(EntryPoint::Init, ctx, vec![params]).map(drop)
    }

    fn on_session_start(&mut self, ctx: &mut SessionContext) -> Result<(), StrategyError> {
        self.call(EntryPoint::OnSessionStart, ctx, vec![]).map(drop)
    }

    fn next_bet(&mut self, ctx: &mut SessionContext) -> Result<Option<WagerSpec>, StrategyError> {
        let value = self.call(EntryPoint::NextBet, ctx, vec![])?;
        let spec = wager_from_value(&value)?;
        if let Some(spec) = &spec {
            debug!(strategy = %self.unit.meta().name, wager = %spec, "Script proposed wager");
        }
        Ok(spec)
    }

    fn on_bet_result(
        &mut self,
        ctx: &mut SessionContext,
        outcome: &BetOutcome,
    ) -> Result<(), StrategyError> {
        self.call(EntryPoint::OnResult, ctx, vec![outcome_value(outcome)])
            .map(drop)
    }

    fn on_session_end(
        &mut self,
        ctx: &mut SessionContext,
        reason: StopReason,
    ) -> Result<(), StrategyError> {
        self.call(EntryPoint::OnSessionEnd, ctx, vec![Value::from(reason.as_str())])
            .map(drop)
    }
}

/// The script's view of one outcome.
pub fn outcome_value(outcome: &BetOutcome) -> Value {
    let decimal = |d: Decimal| Value::Number(d.to_f64().unwrap_or(0.0));
    Value::map([
        ("id", Value::Number(outcome.request_id as f64)),
        ("ok", Value::Bool(outcome.ok)),
        ("won", Value::Bool(outcome.won)),
        ("profit", decimal(outcome.profit)),
        ("balance_after", decimal(outcome.balance_after)),
        ("roll", Value::Number(outcome.roll)),
        ("multiplier", Value::Number(outcome.multiplier)),
        (
            "error",
            outcome.error.clone().map(Value::Str).unwrap_or_default(),
        ),
        (
            "error_kind",
            outcome
                .error_kind
                .map(|k| Value::Str(k.to_string()))
                .unwrap_or_default(),
        ),
    ])
}

/// Check the shape `next_bet` returned and build the wager.
///
/// `nil` ends the session; anything other than a well-formed wager map is a
/// contract violation.
pub fn wager_from_value(value: &Value) -> Result<Option<WagerSpec>, StrategyError> {
    let entry = EntryPoint::NextBet.name();
    let violation = |msg: String| StrategyError::contract(entry, msg);

    let map = match value {
        Value::Nil => return Ok(None),
        Value::Map(map) => map,
        other => {
            return Err(violation(format!(
                "must return a map or nil, got {}",
                other.type_name()
            )))
        }
    };

    if let Some(key) = map.keys().find(|k| !WAGER_KEYS.contains(&k.as_str())) {
        return Err(violation(format!("unexpected key `{key}` in wager")));
    }

    let amount = match map.get("amount") {
        Some(Value::Number(n)) if n.is_finite() && *n > 0.0 => *n,
        Some(Value::Number(n)) => {
            return Err(violation(format!("amount must be a positive finite number, got {n}")))
        }
        Some(other) => {
            return Err(violation(format!(
                "amount must be a number, got {}",
                other.type_name()
            )))
        }
        None => return Err(violation("wager is missing `amount`".into())),
    };
    let amount = Decimal::from_f64(amount)
        .map(|d| d.round_dp(AMOUNT_DP))
        .ok_or_else(|| violation(format!("amount {amount} is not representable")))?;
    if amount <= Decimal::ZERO {
        return Err(violation(format!(
            "amount rounds to zero at {AMOUNT_DP} decimal places"
        )));
    }

    let chance = match map.get("chance") {
        Some(Value::Number(n)) if n.is_finite() && *n > 0.0 && *n < 100.0 => *n,
        Some(Value::Number(n)) => {
            return Err(violation(format!("chance must be within (0, 100), got {n}")))
        }
        Some(other) => {
            return Err(violation(format!(
                "chance must be a number, got {}",
                other.type_name()
            )))
        }
        None => return Err(violation("wager is missing `chance`".into())),
    };

    let direction = match map.get("direction") {
        None | Some(Value::Nil) => Direction::default(),
        Some(Value::Str(s)) if s == "over" => Direction::Over,
        Some(Value::Str(s)) if s == "under" => Direction::Under,
        Some(other) => {
            return Err(violation(format!(
                "direction must be \"over\" or \"under\", got {other}"
            )))
        }
    };

    let secondary = match map.get("secondary") {
        None | Some(Value::Nil) => false,
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            return Err(violation(format!(
                "secondary must be a bool, got {}",
                other.type_name()
            )))
        }
    };

    WagerSpec::new(amount, chance, direction, secondary)
        .map(Some)
        .map_err(|e| violation(e.to_string()))
}
