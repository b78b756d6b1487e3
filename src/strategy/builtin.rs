//! Built-in (trusted) strategies.
//!
//! These implement the strategy contract natively. All of them share the
//! same sizing parameters, read from `init` params:
//!
//! | param       | meaning                          | default |
//! |-------------|----------------------------------|---------|
//! | `base`      | base stake                       | 1       |
//! | `chance`    | win chance in percent            | 49.5    |
//! | `direction` | `"over"` / `"under"`             | over    |
//! | `secondary` | wager from the secondary pool    | false   |
//!
//! Progression-specific parameters are documented on each type.

use rust_decimal::prelude::*;
use tracing::debug;

use super::{SessionContext, Strategy, StrategyMeta, StrategyParams};
use crate::types::{BetOutcome, Direction, StrategyError, WagerSpec};

/// Names accepted by [`create`].
pub const NAMES: &[&str] = &["fixed", "martingale", "dalembert", "paroli"];

/// Instantiate a built-in strategy by name (case-insensitive).
pub fn create(name: &str) -> Option<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match name.to_lowercase().as_str() {
        "fixed" | "flat" => Box::new(Fixed::new()),
        "martingale" => Box::new(Martingale::new()),
        "dalembert" | "d'alembert" => Box::new(DAlembert::new()),
        "paroli" => Box::new(Paroli::new()),
        _ => return None,
    };
    Some(strategy)
}

// ---------------------------------------------------------------------------
// Shared sizing parameters
// ---------------------------------------------------------------------------

/// Stake, chance and side shared by every built-in.
#[derive(Debug, Clone, PartialEq)]
pub struct BetSizing {
    pub base: Decimal,
    pub chance: f64,
    pub direction: Direction,
    pub secondary: bool,
}

impl Default for BetSizing {
    fn default() -> Self {
        Self {
            base: Decimal::ONE,
            chance: 49.5,
            direction: Direction::Over,
            secondary: false,
        }
    }
}

impl BetSizing {
    /// Read the shared parameters, keeping defaults for missing keys.
    pub fn from_params(params: &StrategyParams) -> Result<Self, StrategyError> {
        let mut sizing = Self::default();
        if let Some(base) = number_param(params, "base")? {
            sizing.base = decimal_param("base", base)?;
        }
        if let Some(chance) = number_param(params, "chance")? {
            sizing.chance = chance;
        }
        if let Some(v) = params.get("direction") {
            let text = v
                .as_str()
                .ok_or_else(|| StrategyError::contract("init", "direction must be text"))?;
            sizing.direction = text
                .parse()
                .map_err(|e: anyhow::Error| StrategyError::contract("init", e.to_string()))?;
        }
        if let Some(v) = params.get("secondary") {
            sizing.secondary = v
                .as_bool()
                .ok_or_else(|| StrategyError::contract("init", "secondary must be a bool"))?;
        }
        // Validate once up front so a bad config fails in init, not mid-session.
        sizing.wager(sizing.base)?;
        Ok(sizing)
    }

    /// Build a wager for `amount` with these sizing parameters.
    pub fn wager(&self, amount: Decimal) -> Result<WagerSpec, StrategyError> {
        WagerSpec::new(amount.round_dp(8), self.chance, self.direction, self.secondary)
            .map_err(|e| StrategyError::contract("next_bet", e.to_string()))
    }
}

fn number_param(params: &StrategyParams, key: &str) -> Result<Option<f64>, StrategyError> {
    match params.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| StrategyError::contract("init", format!("{key} must be a number"))),
    }
}

fn decimal_param(key: &str, value: f64) -> Result<Decimal, StrategyError> {
    Decimal::from_f64(value)
        .ok_or_else(|| StrategyError::contract("init", format!("{key} is not representable: {value}")))
}

// ---------------------------------------------------------------------------
// Fixed
// ---------------------------------------------------------------------------

/// Same stake every bet.
pub struct Fixed {
    meta: StrategyMeta,
    sizing: BetSizing,
}

impl Fixed {
    pub fn new() -> Self {
        Self {
            meta: StrategyMeta::builtin("fixed"),
            sizing: BetSizing::default(),
        }
    }

    pub fn with_sizing(sizing: BetSizing) -> Self {
        Self {
            meta: StrategyMeta::builtin("fixed"),
            sizing,
        }
    }
}

impl Default for Fixed {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Fixed {
    fn meta(&self) -> &StrategyMeta {
        &self.meta
    }

    fn init(&mut self, _ctx: &mut SessionContext, params: &StrategyParams) -> Result<(), StrategyError> {
        if !params.is_empty() {
            self.sizing = BetSizing::from_params(params)?;
        }
        Ok(())
    }

    fn next_bet(&mut self, _ctx: &mut SessionContext) -> Result<Option<WagerSpec>, StrategyError> {
        self.sizing.wager(self.sizing.base).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Martingale
// ---------------------------------------------------------------------------

/// Multiply the stake after every loss, reset to base after a win.
///
/// Extra params: `multiplier` (default 2), `max_amount` (reset to base
/// instead of exceeding it; unset means no cap).
pub struct Martingale {
    meta: StrategyMeta,
    sizing: BetSizing,
    multiplier: Decimal,
    max_amount: Option<Decimal>,
    current: Decimal,
}

impl Martingale {
    pub fn new() -> Self {
        let sizing = BetSizing::default();
        Self {
            meta: StrategyMeta::builtin("martingale"),
            current: sizing.base,
            sizing,
            multiplier: Decimal::TWO,
            max_amount: None,
        }
    }

    pub fn current_amount(&self) -> Decimal {
        self.current
    }
}

impl Default for Martingale {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Martingale {
    fn meta(&self) -> &StrategyMeta {
        &self.meta
    }

    fn init(&mut self, _ctx: &mut SessionContext, params: &StrategyParams) -> Result<(), StrategyError> {
        self.sizing = BetSizing::from_params(params)?;
        if let Some(m) = number_param(params, "multiplier")? {
            if m < 1.0 {
                return Err(StrategyError::contract("init", "multiplier must be at least 1"));
            }
            self.multiplier = decimal_param("multiplier", m)?;
        }
        if let Some(max) = number_param(params, "max_amount")? {
            self.max_amount = Some(decimal_param("max_amount", max)?);
        }
        self.current = self.sizing.base;
        Ok(())
    }

    fn next_bet(&mut self, _ctx: &mut SessionContext) -> Result<Option<WagerSpec>, StrategyError> {
        self.sizing.wager(self.current).map(Some)
    }

    fn on_bet_result(&mut self, _ctx: &mut SessionContext, outcome: &BetOutcome) -> Result<(), StrategyError> {
        if !outcome.ok {
            return Ok(());
        }
        if outcome.won {
            self.current = self.sizing.base;
        } else {
            let next = self.current * self.multiplier;
            self.current = match self.max_amount {
                Some(max) if next > max => {
                    debug!(next = %next, max = %max, "Martingale cap reached, resetting to base");
                    self.sizing.base
                }
                _ => next,
            };
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// D'Alembert
// ---------------------------------------------------------------------------

/// Add one step after a loss, remove one after a win (never below base).
///
/// Extra params: `step` (default: the base stake).
pub struct DAlembert {
    meta: StrategyMeta,
    sizing: BetSizing,
    step: Decimal,
    current: Decimal,
}

impl DAlembert {
    pub fn new() -> Self {
        let sizing = BetSizing::default();
        Self {
            meta: StrategyMeta::builtin("dalembert"),
            step: sizing.base,
            current: sizing.base,
            sizing,
        }
    }
}

impl Default for DAlembert {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for DAlembert {
    fn meta(&self) -> &StrategyMeta {
        &self.meta
    }

    fn init(&mut self, _ctx: &mut SessionContext, params: &StrategyParams) -> Result<(), StrategyError> {
        self.sizing = BetSizing::from_params(params)?;
        self.step = match number_param(params, "step")? {
            Some(step) if step > 0.0 => decimal_param("step", step)?,
            Some(_) => return Err(StrategyError::contract("init", "step must be positive")),
            None => self.sizing.base,
        };
        self.current = self.sizing.base;
        Ok(())
    }

    fn next_bet(&mut self, _ctx: &mut SessionContext) -> Result<Option<WagerSpec>, StrategyError> {
        self.sizing.wager(self.current).map(Some)
    }

    fn on_bet_result(&mut self, _ctx: &mut SessionContext, outcome: &BetOutcome) -> Result<(), StrategyError> {
        if !outcome.ok {
            return Ok(());
        }
        self.current = if outcome.won {
            (self.current - self.step).max(self.sizing.base)
        } else {
            self.current + self.step
        };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Paroli
// ---------------------------------------------------------------------------

/// Let winnings ride: multiply the stake after a win, reset after a loss or
/// after `target_wins` consecutive wins.
///
/// Extra params: `multiplier` (default 2), `target_wins` (default 3).
pub struct Paroli {
    meta: StrategyMeta,
    sizing: BetSizing,
    multiplier: Decimal,
    target_wins: u32,
    wins_in_row: u32,
    current: Decimal,
}

impl Paroli {
    pub fn new() -> Self {
        let sizing = BetSizing::default();
        Self {
            meta: StrategyMeta::builtin("paroli"),
            current: sizing.base,
            sizing,
            multiplier: Decimal::TWO,
            target_wins: 3,
            wins_in_row: 0,
        }
    }
}

impl Default for Paroli {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Paroli {
    fn meta(&self) -> &StrategyMeta {
        &self.meta
    }

    fn init(&mut self, _ctx: &mut SessionContext, params: &StrategyParams) -> Result<(), StrategyError> {
        self.sizing = BetSizing::from_params(params)?;
        if let Some(m) = number_param(params, "multiplier")? {
            if m < 1.0 {
                return Err(StrategyError::contract("init", "multiplier must be at least 1"));
            }
            self.multiplier = decimal_param("multiplier", m)?;
        }
        if let Some(t) = number_param(params, "target_wins")? {
            if t < 1.0 {
                return Err(StrategyError::contract("init", "target_wins must be at least 1"));
            }
            self.target_wins = t as u32;
        }
        self.current = self.sizing.base;
        self.wins_in_row = 0;
        Ok(())
    }

    fn next_bet(&mut self, _ctx: &mut SessionContext) -> Result<Option<WagerSpec>, StrategyError> {
        self.sizing.wager(self.current).map(Some)
    }

    fn on_bet_result(&mut self, _ctx: &mut SessionContext, outcome: &BetOutcome) -> Result<(), StrategyError> {
        if !outcome.ok {
            return Ok(());
        }
        if outcome.won {
            self.wins_in_row += 1;
            if self.wins_in_row >= self.target_wins {
                self.wins_in_row = 0;
                self.current = self.sizing.base;
            } else {
                self.current *= self.multiplier;
            }
        } else {
            self.wins_in_row = 0;
            self.current = self.sizing.base;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
