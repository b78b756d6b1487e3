//! Strategy contract: the interface every decision-maker satisfies.
//!
//! Built-in strategies (`builtin`) implement [`Strategy`] directly and are
//! trusted. Script strategies go through the sandbox and are adapted by
//! [`script::SandboxedStrategy`]. The dispatch engine does not care which.

pub mod builtin;
pub mod context;
pub mod script;
pub mod source;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{BetOutcome, StopReason, StrategyError, WagerSpec};
pub use context::{ExtraValue, SessionContext};

/// Parameters handed to `init`, usually from the config file.
pub type StrategyParams = BTreeMap<String, ExtraValue>;

/// Descriptive metadata carried by every strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMeta {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Built-in strategies are trusted. Scripts may claim it in their
    /// header but are validated regardless.
    #[serde(default)]
    pub trusted: bool,
}

impl StrategyMeta {
    pub fn builtin(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            author: None,
            trusted: true,
        }
    }
}

impl fmt::Display for StrategyMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(v) = &self.version {
            write!(f, " v{v}")?;
        }
        if let Some(a) = &self.author {
            write!(f, " by {a}")?;
        }
        if !self.trusted {
            write!(f, " [sandboxed]")?;
        }
        Ok(())
    }
}

/// The strategy contract.
///
/// Every method runs on the engine's decision task while it holds the
/// session lock. `on_bet_result` is called exactly once per submitted bet,
/// in bet order, including bets that failed in transport (`outcome.ok`).
pub trait Strategy: Send {
    fn meta(&self) -> &StrategyMeta;

    /// Called once before the first bet. May seed `ctx.extra`.
    fn init(
        &mut self,
        _ctx: &mut SessionContext,
        _params: &StrategyParams,
    ) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_session_start(&mut self, _ctx: &mut SessionContext) -> Result<(), StrategyError> {
        Ok(())
    }

    /// The next wager, or `None` to end the session voluntarily.
    fn next_bet(&mut self, ctx: &mut SessionContext) -> Result<Option<WagerSpec>, StrategyError>;

    fn on_bet_result(
        &mut self,
        _ctx: &mut SessionContext,
        _outcome: &BetOutcome,
    ) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_session_end(
        &mut self,
        _ctx: &mut SessionContext,
        _reason: StopReason,
    ) -> Result<(), StrategyError> {
        Ok(())
    }
}
