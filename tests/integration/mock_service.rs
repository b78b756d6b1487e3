//! Mock wager service for integration testing.
//!
//! Provides a deterministic `WagerService` whose replies and latencies are
//! scripted per request id. Everything is in-memory with no external
//! dependencies, and every call is recorded for exactly-once checks.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dicebot::platforms::WagerService;
use dicebot::types::*;

/// How the mock answers one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    Win,
    Lose,
    Fail(TransportErrorKind),
}

/// Reply used for ids with no scripted answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pattern {
    /// Even ids win, odd ids lose.
    Alternate,
    AlwaysWin,
    AlwaysLose,
}

/// A mock wager service paying even money (2x) with no house edge.
///
/// Replies, latencies and balance are fully controllable from test code.
pub struct MockService {
    pattern: Pattern,
    balance: Arc<Mutex<Decimal>>,
    replies: Arc<Mutex<HashMap<u64, Reply>>>,
    delays: Arc<Mutex<HashMap<u64, Duration>>>,
    default_delay: Duration,
    calls: Arc<Mutex<Vec<u64>>>,
}

impl MockService {
    pub fn new(pattern: Pattern, balance: Decimal) -> Self {
        Self {
            pattern,
            balance: Arc::new(Mutex::new(balance)),
            replies: Arc::new(Mutex::new(HashMap::new())),
            delays: Arc::new(Mutex::new(HashMap::new())),
            default_delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Script the reply for one request id.
    pub fn reply(&self, id: u64, reply: Reply) {
        self.replies.lock().unwrap().insert(id, reply);
    }

    /// Delay the answer to one request id.
    pub fn delay(&self, id: u64, delay: Duration) {
        self.delays.lock().unwrap().insert(id, delay);
    }

    /// Request ids in the order the service saw them.
    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }

    pub fn current_balance(&self) -> Decimal {
        *self.balance.lock().unwrap()
    }

    fn reply_for(&self, id: u64) -> Reply {
        if let Some(reply) = self.replies.lock().unwrap().get(&id) {
            return *reply;
        }
        match self.pattern {
            Pattern::Alternate if id % 2 == 0 => Reply::Win,
            Pattern::Alternate => Reply::Lose,
            Pattern::AlwaysWin => Reply::Win,
            Pattern::AlwaysLose => Reply::Lose,
        }
    }
}

#[async_trait]
impl WagerService for MockService {
    async fn place_wager(
        &self,
        request: &BetRequest,
        _currency: &str,
    ) -> Result<WagerResult, TransportError> {
        self.calls.lock().unwrap().push(request.id);

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&request.id)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let won = match self.reply_for(request.id) {
            Reply::Fail(kind) => {
                return Err(TransportError::new(kind, format!("scripted failure for #{}", request.id)))
            }
            Reply::Win => true,
            Reply::Lose => false,
        };

        let amount = request.spec.amount();
        let mut balance = self.balance.lock().unwrap();
        if amount > *balance {
            return Err(TransportError::insufficient_funds(amount, *balance));
        }
        let profit = if won { amount } else { -amount };
        *balance += profit;

        Ok(WagerResult {
            won,
            profit,
            balance_after: *balance,
            roll: if won { 75.0 } else { 25.0 },
            multiplier: 2.0,
        })
    }

    async fn balance(&self, _currency: &str, _secondary: bool) -> Result<Decimal, TransportError> {
        Ok(self.current_balance())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
