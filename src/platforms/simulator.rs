//! Simulated dice service.
//!
//! Settles wagers in-process with a configurable house edge and latency.
//! Rolls come from a seeded ChaCha RNG, or from a forced [`OutcomePlan`]
//! when a test needs deterministic results.
//!
//! Payout rules:
//! - roll in [0, 100) with two decimals
//! - `under` wins when `roll < chance`, `over` wins when `roll > 100 - chance`
//! - multiplier `(100 - edge) / chance`, rounded to 4 dp
//! - profit `amount * (multiplier - 1)` on a win, `-amount` on a loss

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::WagerService;
use crate::types::{BetRequest, Direction, TransportError, TransportErrorKind, WagerResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const SERVICE_NAME: &str = "simulated";

/// How the simulator decides wins.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomePlan {
    /// Roll the dice.
    #[default]
    Random,
    /// Even request ids win, odd ids lose.
    Alternate,
    /// Outcome `i` is `seq[id % len]`.
    Sequence(Vec<bool>),
    AlwaysWin,
    AlwaysLose,
}

impl OutcomePlan {
    /// The forced result for `id`, or `None` when the dice decide.
    fn forced(&self, id: u64) -> Option<bool> {
        match self {
            OutcomePlan::Random => None,
            OutcomePlan::Alternate => Some(id % 2 == 0),
            OutcomePlan::Sequence(seq) if seq.is_empty() => None,
            OutcomePlan::Sequence(seq) => Some(seq[(id % seq.len() as u64) as usize]),
            OutcomePlan::AlwaysWin => Some(true),
            OutcomePlan::AlwaysLose => Some(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// House edge in percent.
    pub house_edge: f64,
    /// Opening balance of the primary pool, for every currency.
    pub start_balance: Decimal,
    /// Opening balance of the secondary pool, for every currency.
    pub secondary_balance: Decimal,
    pub min_chance: f64,
    pub max_chance: f64,
    /// Per-wager latency range `[min, max]` in milliseconds.
    pub latency_ms: [u64; 2],
    pub seed: Option<u64>,
    pub plan: OutcomePlan,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            house_edge: 1.0,
            start_balance: dec!(100),
            secondary_balance: Decimal::ZERO,
            min_chance: 0.01,
            max_chance: 98.0,
            latency_ms: [0, 0],
            seed: None,
            plan: OutcomePlan::Random,
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

struct SimState {
    /// Balances keyed by (currency, secondary pool).
    balances: HashMap<(String, bool), Decimal>,
    rng: ChaCha8Rng,
}

/// In-memory wager service.
pub struct SimulatedService {
    config: SimulatorConfig,
    state: Mutex<SimState>,
    closed: AtomicBool,
    wagers: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SimulatedService {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::seed_from_u64(rand::random()),
        };
        info!(
            edge = config.house_edge,
            start_balance = %config.start_balance,
            plan = ?config.plan,
            "Simulated wager service ready"
        );
        Self {
            config,
            state: Mutex::new(SimState {
                balances: HashMap::new(),
                rng,
            }),
            closed: AtomicBool::new(false),
            wagers: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Stop accepting wagers; later calls fail with `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Number of wagers settled so far.
    pub fn wagers_settled(&self) -> u64 {
        self.wagers.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `place_wager` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Multiplier paid on a winning wager at `chance`.
    pub fn multiplier(&self, chance: f64) -> Decimal {
        let edge = Decimal::from_f64(self.config.house_edge).unwrap_or(Decimal::ZERO);
        let chance = Decimal::from_f64(chance).unwrap_or(Decimal::ONE);
        ((dec!(100) - edge) / chance).round_dp(4)
    }

    fn pick_latency(&self) -> Duration {
        let [lo, hi] = self.config.latency_ms;
        if hi <= lo {
            return Duration::from_millis(lo);
        }
        let ms = self.state.lock().rng.gen_range(lo..=hi);
        Duration::from_millis(ms)
    }

    /// Settle one wager against the in-memory balances.
    fn settle(&self, request: &BetRequest, currency: &str) -> Result<WagerResult, TransportError> {
        let spec = &request.spec;
        let chance = spec.win_chance();
        if chance < self.config.min_chance || chance > self.config.max_chance {
            return Err(TransportError::new(
                TransportErrorKind::Rejected,
                format!(
                    "chance {chance} outside [{}, {}]",
                    self.config.min_chance, self.config.max_chance
                ),
            ));
        }

        let multiplier = self.multiplier(chance);
        let mut state = self.state.lock();
        let start = if spec.use_secondary_pool() {
            self.config.secondary_balance
        } else {
            self.config.start_balance
        };
        let key = (currency.to_lowercase(), spec.use_secondary_pool());
        let available = *state.balances.entry(key.clone()).or_insert(start);
        if spec.amount() > available {
            return Err(TransportError::insufficient_funds(spec.amount(), available));
        }

        let (won, roll) = match self.config.plan.forced(request.id) {
            Some(won) => {
                // A representative roll on the right side of the threshold.
                let high = matches!(spec.direction(), Direction::Over) == won;
                (won, if high { 99.99 } else { 0.0 })
            }
            None => {
                let roll = state.rng.gen_range(0..10_000u32) as f64 / 100.0;
                let won = match spec.direction() {
                    Direction::Under => roll < chance,
                    Direction::Over => roll > 100.0 - chance,
                };
                (won, roll)
            }
        };

        let profit = if won {
            (spec.amount() * (multiplier - Decimal::ONE)).round_dp(8)
        } else {
            -spec.amount()
        };
        let balance_after = available + profit;
        state.balances.insert(key, balance_after);

        Ok(WagerResult {
            won,
            profit,
            balance_after,
            roll,
            multiplier: multiplier.to_f64().unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl WagerService for SimulatedService {
    async fn place_wager(
        &self,
        request: &BetRequest,
        currency: &str,
    ) -> Result<WagerResult, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::new(
                TransportErrorKind::Closed,
                "simulated session closed",
            ));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = self.pick_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let result = self.settle(request, currency);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Ok(r) = &result {
            self.wagers.fetch_add(1, Ordering::SeqCst);
            debug!(
                id = request.id,
                won = r.won,
                roll = r.roll,
                profit = %r.profit,
                "Simulated wager settled"
            );
        }
        result
    }

    async fn balance(&self, currency: &str, secondary: bool) -> Result<Decimal, TransportError> {
        let start = if secondary {
            self.config.secondary_balance
        } else {
            self.config.start_balance
        };
        let state = self.state.lock();
        Ok(state
            .balances
            .get(&(currency.to_lowercase(), secondary))
            .copied()
            .unwrap_or(start))
    }

    fn name(&self) -> &'static str {
        SERVICE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
