//! Wager services.
//!
//! Defines the `WagerService` trait and provides implementations for:
//! - Simulated: in-process dice service with a house edge, for dry runs and tests
//! - Remote: JSON-over-HTTP client for a real wager service

pub mod remote;
pub mod simulator;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{BetRequest, TransportError, WagerResult};

/// Abstraction over the remote odds service.
///
/// Implementations must be safe to call from several workers at once.
/// Failures carry a structured [`TransportErrorKind`](crate::types::TransportErrorKind)
/// so callers never have to inspect message text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WagerService: Send + Sync {
    /// Place one wager and report how it settled.
    async fn place_wager(
        &self,
        request: &BetRequest,
        currency: &str,
    ) -> Result<WagerResult, TransportError>;

    /// Current balance for `currency` in the primary or secondary pool.
    async fn balance(&self, currency: &str, secondary: bool) -> Result<Decimal, TransportError>;

    /// Service name for logging and identification.
    fn name(&self) -> &'static str;
}
