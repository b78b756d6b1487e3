//! DICEBOT: ordered concurrent wager dispatch with sandboxed strategies.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod platforms;
pub mod strategy;
pub mod sandbox;
pub mod engine;
pub mod dashboard;
