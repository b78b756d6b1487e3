//! Reorder buffer: hands outcomes back strictly in request-id order.

use std::collections::{BTreeMap, VecDeque};

use crate::types::{BetOutcome, BetRequest, WagerSpec};

/// Outcomes that cannot be sequenced. Both mean the engine itself is broken.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SequenceError {
    #[error("outcome for request #{0} arrived twice")]
    Duplicate(u64),

    #[error("outcome for unknown request #{0}")]
    Unknown(u64),
}

/// What the sequencer yields when forced past a gap.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Apply(BetOutcome, WagerSpec),
    /// The request never answered; it is skipped.
    Lost(u64, WagerSpec),
}

/// Assigns request ids and releases their outcomes in id order.
#[derive(Debug, Default)]
pub struct Sequencer {
    next_id: u64,
    next_expected: u64,
    /// Specs of in-flight requests; the front belongs to `next_expected`.
    pending: VecDeque<WagerSpec>,
    buffer: BTreeMap<u64, BetOutcome>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next request id for `spec`.
    pub fn submit(&mut self, spec: WagerSpec) -> BetRequest {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push_back(spec.clone());
        BetRequest::new(id, spec)
    }

    /// Buffer an outcome until its turn.
    pub fn accept(&mut self, outcome: BetOutcome) -> Result<(), SequenceError> {
        let id = outcome.request_id;
        if id >= self.next_id {
            return Err(SequenceError::Unknown(id));
        }
        if id < self.next_expected || self.buffer.contains_key(&id) {
            return Err(SequenceError::Duplicate(id));
        }
        self.buffer.insert(id, outcome);
        Ok(())
    }

    /// The outcome for `next_expected`, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<(BetOutcome, WagerSpec)> {
        if !self.buffer.contains_key(&self.next_expected) {
            return None;
        }
        let spec = self.pending.pop_front()?;
        let outcome = self.buffer.remove(&self.next_expected)?;
        self.next_expected += 1;
        Some((outcome, spec))
    }

    /// Advance past `next_expected` whether or not it has arrived.
    ///
    /// Used once the drain grace window has closed.
    pub fn force_next(&mut self) -> Option<Next> {
        let spec = self.pending.pop_front()?;
        let id = self.next_expected;
        self.next_expected += 1;
        Some(match self.buffer.remove(&id) {
            Some(outcome) => Next::Apply(outcome, spec),
            None => Next::Lost(id, spec),
        })
    }

    /// Requests submitted but not yet handed back.
    pub fn in_flight(&self) -> usize {
        (self.next_id - self.next_expected) as usize
    }

    pub fn submitted(&self) -> u64 {
        self.next_id
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Outcomes held back waiting for an earlier id.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_settled(&self) -> bool {
        self.in_flight() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, TransportError, TransportErrorKind, WagerResult};
    use rust_decimal_macros::dec;

    fn spec() -> WagerSpec {
        WagerSpec::new(dec!(1), 50.0, Direction::Over, false).unwrap()
    }

    fn outcome(id: u64) -> BetOutcome {
        BetOutcome::settled(
            id,
            WagerResult {
                won: true,
                profit: dec!(0.98),
                balance_after: dec!(100),
                roll: 60.0,
                multiplier: 1.98,
            },
        )
    }

    fn submit(seq: &mut Sequencer, n: usize) {
        for _ in 0..n {
            seq.submit(spec());
        }
    }

    #[test]
    fn test_ids_increase_from_zero() {
        let mut seq = Sequencer::new();
        assert_eq!(seq.submit(spec()).id, 0);
        assert_eq!(seq.submit(spec()).id, 1);
        assert_eq!(seq.in_flight(), 2);
    }

    #[test]
    fn test_out_of_order_arrivals_released_in_order() {
        let mut seq = Sequencer::new();
        submit(&mut seq, 4);
        for id in [2, 3, 1] {
            seq.accept(outcome(id)).unwrap();
        }
        assert!(seq.pop_ready().is_none());
        assert_eq!(seq.buffered(), 3);

        seq.accept(outcome(0)).unwrap();
        let released: Vec<u64> = std::iter::from_fn(|| seq.pop_ready())
            .map(|(o, _)| o.request_id)
            .collect();
        assert_eq!(released, vec![0, 1, 2, 3]);
        assert!(seq.is_settled());
    }

    #[test]
    fn test_duplicate_and_unknown_rejected() {
        let mut seq = Sequencer::new();
        submit(&mut seq, 2);
        seq.accept(outcome(1)).unwrap();
        assert_eq!(seq.accept(outcome(1)), Err(SequenceError::Duplicate(1)));
        assert_eq!(seq.accept(outcome(5)), Err(SequenceError::Unknown(5)));

        seq.accept(outcome(0)).unwrap();
        seq.pop_ready().unwrap();
        assert_eq!(seq.accept(outcome(0)), Err(SequenceError::Duplicate(0)));
    }

    #[test]
    fn test_force_next_skips_missing_then_applies_buffered() {
        let mut seq = Sequencer::new();
        submit(&mut seq, 3);
        seq.accept(outcome(2)).unwrap();
        seq.accept(outcome(0)).unwrap();
        seq.pop_ready().unwrap();

        assert!(matches!(seq.force_next(), Some(Next::Lost(1, _))));
        match seq.force_next() {
            Some(Next::Apply(o, _)) => assert_eq!(o.request_id, 2),
            other => panic!("expected outcome #2, got {other:?}"),
        }
        assert!(seq.force_next().is_none());
        assert!(seq.is_settled());
    }

    #[test]
    fn test_failed_outcomes_are_sequenced_too() {
        let mut seq = Sequencer::new();
        submit(&mut seq, 1);
        let err = TransportError::new(TransportErrorKind::Timeout, "slow");
        seq.accept(BetOutcome::failed(0, &err)).unwrap();
        let (o, _) = seq.pop_ready().unwrap();
        assert!(!o.ok);
    }
}
