//! Whole-session scenarios for the dispatch engine with built-in strategies.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use dicebot::engine::{EngineConfig, EventLog, FanoutSink, SessionEvent, StopSignal};
use dicebot::strategy::builtin::{self, Fixed};
use dicebot::strategy::{ExtraValue, StrategyParams};
use dicebot::types::{SessionLimits, StopReason, TransportErrorKind};

use crate::mock_service::{MockService, Pattern, Reply};
use crate::{collect, fast_config, placed_ids, recording_engine, resolved_ids};

fn max_bets(n: u64) -> SessionLimits {
    SessionLimits {
        max_bets: Some(n),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Ordering and exactly-once delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scrambled_latency_applies_every_bet_once_in_order() {
    let service = Arc::new(MockService::new(Pattern::Alternate, dec!(100)));
    for id in 0..40 {
        service.delay(id, Duration::from_millis((id * 37) % 11));
    }
    let (engine, mut rx) = recording_engine(service.clone(), fast_config());

    let summary = engine
        .run_session(Box::new(Fixed::new()), max_bets(40), 6, StopSignal::new())
        .await
        .unwrap();
    let events = collect(&mut rx);

    assert_eq!(summary.reason, StopReason::MaxBets);
    assert_eq!(summary.bets_placed, 40);
    assert_eq!(summary.wins, 20);
    assert_eq!(summary.losses, 20);
    assert_eq!(summary.profit, Decimal::ZERO);
    assert_eq!(summary.end_balance, service.current_balance());

    let expected: Vec<u64> = (0..40).collect();
    assert_eq!(placed_ids(&events), expected);
    assert_eq!(resolved_ids(&events), expected);

    let mut calls = service.calls();
    let unique: HashSet<u64> = calls.iter().copied().collect();
    assert_eq!(unique.len(), calls.len(), "a request reached the service twice");
    calls.sort_unstable();
    assert_eq!(calls, expected);
}

#[tokio::test]
async fn test_transport_failures_are_delivered_in_order() {
    let service = Arc::new(MockService::new(Pattern::AlwaysWin, dec!(100)));
    service.reply(3, Reply::Fail(TransportErrorKind::RateLimited));
    service.reply(5, Reply::Fail(TransportErrorKind::Network));
    service.delay(2, Duration::from_millis(20));
    let (engine, mut rx) = recording_engine(service.clone(), fast_config());

    let summary = engine
        .run_session(Box::new(Fixed::new()), max_bets(10), 3, StopSignal::new())
        .await
        .unwrap();
    let events = collect(&mut rx);

    assert_eq!(summary.reason, StopReason::MaxBets);
    assert_eq!(summary.bets_placed, 10);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.bets_submitted, 12);
    assert_eq!(summary.profit, dec!(10));

    let resolved = resolved_ids(&events);
    assert_eq!(resolved, (0..12).collect::<Vec<_>>());

    let failed: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::BetApplied { id, outcome } if !outcome.ok => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![3, 5]);
    let warnings = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Warning { .. }))
        .count();
    assert_eq!(warnings, 2);
}

// ---------------------------------------------------------------------------
// Stop conditions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_take_profit_stops_submission_after_crossing() {
    let service = Arc::new(MockService::new(Pattern::AlwaysWin, dec!(100)));
    for id in 0..20 {
        service.delay(id, Duration::from_millis(3 + id % 4));
    }
    let (engine, mut rx) = recording_engine(service, fast_config());
    let limits = SessionLimits {
        take_profit: Some(dec!(5)),
        ..Default::default()
    };

    let summary = engine
        .run_session(Box::new(Fixed::new()), limits, 4, StopSignal::new())
        .await
        .unwrap();
    let events = collect(&mut rx);

    assert_eq!(summary.reason, StopReason::TakeProfit);
    assert!(summary.profit >= dec!(5));

    let mut profit = Decimal::ZERO;
    let mut crossed_at = None;
    for (i, event) in events.iter().enumerate() {
        if let SessionEvent::BetApplied { outcome, .. } = event {
            profit += outcome.profit;
            if profit >= dec!(5) && crossed_at.is_none() {
                crossed_at = Some(i);
            }
        }
    }
    let crossed_at = crossed_at.unwrap();
    assert!(
        !events[crossed_at..]
            .iter()
            .any(|e| matches!(e, SessionEvent::BetPlaced { .. })),
        "bet placed after take-profit was reached"
    );
    // Everything submitted before the crossing still resolves.
    assert_eq!(placed_ids(&events), resolved_ids(&events));
}

#[tokio::test]
async fn test_insufficient_funds_ends_session_with_balance_intact() {
    let service = Arc::new(MockService::new(Pattern::AlwaysLose, dec!(5)));
    let (engine, mut rx) = recording_engine(service.clone(), fast_config());

    let summary = engine
        .run_session(Box::new(Fixed::new()), SessionLimits::default(), 3, StopSignal::new())
        .await
        .unwrap();
    let events = collect(&mut rx);

    assert_eq!(summary.reason, StopReason::InsufficientBalance);
    assert_eq!(summary.bets_placed, 5);
    assert_eq!(summary.end_balance, Decimal::ZERO);
    assert_eq!(service.current_balance(), Decimal::ZERO);
    assert!(summary.message.unwrap().contains("insufficient"));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Error { .. })));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::SessionEnded {
            reason: StopReason::InsufficientBalance,
            ..
        })
    ));
}

#[tokio::test]
async fn test_user_stop_resolves_every_placed_bet_once() {
    let service = Arc::new(
        MockService::new(Pattern::Alternate, dec!(1000)).with_default_delay(Duration::from_millis(15)),
    );
    let (engine, mut rx) = recording_engine(service, fast_config());
    let stop = StopSignal::new();

    let stopper = stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        stopper.request_stop();
    });

    let summary = engine
        .run_session(Box::new(Fixed::new()), SessionLimits::default(), 4, stop)
        .await
        .unwrap();
    let events = collect(&mut rx);

    assert_eq!(summary.reason, StopReason::UserStop);
    assert_eq!(summary.lost, 0);
    let placed = placed_ids(&events);
    assert!(!placed.is_empty());
    assert_eq!(placed, (0..placed.len() as u64).collect::<Vec<_>>());
    assert_eq!(resolved_ids(&events), placed);
    assert_eq!(summary.bets_submitted, placed.len() as u64);
}

#[tokio::test]
async fn test_builtin_martingale_from_params() {
    let service = Arc::new(MockService::new(Pattern::AlwaysLose, dec!(100)));
    service.reply(3, Reply::Win);

    let mut params = StrategyParams::new();
    params.insert("base".into(), ExtraValue::Number(1.0));
    params.insert("multiplier".into(), ExtraValue::Number(2.0));
    let (engine, mut rx) = recording_engine(service, fast_config());
    let engine = engine.with_params(params);

    let strategy = builtin::create("martingale").unwrap();
    let summary = engine
        .run_session(strategy, max_bets(5), 1, StopSignal::new())
        .await
        .unwrap();
    let events = collect(&mut rx);

    let amounts: Vec<Decimal> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::BetPlaced { spec, .. } => Some(spec.amount()),
            _ => None,
        })
        .collect();
    assert_eq!(amounts, vec![dec!(1), dec!(2), dec!(4), dec!(8), dec!(1)]);
    // -1 -2 -4 +8 -1
    assert_eq!(summary.profit, dec!(0));
    assert_eq!(summary.worst_streak, -3);
}

// ---------------------------------------------------------------------------
// Event export
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fanout_feeds_event_log_and_channel() {
    let service = Arc::new(MockService::new(Pattern::Alternate, dec!(100)));
    let log = Arc::new(EventLog::new(1_000));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = FanoutSink::new().with(log.clone()).with(Arc::new(tx));

    let engine = dicebot::engine::DispatchEngine::new(
        service,
        EngineConfig {
            poll_interval_ms: 5,
            ..Default::default()
        },
    )
    .with_sink(Arc::new(sink));

    engine
        .run_session(Box::new(Fixed::new()), max_bets(6), 2, StopSignal::new())
        .await
        .unwrap();
    let events = collect(&mut rx);

    assert_eq!(log.total_recorded(), events.len() as u64);
    let logged = log.recent(1_000);
    assert_eq!(logged.len(), events.len());
    assert!(matches!(logged[0].event, SessionEvent::SessionStarted { .. }));
    assert!(matches!(
        logged.last().map(|l| &l.event),
        Some(SessionEvent::SessionEnded { .. })
    ));
    assert!(logged.windows(2).all(|w| w[0].seq < w[1].seq));
}
