//! Sandboxed script strategies driven end to end by the dispatch engine.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use dicebot::config::AppConfig;
use dicebot::engine::{SessionEvent, StopSignal};
use dicebot::sandbox::{LoadError, Sandbox, SandboxConfig};
use dicebot::strategy::script::SandboxedStrategy;
use dicebot::strategy::source::ScriptSource;
use dicebot::strategy::{ExtraValue, StrategyMeta, StrategyParams};
use dicebot::types::{SessionLimits, StopReason};

use crate::mock_service::{MockService, Pattern, Reply};
use crate::{collect, fast_config, recording_engine, resolved_ids};

fn script_path(name: &str) -> String {
    format!("{}/scripts/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn load_file(name: &str, config: SandboxConfig) -> SandboxedStrategy {
    let script = ScriptSource::from_file(script_path(name)).unwrap();
    SandboxedStrategy::load(&Sandbox::new(config), script.meta, &script.source).unwrap()
}

fn load_inline(source: &str, config: SandboxConfig) -> SandboxedStrategy {
    let meta = StrategyMeta {
        name: "inline".into(),
        version: None,
        author: None,
        trusted: false,
    };
    SandboxedStrategy::load(&Sandbox::new(config), meta, source).unwrap()
}

fn limits(max_bets: u64) -> SessionLimits {
    SessionLimits {
        max_bets: Some(max_bets),
        ..Default::default()
    }
}

fn extra(engine: &dicebot::engine::DispatchEngine, key: &str) -> Option<ExtraValue> {
    engine
        .monitor()
        .snapshot()
        .and_then(|s| s.context.get_extra(key).cloned())
}

// ---------------------------------------------------------------------------
// Bundled scripts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_martingale_script_session() {
    let service = Arc::new(MockService::new(Pattern::AlwaysLose, dec!(100)));
    service.reply(3, Reply::Win);

    let mut params = StrategyParams::new();
    params.insert("base".into(), ExtraValue::Number(1.0));
    params.insert("multiplier".into(), ExtraValue::Number(2.0));
    let (engine, mut rx) = recording_engine(service.clone(), fast_config());
    let engine = engine.with_params(params);

    let strategy = load_file("martingale.dbs", SandboxConfig::default());
    let summary = engine
        .run_session(Box::new(strategy), limits(4), 1, StopSignal::new())
        .await
        .unwrap();
    let events = collect(&mut rx);

    assert_eq!(summary.strategy, "Martingale");
    assert_eq!(summary.reason, StopReason::MaxBets);
    let amounts: Vec<Decimal> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::BetPlaced { spec, .. } => Some(spec.amount()),
            _ => None,
        })
        .collect();
    assert_eq!(amounts, vec![dec!(1), dec!(2), dec!(4), dec!(8)]);
    assert_eq!(summary.end_balance, dec!(101));
    assert_eq!(service.current_balance(), dec!(101));

    assert_eq!(extra(&engine, "amount"), Some(ExtraValue::Number(1.0)));
    assert_eq!(
        extra(&engine, "end_reason"),
        Some(ExtraValue::Text("max_bets".into()))
    );
}

#[tokio::test]
async fn test_streak_hunter_ends_itself() {
    let service = Arc::new(MockService::new(Pattern::AlwaysWin, dec!(100)));
    let mut params = StrategyParams::new();
    params.insert("base".into(), ExtraValue::Number(0.5));
    params.insert("target_streak".into(), ExtraValue::Number(3.0));
    let (engine, mut rx) = recording_engine(service, fast_config());
    let engine = engine.with_params(params);

    let config = SandboxConfig {
        rng_seed: Some(11),
        ..Default::default()
    };
    let strategy = load_file("streak_hunter.dbs", config);
    let summary = engine
        .run_session(Box::new(strategy), SessionLimits::default(), 1, StopSignal::new())
        .await
        .unwrap();
    let events = collect(&mut rx);

    assert_eq!(summary.reason, StopReason::StrategyComplete);
    assert_eq!(summary.bets_placed, 3);
    assert_eq!(summary.profit, dec!(1.5));
    assert_eq!(resolved_ids(&events), vec![0, 1, 2]);
}

#[test]
fn test_bundled_scripts_validate_cleanly() {
    let sandbox = Sandbox::default();
    for name in ["martingale.dbs", "streak_hunter.dbs"] {
        let script = ScriptSource::from_file(script_path(name)).unwrap();
        let report = sandbox.validate(&script.source);
        assert!(report.is_ok(), "{name}: {report}");
        assert!(!script.meta.trusted);
    }
}

#[test]
fn test_config_can_select_a_script() {
    let cfg = AppConfig::from_toml(&format!(
        "[strategy]\nscript = \"{}\"\n",
        script_path("martingale.dbs")
    ))
    .unwrap();
    let path = cfg.strategy.script.unwrap();
    let script = ScriptSource::from_file(&path).unwrap();
    assert_eq!(script.meta.name, "Martingale");
    assert_eq!(script.meta.version.as_deref(), Some("1.0"));
}

// ---------------------------------------------------------------------------
// Containment
// ---------------------------------------------------------------------------

#[test]
fn test_disallowed_capabilities_rejected_at_load() {
    let sandbox = Sandbox::default();
    let meta = || StrategyMeta {
        name: "evil".into(),
        version: None,
        author: None,
        // Claiming trust does not skip validation.
        trusted: true,
    };

    for source in [
        "import os;\nfn next_bet(ctx) { return nil; }",
        "fn next_bet(ctx) { open(\"/etc/passwd\"); return nil; }",
        "fn next_bet(ctx) { return eval(\"1\"); }",
        "fn next_bet(ctx) { return ctx.__class__; }",
    ] {
        match SandboxedStrategy::load(&sandbox, meta(), source) {
            Err(LoadError::Rejected(report)) => assert!(!report.errors.is_empty(), "{source}"),
            other => panic!("expected rejection for {source:?}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_runaway_script_times_out_without_betting() {
    let service = Arc::new(MockService::new(Pattern::AlwaysWin, dec!(100)));
    let (engine, mut rx) = recording_engine(service.clone(), fast_config());
    let config = SandboxConfig {
        call_timeout_ms: 50,
        ..Default::default()
    };
    let strategy = load_inline("fn next_bet(ctx) { while true { } }", config);

    let summary = engine
        .run_session(Box::new(strategy), limits(10), 2, StopSignal::new())
        .await
        .unwrap();
    let events = collect(&mut rx);

    assert_eq!(summary.reason, StopReason::Error);
    assert!(summary.message.unwrap().contains("50ms"));
    assert_eq!(summary.bets_submitted, 0);
    assert!(service.calls().is_empty());
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::SessionEnded { .. })));
}

#[tokio::test]
async fn test_script_cannot_write_balance() {
    let service = Arc::new(MockService::new(Pattern::AlwaysWin, dec!(100)));
    let (engine, _rx) = recording_engine(service, fast_config());
    let strategy = load_inline(
        "fn next_bet(ctx) { ctx.balance = 1000000; return {amount: 1, chance: 50}; }",
        SandboxConfig::default(),
    );

    let summary = engine
        .run_session(Box::new(strategy), limits(10), 1, StopSignal::new())
        .await
        .unwrap();

    assert_eq!(summary.reason, StopReason::Error);
    assert!(summary.message.unwrap().contains("read-only"));
    assert_eq!(summary.end_balance, dec!(100));
    assert_eq!(summary.bets_submitted, 0);
}

#[tokio::test]
async fn test_malformed_wager_is_a_contract_violation() {
    let service = Arc::new(MockService::new(Pattern::AlwaysWin, dec!(100)));
    let (engine, _rx) = recording_engine(service, fast_config());
    let strategy = load_inline(
        "fn next_bet(ctx) { return {amount: 1, chance: 150}; }",
        SandboxConfig::default(),
    );

    let summary = engine
        .run_session(Box::new(strategy), limits(10), 1, StopSignal::new())
        .await
        .unwrap();

    assert_eq!(summary.reason, StopReason::Error);
    assert!(summary.message.unwrap().contains("next_bet"));
    assert_eq!(summary.bets_submitted, 0);
}

#[tokio::test]
async fn test_raise_in_on_result_stops_after_applying() {
    let service = Arc::new(MockService::new(Pattern::AlwaysLose, dec!(100)));
    let (engine, mut rx) = recording_engine(service, fast_config());
    let strategy = load_inline(
        r#"
        fn next_bet(ctx) { return {amount: 1, chance: 50}; }
        fn on_result(ctx, outcome) {
            if not outcome.won { raise "giving up after #" + str(outcome.id); }
        }
        "#,
        SandboxConfig::default(),
    );

    let summary = engine
        .run_session(Box::new(strategy), limits(10), 1, StopSignal::new())
        .await
        .unwrap();
    let events = collect(&mut rx);

    assert_eq!(summary.reason, StopReason::Error);
    assert!(summary.message.unwrap().contains("giving up after #0"));
    assert_eq!(summary.bets_placed, 1);
    assert_eq!(resolved_ids(&events), vec![0]);
}
