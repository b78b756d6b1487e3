//! DICEBOT: ordered concurrent wager dispatch with sandboxed strategies.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the wager service and strategy, then runs one session until a
//! stop condition fires or Ctrl+C is pressed.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use dicebot::config::{self, ServiceKind};
use dicebot::dashboard::{self, DashboardState};
use dicebot::engine::{DispatchEngine, EventLog, FanoutSink, StopSignal, TracingSink};
use dicebot::platforms::remote::RemoteService;
use dicebot::platforms::simulator::SimulatedService;
use dicebot::platforms::WagerService;
use dicebot::sandbox::Sandbox;
use dicebot::strategy::builtin;
use dicebot::strategy::script::SandboxedStrategy;
use dicebot::strategy::source::ScriptSource;
use dicebot::strategy::Strategy;
use dicebot::types::SessionSummary;

const BANNER: &str = r#"
 ____ ___ ____ _____ ____   ___ _____
|  _ \_ _/ ___| ____| __ ) / _ \_   _|
| | | | | |   |  _| |  _ \| | | || |
| |_| | | |___| |___| |_) | |_| || |
|____/___\____|_____|____/ \___/ |_|

  Ordered concurrent wager dispatch
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        currency = %cfg.session.currency,
        workers = cfg.session.workers,
        service = ?cfg.service.kind,
        "DICEBOT starting up"
    );

    let service = build_service(&cfg)?;
    let strategy = build_strategy(&cfg)?;
    info!(strategy = %strategy.meta(), "Strategy loaded");

    // -- Event sinks -----------------------------------------------------

    let events = Arc::new(EventLog::new(cfg.dashboard.event_capacity));
    let sink = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(events.clone());

    let engine = DispatchEngine::new(service, cfg.engine.clone())
        .with_currency(cfg.session.currency.clone())
        .with_params(cfg.strategy.params.clone())
        .with_sink(Arc::new(sink));

    let stop = StopSignal::new();

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(engine.monitor(), events, stop.clone()));
        if let Err(e) = dashboard::spawn_dashboard(state, cfg.dashboard.port).await {
            warn!(error = %e, "Control API unavailable, continuing without it");
        }
    }

    // Ctrl+C requests a cooperative stop; in-flight bets still drain.
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, draining in-flight bets.");
            ctrl_c_stop.request_stop();
        }
    });

    info!("Session running. Press Ctrl+C to stop.");
    match engine
        .run_session(strategy, cfg.session.limits.clone(), cfg.session.workers, stop)
        .await
    {
        Ok(summary) => {
            log_summary(&summary);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Session could not start");
            Err(e.into())
        }
    }
}

/// Build the wager service named by `[service]`.
fn build_service(cfg: &config::AppConfig) -> Result<Arc<dyn WagerService>> {
    match cfg.service.kind {
        ServiceKind::Simulated => {
            info!(
                house_edge = cfg.service.simulated.house_edge,
                start_balance = %cfg.service.simulated.start_balance,
                "Using simulated wager service"
            );
            Ok(Arc::new(SimulatedService::new(cfg.service.simulated.clone())))
        }
        ServiceKind::Remote => {
            let remote = cfg
                .service
                .remote
                .as_ref()
                .context("service.kind = \"remote\" needs a [service.remote] section")?;
            let api_key = match &remote.api_key_env {
                Some(env) => Some(SecretString::new(config::AppConfig::resolve_env(env)?)),
                None => {
                    warn!("No API key configured for remote wager service");
                    None
                }
            };
            info!(base_url = %remote.base_url, "Using remote wager service");
            let client = RemoteService::new(
                &remote.base_url,
                api_key,
                Duration::from_secs(remote.request_timeout_secs),
            )?;
            Ok(Arc::new(client))
        }
    }
}

/// Build the strategy named by `[strategy]`: a built-in or a sandboxed script.
fn build_strategy(cfg: &config::AppConfig) -> Result<Box<dyn Strategy>> {
    if let Some(name) = &cfg.strategy.builtin {
        return builtin::create(name)
            .with_context(|| format!("Unknown built-in strategy: {name}"));
    }

    let path = cfg
        .strategy
        .script
        .as_deref()
        .context("No strategy configured")?;
    let script = ScriptSource::from_file(path)?;
    let sandbox = Sandbox::new(cfg.sandbox.clone());
    let strategy = SandboxedStrategy::load(&sandbox, script.meta, &script.source)
        .with_context(|| format!("Failed to load strategy script: {path}"))?;
    for w in strategy.unit().warnings() {
        warn!(script = path, "{w}");
    }
    Ok(Box::new(strategy))
}

/// Log a human-readable session summary.
fn log_summary(summary: &SessionSummary) {
    info!(
        session = %summary.session_id,
        strategy = %summary.strategy,
        reason = %summary.reason,
        bets = summary.bets_placed,
        wins = summary.wins,
        losses = summary.losses,
        failed = summary.failed,
        lost = summary.lost,
        win_rate = summary.win_rate(),
        duration_ms = summary.duration().num_milliseconds(),
        wagered = %summary.wagered,
        profit = %summary.profit,
        balance = %summary.end_balance,
        "Session finished"
    );
    if let Some(message) = &summary.message {
        warn!(reason = %summary.reason, "{message}");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dicebot=info"));

    let json_logging = std::env::var("DICEBOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra: &str) -> config::AppConfig {
        config::AppConfig::from_toml(&format!("[strategy]\nbuiltin = \"fixed\"\n{extra}")).unwrap()
    }

    #[test]
    fn test_build_service_logs_simulated_settings() {
        let cfg = config("[service.simulated]\nstart_balance = 250.5\n");
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        let service =
            tracing::subscriber::with_default(subscriber, || build_service(&cfg)).unwrap();
        assert_eq!(service.name(), "simulated");
    }

    #[test]
    fn test_build_strategy_builtin() {
        let strategy = build_strategy(&config("")).unwrap();
        assert_eq!(strategy.meta().name, "fixed");
    }
}
