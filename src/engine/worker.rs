//! Worker tasks: perform the slow wager calls.
//!
//! Workers share one work receiver and push every answer onto the results
//! channel. They never touch the session context.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::signal::StopSignal;
use crate::platforms::WagerService;
use crate::types::{BetOutcome, BetRequest, TransportError, TransportErrorKind};

pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<BetRequest>>>;

/// Everything one worker needs.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub service: Arc<dyn WagerService>,
    pub currency: Arc<str>,
    pub work: SharedReceiver,
    pub results: mpsc::Sender<BetOutcome>,
    pub stop: StopSignal,
    pub request_timeout: Duration,
}

/// Spawn `count` workers. They exit once the work channel is closed and
/// drained, or the results channel is gone.
pub(crate) fn spawn_pool(count: usize, ctx: WorkerContext) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|index| tokio::spawn(run_worker(index, ctx.clone())))
        .collect()
}

async fn run_worker(index: usize, ctx: WorkerContext) {
    trace!(worker = index, "Worker started");
    loop {
        // Only one worker waits on the receiver at a time; the lock is
        // released before the wager call.
        let request = {
            let mut work = ctx.work.lock().await;
            work.recv().await
        };
        let Some(request) = request else {
            break;
        };

        let outcome = execute(&ctx, &request).await;
        if ctx.results.send(outcome).await.is_err() {
            break;
        }
    }
    trace!(worker = index, "Worker finished");
}

/// Answer one request. Never fails: errors become failed outcomes.
async fn execute(ctx: &WorkerContext, request: &BetRequest) -> BetOutcome {
    if ctx.stop.is_stopped() {
        let err = TransportError::new(TransportErrorKind::Cancelled, "session is stopping");
        return BetOutcome::failed(request.id, &err);
    }

    let call = ctx.service.place_wager(request, &ctx.currency);
    match tokio::time::timeout(ctx.request_timeout, call).await {
        Ok(Ok(result)) => BetOutcome::settled(request.id, result),
        Ok(Err(err)) => {
            debug!(id = request.id, error = %err, "Wager call failed");
            BetOutcome::failed(request.id, &err)
        }
        Err(_) => {
            let err = TransportError::new(
                TransportErrorKind::Timeout,
                format!(
                    "{} did not answer within {}ms",
                    ctx.service.name(),
                    ctx.request_timeout.as_millis()
                ),
            );
            BetOutcome::failed(request.id, &err)
        }
    }
}
