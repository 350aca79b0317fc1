//! Run controller.
//!
//! Runs the lifecycle engine and the log streamer side by side and merges their
//! events into one feed for presentation layers.

use crate::client::{LogCacheClient, ResourceClient};
use crate::engine::{LifecycleEngine, LogStreamer};
use crate::model::{
    LifecycleEvent, LogEvent, Operation, OrchestrationEvent, OrchestrationResult, RunConfig,
};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const LIFECYCLE_BUFFER: usize = 32;
const LOG_BUFFER: usize = 256;

/// Collaborators and settings for one orchestration run.
pub(crate) struct RunCtx {
    pub resources: Arc<dyn ResourceClient>,
    /// `None` disables log tailing for the run.
    pub logs: Option<Arc<dyn LogCacheClient>>,
    pub cfg: RunConfig,
}

/// Drive `operation` on `app_guid` to a terminal result while tailing logs.
///
/// Every event is forwarded on `event_tx` in arrival order. The lifecycle
/// result is authoritative: losing the log stream only produces an advisory.
/// `OrchestrationEvent::Result` is always the last event sent.
pub(crate) async fn run_orchestration(
    ctx: RunCtx,
    app_guid: &str,
    operation: Operation,
    event_tx: UnboundedSender<OrchestrationEvent>,
) -> Result<OrchestrationResult> {
    let RunCtx {
        resources,
        logs,
        cfg,
    } = ctx;
    let grace = cfg.log_drain_grace;
    let cancel = CancellationToken::new();

    let (life_tx, mut life_rx) = mpsc::channel::<LifecycleEvent>(LIFECYCLE_BUFFER);
    let engine = LifecycleEngine::new(resources, cfg.clone());
    let mut engine_handle = tokio::spawn(engine.run(app_guid.to_string(), operation, life_tx));

    let (log_tx, mut log_rx) = mpsc::channel::<LogEvent>(LOG_BUFFER);
    let log_handle = logs.map(|client| {
        let streamer = LogStreamer::new(client, app_guid, cfg.max_log_reconnects);
        tokio::spawn(streamer.run(cancel.clone(), log_tx))
    });
    let mut logs_open = log_handle.is_some();

    let result = loop {
        tokio::select! {
            ev = life_rx.recv() => match ev {
                Some(LifecycleEvent::State(state)) => {
                    let _ = event_tx.send(OrchestrationEvent::State(state));
                }
                Some(LifecycleEvent::Warnings(warnings)) => {
                    let _ = event_tx.send(OrchestrationEvent::Warnings(warnings));
                }
                Some(LifecycleEvent::Finished(result)) => break result,
                None => {
                    // The engine always sends Finished last, so this is a panic or abort.
                    cancel.cancel();
                    if let Some(h) = log_handle {
                        h.abort();
                    }
                    return match (&mut engine_handle).await {
                        Ok(_) => Err(anyhow!("lifecycle engine ended without a result")),
                        Err(e) => Err(anyhow!("lifecycle engine task failed: {e}")),
                    };
                }
            },
            ev = async {
                if logs_open {
                    return log_rx.recv().await;
                }
                futures::future::pending().await
            } => match ev {
                Some(LogEvent::Message(msg)) => {
                    let _ = event_tx.send(OrchestrationEvent::Log(msg));
                }
                Some(LogEvent::Lost(reason)) => {
                    warn!(app_guid = %app_guid, error = %reason, "Log stream lost; continuing without logs");
                    let _ = event_tx.send(OrchestrationEvent::LogStreamLost(reason));
                    logs_open = false;
                }
                Some(LogEvent::Stopped) | None => logs_open = false,
            },
        }
    };

    cancel.cancel();
    if logs_open {
        drain_logs(&mut log_rx, grace, &event_tx).await;
    }
    if let Some(h) = log_handle {
        // Bounded teardown: whatever has not stopped within the grace period goes.
        h.abort();
    }
    if let Err(e) = engine_handle.await {
        debug!(error = %e, "lifecycle engine join failed after result");
    }

    let _ = event_tx.send(OrchestrationEvent::Result(result.clone()));
    Ok(result)
}

/// Forward log events already in flight until the streamer acknowledges
/// cancellation or `grace` runs out.
async fn drain_logs(
    log_rx: &mut mpsc::Receiver<LogEvent>,
    grace: Duration,
    event_tx: &UnboundedSender<OrchestrationEvent>,
) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match tokio::time::timeout_at(deadline, log_rx.recv()).await {
            Ok(Some(LogEvent::Message(msg))) => {
                let _ = event_tx.send(OrchestrationEvent::Log(msg));
            }
            Ok(Some(LogEvent::Lost(reason))) => {
                let _ = event_tx.send(OrchestrationEvent::LogStreamLost(reason));
                break;
            }
            Ok(Some(LogEvent::Stopped)) | Ok(None) => break,
            Err(_) => {
                warn!(grace_ms = grace.as_millis(), "Log stream did not stop in time");
                break;
            }
        }
    }
}
