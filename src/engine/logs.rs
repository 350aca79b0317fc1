//! Log streamer: keeps a log-cache connection alive for one run.

use crate::client::{LogCacheClient, LogChannels};
use crate::model::LogEvent;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(250);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub(crate) struct LogStreamer {
    client: Arc<dyn LogCacheClient>,
    app_guid: String,
    max_reconnects: u32,
}

impl LogStreamer {
    pub fn new(client: Arc<dyn LogCacheClient>, app_guid: &str, max_reconnects: u32) -> Self {
        Self {
            client,
            app_guid: app_guid.to_string(),
            max_reconnects,
        }
    }

    /// Forward log messages until cancelled or the connection is lost for good.
    ///
    /// Always ends with exactly one of `LogEvent::Stopped` or `LogEvent::Lost`
    /// unless the receiver has gone away.
    pub async fn run(self, cancel: CancellationToken, event_tx: mpsc::Sender<LogEvent>) {
        let mut attempts = 0u32;
        let mut delay = INITIAL_RECONNECT_DELAY;

        loop {
            let conn_cancel = cancel.child_token();
            let LogChannels {
                mut messages,
                mut errors,
            } = self.client.stream_logs(&self.app_guid, conn_cancel.clone());
            let mut errors_open = true;

            let failure = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(app_guid = %self.app_guid, "Log stream cancelled");
                        let _ = event_tx.send(LogEvent::Stopped).await;
                        return;
                    }
                    msg = messages.recv() => match msg {
                        Some(msg) => {
                            attempts = 0;
                            delay = INITIAL_RECONNECT_DELAY;
                            if event_tx.send(LogEvent::Message(msg)).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            break errors
                                .try_recv()
                                .map(|e| e.to_string())
                                .unwrap_or_else(|_| "log stream closed".to_string());
                        }
                    },
                    err = errors.recv(), if errors_open => match err {
                        Some(e) => break e.to_string(),
                        None => errors_open = false,
                    },
                }
            };
            conn_cancel.cancel();

            attempts += 1;
            if attempts > self.max_reconnects {
                warn!(
                    app_guid = %self.app_guid,
                    attempts,
                    error = %failure,
                    "Log stream lost"
                );
                let _ = event_tx.send(LogEvent::Lost(failure)).await;
                return;
            }

            let wait = jittered_delay(delay);
            debug!(
                app_guid = %self.app_guid,
                attempt = attempts,
                max_reconnects = self.max_reconnects,
                error = %failure,
                delay_ms = wait.as_millis(),
                "Log stream interrupted, reconnecting"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = event_tx.send(LogEvent::Stopped).await;
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }
    }
}

fn jittered_delay(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..1.25);
    base.mul_f64(factor)
}
