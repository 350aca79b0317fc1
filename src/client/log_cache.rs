use super::{LogCacheClient, LogChannels};
use crate::error::ClientError;
use crate::model::{LogMessage, LogSourceType, LogStream};
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Messages buffered per connection before the reader waits on the consumer.
const MESSAGE_BUFFER: usize = 256;
const READ_LIMIT: &str = "1000";

/// Tails an app's logs by walking log-cache's read endpoint forward in time.
#[derive(Clone)]
pub(crate) struct HttpLogCacheClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    poll_interval: Duration,
}

#[derive(Deserialize)]
struct ReadResponse {
    envelopes: EnvelopeBatch,
}

#[derive(Deserialize)]
struct EnvelopeBatch {
    #[serde(default)]
    batch: Vec<Envelope>,
}

#[derive(Deserialize)]
struct Envelope {
    timestamp: serde_json::Value,
    #[serde(default)]
    instance_id: String,
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
    log: Option<EnvelopeLog>,
}

#[derive(Deserialize)]
struct EnvelopeLog {
    #[serde(default)]
    payload: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl HttpLogCacheClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: &str, poll_interval: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            poll_interval,
        }
    }

    async fn read(&self, app_guid: &str, start_time: i64) -> Result<Vec<LogMessage>, ClientError> {
        let url = format!("{}/api/v1/read/{app_guid}", self.base_url);
        let resp = self
            .http
            .get(url)
            .header(AUTHORIZATION, &self.token)
            .query(&[
                ("start_time", start_time.to_string().as_str()),
                ("envelope_types", "LOG"),
                ("descending", "false"),
                ("limit", READ_LIMIT),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                detail: format!("log-cache read failed: {status}"),
            });
        }
        let body: ReadResponse = resp.json().await?;
        Ok(body
            .envelopes
            .batch
            .into_iter()
            .filter_map(decode_envelope)
            .collect())
    }

    async fn tail(
        self,
        app_guid: String,
        cancel: CancellationToken,
        msg_tx: mpsc::Sender<LogMessage>,
        err_tx: mpsc::Sender<ClientError>,
    ) {
        let mut start_time = now_ns();
        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                res = self.read(&app_guid, start_time) => res,
            };
            match batch {
                Ok(messages) => {
                    for msg in messages {
                        start_time = start_time.max(msg.timestamp_ns + 1);
                        if cancel.is_cancelled() || msg_tx.send(msg).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!(app_guid = %app_guid, error = %e, "log-cache read failed");
                    let _ = err_tx.send(e).await;
                    return;
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

impl LogCacheClient for HttpLogCacheClient {
    fn stream_logs(&self, app_guid: &str, cancel: CancellationToken) -> LogChannels {
        let (msg_tx, messages) = mpsc::channel(MESSAGE_BUFFER);
        let (err_tx, errors) = mpsc::channel(1);
        let client = self.clone();
        let app_guid = app_guid.to_string();
        tokio::spawn(client.tail(app_guid, cancel, msg_tx, err_tx));
        LogChannels { messages, errors }
    }
}

fn now_ns() -> i64 {
    let ns = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(ns).unwrap_or(i64::MAX)
}

fn decode_envelope(env: Envelope) -> Option<LogMessage> {
    let log = env.log?;
    let timestamp_ns = match &env.timestamp {
        serde_json::Value::String(s) => s.parse().ok()?,
        serde_json::Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    let payload = base64::engine::general_purpose::STANDARD
        .decode(log.payload.as_bytes())
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or(log.payload);
    let source_tag = env.tags.get("source_type").cloned().unwrap_or_default();
    Some(LogMessage {
        timestamp_ns,
        source_type: LogSourceType::from_tag(&source_tag),
        source_tag,
        source_instance: env.instance_id,
        stream: match log.kind.as_deref() {
            Some("ERR") => LogStream::Err,
            _ => LogStream::Out,
        },
        payload: payload.trim_end_matches('\n').to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_envelope() {
        let raw = r#"{
            "envelopes": { "batch": [
                {
                    "timestamp": "1700000000000000001",
                    "instance_id": "0",
                    "tags": { "source_type": "APP/PROC/WEB" },
                    "log": { "payload": "aGVsbG8K", "type": "OUT" }
                },
                {
                    "timestamp": 1700000000000000002,
                    "tags": { "source_type": "STG" },
                    "log": { "payload": "c3RhZ2luZw==", "type": "ERR" }
                },
                {
                    "timestamp": "1700000000000000003",
                    "tags": { "source_type": "RTR" }
                }
            ] }
        }"#;
        let body: ReadResponse = serde_json::from_str(raw).unwrap();
        let messages: Vec<LogMessage> = body
            .envelopes
            .batch
            .into_iter()
            .filter_map(decode_envelope)
            .collect();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, "hello");
        assert_eq!(messages[0].source_type, LogSourceType::App);
        assert_eq!(messages[0].source_instance, "0");
        assert_eq!(messages[0].timestamp_ns, 1_700_000_000_000_000_001);
        assert_eq!(messages[1].source_type, LogSourceType::Staging);
        assert_eq!(messages[1].stream, LogStream::Err);
        assert_eq!(messages[1].payload, "staging");
    }
}
