//! Test fixtures: scripted fakes of the resource API and log-cache collaborators.

use crate::client::{ApiResult, LogCacheClient, LogChannels, Reply, ResourceClient};
use crate::error::ClientError;
use crate::model::{
    Application, InstanceState, Job, JobState, LogMessage, LogSourceType, LogStream,
    ProcessInstance, RunConfig,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A RunConfig with short, round timings for virtual-clock tests.
pub fn test_run_config() -> RunConfig {
    RunConfig {
        api_endpoint: "https://api.example.test".to_string(),
        access_token: "bearer test-token".to_string(),
        skip_ssl_validation: false,
        org_name: Some("org".to_string()),
        current_user: Some("admin".to_string()),
        space_guid: "space-guid".to_string(),
        space_name: Some("space".to_string()),
        staging_timeout: Duration::from_secs(60),
        startup_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_secs(1),
        log_poll_interval: Duration::from_millis(500),
        log_drain_grace: Duration::from_secs(2),
        max_poll_retries: 3,
        max_log_reconnects: 2,
        stream_logs: true,
        user_agent: "cfrun-test".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetApplication,
    Stop,
    Start,
    GetCurrentDroplet,
    Stage,
    GetJob,
    SetCurrentDroplet(String),
    GetInstances,
}

struct Script {
    stop: ApiResult<()>,
    start: ApiResult<()>,
    droplet: ApiResult<Option<String>>,
    stage: ApiResult<String>,
    set_droplet: ApiResult<()>,
    jobs: VecDeque<ApiResult<Job>>,
    instances: VecDeque<ApiResult<Vec<ProcessInstance>>>,
}

/// Scripted resource client. Queued job and instance replies are consumed in
/// order; the last one repeats once the queue is down to a single entry.
pub struct FakeResourceClient {
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
}

impl Default for FakeResourceClient {
    fn default() -> Self {
        Self {
            script: Mutex::new(Script {
                stop: ok(()),
                start: ok(()),
                droplet: ok(Some("droplet-1".to_string())),
                stage: ok("https://api.example.test/v3/builds/build-1".to_string()),
                set_droplet: ok(()),
                jobs: VecDeque::new(),
                instances: VecDeque::new(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(self, jobs: Vec<ApiResult<Job>>) -> Self {
        self.script.lock().unwrap().jobs = jobs.into();
        self
    }

    pub fn with_instances(self, instances: Vec<ApiResult<Vec<ProcessInstance>>>) -> Self {
        self.script.lock().unwrap().instances = instances.into();
        self
    }

    pub fn with_droplet(self, droplet: Option<&str>) -> Self {
        self.script.lock().unwrap().droplet = ok(droplet.map(str::to_string));
        self
    }

    pub fn with_stop(self, reply: ApiResult<()>) -> Self {
        self.script.lock().unwrap().stop = reply;
        self
    }

    pub fn with_start(self, reply: ApiResult<()>) -> Self {
        self.script.lock().unwrap().start = reply;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn next_reply<T: Clone>(queue: &mut VecDeque<ApiResult<T>>, what: &str) -> ApiResult<T> {
    match queue.len() {
        0 => Err(ClientError::Decode(format!("no scripted {what} reply"))),
        1 => queue[0].clone(),
        _ => queue.pop_front().unwrap(),
    }
}

#[async_trait]
impl ResourceClient for FakeResourceClient {
    async fn get_application(&self, name: &str, _space_guid: &str) -> ApiResult<Application> {
        self.record(Call::GetApplication);
        ok(Application {
            guid: format!("{name}-guid"),
            name: name.to_string(),
            state: "STARTED".to_string(),
        })
    }

    async fn stop_application(&self, _app_guid: &str) -> ApiResult<()> {
        self.record(Call::Stop);
        self.script.lock().unwrap().stop.clone()
    }

    async fn start_application(&self, _app_guid: &str) -> ApiResult<()> {
        self.record(Call::Start);
        self.script.lock().unwrap().start.clone()
    }

    async fn get_current_droplet(&self, _app_guid: &str) -> ApiResult<Option<String>> {
        self.record(Call::GetCurrentDroplet);
        self.script.lock().unwrap().droplet.clone()
    }

    async fn stage_application(&self, _app_guid: &str) -> ApiResult<String> {
        self.record(Call::Stage);
        self.script.lock().unwrap().stage.clone()
    }

    async fn get_job(&self, _job_id: &str) -> ApiResult<Job> {
        self.record(Call::GetJob);
        next_reply(&mut self.script.lock().unwrap().jobs, "job")
    }

    async fn set_current_droplet(&self, _app_guid: &str, droplet_guid: &str) -> ApiResult<()> {
        self.record(Call::SetCurrentDroplet(droplet_guid.to_string()));
        self.script.lock().unwrap().set_droplet.clone()
    }

    async fn get_process_instances(&self, _app_guid: &str) -> ApiResult<Vec<ProcessInstance>> {
        self.record(Call::GetInstances);
        next_reply(&mut self.script.lock().unwrap().instances, "instances")
    }
}

pub fn ok<T>(value: T) -> ApiResult<T> {
    Ok(Reply::new(value, Vec::new()))
}

pub fn ok_with_warnings<T>(value: T, warnings: &[&str]) -> ApiResult<T> {
    Ok(Reply::new(
        value,
        warnings.iter().map(|w| w.to_string()).collect(),
    ))
}

pub fn transient<T>() -> ApiResult<T> {
    Err(ClientError::Transport("connection reset".to_string()))
}

pub fn job(state: JobState) -> ApiResult<Job> {
    ok(Job {
        id: "job-1".to_string(),
        state,
        failure_reason: None,
        output: (state == JobState::Complete).then(|| "droplet-2".to_string()),
    })
}

pub fn failed_job(reason: &str) -> ApiResult<Job> {
    ok(Job {
        id: "job-1".to_string(),
        state: JobState::Failed,
        failure_reason: Some(reason.to_string()),
        output: None,
    })
}

pub fn instances(states: &[InstanceState]) -> ApiResult<Vec<ProcessInstance>> {
    ok(states
        .iter()
        .enumerate()
        .map(|(i, s)| ProcessInstance {
            index: i as u32,
            state: *s,
            details: None,
        })
        .collect())
}

pub fn log_line(payload: &str) -> LogMessage {
    LogMessage {
        timestamp_ns: 1_700_000_000_000_000_000,
        source_type: LogSourceType::App,
        source_tag: "APP/PROC/WEB".to_string(),
        source_instance: "0".to_string(),
        stream: LogStream::Out,
        payload: payload.to_string(),
    }
}

/// How a scripted log-cache connection ends after its messages are sent.
#[derive(Debug, Clone)]
pub enum ConnectionEnd {
    Error(ClientError),
    Close,
    /// Stay open until cancelled.
    Hang,
    /// Keep emitting a line every period until cancelled.
    Endless(Duration),
    /// Keep emitting a line every period, ignoring cancellation, until the
    /// receiver goes away.
    Stubborn(Duration),
}

#[derive(Debug, Clone)]
pub struct ScriptedConnection {
    pub messages: Vec<LogMessage>,
    pub gap: Duration,
    pub end: ConnectionEnd,
}

impl ScriptedConnection {
    pub fn new(messages: Vec<LogMessage>, end: ConnectionEnd) -> Self {
        Self {
            messages,
            gap: Duration::ZERO,
            end,
        }
    }

    pub fn with_gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }
}

/// Scripted log-cache. Each `stream_logs` call takes the next connection;
/// once the script runs out, connections hang until cancelled.
#[derive(Default)]
pub struct FakeLogCache {
    connections: Mutex<VecDeque<ScriptedConnection>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl FakeLogCache {
    pub fn new(connections: Vec<ScriptedConnection>) -> Self {
        Self {
            connections: Mutex::new(connections.into()),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> u32 {
        self.tokens.lock().unwrap().len() as u32
    }

    /// Whether every connection opened so far has been told to stop.
    pub fn all_released(&self) -> bool {
        self.tokens.lock().unwrap().iter().all(|t| t.is_cancelled())
    }
}

impl LogCacheClient for FakeLogCache {
    fn stream_logs(&self, _app_guid: &str, cancel: CancellationToken) -> LogChannels {
        self.tokens.lock().unwrap().push(cancel.clone());
        let conn = self
            .connections
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedConnection::new(Vec::new(), ConnectionEnd::Hang));
        let (msg_tx, messages) = mpsc::channel(16);
        let (err_tx, errors) = mpsc::channel(1);

        tokio::spawn(async move {
            for msg in conn.messages {
                if !conn.gap.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(conn.gap) => {}
                    }
                }
                if cancel.is_cancelled() || msg_tx.send(msg).await.is_err() {
                    return;
                }
            }
            match conn.end {
                ConnectionEnd::Error(e) => {
                    let _ = err_tx.send(e).await;
                }
                ConnectionEnd::Close => {}
                ConnectionEnd::Hang => cancel.cancelled().await,
                ConnectionEnd::Endless(period) => {
                    let mut n = 0u64;
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(period) => {}
                        }
                        n += 1;
                        if msg_tx.send(log_line(&format!("tick {n}"))).await.is_err() {
                            return;
                        }
                    }
                }
                ConnectionEnd::Stubborn(period) => {
                    let mut n = 0u64;
                    loop {
                        tokio::time::sleep(period).await;
                        n += 1;
                        if msg_tx.send(log_line(&format!("late {n}"))).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        LogChannels { messages, errors }
    }
}
