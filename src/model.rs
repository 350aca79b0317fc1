use crate::error::FailureReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Advisory strings returned alongside a remote call. Never deduplicated.
pub type Warnings = Vec<String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub api_endpoint: String,
    pub access_token: String,
    pub skip_ssl_validation: bool,
    pub org_name: Option<String>,
    /// User name from the access token, shown in the header.
    pub current_user: Option<String>,
    pub space_guid: String,
    pub space_name: Option<String>,
    #[serde(with = "humantime_serde")]
    pub staging_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub log_poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub log_drain_grace: Duration,
    pub max_poll_retries: u32,
    pub max_log_reconnects: u32,
    pub stream_logs: bool,
    pub user_agent: String,
}

/// Lifecycle operation requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Start,
    Stop,
    Restart,
    Restage,
}

impl Operation {
    pub fn verb(self) -> &'static str {
        match self {
            Operation::Start => "Starting",
            Operation::Stop => "Stopping",
            Operation::Restart => "Restarting",
            Operation::Restage => "Restaging",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Restart => "restart",
            Operation::Restage => "restage",
        };
        f.write_str(s)
    }
}

/// Phase transitions emitted by the lifecycle engine, in the order they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationStateChange {
    Stopping,
    Staging,
    Starting,
    WaitingForApp,
    Running,
    Failed,
}

impl ApplicationStateChange {
    /// Position in the phase order. Staging and Starting share a rank.
    pub fn rank(self) -> u8 {
        match self {
            ApplicationStateChange::Stopping => 0,
            ApplicationStateChange::Staging | ApplicationStateChange::Starting => 1,
            ApplicationStateChange::WaitingForApp => 2,
            ApplicationStateChange::Running => 3,
            ApplicationStateChange::Failed => 4,
        }
    }
}

impl fmt::Display for ApplicationStateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplicationStateChange::Stopping => "stopping",
            ApplicationStateChange::Staging => "staging",
            ApplicationStateChange::Starting => "starting",
            ApplicationStateChange::WaitingForApp => "waiting for app",
            ApplicationStateChange::Running => "running",
            ApplicationStateChange::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSourceType {
    App,
    Staging,
    Api,
    Other(String),
}

impl LogSourceType {
    /// Classify a log-cache `source_type` tag such as `APP/PROC/WEB` or `STG`.
    pub fn from_tag(tag: &str) -> Self {
        let upper = tag.to_ascii_uppercase();
        if upper.starts_with("APP") {
            LogSourceType::App
        } else if upper.starts_with("STG") || upper.starts_with("STAGING") {
            LogSourceType::Staging
        } else if upper.starts_with("API") {
            LogSourceType::Api
        } else {
            LogSourceType::Other(tag.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Out,
    Err,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub timestamp_ns: i64,
    pub source_type: LogSourceType,
    /// Raw tag as delivered, e.g. `APP/PROC/WEB`.
    pub source_tag: String,
    pub source_instance: String,
    pub stream: LogStream,
    pub payload: String,
}

/// Terminal-or-not state of a remote asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Processing,
    Complete,
    Failed,
}

/// Snapshot of a remote job as returned by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub state: JobState,
    pub failure_reason: Option<String>,
    /// Resource produced by the job on completion (e.g. a droplet guid).
    pub output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Starting,
    Running,
    Crashed,
    Down,
    /// Crashed and no longer restarted by the platform.
    Flapping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInstance {
    pub index: u32,
    pub state: InstanceState,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub guid: String,
    pub name: String,
    pub state: String,
}

/// Final outcome of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum OrchestrationResult {
    Success,
    Failure(FailureReason),
}

impl OrchestrationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, OrchestrationResult::Success)
    }
}

/// Events produced by the lifecycle engine task, in FIFO order.
/// `Finished` is always the last message on the channel.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    State(ApplicationStateChange),
    Warnings(Warnings),
    Finished(OrchestrationResult),
}

/// Events produced by the log streamer task.
#[derive(Debug, Clone)]
pub enum LogEvent {
    Message(LogMessage),
    /// Reconnects exhausted. No further events follow.
    Lost(String),
    /// Cancellation acknowledged. No further events follow.
    Stopped,
}

/// The merged, ordered feed consumed by presentation layers.
#[derive(Debug, Clone)]
pub enum OrchestrationEvent {
    Warnings(Warnings),
    State(ApplicationStateChange),
    Log(LogMessage),
    /// Log visibility was lost; the lifecycle keeps going.
    LogStreamLost(String),
    Result(OrchestrationResult),
}

/// App state as displayed after a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSummary {
    pub name: String,
    /// Requested state reported by the platform, e.g. `STARTED`.
    pub state: String,
    pub instances: usize,
    pub running: usize,
}

/// Serializable summary of one run, for JSON output and export.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub timestamp_utc: String,
    pub operation: Operation,
    pub app_name: String,
    pub app_guid: String,
    pub states: Vec<ApplicationStateChange>,
    pub warnings: Warnings,
    pub log_lines: u64,
    pub advisories: Vec<String>,
    pub result: OrchestrationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_summary: Option<AppSummary>,
    pub elapsed_ms: u64,
}
