use crate::client::{CloudControllerClient, HttpLogCacheClient, LogCacheClient, ResourceClient};
use crate::config::CfConfig;
use crate::model::{ApplicationStateChange, Operation, OrchestrationEvent, RunConfig};
use crate::orchestrator::{
    fetch_app_summary, process_run_completion, run_orchestration, RunCtx, RunRecorder,
};
use crate::text_summary::{build_text_summary, format_log_line};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use time::UtcOffset;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const LOG_POLL_INTERVAL: Duration = Duration::from_millis(500);
const LOG_DRAIN_GRACE: Duration = Duration::from_secs(2);
const MAX_POLL_RETRIES: u32 = 3;
const MAX_LOG_RECONNECTS: u32 = 5;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "cfrun",
    version,
    about = "Start, stop, restart or restage a Cloud Foundry app while tailing its logs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Print a JSON run report instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Export the run report as JSON
    #[arg(long, global = true)]
    pub export_json: Option<std::path::PathBuf>,

    /// Do not tail application logs during the operation
    #[arg(long, global = true)]
    pub no_logs: bool,

    /// Enable debug diagnostics on stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Interval between job and instance polls
    #[arg(long, global = true, default_value = "1s")]
    pub poll_interval: humantime::Duration,

    /// Minutes to wait for staging to finish
    #[arg(long, global = true, env = "CF_STAGING_TIMEOUT", default_value_t = 15)]
    pub staging_timeout: u64,

    /// Minutes to wait for the app to start
    #[arg(long, global = true, env = "CF_STARTUP_TIMEOUT", default_value_t = 5)]
    pub startup_timeout: u64,

    /// API endpoint (defaults to the CF CLI target)
    #[arg(long, global = true)]
    pub api: Option<String>,

    /// OAuth token including the `bearer` prefix (defaults to the CF CLI token)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Space GUID (defaults to the CF CLI targeted space)
    #[arg(long, global = true)]
    pub space_guid: Option<String>,

    /// Skip TLS certificate validation
    #[arg(long, global = true)]
    pub skip_ssl_validation: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Start an app, staging it first if it has never been staged
    Start { app_name: String },
    /// Stop an app and wait for its instances to go down
    Stop { app_name: String },
    /// Stop and start an app
    Restart { app_name: String },
    /// Stage a fresh droplet and restart the app with it
    Restage { app_name: String },
}

impl Command {
    pub fn target(&self) -> (Operation, &str) {
        match self {
            Command::Start { app_name } => (Operation::Start, app_name),
            Command::Stop { app_name } => (Operation::Stop, app_name),
            Command::Restart { app_name } => (Operation::Restart, app_name),
            Command::Restage { app_name } => (Operation::Restage, app_name),
        }
    }
}

/// Build a `RunConfig` from CLI arguments, falling back to the CF CLI config.
pub fn build_config(args: &Cli, cf: &CfConfig) -> Result<RunConfig> {
    let api_endpoint = args.api.clone().unwrap_or_else(|| cf.target.clone());
    if api_endpoint.is_empty() {
        bail!("no API endpoint set; run `cf login` or pass --api");
    }
    let access_token = args
        .token
        .clone()
        .unwrap_or_else(|| cf.access_token.clone());
    if access_token.is_empty() {
        bail!("not logged in; run `cf login` or pass --token");
    }
    let space_guid = args
        .space_guid
        .clone()
        .unwrap_or_else(|| cf.space_fields.guid.clone());
    if space_guid.is_empty() {
        bail!("no space targeted; run `cf target -s SPACE` or pass --space-guid");
    }
    let current_user = crate::config::token_user_name(&access_token);

    Ok(RunConfig {
        api_endpoint: api_endpoint.trim_end_matches('/').to_string(),
        access_token,
        skip_ssl_validation: args.skip_ssl_validation || cf.ssl_disabled,
        org_name: cf.org_name(),
        current_user,
        space_guid,
        space_name: cf.space_name(),
        staging_timeout: minutes(args.staging_timeout, "staging-timeout")?,
        startup_timeout: minutes(args.startup_timeout, "startup-timeout")?,
        poll_interval: Duration::from(args.poll_interval),
        log_poll_interval: LOG_POLL_INTERVAL,
        log_drain_grace: LOG_DRAIN_GRACE,
        max_poll_retries: MAX_POLL_RETRIES,
        max_log_reconnects: MAX_LOG_RECONNECTS,
        stream_logs: !args.no_logs,
        user_agent: format!("cfrun/{}", env!("CARGO_PKG_VERSION")),
    })
}

fn minutes(value: u64, flag: &str) -> Result<Duration> {
    value
        .checked_mul(60)
        .map(Duration::from_secs)
        .with_context(|| format!("--{flag} of {value} minutes is too large"))
}

/// Run the requested operation. Returns whether it succeeded.
pub async fn run(args: Cli) -> Result<bool> {
    let cf = crate::config::load()?;
    let cfg = build_config(&args, &cf)?;
    let (operation, app_name) = args.command.target();
    let app_name = app_name.to_string();
    let text = !args.json;

    let cc = Arc::new(CloudControllerClient::new(&cfg)?);
    let (out_tx, out_handle) = spawn_output_writer();

    if text {
        let _ = out_tx.send(OutputLine::Stdout(header_line(operation, &app_name, &cfg)));
    }

    let app = cc
        .get_application(&app_name, &cfg.space_guid)
        .await
        .with_context(|| format!("look up app {app_name}"))?;
    debug!(app_guid = %app.value.guid, state = %app.value.state, "Resolved app");
    let mut recorder = RunRecorder::new(operation, &app.value.name, &app.value.guid);
    recorder.add_warnings(&app.warnings);
    if text {
        for w in &app.warnings {
            let _ = out_tx.send(OutputLine::Stderr(w.clone()));
        }
    }

    let logs: Option<Arc<dyn LogCacheClient>> = if cfg.stream_logs {
        match cc.log_cache_url().await {
            Ok(url) => Some(Arc::new(HttpLogCacheClient::new(
                cc.http(),
                &url,
                cc.token(),
                cfg.log_poll_interval,
            )) as Arc<dyn LogCacheClient>),
            Err(e) => {
                warn!(error = %e, "Log-cache endpoint discovery failed");
                let advisory = format!("log streaming unavailable: {e}");
                if text {
                    let _ = out_tx.send(OutputLine::Stderr(capitalize(&advisory)));
                }
                recorder.add_advisory(advisory);
                None
            }
        }
    } else {
        None
    };

    let space_guid = cfg.space_guid.clone();
    let ctx = RunCtx {
        resources: cc.clone(),
        logs,
        cfg,
    };
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<OrchestrationEvent>();
    let app_guid = app.value.guid.clone();
    let handle =
        tokio::spawn(async move { run_orchestration(ctx, &app_guid, operation, evt_tx).await });

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    loop {
        tokio::select! {
            ev = evt_rx.recv() => match ev {
                Some(ev) => {
                    recorder.observe(&ev);
                    if text {
                        if let Some(line) = present(&ev, &app_name, offset) {
                            let _ = out_tx.send(line);
                        }
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "Interrupted. The {operation} of {app_name} may still be in progress on the platform."
                )));
                handle.abort();
                drop(out_tx);
                let _ = out_handle.await;
                return Ok(false);
            }
        }
    }

    let result = handle.await.context("orchestration task failed")??;
    if result.is_success() && operation != Operation::Stop {
        match fetch_app_summary(cc.as_ref(), &app_name, &space_guid).await {
            Ok(summary) => {
                if text {
                    for w in &summary.warnings {
                        let _ = out_tx.send(OutputLine::Stderr(w.clone()));
                    }
                }
                recorder.add_warnings(&summary.warnings);
                recorder.set_app_summary(summary.value);
            }
            Err(e) => {
                warn!(error = %e, "App summary lookup failed");
                recorder.add_advisory(format!("app summary unavailable: {e}"));
            }
        }
    }
    let processed = process_run_completion(&args, recorder.finish(result));

    if text {
        for line in build_text_summary(&processed.report).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    } else {
        let out = serde_json::to_string_pretty(&processed.report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    }
    for msg in processed.export_messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(processed.report.result.is_success())
}

fn header_line(operation: Operation, app_name: &str, cfg: &RunConfig) -> String {
    let mut line = format!("{} app {app_name}", operation.verb());
    if let (Some(org), Some(space)) = (cfg.org_name.as_deref(), cfg.space_name.as_deref()) {
        line.push_str(&format!(" in org {org} / space {space}"));
    }
    if let Some(user) = cfg.current_user.as_deref() {
        line.push_str(&format!(" as {user}"));
    }
    line.push_str("...");
    line
}

fn state_line(state: ApplicationStateChange, app_name: &str) -> String {
    match state {
        ApplicationStateChange::Stopping => format!("Stopping app {app_name}..."),
        ApplicationStateChange::Staging => format!("Staging app {app_name}..."),
        ApplicationStateChange::Starting => format!("Starting app {app_name}..."),
        ApplicationStateChange::WaitingForApp => format!("Waiting for app {app_name} to start..."),
        ApplicationStateChange::Running => format!("App {app_name} is running."),
        ApplicationStateChange::Failed => format!("App {app_name} failed."),
    }
}

fn present(ev: &OrchestrationEvent, app_name: &str, offset: UtcOffset) -> Option<OutputLine> {
    match ev {
        OrchestrationEvent::Warnings(w) => Some(OutputLine::Stderr(w.join("\n"))),
        OrchestrationEvent::State(s) => Some(OutputLine::Stdout(state_line(*s, app_name))),
        OrchestrationEvent::Log(msg) => Some(OutputLine::Stdout(format_log_line(msg, offset))),
        OrchestrationEvent::LogStreamLost(reason) => Some(OutputLine::Stderr(format!(
            "Log streaming stopped ({reason}); the operation continues without logs."
        ))),
        OrchestrationEvent::Result(_) => None,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
