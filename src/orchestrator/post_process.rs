//! Post-run processing utilities.
//!
//! Folds the event feed into a `RunReport` and handles exports once a run completes.

use crate::cli::Cli;
use crate::client::{ApiResult, Reply, ResourceClient};
use crate::model::{
    AppSummary, ApplicationStateChange, InstanceState, Operation, OrchestrationEvent,
    OrchestrationResult, RunReport, Warnings,
};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;

/// Accumulates what a presentation layer saw during one run.
pub(crate) struct RunRecorder {
    operation: Operation,
    app_name: String,
    app_guid: String,
    started: Instant,
    states: Vec<ApplicationStateChange>,
    warnings: Warnings,
    log_lines: u64,
    advisories: Vec<String>,
    app_summary: Option<AppSummary>,
}

impl RunRecorder {
    pub fn new(operation: Operation, app_name: &str, app_guid: &str) -> Self {
        Self {
            operation,
            app_name: app_name.to_string(),
            app_guid: app_guid.to_string(),
            started: Instant::now(),
            states: Vec::new(),
            warnings: Vec::new(),
            log_lines: 0,
            advisories: Vec::new(),
            app_summary: None,
        }
    }

    /// Warnings surfaced before the run started (application lookup).
    pub fn add_warnings(&mut self, warnings: &[String]) {
        self.warnings.extend(warnings.iter().cloned());
    }

    pub fn set_app_summary(&mut self, summary: AppSummary) {
        self.app_summary = Some(summary);
    }

    pub fn add_advisory(&mut self, advisory: String) {
        self.advisories.push(advisory);
    }

    pub fn observe(&mut self, ev: &OrchestrationEvent) {
        match ev {
            OrchestrationEvent::Warnings(w) => self.add_warnings(w),
            OrchestrationEvent::State(s) => self.states.push(*s),
            OrchestrationEvent::Log(_) => self.log_lines += 1,
            OrchestrationEvent::LogStreamLost(reason) => {
                self.add_advisory(format!("log streaming stopped: {reason}"))
            }
            OrchestrationEvent::Result(_) => {}
        }
    }

    pub fn finish(self, result: OrchestrationResult) -> RunReport {
        let timestamp_utc = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        RunReport {
            timestamp_utc,
            operation: self.operation,
            app_name: self.app_name,
            app_guid: self.app_guid,
            states: self.states,
            warnings: self.warnings,
            log_lines: self.log_lines,
            advisories: self.advisories,
            result,
            app_summary: self.app_summary,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Fetch the app's current state and instance counts for display after a
/// successful run. Warnings from both calls are returned in call order.
pub(crate) async fn fetch_app_summary(
    client: &dyn ResourceClient,
    app_name: &str,
    space_guid: &str,
) -> ApiResult<AppSummary> {
    let app = client.get_application(app_name, space_guid).await?;
    let stats = client.get_process_instances(&app.value.guid).await?;

    let mut warnings = app.warnings;
    warnings.extend(stats.warnings);
    let running = stats
        .value
        .iter()
        .filter(|i| i.state == InstanceState::Running)
        .count();
    Ok(Reply::new(
        AppSummary {
            name: app.value.name,
            state: app.value.state,
            instances: stats.value.len(),
            running,
        },
        warnings,
    ))
}

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub report: RunReport,
    pub export_messages: Vec<String>,
}

/// Process a completed run: export the report if requested.
pub(crate) fn process_run_completion(args: &Cli, report: RunReport) -> ProcessedRun {
    let mut export_messages = Vec::new();
    if let Some(export_path) = args.export_json.as_deref() {
        match export_json(export_path, &report) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedRun {
        report,
        export_messages,
    }
}

fn export_json(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(report).context("serialize run report")?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))
}
