//! Text formatting for CLI output.
//!
//! Formats streamed log lines and the human-readable summary for text mode.

use crate::model::{LogMessage, LogStream, OrchestrationResult, RunReport};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// `  <time> [<source>/<instance>] <OUT|ERR> <payload>`
pub(crate) fn format_log_line(msg: &LogMessage, offset: UtcOffset) -> String {
    let fmt = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:2][offset_hour sign:mandatory]:[offset_minute]"
    );
    let ts = OffsetDateTime::from_unix_timestamp_nanos(msg.timestamp_ns as i128)
        .ok()
        .and_then(|t| t.to_offset(offset).format(&fmt).ok())
        .unwrap_or_else(|| msg.timestamp_ns.to_string());
    let stream = match msg.stream {
        LogStream::Out => "OUT",
        LogStream::Err => "ERR",
    };
    format!(
        "  {ts} [{}/{}] {stream} {}",
        msg.source_tag,
        msg.source_instance,
        msg.payload.trim_end()
    )
}

pub(crate) fn result_line(result: &OrchestrationResult) -> String {
    match result {
        OrchestrationResult::Success => "OK".to_string(),
        OrchestrationResult::Failure(reason) => format!("FAILED: {reason}"),
    }
}

/// Build the closing summary from a finished report.
pub(crate) fn build_text_summary(report: &RunReport) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(result_line(&report.result));
    if let Some(app) = &report.app_summary {
        lines.push(String::new());
        lines.push(format!("name:              {}", app.name));
        lines.push(format!("requested state:   {}", app.state.to_lowercase()));
        lines.push(format!("instances:         {}/{}", app.running, app.instances));
        lines.push(String::new());
    }
    if !report.states.is_empty() {
        let states: Vec<String> = report.states.iter().map(|s| s.to_string()).collect();
        lines.push(format!("States: {}", states.join(" -> ")));
    }
    lines.push(format!(
        "Warnings: {}  Log lines: {}  Elapsed: {:.1}s",
        report.warnings.len(),
        report.log_lines,
        report.elapsed_ms as f64 / 1000.0
    ));
    for advisory in &report.advisories {
        lines.push(format!("Note: {advisory}"));
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::model::{AppSummary, ApplicationStateChange, Operation};
    use crate::testing::log_line;
    use std::time::Duration;

    fn report(result: OrchestrationResult) -> RunReport {
        RunReport {
            timestamp_utc: "2024-01-01T00:00:00Z".to_string(),
            operation: Operation::Restart,
            app_name: "web".to_string(),
            app_guid: "web-guid".to_string(),
            states: vec![
                ApplicationStateChange::Stopping,
                ApplicationStateChange::Starting,
                ApplicationStateChange::WaitingForApp,
                ApplicationStateChange::Running,
            ],
            warnings: vec!["w".to_string()],
            log_lines: 12,
            advisories: Vec::new(),
            result,
            app_summary: None,
            elapsed_ms: 4_300,
        }
    }

    #[test]
    fn test_log_line_format() {
        let mut msg = log_line("listening on 8080\n");
        msg.timestamp_ns = 1_700_000_000_120_000_000;
        msg.stream = LogStream::Err;

        let line = format_log_line(&msg, UtcOffset::UTC);

        assert_eq!(
            line,
            "  2023-11-14T22:13:20.12+00:00 [APP/PROC/WEB/0] ERR listening on 8080"
        );
    }

    #[test]
    fn test_summary_success() {
        let summary = build_text_summary(&report(OrchestrationResult::Success));

        assert_eq!(summary.lines[0], "OK");
        assert_eq!(
            summary.lines[1],
            "States: stopping -> starting -> waiting for app -> running"
        );
        assert_eq!(summary.lines[2], "Warnings: 1  Log lines: 12  Elapsed: 4.3s");
    }

    #[test]
    fn test_summary_shows_app_after_success() {
        let mut r = report(OrchestrationResult::Success);
        r.app_summary = Some(AppSummary {
            name: "web".to_string(),
            state: "STARTED".to_string(),
            instances: 3,
            running: 2,
        });

        let summary = build_text_summary(&r);

        assert_eq!(summary.lines[0], "OK");
        assert!(summary.lines.contains(&"requested state:   started".to_string()));
        assert!(summary.lines.contains(&"instances:         2/3".to_string()));
    }

    #[test]
    fn test_summary_failure_names_phase_and_cause() {
        let mut r = report(OrchestrationResult::Failure(FailureReason::TimeoutExceeded {
            phase: ApplicationStateChange::WaitingForApp,
            after: Duration::from_secs(300),
        }));
        r.advisories.push("log streaming stopped: connection reset".to_string());

        let summary = build_text_summary(&r);

        assert!(summary.lines[0].starts_with("FAILED: "));
        assert!(summary.lines[0].contains("timed out"));
        assert_eq!(
            summary.lines.last().map(String::as_str),
            Some("Note: log streaming stopped: connection reset")
        );
    }
}
