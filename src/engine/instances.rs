use crate::client::ResourceClient;
use crate::engine::poll::{next_poll, PollSchedule, Polled};
use crate::error::FailureReason;
use crate::model::{ApplicationStateChange, InstanceState, ProcessInstance};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Condition the watcher waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchTarget {
    /// At least one instance RUNNING.
    AnyRunning,
    /// No instance RUNNING or STARTING.
    NoneRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Satisfied,
    Pending,
    Failed(String),
}

fn evaluate(target: WatchTarget, instances: &[ProcessInstance]) -> Verdict {
    match target {
        WatchTarget::AnyRunning => {
            if instances.iter().any(|i| i.state == InstanceState::Running) {
                Verdict::Satisfied
            } else if !instances.is_empty()
                && instances
                    .iter()
                    .all(|i| matches!(i.state, InstanceState::Crashed | InstanceState::Flapping))
            {
                // A partial crash is tolerated: the platform restarts those.
                let crashed = format!("all {} instances crashed", instances.len());
                let detail = match instances.iter().find_map(|i| i.details.as_deref()) {
                    Some(d) => format!("{crashed}: {d}"),
                    None => crashed,
                };
                Verdict::Failed(detail)
            } else {
                Verdict::Pending
            }
        }
        WatchTarget::NoneRunning => {
            let busy = instances
                .iter()
                .any(|i| matches!(i.state, InstanceState::Running | InstanceState::Starting));
            if busy {
                Verdict::Pending
            } else {
                Verdict::Satisfied
            }
        }
    }
}

pub(crate) struct WatchParams<'a> {
    pub client: &'a dyn ResourceClient,
    pub app_guid: &'a str,
    pub target: WatchTarget,
    pub phase: ApplicationStateChange,
    pub interval: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Poll process instances until `target` holds, the instances fail
/// terminally, or the timeout elapses.
pub(crate) async fn watch_instances(params: WatchParams<'_>) -> Polled<Vec<ProcessInstance>> {
    let WatchParams {
        client,
        app_guid,
        target,
        phase,
        interval,
        timeout,
        max_retries,
    } = params;
    let mut schedule = PollSchedule::new(Instant::now(), interval, timeout);
    let mut warnings = Vec::new();
    let mut failures = 0u32;

    while next_poll(&mut schedule).await {
        match client.get_process_instances(app_guid).await {
            Ok(reply) => {
                failures = 0;
                warnings.extend(reply.warnings);
                let instances = reply.value;
                match evaluate(target, &instances) {
                    Verdict::Satisfied => {
                        debug!(app_guid = %app_guid, ?target, polls = schedule.checks(), "Instances reached target");
                        return Polled::ok(warnings, instances);
                    }
                    Verdict::Pending => {
                        debug!(
                            app_guid = %app_guid,
                            ?target,
                            instances = instances.len(),
                            "Waiting for instances"
                        );
                    }
                    Verdict::Failed(detail) => {
                        return Polled::failed(
                            warnings,
                            FailureReason::InstancesNeverReachedTarget { phase, detail },
                        );
                    }
                }
            }
            Err(e) if e.is_transient() && failures < max_retries => {
                failures += 1;
                warn!(
                    app_guid = %app_guid,
                    attempt = failures,
                    max_retries,
                    error = %e,
                    "Instance poll failed, retrying"
                );
            }
            Err(e) => return Polled::failed(warnings, FailureReason::transport(phase, &e)),
        }
    }

    Polled::failed(
        warnings,
        FailureReason::TimeoutExceeded {
            phase,
            after: timeout,
        },
    )
}
