use crate::client::ResourceClient;
use crate::engine::poll::{next_poll, PollSchedule, Polled};
use crate::error::FailureReason;
use crate::model::{ApplicationStateChange, Job, JobState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Parameters for polling one asynchronous job to completion.
pub(crate) struct JobPollParams<'a> {
    pub client: &'a dyn ResourceClient,
    pub job_id: &'a str,
    /// Phase reported if the job fails or times out.
    pub phase: ApplicationStateChange,
    pub interval: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Poll a job until it reports Complete or Failed, or the timeout elapses.
///
/// The remote job is left alone on timeout. Transient errors are retried up to
/// `max_retries` consecutive times; anything else ends the loop.
pub(crate) async fn poll_job(params: JobPollParams<'_>) -> Polled<Job> {
    let JobPollParams {
        client,
        job_id,
        phase,
        interval,
        timeout,
        max_retries,
    } = params;
    let mut schedule = PollSchedule::new(Instant::now(), interval, timeout);
    let mut warnings = Vec::new();
    let mut failures = 0u32;

    while next_poll(&mut schedule).await {
        match client.get_job(job_id).await {
            Ok(reply) => {
                failures = 0;
                warnings.extend(reply.warnings);
                let job = reply.value;
                match job.state {
                    JobState::Processing => {
                        debug!(job_id = %job_id, poll = schedule.checks(), "Job still processing");
                    }
                    JobState::Complete => {
                        debug!(job_id = %job_id, polls = schedule.checks(), "Job complete");
                        return Polled::ok(warnings, job);
                    }
                    JobState::Failed => {
                        let reason = job
                            .failure_reason
                            .unwrap_or_else(|| "job failed".to_string());
                        return Polled::failed(warnings, FailureReason::JobFailed { phase, reason });
                    }
                }
            }
            Err(e) if e.is_transient() && failures < max_retries => {
                failures += 1;
                warn!(
                    job_id = %job_id,
                    attempt = failures,
                    max_retries,
                    error = %e,
                    "Job poll failed, retrying"
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
