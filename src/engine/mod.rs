mod instances;
mod job;
mod logs;
mod poll;

pub(crate) use logs::LogStreamer;

use crate::client::{ApiResult, ResourceClient};
use crate::engine::instances::{watch_instances, WatchParams, WatchTarget};
use crate::engine::job::{poll_job, JobPollParams};
use crate::engine::poll::Polled;
use crate::error::FailureReason;
use crate::model::{
    ApplicationStateChange, LifecycleEvent, Operation, OrchestrationResult, RunConfig, Warnings,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Drives one lifecycle operation through its phases.
///
/// Phases run strictly in sequence inside the engine's task; each remote
/// mutation is followed by the matching poller before the next phase starts.
pub struct LifecycleEngine {
    client: Arc<dyn ResourceClient>,
    cfg: RunConfig,
}

impl LifecycleEngine {
    pub fn new(client: Arc<dyn ResourceClient>, cfg: RunConfig) -> Self {
        Self { client, cfg }
    }

    /// Run `operation` against `app_guid`, emitting state changes and warnings
    /// on `event_tx`. The returned result is also sent as the final event.
    pub async fn run(
        self,
        app_guid: String,
        operation: Operation,
        event_tx: mpsc::Sender<LifecycleEvent>,
    ) -> OrchestrationResult {
        let mut run = PhaseRun {
            client: self.client.as_ref(),
            cfg: &self.cfg,
            app_guid: &app_guid,
            event_tx: &event_tx,
            current: None,
        };

        let result = match run.drive(operation).await {
            Ok(()) => {
                info!(app_guid = %app_guid, %operation, "Lifecycle operation succeeded");
                OrchestrationResult::Success
            }
            Err(reason) => {
                info!(app_guid = %app_guid, %operation, error = %reason, "Lifecycle operation failed");
                run.transition(ApplicationStateChange::Failed).await;
                OrchestrationResult::Failure(reason)
            }
        };

        let _ = event_tx
            .send(LifecycleEvent::Finished(result.clone()))
            .await;
        result
    }
}

/// State for a single run of the machine.
struct PhaseRun<'a> {
    client: &'a dyn ResourceClient,
    cfg: &'a RunConfig,
    app_guid: &'a str,
    event_tx: &'a mpsc::Sender<LifecycleEvent>,
    current: Option<ApplicationStateChange>,
}

impl PhaseRun<'_> {
    async fn drive(&mut self, operation: Operation) -> Result<(), FailureReason> {
        match operation {
            Operation::Stop => self.stop(true).await,
            Operation::Restart => {
                self.stop(false).await?;
                self.start().await
            }
            Operation::Restage => {
                self.stop(false).await?;
                self.stage().await?;
                self.start().await
            }
            Operation::Start => {
                let droplet = self
                    .call(
                        ApplicationStateChange::Starting,
                        self.client.get_current_droplet(self.app_guid).await,
                    )
                    .await?;
                if droplet.is_none() {
                    debug!(app_guid = %self.app_guid, "No current droplet, staging first");
                    self.stage().await?;
                }
                self.start().await
            }
        }
    }

    async fn stop(&mut self, wait_for_down: bool) -> Result<(), FailureReason> {
        let phase = ApplicationStateChange::Stopping;
        self.transition(phase).await;
        self.call(phase, self.client.stop_application(self.app_guid).await)
            .await?;
        if wait_for_down {
            self.watch(phase, WatchTarget::NoneRunning).await?;
        }
        Ok(())
    }

    async fn stage(&mut self) -> Result<(), FailureReason> {
        let phase = ApplicationStateChange::Staging;
        self.transition(phase).await;
        let job_id = self
            .call(phase, self.client.stage_application(self.app_guid).await)
            .await?;

        let polled = poll_job(JobPollParams {
            client: self.client,
            job_id: &job_id,
            phase,
            interval: self.cfg.poll_interval,
            timeout: self.cfg.staging_timeout,
            max_retries: self.cfg.max_poll_retries,
        })
        .await;
        let job = self.settle(polled).await?;

        let droplet = job.output.ok_or_else(|| FailureReason::JobFailed {
            phase,
            reason: "staging completed without producing a droplet".to_string(),
        })?;
        self.call(
            phase,
            self.client
                .set_current_droplet(self.app_guid, &droplet)
                .await,
        )
        .await
    }

    async fn start(&mut self) -> Result<(), FailureReason> {
        let phase = ApplicationStateChange::Starting;
        self.transition(phase).await;
        self.call(phase, self.client.start_application(self.app_guid).await)
            .await?;

        let phase = ApplicationStateChange::WaitingForApp;
        self.transition(phase).await;
        self.watch(phase, WatchTarget::AnyRunning).await?;

        self.transition(ApplicationStateChange::Running).await;
        Ok(())
    }

    async fn watch(
        &mut self,
        phase: ApplicationStateChange,
        target: WatchTarget,
    ) -> Result<(), FailureReason> {
        let polled = watch_instances(WatchParams {
            client: self.client,
            app_guid: self.app_guid,
            target,
            phase,
            interval: self.cfg.poll_interval,
            timeout: self.cfg.startup_timeout,
            max_retries: self.cfg.max_poll_retries,
        })
        .await;
        self.settle(polled).await.map(|_| ())
    }

    /// Surface a single call's warnings; map its error to a phase failure.
    async fn call<T>(
        &self,
        phase: ApplicationStateChange,
        res: ApiResult<T>,
    ) -> Result<T, FailureReason> {
        match res {
            Ok(reply) => {
                self.warn(reply.warnings).await;
                Ok(reply.value)
            }
            Err(e) => Err(FailureReason::transport(phase, &e)),
        }
    }

    async fn settle<T>(&self, polled: Polled<T>) -> Result<T, FailureReason> {
        self.warn(polled.warnings).await;
        polled.outcome
    }

    async fn warn(&self, warnings: Warnings) {
        if !warnings.is_empty() {
            let _ = self.event_tx.send(LifecycleEvent::Warnings(warnings)).await;
        }
    }

    async fn transition(&mut self, next: ApplicationStateChange) {
        debug_assert!(
            self.current.map_or(true, |cur| cur.rank() <= next.rank()),
            "state change {:?} -> {next:?} goes backwards",
            self.current
        );
        debug!(app_guid = %self.app_guid, from = ?self.current, to = ?next, "State change");
        self.current = Some(next);
        let _ = self.event_tx.send(LifecycleEvent::State(next)).await;
    }
}
