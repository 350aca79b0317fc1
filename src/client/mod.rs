//! Collaborator interfaces consumed by the lifecycle engine and log streamer.
//!
//! The engine only sees the [`ResourceClient`] and [`LogCacheClient`] traits;
//! the HTTP implementations live in the submodules.

mod cloud_controller;
mod log_cache;

pub(crate) use cloud_controller::CloudControllerClient;
pub(crate) use log_cache::HttpLogCacheClient;

use crate::error::ClientError;
use crate::model::{Application, Job, LogMessage, ProcessInstance, Warnings};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A successful call: the primary value plus any advisory warnings.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub value: T,
    pub warnings: Warnings,
}

impl<T> Reply<T> {
    pub fn new(value: T, warnings: Warnings) -> Self {
        Self { value, warnings }
    }
}

pub type ApiResult<T> = Result<Reply<T>, ClientError>;

/// Request/response operations against the platform's resource API.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get_application(&self, name: &str, space_guid: &str) -> ApiResult<Application>;

    async fn stop_application(&self, app_guid: &str) -> ApiResult<()>;

    async fn start_application(&self, app_guid: &str) -> ApiResult<()>;

    /// Guid of the app's current droplet, if it has been staged before.
    async fn get_current_droplet(&self, app_guid: &str) -> ApiResult<Option<String>>;

    /// Stage the newest package; returns the identifier of the staging job.
    async fn stage_application(&self, app_guid: &str) -> ApiResult<String>;

    async fn get_job(&self, job_id: &str) -> ApiResult<Job>;

    async fn set_current_droplet(&self, app_guid: &str, droplet_guid: &str) -> ApiResult<()>;

    async fn get_process_instances(&self, app_guid: &str) -> ApiResult<Vec<ProcessInstance>>;
}

/// Receiving ends of one log-cache connection. Both close when the
/// connection ends or cancellation completes.
pub struct LogChannels {
    pub messages: mpsc::Receiver<LogMessage>,
    pub errors: mpsc::Receiver<ClientError>,
}

pub trait LogCacheClient: Send + Sync {
    fn stream_logs(&self, app_guid: &str, cancel: CancellationToken) -> LogChannels;
}
