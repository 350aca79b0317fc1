//! Error taxonomy for collaborator calls and lifecycle phases.

use crate::model::ApplicationStateChange;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A single failed call to the Cloud Controller or log-cache.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Connection refused, reset, or timed out before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request failed with status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether a bounded retry is worth attempting.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Status { status, .. } => *status >= 500 || *status == 429,
            ClientError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ClientError::Status {
                status: status.as_u16(),
                detail: e.to_string(),
            }
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

/// Why a lifecycle phase ended the run. Every variant names the failing phase.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FailureReason {
    #[error("{phase} failed: {reason}")]
    JobFailed {
        phase: ApplicationStateChange,
        reason: String,
    },

    #[error("{phase} failed: instances never reached the target state ({detail})")]
    InstancesNeverReachedTarget {
        phase: ApplicationStateChange,
        detail: String,
    },

    #[error("{phase} timed out after {}", humantime::format_duration(*after))]
    TimeoutExceeded {
        phase: ApplicationStateChange,
        #[serde(with = "humantime_serde")]
        after: Duration,
    },

    #[error("{phase} failed: {message}")]
    Transport {
        phase: ApplicationStateChange,
        message: String,
    },
}

impl FailureReason {
    pub fn phase(&self) -> ApplicationStateChange {
        match self {
            FailureReason::JobFailed { phase, .. }
            | FailureReason::InstancesNeverReachedTarget { phase, .. }
            | FailureReason::TimeoutExceeded { phase, .. }
            | FailureReason::Transport { phase, .. } => *phase,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureReason::TimeoutExceeded { .. })
    }

    pub fn transport(phase: ApplicationStateChange, err: &ClientError) -> Self {
        FailureReason::Transport {
            phase,
            message: err.to_string(),
        }
    }
}
