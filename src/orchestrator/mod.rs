//! Application-level orchestration utilities.
//!
//! This module owns the run itself (lifecycle engine plus log streamer merged into
//! one event feed) and post-run processing such as report building and exports.
//! CLI layers call into this module to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{run_orchestration, RunCtx};
pub(crate) use post_process::{fetch_app_summary, process_run_completion, RunRecorder};
