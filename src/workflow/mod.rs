//! The two pipelines: `start-issue` provisions a sandbox for the next issue
//! on the board, `post-merge` tears it down again.
//!
//! Both are strictly ordered and fail fast. A failed step is not rolled
//! back; running `post-merge` is the recovery path for a half-built sandbox.

pub mod context;
pub mod post_merge;
pub mod start_issue;

use std::future::Future;

use tracing::{error, info};

use crate::errors::Result;
use crate::ui::PipelineProgress;

pub use context::{PostMergeOutcome, Services, StartIssueOutcome, TranslatorFactory};

/// Await one step, reporting it to the log and the progress bar. The error
/// is returned unchanged so callers can still match on its variant.
pub(crate) async fn run_step<T>(
    progress: &PipelineProgress,
    name: &'static str,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    run_idempotent_step(progress, name, step, |_| None).await
}

/// Like [`run_step`], but `nothing_done` inspects the result and names why
/// the step had no effect, in which case it is reported as skipped.
pub(crate) async fn run_idempotent_step<T>(
    progress: &PipelineProgress,
    name: &'static str,
    step: impl Future<Output = Result<T>>,
    nothing_done: impl FnOnce(&T) -> Option<&'static str>,
) -> Result<T> {
    progress.start_step(name);
    info!(step = name, "starting step");
    match step.await {
        Ok(value) => {
            match nothing_done(&value) {
                Some(reason) => {
                    info!(step = name, reason, "step skipped");
                    progress.step_skipped(name, reason);
                }
                None => progress.step_done(name),
            }
            Ok(value)
        }
        Err(e) => {
            error!(step = name, error = %e, "step failed");
            progress.step_failed(name, &e.to_string());
            Err(e)
        }
    }
}
