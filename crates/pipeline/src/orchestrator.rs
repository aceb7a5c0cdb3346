//! Register-triggered pipeline orchestrator.
//!
//! One run per trigger: lease the base address's block, reset it, then
//! walk Sourcing -> Uploading -> Grading -> ParsingResult -> Done,
//! publishing the status *before* each blocking call so a poller can
//! watch progress. A failing step leaves the status where it is, records
//! the error code and ends the run. Nothing is retried.
//!
//! | Step           | Failure leaves registers at |
//! |----------------|-----------------------------|
//! | sourcing       | `(1, 1, 0)`                 |
//! | uploading      | `(2, 2, 0)`                 |
//! | grading        | `(3, 4, 0)`                 |
//! | parsing result | `(4, 5, 0)`                 |
//!
//! A successful run ends at `(5, 0, result)`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use regscore_core::capability::{ImageSource, ScriptError, Scorer, SourceError, UploadError, Uploader};
use regscore_core::error::CoreError;
use regscore_core::registers::{BlockLease, RegisterStore, MAX_BLOCK_BASE};
use regscore_core::run::{RunErrorCode, RunOutcome, RunStatus};
use regscore_core::types::{RegisterAddress, RunId};

pub struct Orchestrator {
    registers: Arc<RegisterStore>,
    source: Arc<dyn ImageSource>,
    uploader: Arc<dyn Uploader>,
    scorer: Arc<dyn Scorer>,
    /// Upper bound for each blocking step. `None` waits forever.
    step_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(
        registers: Arc<RegisterStore>,
        source: Arc<dyn ImageSource>,
        uploader: Arc<dyn Uploader>,
        scorer: Arc<dyn Scorer>,
    ) -> Self {
        Self {
            registers,
            source,
            uploader,
            scorer,
            step_timeout: None,
        }
    }

    /// Bound each sourcing, upload and grading call.
    pub fn with_step_timeout(mut self, step_timeout: Option<Duration>) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub fn registers(&self) -> &Arc<RegisterStore> {
        &self.registers
    }

    /// Start a run for `base` in the background and return immediately.
    ///
    /// The spawned task is not tracked. A trigger on a base whose previous
    /// run is still in flight queues behind it.
    pub fn trigger(self: &Arc<Self>, base: RegisterAddress) -> Result<(), CoreError> {
        if base > MAX_BLOCK_BASE {
            return Err(CoreError::BlockOutOfRange(base));
        }

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            match orchestrator.run(base).await {
                Ok(RunOutcome::Done(value)) => tracing::info!(base, value, "Run finished"),
                Ok(RunOutcome::Failed { .. }) => {}
                Err(e) => tracing::error!(base, error = %e, "Run could not start"),
            }
        });
        Ok(())
    }

    /// Execute one run for `base` to its terminal state.
    pub async fn run(&self, base: RegisterAddress) -> Result<RunOutcome, CoreError> {
        let run_id = RunId::new();
        let span = tracing::info_span!("run", %run_id, base);

        async {
            let lease = self.registers.lease(base).await?;
            let outcome = self.drive(&lease).await;

            let registers = lease.snapshot();
            debug_assert_eq!(registers, outcome.registers(), "outcome disagrees with its block");
            tracing::debug!(?registers, "Run reached terminal state");
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, lease: &BlockLease) -> RunOutcome {
        lease.reset();
        lease.set_status(RunStatus::Sourcing);
        tracing::info!("Calling sourcer");

        let image = match self.bounded(self.source.get_image(), SourceError::Timeout).await {
            Ok(image) => image,
            Err(e) => return fail(lease, RunStatus::Sourcing, RunErrorCode::SourceError, &e),
        };
        tracing::info!(bytes = image.data.len(), metadata = ?image.metadata, "Obtained image");

        lease.set_status(RunStatus::Uploading);
        let response = match self.bounded(self.uploader.upload(image), UploadError::Timeout).await {
            Ok(response) => response,
            Err(e) => return fail(lease, RunStatus::Uploading, RunErrorCode::UploadError, &e),
        };

        lease.set_status(RunStatus::Grading);
        lease.set_error(RunErrorCode::None);
        let score = match self.bounded(self.scorer.score(&response), ScriptError::Timeout).await {
            Ok(score) => score,
            Err(e) => return fail(lease, RunStatus::Grading, RunErrorCode::ScriptError, &e),
        };

        lease.set_status(RunStatus::ParsingResult);
        lease.set_error(RunErrorCode::None);
        let value = match score.to_register() {
            Ok(value) => value,
            Err(e) => {
                return fail(
                    lease,
                    RunStatus::ParsingResult,
                    RunErrorCode::ResultConversionError,
                    &e,
                )
            }
        };
        tracing::info!(%score, value, "Grader result converted");

        lease.set_result(value);
        lease.set_status(RunStatus::Done);
        RunOutcome::Done(value)
    }

    async fn bounded<T, E, F>(&self, step: F, on_timeout: fn(Duration) -> E) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        match self.step_timeout {
            Some(limit) => tokio::time::timeout(limit, step)
                .await
                .unwrap_or_else(|_| Err(on_timeout(limit))),
            None => step.await,
        }
    }
}

/// Record a failed step; the status register already names the step.
fn fail(
    lease: &BlockLease,
    status: RunStatus,
    error: RunErrorCode,
    cause: &dyn std::error::Error,
) -> RunOutcome {
    lease.set_error(error);
    tracing::warn!(%status, error_code = %error, error = %cause, "Run failed");
    RunOutcome::Failed { status, error }
}
