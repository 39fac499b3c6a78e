//! The run orchestrator: fans extracted text out to the two analysis
//! capabilities, records every stage transition, and publishes the report.
//!
//! Stage state machine, per analysis stage:
//!
//! ```text
//! PENDING -> RUNNING -> COMPLETED
//!                   \-> FAILED
//! ```
//!
//! `text_extraction` must already be `COMPLETED` when a run is handed over.

mod branch;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::{CacheError, Fingerprint, ReportCache};
use crate::capability::{AnalysisRequest, Capability};
use crate::consts::{ANALYSIS_STAGES, STAGE_ARGUMENTATIVE, STAGE_EXTRACTION, STAGE_LINGUISTIC};
use crate::report::FinalReport;
use crate::run::RunId;
use crate::status::{StageStatus, StatusError, StatusStore};

use branch::{BranchFailure, BranchResult, describe_join_error, run_branch};

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Upper bound for a single capability call. `None` waits forever.
    pub capability_timeout: Option<Duration>,
}

/// Input for one orchestrated run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: RunId,
    /// Cache key the finished report is published under.
    pub fingerprint: Fingerprint,
    pub extracted_text: String,
    pub topic: String,
    pub auxiliary_context: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("run {run_id} cannot be orchestrated: {reason}")]
    Precondition { run_id: RunId, reason: String },

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("orchestrator for run {run_id} {reason}")]
    Crashed { run_id: RunId, reason: String },
}

pub struct Orchestrator {
    status: Arc<dyn StatusStore>,
    cache: Arc<dyn ReportCache>,
    linguistic: Arc<dyn Capability>,
    argumentative: Arc<dyn Capability>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        status: Arc<dyn StatusStore>,
        cache: Arc<dyn ReportCache>,
        linguistic: Arc<dyn Capability>,
        argumentative: Arc<dyn Capability>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            status,
            cache,
            linguistic,
            argumentative,
            config,
        }
    }

    /// Run the analyses for an extracted run and wait for the report.
    ///
    /// Capability failures never make this fail; they end up in the report.
    /// An `Err` means the orchestrator's own bookkeeping broke. In that case
    /// every analysis stage that had not finished has already been marked
    /// `FAILED` with the error.
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<FinalReport, OrchestratorError> {
        let run_id = request.run_id.clone();
        match self.drive(request, cancel).await {
            Ok(report) => {
                tracing::info!(
                    run_id = %run_id,
                    complete = report.is_complete(),
                    "analysis finished"
                );
                Ok(report)
            }
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "orchestration failed");
                self.fail_unfinished(&run_id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Run detached from the caller.
    ///
    /// The run executes on its own task under a supervisor, so even a panic
    /// in the orchestrator's bookkeeping is turned into `FAILED` stages. The
    /// handle may be dropped.
    pub fn spawn(
        self: &Arc<Self>,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<FinalReport, OrchestratorError>> {
        let run_id = request.run_id.clone();
        let span = tracing::info_span!("run", run_id = %run_id);
        let supervisor = Arc::clone(self);
        let worker = Arc::clone(self);

        tokio::spawn(
            async move {
                let joined = tokio::spawn(
                    async move { worker.run(request, cancel).await }.in_current_span(),
                )
                .await;

                match joined {
                    Ok(result) => result,
                    Err(join_err) => {
                        let err = OrchestratorError::Crashed {
                            run_id: run_id.clone(),
                            reason: describe_join_error(join_err),
                        };
                        tracing::error!(error = %err, "orchestrator task died");
                        supervisor.fail_unfinished(&run_id, &err.to_string()).await;
                        Err(err)
                    }
                }
            }
            .instrument(span),
        )
    }

    async fn drive(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<FinalReport, OrchestratorError> {
        let run_id = &request.run_id;
        self.check_preconditions(run_id).await?;

        for stage in ANALYSIS_STAGES {
            self.status
                .update(run_id, stage, StageStatus::Running, None)
                .await?;
        }

        let analysis = Arc::new(AnalysisRequest {
            text: request.extracted_text.clone(),
            topic: request.topic.clone(),
            auxiliary_context: request.auxiliary_context.clone(),
        });
        let timeout = self.config.capability_timeout;

        let (linguistic, argumentative) = futures::future::join(
            run_branch(
                Arc::clone(&self.linguistic),
                Arc::clone(&analysis),
                timeout,
                cancel.clone(),
            ),
            run_branch(
                Arc::clone(&self.argumentative),
                Arc::clone(&analysis),
                timeout,
                cancel.clone(),
            ),
        )
        .await;

        // Record both before surfacing a bookkeeping error from either.
        let recorded_linguistic = self.record(run_id, STAGE_LINGUISTIC, &linguistic).await;
        let recorded_argumentative = self
            .record(run_id, STAGE_ARGUMENTATIVE, &argumentative)
            .await;
        recorded_linguistic?;
        recorded_argumentative?;

        let cancelled = [&linguistic, &argumentative]
            .iter()
            .any(|result| matches!(result, Err(BranchFailure::Cancelled)));
        let report = FinalReport {
            extracted_text: request.extracted_text,
            linguistic_analysis: linguistic.map_err(|failure| failure.to_string()).into(),
            argumentative_analysis: argumentative.map_err(|failure| failure.to_string()).into(),
        };

        // A cancelled branch says nothing about the submission; keep it out of the cache.
        if cancelled {
            tracing::info!(run_id = %run_id, "run cancelled, report not cached");
            return Ok(report);
        }

        self.cache.put(&request.fingerprint, report.clone()).await?;
        tracing::debug!(run_id = %run_id, fingerprint = %request.fingerprint, "report published");
        Ok(report)
    }

    async fn check_preconditions(&self, run_id: &RunId) -> Result<(), OrchestratorError> {
        let violation = |reason: String| OrchestratorError::Precondition {
            run_id: run_id.clone(),
            reason,
        };

        let snapshot = self
            .status
            .get(run_id)
            .await?
            .ok_or_else(|| violation("unknown run".to_string()))?;

        match snapshot.status_of(STAGE_EXTRACTION) {
            Some(StageStatus::Completed) => Ok(()),
            Some(status) => Err(violation(format!(
                "{STAGE_EXTRACTION} is {status}, expected COMPLETED"
            ))),
            None => Err(violation(format!("run has no {STAGE_EXTRACTION} stage"))),
        }
    }

    async fn record(
        &self,
        run_id: &RunId,
        stage: &str,
        result: &BranchResult,
    ) -> Result<(), StatusError> {
        match result {
            Ok(text) => {
                tracing::info!(run_id = %run_id, stage, "stage completed");
                self.status
                    .update(run_id, stage, StageStatus::Completed, Some(text.clone()))
                    .await
            }
            Err(failure) => {
                tracing::warn!(run_id = %run_id, stage, error = %failure, "stage failed");
                self.status
                    .update(run_id, stage, StageStatus::Failed, Some(failure.to_string()))
                    .await
            }
        }
    }

    /// Best effort: mark every analysis stage that is not terminal as `FAILED`.
    async fn fail_unfinished(&self, run_id: &RunId, reason: &str) {
        let snapshot = match self.status.get(run_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "cannot read status to fail unfinished stages");
                return;
            }
        };

        for stage in ANALYSIS_STAGES {
            let unfinished = snapshot
                .status_of(stage)
                .is_some_and(|status| !status.is_terminal());
            if !unfinished {
                continue;
            }
            if let Err(e) = self
                .status
                .update(run_id, stage, StageStatus::Failed, Some(reason.to_string()))
                .await
            {
                tracing::error!(run_id = %run_id, stage, error = %e, "failed to mark stage as FAILED");
            }
        }
    }
}
