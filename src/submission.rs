//! Entry point for new work: cache short-circuit, run creation, the
//! blocking extraction stage, and the detached handoff to the orchestrator.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{Fingerprint, ReportCache};
use crate::capability::{ImageInput, TextExtractor};
use crate::consts::{RUN_STAGES, STAGE_EXTRACTION};
use crate::orchestrator::{Orchestrator, OrchestratorError, RunRequest};
use crate::report::FinalReport;
use crate::run::RunId;
use crate::status::{StageStatus, StatusError, StatusStore};

/// One piece of work as received from a client.
#[derive(Debug, Clone)]
pub struct Submission {
    pub image: ImageInput,
    pub topic: String,
    pub auxiliary_context: Option<String>,
}

impl Submission {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_submission(
            &self.image.bytes,
            &self.topic,
            self.auxiliary_context.as_deref(),
        )
    }
}

pub enum SubmitOutcome {
    /// An equivalent submission was already analysed. No run was created.
    Cached { run_id: RunId, report: FinalReport },
    /// Extraction succeeded and the analyses are running in the background.
    Accepted {
        run_id: RunId,
        extracted_text: String,
        /// Resolves when the orchestrator is done. Safe to drop.
        task: JoinHandle<Result<FinalReport, OrchestratorError>>,
    },
}

impl SubmitOutcome {
    pub fn run_id(&self) -> &RunId {
        match self {
            SubmitOutcome::Cached { run_id, .. } | SubmitOutcome::Accepted { run_id, .. } => run_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Text extraction failed: {message}")]
    ExtractionFailed { run_id: RunId, message: String },

    #[error(transparent)]
    Status(#[from] StatusError),
}

pub struct SubmissionHandler {
    status: Arc<dyn StatusStore>,
    cache: Arc<dyn ReportCache>,
    extractor: Arc<dyn TextExtractor>,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
}

impl SubmissionHandler {
    pub fn new(
        status: Arc<dyn StatusStore>,
        cache: Arc<dyn ReportCache>,
        extractor: Arc<dyn TextExtractor>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            status,
            cache,
            extractor,
            orchestrator,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling `token` cancels every run started by this handler.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub async fn submit(&self, submission: Submission) -> Result<SubmitOutcome, SubmissionError> {
        self.submit_as(RunId::generate(), submission).await
    }

    /// Like [`submit`](Self::submit), with a caller-chosen run id.
    /// Fails with [`StatusError::DuplicateRun`] if the id is taken.
    pub async fn submit_as(
        &self,
        run_id: RunId,
        submission: Submission,
    ) -> Result<SubmitOutcome, SubmissionError> {
        let fingerprint = submission.fingerprint();

        match self.cache.get(&fingerprint).await {
            Ok(Some(report)) => {
                tracing::info!(run_id = %run_id, fingerprint = %fingerprint, "served from cache");
                return Ok(SubmitOutcome::Cached { run_id, report });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "cache lookup failed, analysing anyway");
            }
        }

        self.status.create(&run_id, &RUN_STAGES).await?;
        tracing::info!(
            run_id = %run_id,
            image_bytes = submission.image.bytes.len(),
            media_type = %submission.image.media_type,
            "run created"
        );

        let extracted_text = match self.extract(&run_id, &submission.image).await {
            Ok(text) => text,
            Err(err) => {
                self.abandon(&run_id, &err).await;
                return Err(err);
            }
        };

        let task = self.orchestrator.spawn(
            RunRequest {
                run_id: run_id.clone(),
                fingerprint,
                extracted_text: extracted_text.clone(),
                topic: submission.topic,
                auxiliary_context: submission.auxiliary_context,
            },
            self.shutdown.child_token(),
        );

        Ok(SubmitOutcome::Accepted {
            run_id,
            extracted_text,
            task,
        })
    }

    /// The blocking stage: `text_extraction` goes RUNNING, then COMPLETED
    /// with the extracted text.
    async fn extract(&self, run_id: &RunId, image: &ImageInput) -> Result<String, SubmissionError> {
        self.status
            .update(run_id, STAGE_EXTRACTION, StageStatus::Running, None)
            .await?;

        let text = self.extractor.extract(image).await.map_err(|e| {
            SubmissionError::ExtractionFailed {
                run_id: run_id.clone(),
                message: format!("{e:#}"),
            }
        })?;

        self.status
            .update(
                run_id,
                STAGE_EXTRACTION,
                StageStatus::Completed,
                Some(text.clone()),
            )
            .await?;
        tracing::info!(run_id = %run_id, chars = text.chars().count(), "text extraction completed");
        Ok(text)
    }

    /// The run will never reach the orchestrator. Fail every stage that is
    /// still open so pollers see a terminal run.
    ///
    /// Best effort: a refused write is logged and the remaining stages are
    /// still attempted.
    async fn abandon(&self, run_id: &RunId, err: &SubmissionError) {
        let reason = match err {
            SubmissionError::ExtractionFailed { message, .. } => message.clone(),
            SubmissionError::Status(e) => e.to_string(),
        };
        tracing::warn!(run_id = %run_id, error = %reason, "text extraction did not complete");

        let snapshot = match self.status.get(run_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "cannot read status, failing every stage");
                None
            }
        };
        let skipped = format!("skipped: {STAGE_EXTRACTION} failed");

        for stage in RUN_STAGES {
            let finished = snapshot
                .as_ref()
                .and_then(|snapshot| snapshot.status_of(stage))
                .is_some_and(|status| status.is_terminal());
            if finished {
                continue;
            }
            let result = if stage == STAGE_EXTRACTION {
                reason.clone()
            } else {
                skipped.clone()
            };
            if let Err(e) = self
                .status
                .update(run_id, stage, StageStatus::Failed, Some(result))
                .await
            {
                tracing::error!(run_id = %run_id, stage, error = %e, "failed to mark stage as FAILED");
            }
        }
    }
}
