use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::capability::{AnalysisRequest, Capability};

/// Why a branch produced no text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BranchFailure {
    /// The capability errored, timed out or panicked.
    Failed(String),
    /// The run was cancelled before the capability answered.
    Cancelled,
}

impl fmt::Display for BranchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchFailure::Failed(reason) => f.write_str(reason),
            BranchFailure::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What a branch hands back to the join: the text, or why there is none.
pub(crate) type BranchResult = Result<String, BranchFailure>;

/// Run one capability on its own task.
///
/// Errors, timeouts, cancellation and panics all come back as `Err`.
/// Nothing that happens inside the capability can reach the sibling branch
/// or the caller. A result that is already in wins over a cancellation
/// that arrives at the same time.
pub(crate) async fn run_branch(
    capability: Arc<dyn Capability>,
    request: Arc<AnalysisRequest>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
) -> BranchResult {
    let name = capability.name().to_string();
    let mut task = tokio::spawn(async move {
        let call = capability.invoke(&request);
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(|e| format!("{e:#}")),
                Err(_) => Err(format!("timed out after {limit:?}")),
            },
            None => call.await.map_err(|e| format!("{e:#}")),
        }
    });

    let result = tokio::select! {
        biased;
        joined = &mut task => joined
            .unwrap_or_else(|e| Err(describe_join_error(e)))
            .map_err(BranchFailure::Failed),
        _ = cancel.cancelled() => {
            task.abort();
            Err(BranchFailure::Cancelled)
        }
    };
    match &result {
        Ok(text) => tracing::debug!(capability = %name, chars = text.len(), "capability answered"),
        Err(failure) => tracing::debug!(capability = %name, reason = %failure, "capability gave no answer"),
    }
    result
}

pub(crate) fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("panicked: {}", panic_message(err.into_panic()))
    } else {
        format!("aborted: {err}")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
