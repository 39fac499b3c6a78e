use serde::{Deserialize, Serialize};

/// Outcome of one analysis branch as it appears in the final report.
///
/// Serializes to the bare text on success, or to `{"error": "..."}` when
/// the branch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BranchOutcome {
    Text(String),
    Failed { error: String },
}

impl BranchOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            BranchOutcome::Text(text) => Some(text),
            BranchOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            BranchOutcome::Text(_) => None,
            BranchOutcome::Failed { error } => Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BranchOutcome::Failed { .. })
    }
}

impl From<Result<String, String>> for BranchOutcome {
    fn from(result: Result<String, String>) -> Self {
        match result {
            Ok(text) => BranchOutcome::Text(text),
            Err(error) => BranchOutcome::Failed { error },
        }
    }
}

/// The combined result of a run. Produced even when a branch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub extracted_text: String,
    pub linguistic_analysis: BranchOutcome,
    pub argumentative_analysis: BranchOutcome,
}

impl FinalReport {
    /// True when both analyses produced text.
    pub fn is_complete(&self) -> bool {
        !self.linguistic_analysis.is_failed() && !self.argumentative_analysis.is_failed()
    }
}
