pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::run::RunId;

/// Lifecycle of a single stage. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    fn rank(self) -> u8 {
        match self {
            StageStatus::Pending => 0,
            StageStatus::Running => 1,
            StageStatus::Completed | StageStatus::Failed => 2,
        }
    }

    /// `Completed` or `Failed`.
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Whether a stage in `self` may move to `next`.
    ///
    /// Forward jumps are allowed (a stage that never started may still be
    /// failed). Terminal states are final.
    pub fn can_transition_to(self, next: StageStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Running => "RUNNING",
            StageStatus::Completed => "COMPLETED",
            StageStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Status of one stage plus its text result or failure description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub result: Option<String>,
}

impl StageRecord {
    pub fn pending() -> Self {
        Self {
            status: StageStatus::Pending,
            result: None,
        }
    }
}

/// Point-in-time copy of every stage of a run.
///
/// Stages are read one at a time, so two stages may be observed at
/// different moments. Serializes as a JSON object keyed by stage name,
/// in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSnapshot {
    stages: Vec<(String, StageRecord)>,
}

impl RunSnapshot {
    pub fn new(stages: Vec<(String, StageRecord)>) -> Self {
        Self { stages }
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages
            .iter()
            .find(|(stage, _)| stage == name)
            .map(|(_, record)| record)
    }

    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.stage(name).map(|record| record.status)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StageRecord)> {
        self.stages
            .iter()
            .map(|(stage, record)| (stage.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// True once every stage has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.stages
            .iter()
            .all(|(_, record)| record.status.is_terminal())
    }
}

impl Serialize for RunSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.stages.len()))?;
        for (stage, record) in &self.stages {
            map.serialize_entry(stage, record)?;
        }
        map.end()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("run {run_id} already exists")]
    DuplicateRun { run_id: RunId },

    #[error("invalid stage set: {0}")]
    InvalidStages(String),

    #[error("run {run_id}: stage {stage} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: RunId,
        stage: String,
        from: StageStatus,
        to: StageStatus,
    },
}

/// Where run progress lives. Written by the submission handler and the
/// orchestrator, read by pollers.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Register a run with every stage `PENDING`. Never overwrites an existing run.
    async fn create(&self, run_id: &RunId, stages: &[&str]) -> Result<(), StatusError>;

    /// Move a stage forward. Unknown runs and stages are logged and ignored.
    async fn update(
        &self,
        run_id: &RunId,
        stage: &str,
        status: StageStatus,
        result: Option<String>,
    ) -> Result<(), StatusError>;

    /// Copy of the run's current state, or `None` if the run is unknown.
    async fn get(&self, run_id: &RunId) -> Result<Option<RunSnapshot>, StatusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Running));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Completed));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Failed));
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Failed));
    }

    #[test]
    fn backward_and_terminal_transitions_rejected() {
        assert!(!StageStatus::Running.can_transition_to(StageStatus::Pending));
        assert!(!StageStatus::Running.can_transition_to(StageStatus::Running));
        assert!(!StageStatus::Completed.can_transition_to(StageStatus::Failed));
        assert!(!StageStatus::Failed.can_transition_to(StageStatus::Completed));
        assert!(!StageStatus::Completed.can_transition_to(StageStatus::Completed));
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&StageStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert_eq!(StageStatus::Running.to_string(), "RUNNING");
    }

    #[test]
    fn snapshot_serializes_as_ordered_object() {
        let snapshot = RunSnapshot::new(vec![
            ("b".to_string(), StageRecord::pending()),
            (
                "a".to_string(),
                StageRecord {
                    status: StageStatus::Completed,
                    result: Some("done".to_string()),
                },
            ),
        ]);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(
            json,
            r#"{"b":{"status":"PENDING","result":null},"a":{"status":"COMPLETED","result":"done"}}"#
        );
    }

    #[test]
    fn snapshot_finished_only_when_all_terminal() {
        let mut stages = vec![(
            "x".to_string(),
            StageRecord {
                status: StageStatus::Failed,
                result: None,
            },
        )];
        assert!(RunSnapshot::new(stages.clone()).is_finished());

        stages.push(("y".to_string(), StageRecord::pending()));
        let snapshot = RunSnapshot::new(stages);
        assert!(!snapshot.is_finished());
        assert_eq!(snapshot.status_of("y"), Some(StageStatus::Pending));
        assert_eq!(snapshot.status_of("z"), None);
    }
}
