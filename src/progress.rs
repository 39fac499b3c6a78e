//! Terminal progress line for a run, driven by polling the status store.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::run::RunId;
use crate::status::{RunSnapshot, StageStatus, StatusStore};

/// Braille spinner frames.
const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Poll and redraw interval.
const INTERVAL: Duration = Duration::from_millis(80);

/// Renders a run's stages on stderr until the run finishes or
/// [`stop`](Progress::stop) is called.
pub struct Progress {
    handle: JoinHandle<Option<RunSnapshot>>,
    stop: CancellationToken,
}

impl Progress {
    /// Start watching `run_id`. The run does not need to exist yet.
    pub fn start(status: Arc<dyn StatusStore>, run_id: RunId) -> Self {
        let stop = CancellationToken::new();
        let stopped = stop.clone();

        let handle = tokio::spawn(async move {
            let mut last = None;
            let mut i = 0;
            loop {
                match status.get(&run_id).await {
                    Ok(Some(snapshot)) => {
                        // \r moves to start of line, \x1b[2K clears the line
                        eprint!("\x1b[2K\r{}", render_line(&snapshot, i));
                        let _ = std::io::stderr().flush();
                        let finished = snapshot.is_finished();
                        last = Some(snapshot);
                        if finished {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(run_id = %run_id, error = %e, "progress poll failed"),
                }

                tokio::select! {
                    _ = tokio::time::sleep(INTERVAL) => {}
                    _ = stopped.cancelled() => break,
                }
                i += 1;
            }
            eprint!("\x1b[2K\r");
            let _ = std::io::stderr().flush();
            last
        });

        Self { handle, stop }
    }

    /// Wait for the run to finish. Returns the last snapshot seen.
    pub async fn wait(self) -> Option<RunSnapshot> {
        self.handle.await.ok().flatten()
    }

    /// Stop drawing and clear the line. Returns the last snapshot seen.
    pub async fn stop(self) -> Option<RunSnapshot> {
        self.stop.cancel();
        self.handle.await.ok().flatten()
    }
}

/// One line summarising every stage, e.g. `✓ text_extraction  ⠙ linguistic_analysis`.
pub fn render_line(snapshot: &RunSnapshot, tick: usize) -> String {
    let frame = FRAMES[tick % FRAMES.len()];
    snapshot
        .iter()
        .map(|(stage, record)| {
            let mark = match record.status {
                StageStatus::Pending => "·",
                StageStatus::Running => frame,
                StageStatus::Completed => "✓",
                StageStatus::Failed => "✗",
            };
            format!("{mark} {stage}")
        })
        .collect::<Vec<_>>()
        .join("  ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StageRecord;
    use crate::status::memory::InMemoryStatusStore;

    fn record(status: StageStatus) -> StageRecord {
        StageRecord {
            status,
            result: None,
        }
    }

    #[test]
    fn frames_are_single_braille_chars() {
        for frame in FRAMES {
            assert_eq!(frame.chars().count(), 1);
        }
    }

    #[test]
    fn render_marks_each_status() {
        let snapshot = RunSnapshot::new(vec![
            ("a".to_string(), record(StageStatus::Completed)),
            ("b".to_string(), record(StageStatus::Running)),
            ("c".to_string(), record(StageStatus::Failed)),
            ("d".to_string(), record(StageStatus::Pending)),
        ]);
        assert_eq!(render_line(&snapshot, 1), "✓ a  ⠙ b  ✗ c  · d");
    }

    #[tokio::test]
    async fn wait_returns_once_run_is_finished() {
        let store = Arc::new(InMemoryStatusStore::new());
        let run_id = RunId::from("r1");
        store.create(&run_id, &["only"]).await.unwrap();

        let progress = Progress::start(store.clone(), run_id.clone());
        store
            .update(&run_id, "only", StageStatus::Completed, Some("ok".into()))
            .await
            .unwrap();

        let snapshot = progress.wait().await.unwrap();
        assert_eq!(snapshot.status_of("only"), Some(StageStatus::Completed));
    }

    #[tokio::test]
    async fn stop_before_run_exists() {
        let store = Arc::new(InMemoryStatusStore::new());
        let progress = Progress::start(store, RunId::from("never"));
        assert!(progress.stop().await.is_none());
    }
}
