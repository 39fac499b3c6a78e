//! Project-wide constants.

use std::path::PathBuf;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Default Anthropic model for all three capabilities.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Environment variable holding the Anthropic API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Stage that turns the submitted image into text. Runs before the orchestrator.
pub const STAGE_EXTRACTION: &str = "text_extraction";
/// Linguistic analysis of the extracted text.
pub const STAGE_LINGUISTIC: &str = "linguistic_analysis";
/// Argumentative analysis of the extracted text against the topic.
pub const STAGE_ARGUMENTATIVE: &str = "argumentative_analysis";

/// Every stage of a run, in display order.
pub const RUN_STAGES: [&str; 3] = [STAGE_EXTRACTION, STAGE_LINGUISTIC, STAGE_ARGUMENTATIVE];

/// Stages driven by the orchestrator, in parallel.
pub const ANALYSIS_STAGES: [&str; 2] = [STAGE_LINGUISTIC, STAGE_ARGUMENTATIVE];

/// Application directory: `~/.augur`.
/// Falls back to the system temp dir when no home directory is known.
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".augur")
}

/// Default SQLite path for the durable report cache: `~/.augur/reports.db`.
pub fn default_cache_db_path() -> PathBuf {
    app_dir().join("reports.db")
}

/// Default directory searched for instruction templates: `~/.augur/instructions`.
pub fn default_instructions_dir() -> PathBuf {
    app_dir().join("instructions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consts_are_non_empty() {
        assert!(!AUTHOR.is_empty());
        assert!(!REPO.is_empty());
        assert!(!DEFAULT_MODEL.is_empty());
    }

    #[test]
    fn run_stages_start_with_extraction() {
        assert_eq!(RUN_STAGES[0], STAGE_EXTRACTION);
        for stage in ANALYSIS_STAGES {
            assert!(RUN_STAGES.contains(&stage));
        }
    }

    #[test]
    fn stage_names_are_unique() {
        let mut names = RUN_STAGES.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), RUN_STAGES.len());
    }

    #[test]
    fn default_paths_live_under_app_dir() {
        let root = app_dir();
        assert!(default_cache_db_path().starts_with(&root));
        assert!(default_instructions_dir().starts_with(&root));
    }
}
