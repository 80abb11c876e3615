//! On-disk history of analysis runs and A/B tests.
//!
//! ```text
//! outputs/
//! ├── analysis_20250101_120000.json
//! ├── analysis_20250101_120000_brief.txt
//! └── tests/
//!     ├── ab_test_strategic_analyst_20250101_120500.json
//!     └── ab_test_strategic_analyst_20250101_120500_report.txt
//! ```

use chrono::{DateTime, Utc};
use parallax_agents::WorkflowResult;
use parallax_common::Result;
use parallax_experiments::ABTestResult;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const ANALYSIS_PREFIX: &str = "analysis_";
const TEST_PREFIX: &str = "ab_test_";

/// Paths written for one saved run.
#[derive(Debug, Clone)]
pub struct SavedRun {
    pub json_path: PathBuf,
    pub text_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Analysis,
    AbTest,
}

/// One line of `parallax history`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub kind: RunKind,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub summary: String,
}

pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tests_dir(&self) -> PathBuf {
        self.root.join("tests")
    }

    pub fn save_analysis(&self, result: &WorkflowResult, brief: &str) -> Result<SavedRun> {
        let stem = format!(
            "{ANALYSIS_PREFIX}{}",
            result.started_at.format(TIMESTAMP_FORMAT)
        );
        let saved = write_pair(&self.root, &stem, "brief", result, brief)?;
        info!(
            run_id = %result.run_id,
            path = %saved.json_path.display(),
            "Saved analysis"
        );
        Ok(saved)
    }

    pub fn save_test(&self, result: &ABTestResult, report: &str) -> Result<SavedRun> {
        let stem = format!(
            "{TEST_PREFIX}{}_{}",
            sanitize(&result.agent_name),
            result.started_at.format(TIMESTAMP_FORMAT)
        );
        let saved = write_pair(&self.tests_dir(), &stem, "report", result, report)?;
        info!(
            test_id = %result.test_id,
            path = %saved.json_path.display(),
            "Saved A/B test"
        );
        Ok(saved)
    }

    /// Every readable run, newest first. Files that fail to parse are
    /// skipped with a warning.
    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        let mut entries = Vec::new();

        for path in json_files(&self.root, ANALYSIS_PREFIX)? {
            match read_json::<WorkflowResult>(&path) {
                Ok(run) => entries.push(HistoryEntry {
                    kind: RunKind::Analysis,
                    summary: analysis_summary(&run),
                    started_at: run.started_at,
                    path,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable analysis"),
            }
        }

        for path in json_files(&self.tests_dir(), TEST_PREFIX)? {
            match read_json::<ABTestResult>(&path) {
                Ok(test) => entries.push(HistoryEntry {
                    kind: RunKind::AbTest,
                    summary: test_summary(&test),
                    started_at: test.started_at,
                    path,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable test"),
            }
        }

        entries.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.path.cmp(&a.path))
        });
        debug!(count = entries.len(), "Listed history");
        Ok(entries)
    }
}

/// Write `<stem>.json` and `<stem>_<suffix>.txt`, adding a counter to the
/// stem if a run with the same timestamp already exists.
fn write_pair<T: Serialize>(
    dir: &Path,
    stem: &str,
    suffix: &str,
    record: &T,
    text: &str,
) -> Result<SavedRun> {
    std::fs::create_dir_all(dir)?;

    let mut unique = stem.to_string();
    let mut counter = 1;
    while dir.join(format!("{unique}.json")).exists() {
        counter += 1;
        unique = format!("{stem}_{counter}");
    }

    let json_path = dir.join(format!("{unique}.json"));
    let text_path = dir.join(format!("{unique}_{suffix}.txt"));
    std::fs::write(&json_path, serde_json::to_string_pretty(record)?)?;
    std::fs::write(&text_path, text)?;

    Ok(SavedRun {
        json_path,
        text_path,
    })
}

fn json_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix) && n.ends_with(".json"));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn analysis_summary(run: &WorkflowResult) -> String {
    let status = if run.cancelled {
        "cancelled"
    } else if run.success {
        "complete"
    } else {
        "failed"
    };
    format!(
        "analysis {status}: {}/{} analysts succeeded",
        run.successful_agents().count(),
        run.phase1_results.len()
    )
}

fn test_summary(test: &ABTestResult) -> String {
    format!(
        "A/B test of {} ({} variants x {}): winner {} at {:.3}",
        test.agent_name,
        test.results.len(),
        test.iterations,
        test.winner.variant_id,
        test.winner.composite_score
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn analysis_at(ts: DateTime<Utc>) -> WorkflowResult {
        WorkflowResult {
            run_id: Uuid::new_v4(),
            started_at: ts,
            success: true,
            phase1_results: BTreeMap::new(),
            synthesis: None,
            final_brief: None,
            error: None,
            execution_time: 1.0,
            cancelled: false,
        }
    }

    #[test]
    fn saves_json_and_brief_with_timestamped_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();

        let saved = store.save_analysis(&analysis_at(ts), "brief text").unwrap();
        assert_eq!(
            saved.json_path.file_name().unwrap(),
            "analysis_20250304_050607.json"
        );
        assert_eq!(
            saved.text_path.file_name().unwrap(),
            "analysis_20250304_050607_brief.txt"
        );
        assert_eq!(std::fs::read_to_string(&saved.text_path).unwrap(), "brief text");
    }

    #[test]
    fn same_second_runs_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();

        let first = store.save_analysis(&analysis_at(ts), "a").unwrap();
        let second = store.save_analysis(&analysis_at(ts), "b").unwrap();
        assert_ne!(first.json_path, second.json_path);
        assert_eq!(store.history().unwrap().len(), 2);
    }

    #[test]
    fn history_is_newest_first_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        store.save_analysis(&analysis_at(older), "").unwrap();
        store.save_analysis(&analysis_at(newer), "").unwrap();
        std::fs::write(dir.path().join("analysis_broken.json"), "{").unwrap();

        let history = store.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].started_at, newer);
        assert_eq!(history[1].started_at, older);
        assert!(history[0].summary.starts_with("analysis complete"));
    }

    #[test]
    fn empty_store_has_no_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("never-created"));
        assert!(store.history().unwrap().is_empty());
    }

    #[test]
    fn agent_names_are_sanitized() {
        assert_eq!(sanitize("strategic_analyst"), "strategic_analyst");
        assert_eq!(sanitize("../evil name"), "___evil_name");
    }
}
