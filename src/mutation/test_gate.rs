use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::TestConfig;
use crate::error::{LensError, Result};
use crate::process::run_command;

/// `FAILED tests/test_app.py::test_main - AssertionError` → `tests/test_app.py::test_main`
static FAILED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:FAILED|ERROR)\s+(\S+)").expect("valid regex"));

/// pytest's exit code when no tests were collected
const NO_TESTS_COLLECTED: i32 = 5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestRun {
    pub status: Option<i32>,
    pub failing: BTreeSet<String>,
}

impl TestRun {
    pub fn from_output(status: Option<i32>, stdout: &str, stderr: &str) -> Self {
        let mut failing: BTreeSet<String> = FAILED_RE
            .captures_iter(stdout)
            .chain(FAILED_RE.captures_iter(stderr))
            .map(|c| c[1].to_string())
            .collect();
        let clean = matches!(status, Some(0) | Some(NO_TESTS_COLLECTED));
        if !clean && failing.is_empty() {
            // A crashed run still has to count as failing
            failing.insert(match status {
                Some(code) => format!("<test run exited with {}>", code),
                None => "<test run killed>".to_string(),
            });
        }
        Self { status, failing }
    }

    pub fn passed(&self) -> bool {
        self.failing.is_empty()
    }

    /// Tests failing here that did not fail in `baseline`.
    pub fn regressions_since(&self, baseline: &TestRun) -> Vec<String> {
        self.failing.difference(&baseline.failing).cloned().collect()
    }
}

/// Runs the project's test command before and after a batch edit.
pub struct TestGate {
    root: PathBuf,
    command: Vec<String>,
    timeout: Duration,
}

impl TestGate {
    pub fn new(root: impl Into<PathBuf>, config: &TestConfig) -> Self {
        Self {
            root: root.into(),
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn run(&self) -> Result<TestRun> {
        tracing::info!("Running tests: {}", self.command.join(" "));
        let output = run_command(&self.command, &self.root, None, self.timeout)
            .map_err(|e| LensError::TestGate(e.to_string()))?;
        let run = TestRun::from_output(output.status, &output.stdout, &output.stderr);
        tracing::debug!("Test run finished with {:?}, {} failing", run.status, run.failing.len());
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTEST_OUTPUT: &str = "\
..F.F
=========================== short test summary info ============================
FAILED tests/test_app.py::test_main - AssertionError: assert 1 == 2
FAILED tests/test_utils.py::TestHelper::test_edge
2 failed, 3 passed in 0.12s
";

    #[test]
    fn test_parses_failing_ids() {
        let run = TestRun::from_output(Some(1), PYTEST_OUTPUT, "");
        let ids: Vec<&str> = run.failing.iter().map(String::as_str).collect();
        assert_eq!(
            ids,
            vec!["tests/test_app.py::test_main", "tests/test_utils.py::TestHelper::test_edge"]
        );
    }

    #[test]
    fn test_regressions_ignore_preexisting_failures() {
        let before = TestRun::from_output(Some(1), "FAILED tests/test_a.py::test_old\n", "");
        let after = TestRun::from_output(
            Some(1),
            "FAILED tests/test_a.py::test_old\nFAILED tests/test_b.py::test_new\n",
            "",
        );
        assert_eq!(after.regressions_since(&before), vec!["tests/test_b.py::test_new"]);
        assert!(before.regressions_since(&after).is_empty());
    }

    #[test]
    fn test_crash_without_ids_counts_as_failure() {
        let run = TestRun::from_output(Some(2), "", "ImportError while loading conftest");
        assert!(!run.passed());
        assert!(TestRun::from_output(Some(NO_TESTS_COLLECTED), "", "").passed());
    }

    #[cfg(unix)]
    #[test]
    fn test_gate_runs_command() {
        let config = TestConfig {
            command: vec!["sh".into(), "-c".into(), "echo 'FAILED t.py::test_x'; exit 1".into()],
            timeout_secs: 10,
        };
        let run = TestGate::new(".", &config).run().unwrap();
        assert!(run.failing.contains("t.py::test_x"));
    }
}
