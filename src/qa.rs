/// Scripted QA: replay fixed test cases against an agent and score each one
/// by abstention behavior and case-insensitive string containment.
use crate::agent::{AgentCapability, TaskRequest};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const QA_USER: &str = "qa_runner";
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    pub test_id: String,
    pub description: String,
    pub task_type: String,
    #[serde(default)]
    pub input: BTreeMap<String, String>,
    pub should_abstain: bool,
    #[serde(default)]
    pub expected_elements: Vec<String>,
    pub priority: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub test_id: String,
    pub description: String,
    pub task_type: String,
    pub priority: String,
    pub passed: bool,
    pub abstention_correct: bool,
    pub expected_abstain: bool,
    pub actual_abstain: Option<bool>,
    pub elements_found: Vec<String>,
    pub elements_missing: Vec<String>,
    pub response_preview: String,
    pub resolution_time: Option<f64>,
    pub confidence: Option<f64>,
    pub timestamp: String,
    /// Set when the agent could not produce an outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Marginal,
    Failed,
}

impl Verdict {
    pub fn from_pass_rate(pass_rate: f64) -> Self {
        if pass_rate >= 95.0 {
            Verdict::Passed
        } else if pass_rate >= 85.0 {
            Verdict::Marginal
        } else {
            Verdict::Failed
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Verdict::Passed => "QA SUITE PASSED - ready for deployment consideration",
            Verdict::Marginal => "QA SUITE MARGINAL - review failures before deployment",
            Verdict::Failed => "QA SUITE FAILED - significant issues, do not deploy",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QaSummary {
    #[serde(rename = "total_tests")]
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// 0 when there are no cases.
    pub pass_rate: f64,
    pub critical_passed: usize,
    pub critical_total: usize,
    pub verdict: Verdict,
}

impl QaSummary {
    pub fn from_results(results: &[CaseResult]) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let pass_rate = if total > 0 {
            passed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let critical: Vec<_> = results.iter().filter(|r| r.priority == "critical").collect();
        Self {
            total,
            passed,
            failed: total - passed,
            pass_rate,
            critical_passed: critical.iter().filter(|r| r.passed).count(),
            critical_total: critical.len(),
            verdict: Verdict::from_pass_rate(pass_rate),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QaReport {
    pub run_timestamp: String,
    #[serde(flatten)]
    pub summary: QaSummary,
    pub results: Vec<CaseResult>,
}

#[derive(Debug)]
pub enum QaError {
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
    NoCases {
        pattern: String,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for QaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QaError::Pattern { pattern, source } => {
                write!(f, "invalid test case pattern {pattern:?}: {source}")
            }
            QaError::NoCases { pattern } => write!(f, "no test case files match {pattern:?}"),
            QaError::Read { path, source } => {
                write!(f, "failed to read test cases {}: {source}", path.display())
            }
            QaError::Parse { path, source } => {
                write!(f, "failed to parse test cases {}: {source}", path.display())
            }
            QaError::Write { path, source } => {
                write!(f, "failed to write QA results {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for QaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QaError::Pattern { source, .. } => Some(source),
            QaError::NoCases { .. } => None,
            QaError::Read { source, .. } => Some(source),
            QaError::Parse { source, .. } => Some(source),
            QaError::Write { source, .. } => Some(source),
        }
    }
}

/// Load test cases from a file path or glob pattern. Multiple matches are
/// concatenated in path order.
pub fn load_cases(pattern: &str) -> Result<Vec<TestCase>, QaError> {
    let paths: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| QaError::Pattern {
            pattern: pattern.to_string(),
            source: e,
        })?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();

    if paths.is_empty() {
        return Err(QaError::NoCases {
            pattern: pattern.to_string(),
        });
    }

    let mut cases = Vec::new();
    for path in paths {
        let contents = std::fs::read_to_string(&path).map_err(|e| QaError::Read {
            path: path.clone(),
            source: e,
        })?;
        let mut batch: Vec<TestCase> =
            serde_json::from_str(&contents).map_err(|e| QaError::Parse { path, source: e })?;
        cases.append(&mut batch);
    }
    Ok(cases)
}

fn preview(response: &str) -> String {
    if response.chars().count() > PREVIEW_CHARS {
        let head: String = response.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        response.to_string()
    }
}

pub struct QaRunner<'a> {
    agent: &'a dyn AgentCapability,
}

impl<'a> QaRunner<'a> {
    pub fn new(agent: &'a dyn AgentCapability) -> Self {
        Self { agent }
    }

    /// Run one case. Agent failures fail the case rather than the run.
    pub fn run_case(&self, case: &TestCase) -> CaseResult {
        info!(test_id = %case.test_id, description = %case.description, "running test case");
        let timestamp = Local::now().to_rfc3339();

        let outcome = TaskRequest::from_fields(&case.task_type, QA_USER, &case.input)
            .and_then(|req| self.agent.process_task(&req));

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                warn!(test_id = %case.test_id, error = %e, "agent failed");
                return CaseResult {
                    test_id: case.test_id.clone(),
                    description: case.description.clone(),
                    task_type: case.task_type.clone(),
                    priority: case.priority.clone(),
                    passed: false,
                    abstention_correct: false,
                    expected_abstain: case.should_abstain,
                    actual_abstain: None,
                    elements_found: Vec::new(),
                    elements_missing: case.expected_elements.clone(),
                    response_preview: String::new(),
                    resolution_time: None,
                    confidence: None,
                    timestamp,
                    error: Some(e.to_string()),
                };
            }
        };

        let response_lower = outcome.response.to_lowercase();
        let (elements_found, elements_missing): (Vec<String>, Vec<String>) = case
            .expected_elements
            .iter()
            .cloned()
            .partition(|el| response_lower.contains(&el.to_lowercase()));

        let abstention_correct = outcome.abstained == case.should_abstain;
        let passed = abstention_correct && elements_missing.is_empty();

        if passed {
            info!(
                test_id = %case.test_id,
                resolution_time = outcome.resolution_time_seconds,
                "PASS"
            );
        } else {
            if !abstention_correct {
                warn!(
                    test_id = %case.test_id,
                    expected = case.should_abstain,
                    actual = outcome.abstained,
                    "abstention mismatch"
                );
            }
            if !elements_missing.is_empty() {
                warn!(
                    test_id = %case.test_id,
                    missing = %elements_missing.join(", "),
                    "missing expected elements"
                );
            }
        }

        CaseResult {
            test_id: case.test_id.clone(),
            description: case.description.clone(),
            task_type: case.task_type.clone(),
            priority: case.priority.clone(),
            passed,
            abstention_correct,
            expected_abstain: case.should_abstain,
            actual_abstain: Some(outcome.abstained),
            elements_found,
            elements_missing,
            response_preview: preview(&outcome.response),
            resolution_time: Some(outcome.resolution_time_seconds),
            confidence: Some(outcome.confidence),
            timestamp,
            error: None,
        }
    }

    pub fn run_all(&self, cases: &[TestCase]) -> QaReport {
        let results: Vec<CaseResult> = cases.iter().map(|c| self.run_case(c)).collect();
        QaReport {
            run_timestamp: Local::now().to_rfc3339(),
            summary: QaSummary::from_results(&results),
            results,
        }
    }
}

/// Print the human-readable summary block.
pub fn print_summary(report: &QaReport) {
    let s = &report.summary;
    let rule = "=".repeat(70);
    println!("\n{rule}");
    println!("TEST SUMMARY");
    println!("{rule}");
    println!("Total Tests: {}", s.total);
    println!("Passed: {}", s.passed);
    println!("Failed: {}", s.failed);
    println!("Pass Rate: {:.1}%", s.pass_rate);
    println!(
        "\nCritical Tests: {}/{} passed",
        s.critical_passed, s.critical_total
    );

    if s.failed > 0 {
        println!("\nFAILED TESTS:");
        for r in report.results.iter().filter(|r| !r.passed) {
            println!("  - {}: {}", r.test_id, r.description);
            if let Some(e) = &r.error {
                println!("    Issue: agent error: {e}");
            } else if !r.abstention_correct {
                println!("    Issue: abstention behavior incorrect");
            }
            if r.error.is_none() && !r.elements_missing.is_empty() {
                println!(
                    "    Issue: missing elements: {}",
                    r.elements_missing.join(", ")
                );
            }
        }
    }

    println!("\n{rule}");
    println!("{}", s.verdict.message());
    println!("{rule}");
}

/// Atomically write `report` to `<dir>/qa_results_YYYYMMDD_HHMMSS.json`.
pub fn save_results(
    dir: &Path,
    report: &QaReport,
    now: DateTime<Local>,
) -> Result<PathBuf, QaError> {
    let path = dir.join(format!("qa_results_{}.json", now.format("%Y%m%d_%H%M%S")));
    let write_err = |source: std::io::Error| QaError::Write {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    serde_json::to_writer_pretty(&mut tmp, report).map_err(|e| write_err(e.into()))?;
    tmp.write_all(b"\n").map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;
    Ok(path)
}
