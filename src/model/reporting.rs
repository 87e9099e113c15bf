//! Grading report types and renderers.

use serde::{Deserialize, Serialize};

use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Pass,
    Fail,
    Error,
}

/// A single verification failure. Findings are data, not errors: one finding
/// fails its scenario and is carried up into the grade report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Wrong status/body/headers/disk state.
    Assertion,
    /// The tested server never became reachable.
    Readiness,
    /// Subprocess-level anomaly (unexpected exit code, spawn failure).
    Process,
    /// Harness-side inconsistency while verifying.
    Checker,
}

impl Finding {
    pub fn assertion(title: &str, message: impl Into<String>) -> Self {
        Self {
            kind: FindingKind::Assertion,
            title: title.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIdentity {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub seed: u64,
    #[serde(rename = "reportPath", skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    #[serde(rename = "artifactsDir", skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<String>,
}

/// Outcome of one generate→launch→query→verify→teardown cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub seed: u64,
    pub status: ExitStatus,
    #[serde(rename = "queriesRun")]
    pub queries_run: u64,
    #[serde(rename = "queriesSkipped")]
    pub queries_skipped: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.status == ExitStatus::Pass
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResult {
    pub name: String,
    pub points: u32,
    /// Points earned: `points` if every scenario passed, otherwise 0.
    pub scored: u32,
    pub scenarios: Vec<ScenarioResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeSummary {
    pub status: ExitStatus,
    pub identity: RunIdentity,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "finishedAt")]
    pub finished_at: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    pub score: u32,
    #[serde(rename = "maxScore")]
    pub max_score: u32,
    pub groups: Vec<GroupResult>,
}

impl GradeSummary {
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "status={:?} runId={} seed={}\n",
            self.status, self.identity.run_id, self.identity.seed
        ));
        if let Some(path) = &self.identity.report_path {
            out.push_str(&format!("report={path}\n"));
        }
        for group in &self.groups {
            out.push_str(&format!(
                "group [{}]: {} / {}\n",
                group.name, group.scored, group.points
            ));
            for scenario in &group.scenarios {
                if scenario.passed() {
                    continue;
                }
                out.push_str(&format!(
                    "  scenario {} failed after {} queries ({} skipped)\n",
                    scenario.seed, scenario.queries_run, scenario.queries_skipped
                ));
                for finding in &scenario.findings {
                    out.push_str(&format!(
                        "  - {:?}: {}: {}\n",
                        finding.kind, finding.title, finding.message
                    ));
                }
            }
        }
        out.push_str(&format!("score: {} / {}\n", self.score, self.max_score));
        out.trim_end().to_string()
    }
}

pub fn write_report(summary: &GradeSummary, artifacts_dir: &Path) -> crate::HarnessResult<()> {
    std::fs::create_dir_all(artifacts_dir)?;
    let report_path = artifacts_dir.join("report.json");
    std::fs::write(&report_path, serde_json::to_vec_pretty(summary)?)?;
    Ok(())
}

pub fn wall_time_iso_utc() -> String {
    // Metadata only (startedAt/finishedAt); execution decisions never read the wall clock.
    let now = SystemTime::now();
    let dt: time::OffsetDateTime = now.into();
    dt.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
