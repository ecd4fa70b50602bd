//! JSON run reports and terminal summaries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::classifier::CLASSIFIER_VERSION;
use crate::pipeline::PipelineResult;
use crate::stage::{StageOutcome, StageStatus};

/// Schema version of the JSON report.
pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// One failure as persisted in the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureArtifact {
    pub kind: String,
    pub fatal: bool,
    pub message: String,
}

/// Counts and digests gathered during the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceArtifact {
    pub flloc_config: Option<String>,
    pub classifier_version: u32,
    pub diagnostic_digest: Option<String>,
    pub corruption_lines: usize,
    pub leak_lines: usize,
    pub expectations_checked: usize,
    pub trace_digest: Option<String>,
}

/// Canonical harness report written for CI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub run_id: String,
    pub binary: String,
    pub success: bool,
    pub duration_ms: u64,
    pub stages: Vec<StageOutcome>,
    pub failures: Vec<FailureArtifact>,
    pub evidence: EvidenceArtifact,
}

impl HarnessReport {
    pub fn from_result(binary: &str, result: &PipelineResult) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            run_id: result.run_id.clone(),
            binary: binary.to_string(),
            success: result.success,
            duration_ms: result.duration_ms,
            stages: result.stages.clone(),
            failures: result
                .failures
                .iter()
                .map(|e| FailureArtifact {
                    kind: e.kind().to_string(),
                    fatal: e.is_fatal(),
                    message: e.to_string(),
                })
                .collect(),
            evidence: EvidenceArtifact {
                flloc_config: result.evidence.flloc_config.clone(),
                classifier_version: CLASSIFIER_VERSION,
                diagnostic_digest: result.evidence.diagnostic_digest.clone(),
                corruption_lines: result.evidence.corruption_count,
                leak_lines: result.evidence.leak_count,
                expectations_checked: result.evidence.expectations_checked,
                trace_digest: result.evidence.trace_digest.clone(),
            },
        }
    }
}

/// Write the report in pretty JSON format.
pub fn write_report_json(path: &Path, report: &HarnessReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize harness report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render a plain-text stage summary for terminal output.
pub fn render_stage_summary(result: &PipelineResult) -> String {
    let mut out = String::new();
    for outcome in &result.stages {
        let marker = match outcome.status {
            StageStatus::Passed => "✓",
            StageStatus::Skipped => "-",
            _ => "✗",
        };
        out.push_str(&format!(
            "  {} {} ({}ms)\n",
            marker, outcome.stage, outcome.duration_ms
        ));
    }
    out.push_str(&format!(
        "Summary: {}/{} stages passed\n",
        result.passed_count(),
        result.stages.len()
    ));
    out
}
