//! Pipeline stage definitions.

use serde::{Deserialize, Serialize};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Check the target binary exists and remove stale artifacts.
    ConfigureVerify,

    /// Run the target with `FLLOC_CONFIG`.
    RunVerify,

    /// Classify diagnostics and match them against the expectation files.
    ClassifyAndVerify,

    /// Build the trace channel and remove the stale trace.
    ConfigureAudit,

    /// Run the target again under allocation tracing.
    RunAudit,

    /// Dump the trace and look for the allocator's own source.
    ScanTrace,
}

impl Stage {
    /// Verification pass.
    pub const VERIFY: [Stage; 3] = [Stage::ConfigureVerify, Stage::RunVerify, Stage::ClassifyAndVerify];

    /// Self-leak audit pass.
    pub const AUDIT: [Stage; 3] = [Stage::ConfigureAudit, Stage::RunAudit, Stage::ScanTrace];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::ConfigureVerify => "configure_verify",
            Stage::RunVerify => "run_verify",
            Stage::ClassifyAndVerify => "classify_and_verify",
            Stage::ConfigureAudit => "configure_audit",
            Stage::RunAudit => "run_audit",
            Stage::ScanTrace => "scan_trace",
        }
    }

    /// Whether the stage belongs to the audit pass.
    pub fn is_audit(&self) -> bool {
        Self::AUDIT.contains(self)
    }

    /// Stages to execute for a run.
    pub fn plan(skip_audit: bool) -> Vec<Stage> {
        let mut stages = Self::VERIFY.to_vec();
        if !skip_audit {
            stages.extend(Self::AUDIT);
        }
        stages
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Final status of an executed stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,

    /// Ran to completion but recorded failures.
    Failed,

    /// Hit a fatal error; nothing after it ran.
    Aborted,

    /// Not run because an earlier stage failed.
    Skipped,
}

/// What happened in one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_ms: u64,
    /// Messages of the failures raised in this stage.
    pub messages: Vec<String>,
}

impl StageOutcome {
    pub fn passed(&self) -> bool {
        self.status == StageStatus::Passed
    }

    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            duration_ms: 0,
            messages: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::ConfigureVerify.name(), "configure_verify");
        assert_eq!(Stage::ClassifyAndVerify.name(), "classify_and_verify");
        assert_eq!(Stage::ScanTrace.name(), "scan_trace");
    }

    #[test]
    fn test_plan_order() {
        assert_eq!(
            Stage::plan(false),
            vec![
                Stage::ConfigureVerify,
                Stage::RunVerify,
                Stage::ClassifyAndVerify,
                Stage::ConfigureAudit,
                Stage::RunAudit,
                Stage::ScanTrace,
            ]
        );
    }

    #[test]
    fn test_plan_without_audit() {
        let plan = Stage::plan(true);
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|s| !s.is_audit()));
    }

    #[test]
    fn test_skipped_outcome() {
        let outcome = StageOutcome::skipped(Stage::RunAudit);
        assert_eq!(outcome.status, StageStatus::Skipped);
        assert!(!outcome.passed());
    }

    #[test]
    fn test_stage_serde_name() {
        let json = serde_json::to_string(&Stage::RunVerify).unwrap();
        assert_eq!(json, "\"run_verify\"");
    }
}
