//! Two-pass verification pipeline.
//!
//! Stages run strictly in [`Stage::plan`] order. A stage either passes,
//! records non-fatal failures (missing artifacts, unmatched expectations),
//! or aborts on a fatal error. Any stage that does not pass ends the run and
//! the remaining stages are reported as skipped.

use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::artifacts::{ArtifactKind, ArtifactSet};
use crate::audit::SelfLeakAuditor;
use crate::classifier::{classify, DiagnosticCategory, CLASSIFIER_VERSION};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::expectations::{verify_all, ExpectationSet};
use crate::injector::{RunConfiguration, TraceConfiguration, FLLOC_CONFIG_VAR, MALLOC_TRACE_VAR};
use crate::runner::{program_name, Invocation, ProcessRunner};
use crate::stage::{Stage, StageOutcome, StageStatus};
use crate::telemetry::{
    emit_failure, emit_run_finished, emit_run_started, emit_stage_finished, emit_stage_started,
    run_span,
};

/// Facts gathered while the pipeline ran.
#[derive(Debug, Clone, Default)]
pub struct PipelineEvidence {
    /// Serialized `FLLOC_CONFIG` value handed to the target.
    pub flloc_config: Option<String>,

    /// SHA-256 of the diagnostic artifact.
    pub diagnostic_digest: Option<String>,

    pub corruption_count: usize,

    pub leak_count: usize,

    /// Expectation fragments checked across both sets.
    pub expectations_checked: usize,

    /// SHA-256 of the trace-dump output.
    pub trace_digest: Option<String>,
}

/// Result of a complete harness run.
#[derive(Debug)]
pub struct PipelineResult {
    pub run_id: String,

    /// Whether every planned stage passed.
    pub success: bool,

    pub stages: Vec<StageOutcome>,

    /// Every failure raised, in the order it was raised.
    pub failures: Vec<HarnessError>,

    pub evidence: PipelineEvidence,

    pub duration_ms: u64,
}

impl PipelineResult {
    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed or aborted.
    pub fn failed_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| matches!(s.status, StageStatus::Failed | StageStatus::Aborted))
            .count()
    }

    /// The error that aborted the run, if any.
    pub fn fatal(&self) -> Option<&HarnessError> {
        self.failures.iter().find(|e| e.is_fatal())
    }

    pub fn has_failure(&self, kind: &str) -> bool {
        self.failures.iter().any(|e| e.kind() == kind)
    }
}

/// Harness pipeline orchestrator.
pub struct HarnessPipeline<'a> {
    config: &'a HarnessConfig,
    artifacts: ArtifactSet,
    run_config: RunConfiguration,
    evidence: PipelineEvidence,
}

impl<'a> HarnessPipeline<'a> {
    pub fn new(config: &'a HarnessConfig) -> Self {
        Self {
            config,
            artifacts: ArtifactSet::from_config(config),
            run_config: RunConfiguration::new(&config.diagnostic_file, config.guard_bytes),
            evidence: PipelineEvidence::default(),
        }
    }

    /// Run every planned stage and collect the outcome.
    pub async fn run(config: &HarnessConfig) -> PipelineResult {
        let run_id = Uuid::new_v4().to_string();
        let span = run_span(&run_id);
        HarnessPipeline::new(config).execute_all(run_id).instrument(span).await
    }

    async fn execute_all(mut self, run_id: String) -> PipelineResult {
        let start = Instant::now();
        emit_run_started(&run_id, &self.program());

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        let mut halted = false;

        for stage in Stage::plan(self.config.skip_audit) {
            if halted {
                info!(stage = %stage, "Skipping stage after earlier failure");
                outcomes.push(StageOutcome::skipped(stage));
                continue;
            }

            emit_stage_started(stage);
            let stage_start = Instant::now();
            let mut recorded = Vec::new();

            let result = self.execute(stage, &mut recorded).await;
            let status = match result {
                Ok(()) if recorded.is_empty() => StageStatus::Passed,
                Ok(()) => StageStatus::Failed,
                Err(e) => {
                    let status = if e.is_fatal() {
                        StageStatus::Aborted
                    } else {
                        StageStatus::Failed
                    };
                    recorded.push(e);
                    status
                }
            };

            let duration_ms = stage_start.elapsed().as_millis() as u64;
            for error in &recorded {
                emit_failure(stage, error);
            }
            emit_stage_finished(stage, status, duration_ms);

            outcomes.push(StageOutcome {
                stage,
                status,
                duration_ms,
                messages: recorded.iter().map(|e| e.to_string()).collect(),
            });
            failures.extend(recorded);

            if status != StageStatus::Passed {
                halted = true;
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = !halted && failures.is_empty();
        emit_run_finished(&run_id, duration_ms, failures.len(), success);

        PipelineResult {
            run_id,
            success,
            stages: outcomes,
            failures,
            evidence: self.evidence,
            duration_ms,
        }
    }

    async fn execute(
        &mut self,
        stage: Stage,
        recorded: &mut Vec<HarnessError>,
    ) -> HarnessResult<()> {
        match stage {
            Stage::ConfigureVerify => self.configure_verify(),
            Stage::RunVerify => self.run_verify().await,
            Stage::ClassifyAndVerify => self.classify_and_verify(recorded),
            Stage::ConfigureAudit => self.configure_audit(),
            Stage::RunAudit => self.auditor().run_traced().await,
            Stage::ScanTrace => self.scan_trace().await,
        }
    }

    fn program(&self) -> String {
        program_name(&self.config.binary)
    }

    fn auditor(&self) -> SelfLeakAuditor<'_> {
        SelfLeakAuditor::new(self.config, &self.artifacts)
    }

    fn configure_verify(&mut self) -> HarnessResult<()> {
        self.config.validate()?;

        if !self.config.binary_path()?.is_file() {
            return Err(HarnessError::Setup {
                path: self.config.binary.clone(),
            });
        }

        self.artifacts.clean_verification()?;

        let value = self.run_config.serialize();
        info!(var = FLLOC_CONFIG_VAR, value = %value, "Configured allocator");
        self.evidence.flloc_config = Some(value);
        Ok(())
    }

    async fn run_verify(&self) -> HarnessResult<()> {
        let invocation = Invocation::new(self.config.binary_path()?, &self.config.workdir)
            .env(self.run_config.to_env())
            .timeout_secs(self.config.timeout_secs);

        let output = ProcessRunner::run(&invocation).await?;
        info!(
            program = %output.program,
            duration_ms = output.duration_ms,
            "Verification run finished"
        );
        Ok(())
    }

    fn classify_and_verify(&mut self, recorded: &mut Vec<HarnessError>) -> HarnessResult<()> {
        let program = self.program();
        let missing = self.artifacts.missing();

        for kind in &missing {
            let error = HarnessError::ArtifactMissing {
                program: program.clone(),
                path: self.artifacts.name(*kind).to_path_buf(),
            };
            if *kind != ArtifactKind::Diagnostic && self.config.allow_missing_expectations {
                warn!(error = %error, "Treating missing expectation file as empty");
            } else {
                recorded.push(error);
            }
        }

        // Nothing to classify or match against.
        if missing.contains(&ArtifactKind::Diagnostic) {
            return Ok(());
        }

        let content = self.artifacts.load(ArtifactKind::Diagnostic, &program)?;
        self.evidence.diagnostic_digest = Some(sha256_hex(content.as_bytes()));

        let classified = classify(&content)?;
        self.evidence.corruption_count = classified.count(DiagnosticCategory::Corruption);
        self.evidence.leak_count = classified.count(DiagnosticCategory::Leak);
        info!(
            classifier_version = CLASSIFIER_VERSION,
            corruptions = self.evidence.corruption_count,
            leaks = self.evidence.leak_count,
            "Classified diagnostics"
        );

        let mut sets = Vec::new();
        for (category, kind) in [
            (DiagnosticCategory::Corruption, ArtifactKind::ExpectedCorruptions),
            (DiagnosticCategory::Leak, ArtifactKind::ExpectedLeaks),
        ] {
            if missing.contains(&kind) {
                sets.push(ExpectationSet::empty(category));
            } else {
                let raw = self.artifacts.load(kind, &program)?;
                sets.push(ExpectationSet::parse(category, &raw));
            }
        }

        let report = verify_all(&sets, &classified);
        self.evidence.expectations_checked = report.checked;
        info!(
            checked = report.checked,
            missing = report.failures.len(),
            "Matched expectations"
        );
        recorded.extend(report.failures);
        Ok(())
    }

    fn configure_audit(&self) -> HarnessResult<()> {
        self.artifacts.clean_trace()?;
        let trace = TraceConfiguration::new(&self.config.trace_file);
        info!(
            var = MALLOC_TRACE_VAR,
            value = %trace.trace_path().display(),
            "Configured allocation tracing"
        );
        Ok(())
    }

    async fn scan_trace(&mut self) -> HarnessResult<()> {
        let report = self.auditor().dump_trace().await?;
        self.evidence.trace_digest = Some(sha256_hex(report.text.as_bytes()));
        self.auditor().scan(&report)
    }
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(stage: Stage, status: StageStatus) -> StageOutcome {
        StageOutcome {
            stage,
            status,
            duration_ms: 1,
            messages: Vec::new(),
        }
    }

    #[test]
    fn test_pipeline_result_counts() {
        let result = PipelineResult {
            run_id: "run123".to_string(),
            success: false,
            stages: vec![
                outcome(Stage::ConfigureVerify, StageStatus::Passed),
                outcome(Stage::RunVerify, StageStatus::Passed),
                outcome(Stage::ClassifyAndVerify, StageStatus::Failed),
                StageOutcome::skipped(Stage::ConfigureAudit),
            ],
            failures: vec![HarnessError::ExpectationNotFound {
                category: DiagnosticCategory::Leak,
                fragment: "0x2000".to_string(),
            }],
            evidence: PipelineEvidence::default(),
            duration_ms: 10,
        };

        assert_eq!(result.passed_count(), 2);
        assert_eq!(result.failed_count(), 1);
        assert!(result.fatal().is_none());
        assert!(result.has_failure("expectation_not_found"));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_setup_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = HarnessConfig {
            workdir: dir.path().to_path_buf(),
            ..HarnessConfig::default()
        };

        let result = HarnessPipeline::run(&config).await;
        assert!(!result.success);
        assert_eq!(result.stages[0].status, StageStatus::Aborted);
        assert!(matches!(result.fatal(), Some(HarnessError::Setup { .. })));
        assert!(result.stages[1..]
            .iter()
            .all(|s| s.status == StageStatus::Skipped));
    }
}
