//! Self-leak audit of the allocator under allocation tracing.
//!
//! The target is run a second time with `MALLOC_TRACE` set, then the
//! trace-dump tool is pointed at the resulting trace. Any mention of the
//! allocator's own source file in the dump means the allocator leaked while
//! doing its own bookkeeping.

use std::ffi::OsString;

use tracing::info;

use crate::artifacts::ArtifactSet;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::injector::{RunConfiguration, TraceConfiguration};
use crate::runner::{program_name, Invocation, ProcessRunner};

/// Text produced by the trace-dump tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceReport {
    pub text: String,
}

impl TraceReport {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Fail with `SelfLeak` if `identifier` occurs anywhere in the report.
    pub fn scan(&self, identifier: &str) -> HarnessResult<()> {
        scan_trace(&self.text, identifier)
    }
}

/// Fail with `SelfLeak` if `identifier` occurs anywhere in `text`.
pub fn scan_trace(text: &str, identifier: &str) -> HarnessResult<()> {
    if text.contains(identifier) {
        return Err(HarnessError::SelfLeak {
            identifier: identifier.to_string(),
        });
    }
    Ok(())
}

/// Runs the traced pass and the trace-dump tool.
pub struct SelfLeakAuditor<'a> {
    config: &'a HarnessConfig,
    artifacts: &'a ArtifactSet,
}

impl<'a> SelfLeakAuditor<'a> {
    pub fn new(config: &'a HarnessConfig, artifacts: &'a ArtifactSet) -> Self {
        Self { config, artifacts }
    }

    /// Launch the target with tracing on.
    pub async fn run_traced(&self) -> HarnessResult<()> {
        let run = RunConfiguration::new(&self.config.diagnostic_file, self.config.guard_bytes);
        let trace = TraceConfiguration::new(&self.config.trace_file);
        let invocation = Invocation::new(self.config.binary_path()?, &self.config.workdir)
            .env(trace.to_env(&run))
            .timeout_secs(self.config.timeout_secs);

        ProcessRunner::run(&invocation).await?;
        Ok(())
    }

    /// Invoke `<tool> <binary-name> <trace-path>` and capture its report.
    pub async fn dump_trace(&self) -> HarnessResult<TraceReport> {
        let invocation = Invocation::new(&self.config.trace_tool, &self.config.workdir)
            .arg(program_name(&self.config.binary))
            .arg(OsString::from(self.config.trace_file.as_os_str()))
            .timeout_secs(self.config.timeout_secs);

        let output = ProcessRunner::run(&invocation).await?;
        info!(
            tool = %output.program,
            bytes = output.stdout.len(),
            "Captured trace report"
        );
        Ok(TraceReport::new(output.stdout))
    }

    /// Scan a captured report for the allocator's source identifier.
    pub fn scan(&self, report: &TraceReport) -> HarnessResult<()> {
        report.scan(&self.config.allocator_identifier)
    }

    /// Full audit: stale trace removal, traced run, dump, scan.
    pub async fn audit(&self) -> HarnessResult<TraceReport> {
        self.artifacts.clean_trace()?;
        self.run_traced().await?;
        let report = self.dump_trace().await?;
        self.scan(&report)?;
        Ok(report)
    }
}
