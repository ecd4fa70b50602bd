//! flloc harness - verification gate for the flloc allocator
//!
//! Drives an instrumented test binary in two passes:
//! - Verification: configure the allocator through `FLLOC_CONFIG`, run the
//!   binary, classify its diagnostics and check every expected corruption
//!   and leak was reported
//! - Audit: run the binary again under `MALLOC_TRACE` and make sure the
//!   allocator's own source never shows up in the trace dump

pub mod artifacts;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod expectations;
pub mod injector;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod stage;
pub mod telemetry;

// Re-export key types
pub use artifacts::{ArtifactKind, ArtifactSet};
pub use audit::{scan_trace, SelfLeakAuditor, TraceReport};
pub use classifier::{classify, ClassifiedOutput, DiagnosticCategory, DiagnosticRecord};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use expectations::{verify, verify_all, ExpectationSet, VerificationReport};
pub use injector::{LaunchEnv, RunConfiguration, TraceConfiguration};
pub use pipeline::{HarnessPipeline, PipelineEvidence, PipelineResult};
pub use report::{render_stage_summary, write_report_json, HarnessReport};
pub use runner::{Invocation, ProcessOutput, ProcessRunner};
pub use stage::{Stage, StageOutcome, StageStatus};
pub use telemetry::init_tracing;

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
