//! Error types for the verification harness.

use std::path::PathBuf;

use crate::classifier::DiagnosticCategory;

/// Errors produced by the harness pipeline.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The target binary is missing before the first run.
    #[error("can't find '{}', run make first", path.display())]
    Setup { path: PathBuf },

    /// The target run did not produce an artifact it was supposed to write.
    #[error("'{program}' did not produce a '{}' file", path.display())]
    ArtifactMissing { program: String, path: PathBuf },

    /// A diagnostic line matched no known category.
    #[error("unrecognized diagnostic line in flloc output: {line}")]
    UnclassifiedLine { line: String },

    /// An expected fragment was not reported in its category.
    #[error("flloc failed to detect memory {} at {fragment}", category.noun())]
    ExpectationNotFound {
        category: DiagnosticCategory,
        fragment: String,
    },

    /// The allocator's own source shows up in the allocation trace.
    #[error("memory leaks detected inside flloc itself ('{identifier}' found in trace)")]
    SelfLeak { identifier: String },

    #[error("'{program}' exited with code {exit_code}")]
    ProcessFailed { program: String, exit_code: i32 },

    #[error("'{program}' timed out after {limit_secs} seconds")]
    Timeout { program: String, limit_secs: u64 },

    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid harness configuration: {0}")]
    Config(String),
}

impl HarnessError {
    /// Whether this error aborts the pipeline immediately.
    ///
    /// Missing artifacts and missing expectations are recorded and the
    /// remaining checks still run; everything else stops the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            HarnessError::ArtifactMissing { .. } | HarnessError::ExpectationNotFound { .. }
        )
    }

    /// Stable tag used in reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Setup { .. } => "setup",
            HarnessError::ArtifactMissing { .. } => "artifact_missing",
            HarnessError::UnclassifiedLine { .. } => "unclassified_line",
            HarnessError::ExpectationNotFound { .. } => "expectation_not_found",
            HarnessError::SelfLeak { .. } => "self_leak",
            HarnessError::ProcessFailed { .. } => "process_failed",
            HarnessError::Timeout { .. } => "timeout",
            HarnessError::Spawn { .. } => "spawn",
            HarnessError::Io { .. } => "io",
            HarnessError::Config(_) => "config",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for harness operations.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_errors_are_not_fatal() {
        let missing = HarnessError::ArtifactMissing {
            program: "unit-test".into(),
            path: PathBuf::from("expected-leaks.txt"),
        };
        let not_found = HarnessError::ExpectationNotFound {
            category: DiagnosticCategory::Leak,
            fragment: "0x2000".into(),
        };
        assert!(!missing.is_fatal());
        assert!(!not_found.is_fatal());
    }

    #[test]
    fn test_pipeline_aborting_errors_are_fatal() {
        assert!(HarnessError::UnclassifiedLine { line: "x".into() }.is_fatal());
        assert!(HarnessError::SelfLeak {
            identifier: "flloc.c".into()
        }
        .is_fatal());
        assert!(HarnessError::Setup {
            path: PathBuf::from("./unit-test")
        }
        .is_fatal());
        assert!(HarnessError::Timeout {
            program: "unit-test".into(),
            limit_secs: 1
        }
        .is_fatal());
    }

    #[test]
    fn test_messages_name_the_offender() {
        let err = HarnessError::UnclassifiedLine {
            line: "Warning: unusual allocation size".into(),
        };
        assert!(err.to_string().contains("Warning: unusual allocation size"));

        let err = HarnessError::ExpectationNotFound {
            category: DiagnosticCategory::Corruption,
            fragment: "0xdeadbeef".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("corruption"));
        assert!(msg.contains("0xdeadbeef"));
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(HarnessError::Config("x".into()).kind(), "config");
        assert_eq!(
            HarnessError::SelfLeak {
                identifier: "flloc.c".into()
            }
            .kind(),
            "self_leak"
        );
    }
}
