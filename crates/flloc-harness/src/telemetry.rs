//! Tracing setup and structured lifecycle events for harness runs.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter` and optional JSON formatting. Pipeline code
//! reports progress through the `emit_*` functions so that field names stay
//! consistent across stages.

use tracing::{info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::HarnessError;
use crate::stage::{Stage, StageStatus};

/// Initialise the global tracing subscriber.
///
/// * `json`: when `true`, emit newline-delimited JSON log lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
///
/// Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // Logs go to stderr; stdout carries the pass/fail messages.
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// Span that tags everything logged during a run with its `run_id`.
///
/// Attach it with `Instrument::instrument` rather than entering it, since the
/// pipeline awaits child processes while it is active.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("flloc.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, binary: &str) {
    info!(event = "run.started", run_id = %run_id, binary = %binary);
}

pub fn emit_stage_started(stage: Stage) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_finished(stage: Stage, status: StageStatus, duration_ms: u64) {
    info!(
        event = "stage.finished",
        stage = %stage,
        status = ?status,
        duration_ms = duration_ms,
    );
}

/// A failure was raised; fatal ones end the run.
pub fn emit_failure(stage: Stage, error: &HarnessError) {
    warn!(
        event = "stage.failure",
        stage = %stage,
        kind = error.kind(),
        fatal = error.is_fatal(),
        error = %error,
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, failures: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        failures = failures,
        success = success,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
    }

    #[test]
    fn test_emitters_do_not_panic() {
        let _guard = run_span("test-run-id").entered();
        emit_run_started("test-run-id", "unit-test");
        emit_stage_started(Stage::RunVerify);
        emit_stage_finished(Stage::RunVerify, StageStatus::Passed, 12);
        emit_failure(
            Stage::ScanTrace,
            &HarnessError::SelfLeak {
                identifier: "flloc.c".into(),
            },
        );
        emit_run_finished("test-run-id", 40, 1, false);
    }
}
