//! flloc harness CLI
//!
//! The `flloc-harness` command verifies the flloc allocator against its
//! instrumented unit-test binary.
//!
//! ## Commands
//!
//! - `run`: full two-pass check (default when no command is given)
//! - `verify`: check artifacts already produced by an earlier run
//! - `classify`: classify a diagnostic file
//! - `audit-trace`: scan a saved trace dump for self-leaks
//! - `show-config`: print the effective configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, Level};

use flloc_harness::artifacts::{load_text, ArtifactKind};
use flloc_harness::runner::program_name;
use flloc_harness::{
    classify, render_stage_summary, scan_trace, verify_all, write_report_json, ArtifactSet,
    DiagnosticCategory, ExpectationSet, HarnessConfig, HarnessError, HarnessPipeline,
    HarnessReport, RunConfiguration,
};

#[derive(Parser)]
#[command(name = "flloc-harness")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verification harness for the flloc allocator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the verification pass and the self-leak audit
    Run {
        #[command(flatten)]
        settings: Settings,

        /// Write a JSON report of the run to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Classify and match artifacts already present in the working directory
    Verify {
        #[command(flatten)]
        settings: Settings,
    },

    /// Classify a diagnostic file and print per-category counts
    Classify {
        /// Diagnostic file written by flloc
        file: PathBuf,
    },

    /// Scan a saved trace dump for the allocator's own source
    AuditTrace {
        /// Output of the trace-dump tool
        file: PathBuf,

        /// Source identifier of the allocator
        #[arg(long, default_value = "flloc.c")]
        identifier: String,
    },

    /// Print the effective configuration as JSON
    ShowConfig {
        #[command(flatten)]
        settings: Settings,
    },
}

/// Configuration layering: defaults, then `--config`, then flags.
#[derive(Args, Debug, Default, Clone)]
struct Settings {
    /// JSON configuration file
    #[arg(short, long, env = "FLLOC_HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory the target runs in
    #[arg(long, env = "FLLOC_HARNESS_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Instrumented test binary
    #[arg(long, env = "FLLOC_HARNESS_BINARY")]
    binary: Option<PathBuf>,

    /// Diagnostic file the allocator writes to
    #[arg(long)]
    diagnostic_file: Option<PathBuf>,

    /// Guard padding width in bytes
    #[arg(long, env = "FLLOC_HARNESS_GUARD")]
    guard: Option<u64>,

    /// Trace output file for the audit pass
    #[arg(long)]
    trace_file: Option<PathBuf>,

    /// Trace-dump tool
    #[arg(long, env = "FLLOC_HARNESS_TRACE_TOOL")]
    trace_tool: Option<PathBuf>,

    /// Allocator source identifier looked for in the trace dump
    #[arg(long)]
    identifier: Option<String>,

    /// Limit for each child process, in seconds
    #[arg(long, env = "FLLOC_HARNESS_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Stop after the verification pass
    #[arg(long)]
    skip_audit: bool,

    /// Treat missing expectation files as empty
    #[arg(long)]
    allow_missing_expectations: bool,
}

impl Settings {
    fn resolve(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {:?}", path))?,
            None => HarnessConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(workdir) = &self.workdir {
            config.workdir = workdir.clone();
        }
        if let Some(binary) = &self.binary {
            config.binary = binary.clone();
        }
        if let Some(file) = &self.diagnostic_file {
            config.diagnostic_file = file.clone();
        }
        if let Some(guard) = self.guard {
            config.guard_bytes = guard;
        }
        if let Some(file) = &self.trace_file {
            config.trace_file = file.clone();
        }
        if let Some(tool) = &self.trace_tool {
            config.trace_tool = tool.clone();
        }
        if let Some(identifier) = &self.identifier {
            config.allocator_identifier = identifier.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = secs;
        }
        config.skip_audit |= self.skip_audit;
        config.allow_missing_expectations |= self.allow_missing_expectations;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    flloc_harness::init_tracing(cli.json, level);

    let command = cli.command.unwrap_or(Commands::Run {
        settings: Settings::default(),
        report: None,
    });

    let outcome = match command {
        Commands::Run { settings, report } => cmd_run(&settings, report.as_deref()).await,
        Commands::Verify { settings } => cmd_verify(&settings),
        Commands::Classify { file } => cmd_classify(&file),
        Commands::AuditTrace { file, identifier } => cmd_audit_trace(&file, &identifier),
        Commands::ShowConfig { settings } => cmd_show_config(&settings),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            println!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Print one failure the way the flloc test suite always has.
fn print_failure(error: &HarnessError, config: Option<&HarnessConfig>) {
    match error {
        HarnessError::ExpectationNotFound { .. } => println!("UNIT TEST FAIL: {}", error),
        HarnessError::SelfLeak { .. } => {
            println!("UNIT TEST FAIL: Memory leaks detected inside flloc itself!");
            if let Some(config) = config {
                println!(
                    "Run `mtrace {} {}` for more information.",
                    program_name(&config.binary),
                    config.trace_file.display()
                );
            }
        }
        HarnessError::Setup { .. } => println!("Can't find {}", error_subject(error)),
        _ => println!("{}", error),
    }
}

fn error_subject(error: &HarnessError) -> String {
    match error {
        HarnessError::Setup { path } => {
            format!("'{}', run make first", program_name(path))
        }
        other => other.to_string(),
    }
}

async fn cmd_run(settings: &Settings, report_path: Option<&Path>) -> Result<bool> {
    let config = settings.resolve()?;
    debug!(config = ?config, "Resolved harness configuration");

    let result = HarnessPipeline::run(&config).await;

    for failure in &result.failures {
        print_failure(failure, Some(&config));
    }

    if let Some(path) = report_path {
        let report = HarnessReport::from_result(&program_name(&config.binary), &result);
        write_report_json(path, &report).context("Failed to write harness report")?;
        println!("Report written to {}", path.display());
    }

    if result.success {
        println!("All unit tests passed!");
    } else {
        print!("{}", render_stage_summary(&result));
    }
    Ok(result.success)
}

fn cmd_verify(settings: &Settings) -> Result<bool> {
    let config = settings.resolve()?;
    let artifacts = ArtifactSet::from_config(&config);
    let program = program_name(&config.binary);

    let content = match artifacts.load(ArtifactKind::Diagnostic, &program) {
        Ok(content) => content,
        Err(e) => {
            print_failure(&e, Some(&config));
            return Ok(false);
        }
    };
    let classified = match classify(&content) {
        Ok(classified) => classified,
        Err(e) => {
            print_failure(&e, Some(&config));
            return Ok(false);
        }
    };

    let mut ok = true;
    let mut sets = Vec::new();
    for (category, kind) in [
        (DiagnosticCategory::Corruption, ArtifactKind::ExpectedCorruptions),
        (DiagnosticCategory::Leak, ArtifactKind::ExpectedLeaks),
    ] {
        match artifacts.load(kind, &program) {
            Ok(raw) => sets.push(ExpectationSet::parse(category, &raw)),
            Err(e @ HarnessError::ArtifactMissing { .. }) => {
                print_failure(&e, Some(&config));
                if !config.allow_missing_expectations {
                    ok = false;
                }
                sets.push(ExpectationSet::empty(category));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let report = verify_all(&sets, &classified);
    for failure in &report.failures {
        print_failure(failure, Some(&config));
    }
    ok &= report.passed();

    println!(
        "Checked {} expectation(s): {}",
        report.checked,
        if ok { "✓ PASSED" } else { "✗ FAILED" }
    );
    Ok(ok)
}

fn cmd_classify(file: &Path) -> Result<bool> {
    let content = load_text(file, "flloc")?;
    match classify(&content) {
        Ok(classified) => {
            for category in DiagnosticCategory::ALL {
                println!("{}: {}", category, classified.count(category));
            }
            Ok(true)
        }
        Err(e) => {
            print_failure(&e, None);
            Ok(false)
        }
    }
}

fn cmd_audit_trace(file: &Path, identifier: &str) -> Result<bool> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read trace report {:?}", file))?;
    match scan_trace(&text, identifier) {
        Ok(()) => {
            println!("No references to '{}' in {}", identifier, file.display());
            Ok(true)
        }
        Err(e) => {
            print_failure(&e, None);
            Ok(false)
        }
    }
}

fn cmd_show_config(settings: &Settings) -> Result<bool> {
    let config = settings.resolve()?;
    let valid = match config.validate() {
        Ok(()) => true,
        Err(e) => {
            println!("{}", e);
            false
        }
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!(
        "FLLOC_CONFIG={}",
        RunConfiguration::new(&config.diagnostic_file, config.guard_bytes).serialize()
    );
    Ok(valid)
}
