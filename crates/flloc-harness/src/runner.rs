//! Child process execution.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::injector::{LaunchEnv, FLLOC_CONFIG_VAR, MALLOC_TRACE_VAR};

/// A single program launch.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Program to execute. Bare names go through `PATH`; anything with a
    /// directory component is taken relative to `workdir`.
    pub program: PathBuf,

    pub args: Vec<OsString>,

    /// Variables added to the child's environment.
    pub env: LaunchEnv,

    /// Working directory of the child, relative to the harness when not
    /// absolute.
    pub workdir: PathBuf,

    /// Wall-clock limit (0 = wait forever).
    pub timeout_secs: u64,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: LaunchEnv::default(),
            workdir: workdir.into(),
            timeout_secs: 0,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, env: LaunchEnv) -> Self {
        self.env = env;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Name used in messages.
    pub fn display_name(&self) -> String {
        program_name(&self.program)
    }
}

/// Path to launch for `program`: bare names go through `PATH`, anything with a
/// directory component is taken relative to `workdir`.
pub fn resolve_program(workdir: &Path, program: &Path) -> PathBuf {
    if program.is_absolute() || program.components().count() <= 1 {
        program.to_path_buf()
    } else {
        workdir.join(program)
    }
}

/// `dir` as an absolute path, anchored at the harness's current directory.
pub fn absolute_dir(dir: &Path) -> HarnessResult<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| HarnessError::io(dir, e))?;
    Ok(cwd.join(dir))
}

/// Final path component of a program path.
pub fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string_lossy().into_owned())
}

/// Captured result of a finished child.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub program: String,

    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Launches child processes and waits for them.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Run to completion and capture output, whatever the exit status.
    pub async fn capture(invocation: &Invocation) -> HarnessResult<ProcessOutput> {
        let start = Instant::now();
        let name = invocation.display_name();

        // The child chdirs before exec, so relative paths must not be applied twice.
        let workdir = absolute_dir(&invocation.workdir)?;
        let program = resolve_program(&workdir, &invocation.program);

        let mut command = Command::new(&program);
        command
            .args(&invocation.args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in [FLLOC_CONFIG_VAR, MALLOC_TRACE_VAR] {
            if invocation.env.get(var).is_none() {
                command.env_remove(var);
            }
        }
        for (key, value) in invocation.env.iter() {
            command.env(key, value);
        }

        debug!(program = %name, args = ?invocation.args, "Launching child process");

        let child = command.spawn().map_err(|source| HarnessError::Spawn {
            program: name.clone(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = if invocation.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(invocation.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| HarnessError::Timeout {
                program: name.clone(),
                limit_secs: invocation.timeout_secs,
            })?
        } else {
            child.wait_with_output().await
        }
        .map_err(|source| HarnessError::Spawn {
            program: name.clone(),
            source,
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        debug!(program = %name, exit_code, duration_ms, "Child process exited");

        Ok(ProcessOutput {
            program: name,
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        })
    }

    /// Run to completion; a non-zero exit is an error.
    pub async fn run(invocation: &Invocation) -> HarnessResult<ProcessOutput> {
        let output = Self::capture(invocation).await?;
        if !output.success() {
            return Err(HarnessError::ProcessFailed {
                program: output.program,
                exit_code: output.exit_code,
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_program() {
        let wd = Path::new("/work");
        assert_eq!(resolve_program(wd, Path::new("./unit-test")), PathBuf::from("/work/./unit-test"));
        assert_eq!(resolve_program(wd, Path::new("echo")), PathBuf::from("echo"));
        assert_eq!(resolve_program(wd, Path::new("/bin/true")), PathBuf::from("/bin/true"));
    }

    #[test]
    fn test_absolute_dir() {
        assert_eq!(absolute_dir(Path::new("/work")).unwrap(), PathBuf::from("/work"));
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(absolute_dir(Path::new("build")).unwrap(), cwd.join("build"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ambient_trace_variable_not_inherited() {
        std::env::set_var(MALLOC_TRACE_VAR, "ambient-trace.txt");
        let inv = Invocation::new("sh", ".")
            .arg("-c")
            .arg("printf '%s' \"${MALLOC_TRACE-unset}\"")
            .timeout_secs(60);
        let out = ProcessRunner::run(&inv).await.expect("run failed");
        assert_eq!(out.stdout, "unset");

        let mut env = LaunchEnv::default();
        env.set(MALLOC_TRACE_VAR, "mtrace.txt");
        let traced = inv.clone().env(env);
        let out = ProcessRunner::run(&traced).await.expect("run failed");
        assert_eq!(out.stdout, "mtrace.txt");
        std::env::remove_var(MALLOC_TRACE_VAR);
    }

    #[test]
    fn test_program_name() {
        assert_eq!(program_name(Path::new("./unit-test")), "unit-test");
        assert_eq!(program_name(Path::new("/usr/bin/mtrace")), "mtrace");
    }

    #[test]
    fn test_output_success() {
        let out = ProcessOutput {
            program: "unit-test".to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 5,
        };
        assert!(out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_simple_command() {
        let inv = Invocation::new("echo", ".").arg("hello").timeout_secs(60);
        let out = ProcessRunner::capture(&inv).await.expect("capture failed");
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_reaches_child_only() {
        let mut env = LaunchEnv::default();
        env.set("FLLOC_HARNESS_PROBE", "probe-value");
        let inv = Invocation::new("sh", ".")
            .arg("-c")
            .arg("echo $FLLOC_HARNESS_PROBE")
            .env(env)
            .timeout_secs(60);

        let out = ProcessRunner::run(&inv).await.expect("run failed");
        assert!(out.stdout.contains("probe-value"));
        assert!(std::env::var("FLLOC_HARNESS_PROBE").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_rejects_non_zero_exit() {
        let inv = Invocation::new("false", ".").timeout_secs(60);
        match ProcessRunner::run(&inv).await {
            Err(HarnessError::ProcessFailed { program, exit_code }) => {
                assert_eq!(program, "false");
                assert_ne!(exit_code, 0);
            }
            other => panic!("expected ProcessFailed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let inv = Invocation::new("sleep", ".").arg("5").timeout_secs(1);
        match ProcessRunner::capture(&inv).await {
            Err(HarnessError::Timeout { limit_secs, .. }) => assert_eq!(limit_secs, 1),
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let inv = Invocation::new("./definitely-not-here", ".");
        let err = ProcessRunner::capture(&inv).await.unwrap_err();
        assert_eq!(err.kind(), "spawn");
    }
}
