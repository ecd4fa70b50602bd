//! Allocator configuration channels.
//!
//! The allocator reads `FLLOC_CONFIG` (`FILE=<path>;GUARD=<n>`) and glibc's
//! tracing facility reads `MALLOC_TRACE`. Both values are built here and
//! handed to the process launcher as an explicit [`LaunchEnv`]; the harness
//! never exports them into its own environment.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Variable consumed by the allocator.
pub const FLLOC_CONFIG_VAR: &str = "FLLOC_CONFIG";

/// Variable consumed by the libc allocation tracer.
pub const MALLOC_TRACE_VAR: &str = "MALLOC_TRACE";

/// One allocator option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigOption {
    /// Path the allocator writes its diagnostics to.
    File(PathBuf),

    /// Guard padding width in bytes.
    Guard(u64),
}

impl ConfigOption {
    pub fn key(&self) -> &'static str {
        match self {
            ConfigOption::File(_) => "FILE",
            ConfigOption::Guard(_) => "GUARD",
        }
    }

    fn value(&self) -> String {
        match self {
            ConfigOption::File(path) => path.to_string_lossy().into_owned(),
            ConfigOption::Guard(n) => n.to_string(),
        }
    }
}

/// Options for a single target run, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfiguration {
    options: Vec<ConfigOption>,
}

impl RunConfiguration {
    pub fn new(diagnostic_file: impl Into<PathBuf>, guard_bytes: u64) -> Self {
        Self {
            options: vec![
                ConfigOption::File(diagnostic_file.into()),
                ConfigOption::Guard(guard_bytes),
            ],
        }
    }

    pub fn options(&self) -> &[ConfigOption] {
        &self.options
    }

    /// `KEY=value` pairs joined with `;`.
    pub fn serialize(&self) -> String {
        self.options
            .iter()
            .map(|opt| format!("{}={}", opt.key(), opt.value()))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Environment for the verification run.
    pub fn to_env(&self) -> LaunchEnv {
        let mut env = LaunchEnv::default();
        env.set(FLLOC_CONFIG_VAR, self.serialize());
        env
    }
}

/// Trace output selection for the audit run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfiguration {
    trace_path: PathBuf,
}

impl TraceConfiguration {
    pub fn new(trace_path: impl Into<PathBuf>) -> Self {
        Self {
            trace_path: trace_path.into(),
        }
    }

    pub fn trace_path(&self) -> &Path {
        &self.trace_path
    }

    /// Environment for the audit run: the allocator channel stays set and the
    /// trace channel is added next to it.
    pub fn to_env(&self, run: &RunConfiguration) -> LaunchEnv {
        let mut env = run.to_env();
        env.set(MALLOC_TRACE_VAR, self.trace_path.as_os_str());
        env
    }
}

/// Variables set on a child process only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchEnv {
    vars: Vec<(OsString, OsString)>,
}

impl LaunchEnv {
    /// Set a variable, replacing an earlier value for the same key.
    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.vars.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OsString> {
        self.vars.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsString, &OsString)> {
        self.vars.iter().map(|(k, v)| (k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_file_then_guard() {
        let cfg = RunConfiguration::new("test.txt", 128);
        assert_eq!(cfg.serialize(), "FILE=test.txt;GUARD=128");
    }

    #[test]
    fn test_zero_guard_is_emitted() {
        let cfg = RunConfiguration::new("/tmp/out/diag.txt", 0);
        assert_eq!(cfg.serialize(), "FILE=/tmp/out/diag.txt;GUARD=0");
    }

    #[test]
    fn test_verify_env_has_only_config_channel() {
        let env = RunConfiguration::new("test.txt", 16).to_env();
        assert_eq!(
            env.get(FLLOC_CONFIG_VAR).map(|v| v.to_string_lossy().into_owned()),
            Some("FILE=test.txt;GUARD=16".to_string())
        );
        assert!(env.get(MALLOC_TRACE_VAR).is_none());
    }

    #[test]
    fn test_audit_env_keeps_config_and_adds_trace() {
        let run = RunConfiguration::new("test.txt", 128);
        let env = TraceConfiguration::new("mtrace.txt").to_env(&run);
        assert!(env.get(FLLOC_CONFIG_VAR).is_some());
        assert_eq!(env.get(MALLOC_TRACE_VAR), Some(&OsString::from("mtrace.txt")));
        assert_eq!(env.iter().count(), 2);
    }

    #[test]
    fn test_set_replaces_existing_key() {
        let mut env = LaunchEnv::default();
        env.set("A", "1");
        env.set("A", "2");
        assert_eq!(env.iter().count(), 1);
        assert_eq!(env.get("A"), Some(&OsString::from("2")));
    }
}
