//! Files exchanged with the target binary.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};

/// Which artifact a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Diagnostic,
    ExpectedCorruptions,
    ExpectedLeaks,
    Trace,
}

/// Artifact locations, all relative to the working directory of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    workdir: PathBuf,
    pub diagnostic: PathBuf,
    pub expected_corruptions: PathBuf,
    pub expected_leaks: PathBuf,
    pub trace: PathBuf,
}

impl ArtifactSet {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            workdir: config.workdir.clone(),
            diagnostic: config.diagnostic_file.clone(),
            expected_corruptions: config.expected_corruptions_file.clone(),
            expected_leaks: config.expected_leaks_file.clone(),
            trace: config.trace_file.clone(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Relative name of an artifact, as handed to the child.
    pub fn name(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Diagnostic => &self.diagnostic,
            ArtifactKind::ExpectedCorruptions => &self.expected_corruptions,
            ArtifactKind::ExpectedLeaks => &self.expected_leaks,
            ArtifactKind::Trace => &self.trace,
        }
    }

    /// Location as seen from the harness.
    pub fn path(&self, kind: ArtifactKind) -> PathBuf {
        self.workdir.join(self.name(kind))
    }

    /// Artifacts the verification run must produce.
    pub fn verification_outputs() -> [ArtifactKind; 3] {
        [
            ArtifactKind::Diagnostic,
            ArtifactKind::ExpectedCorruptions,
            ArtifactKind::ExpectedLeaks,
        ]
    }

    /// Remove stale verification artifacts. Absent files are fine.
    pub fn clean_verification(&self) -> HarnessResult<()> {
        for kind in Self::verification_outputs() {
            remove_if_present(&self.path(kind))?;
        }
        Ok(())
    }

    /// Remove a stale trace file.
    pub fn clean_trace(&self) -> HarnessResult<()> {
        remove_if_present(&self.path(ArtifactKind::Trace))
    }

    /// Verification artifacts that do not exist.
    pub fn missing(&self) -> Vec<ArtifactKind> {
        Self::verification_outputs()
            .into_iter()
            .filter(|kind| !self.path(*kind).exists())
            .collect()
    }

    /// Read an artifact as text.
    pub fn load(&self, kind: ArtifactKind, program: &str) -> HarnessResult<String> {
        load_text(&self.path(kind), program)
    }
}

/// Delete `path`, treating a missing file as success.
pub fn remove_if_present(path: &Path) -> HarnessResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stale artifact");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HarnessError::io(path, e)),
    }
}

/// Read a produced artifact. A missing file becomes `ArtifactMissing`
/// attributed to `program`.
pub fn load_text(path: &Path, program: &str) -> HarnessResult<String> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(HarnessError::ArtifactMissing {
            program: program.to_string(),
            path: path.file_name().map(PathBuf::from).unwrap_or_else(|| path.to_path_buf()),
        }),
        Err(e) => Err(HarnessError::io(path, e)),
    }
}
