//! Verification and doctor report types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    Failed,
    Skipped,
}

/// One named integrity check in a verification report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub name: String,
    pub status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Result of `Memory::verify`. Structural invalidity is reported through
/// failed checks, never through an error; only an unreadable path errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub file_path: PathBuf,
    pub overall_status: VerificationStatus,
    pub checks: Vec<VerificationCheck>,
}

impl VerificationReport {
    #[must_use]
    pub fn check(&self, name: &str) -> Option<&VerificationCheck> {
        self.checks.iter().find(|check| check.name == name)
    }

    /// Pretty JSON rendering for CLI and binding surfaces.
    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| crate::error::Mv2Error::Encode {
            reason: err.to_string(),
        })
    }
}

/// Which bounded repairs the doctor is allowed to attempt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DoctorOptions {
    #[serde(default)]
    pub rebuild_time_index: bool,
    #[serde(default)]
    pub rebuild_lex_index: bool,
    /// Zero a corrupt WAL region, dropping uncommitted entries.
    #[serde(default)]
    pub reset_wal: bool,
    /// Plan only; touch nothing on disk.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoctorStatus {
    /// Nothing to repair.
    Clean,
    /// Repairs were applied and post-verification passed.
    Healed,
    /// Repairs were attempted but the file is still unhealthy.
    Failed,
    /// Dry run; findings reported without repairs.
    PlanOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoctorSeverity {
    Info,
    Warning,
    Error,
}

/// A problem the doctor observed while probing the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorFinding {
    pub severity: DoctorSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoctorActionKind {
    ResetWal,
    RecoverToc,
    RebuildTimeIndex,
    RebuildLexIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoctorActionStatus {
    Applied,
    Skipped,
    Failed,
}

/// One repair the doctor attempted, with what it changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorActionReport {
    pub kind: DoctorActionKind,
    pub status: DoctorActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Full doctor report: findings, applied actions, and the post-repair
/// verification when repairs ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorReport {
    pub status: DoctorStatus,
    pub findings: Vec<DoctorFinding>,
    pub actions: Vec<DoctorActionReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
}

impl DoctorReport {
    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| crate::error::Mv2Error::Encode {
            reason: err.to_string(),
        })
    }
}
