use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One post-condition check run by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    /// A failing mandatory check fails the whole verification; failing
    /// optional checks only degrade it.
    pub mandatory: bool,
    pub detail: String,
}

/// Aggregate verification verdict, computed conservatively by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pass,
    /// Some optional checks failed; still committed, with a warning.
    Degraded,
    Fail,
    /// Applied state cannot be confirmed until reboot (kernel install).
    /// A valid non-failing terminal verdict, never treated as Fail.
    PendingReboot,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Degraded => write!(f, "degraded"),
            Self::Fail => write!(f, "fail"),
            Self::PendingReboot => write!(f, "pending-reboot"),
        }
    }
}

/// Ordered list of checks produced by one backend verification pass.
/// An empty report is invalid; the engine treats it as a hard failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checks: Vec<Check>,
    /// Set by backends whose effect is only observable after reboot.
    pub pending_reboot: bool,
}

impl VerificationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        name: impl Into<String>,
        passed: bool,
        mandatory: bool,
        detail: impl Into<String>,
    ) {
        self.checks.push(Check {
            name: name.into(),
            passed,
            mandatory,
            detail: detail.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn mandatory_failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.mandatory && !c.passed)
    }

    pub fn optional_failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.mandatory && !c.passed)
    }
}

/// Terminal outcome of one transaction; exactly one per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Candidate state is live and verification passed (fully or degraded).
    Committed,
    /// Mutation occurred and was reverted to the snapshot.
    RolledBack,
    /// A precondition failed before any mutation.
    Aborted,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled-back"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// The immutable final report of one `MutationTransaction::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub operation: String,
    pub outcome: Outcome,
    pub verdict: Option<Verdict>,
    /// Where the pre-transaction snapshot lives, for manual recovery.
    pub snapshot_dir: Option<PathBuf>,
    pub report: Option<VerificationReport>,
    /// Which step failed, for non-committed outcomes.
    pub failed_step: Option<String>,
    pub errors: Vec<String>,
    /// True when rollback itself failed and the operator must intervene
    /// using the snapshot at `snapshot_dir`.
    pub restore_failed: bool,
}

impl TransactionResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Committed
    }
}
