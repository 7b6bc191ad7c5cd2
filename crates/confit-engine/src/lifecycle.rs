use crate::EngineError;
use std::fmt;

/// Progress of one transaction through its fixed phase sequence. Every
/// run ends in exactly one of the three terminal phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Detected,
    Snapshotted,
    Applied,
    Verified,
    Committed,
    RolledBack,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Detected => "detected",
            Self::Snapshotted => "snapshotted",
            Self::Applied => "applied",
            Self::Verified => "verified",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

pub fn validate_transition(from: Phase, to: Phase) -> Result<(), EngineError> {
    let valid = matches!(
        (from, to),
        (Phase::Init, Phase::Detected | Phase::Aborted)
            // Detected -> Committed is the already-satisfied short circuit.
            | (
                Phase::Detected,
                Phase::Snapshotted | Phase::Committed | Phase::Aborted
            )
            | (Phase::Snapshotted, Phase::Applied | Phase::RolledBack)
            | (Phase::Applied, Phase::Verified | Phase::RolledBack)
            | (Phase::Verified, Phase::Committed | Phase::RolledBack)
    );

    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
