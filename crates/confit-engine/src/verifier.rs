use confit_state::{Verdict, VerificationReport};

/// Collapse a backend's checks into the transaction verdict.
///
/// The ordering matters: a mandatory failure always wins, then the
/// pending-reboot flag, then optional failures. An empty report is a
/// backend bug and fails hard rather than silently committing.
pub fn evaluate(report: &VerificationReport) -> Verdict {
    if report.is_empty() {
        return Verdict::Fail;
    }
    if report.mandatory_failures().next().is_some() {
        return Verdict::Fail;
    }
    if report.pending_reboot {
        return Verdict::PendingReboot;
    }
    if report.optional_failures().next().is_some() {
        return Verdict::Degraded;
    }
    Verdict::Pass
}

/// Whether a verdict keeps the candidate state in place.
pub fn commits(verdict: Verdict) -> bool {
    !matches!(verdict, Verdict::Fail)
}
