use crate::backend::{Applicability, ApplyOutcome, ConfigBackend};
use crate::BackendError;
use confit_backup::SnapshotTarget;
use confit_state::{CandidateState, Environment, VerificationReport};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared call counters handed out by [`MockBackend::calls`] so a test
/// can inspect what the engine did after the backend has been boxed away.
#[derive(Debug, Default, Clone)]
pub struct MockCalls {
    apply: Arc<AtomicUsize>,
    verify: Arc<AtomicUsize>,
    post_restore: Arc<AtomicUsize>,
}

impl MockCalls {
    pub fn apply(&self) -> usize {
        self.apply.load(Ordering::SeqCst)
    }

    pub fn verify(&self) -> usize {
        self.verify.load(Ordering::SeqCst)
    }

    pub fn post_restore(&self) -> usize {
        self.post_restore.load(Ordering::SeqCst)
    }
}

/// A fully scriptable backend for exercising the transaction machinery
/// without touching any real subsystem.
pub struct MockBackend {
    applicability: Applicability,
    apply_error: Option<String>,
    report: VerificationReport,
    /// When set, capture this file before apply and overwrite it during
    /// apply, so rollback tests can assert byte-identical restoration.
    target_file: Option<PathBuf>,
    mutation: String,
    calls: MockCalls,
}

impl Default for MockBackend {
    fn default() -> Self {
        let mut report = VerificationReport::new();
        report.push("mock", true, true, "scripted pass");
        Self {
            applicability: Applicability::Applicable,
            apply_error: None,
            report,
            target_file: None,
            mutation: "mutated by mock\n".to_owned(),
            calls: MockCalls::default(),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_applicability(mut self, applicability: Applicability) -> Self {
        self.applicability = applicability;
        self
    }

    pub fn failing_apply(mut self, detail: impl Into<String>) -> Self {
        self.apply_error = Some(detail.into());
        self
    }

    pub fn with_report(mut self, report: VerificationReport) -> Self {
        self.report = report;
        self
    }

    pub fn with_target_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_file = Some(path.into());
        self
    }

    pub fn with_mutation(mut self, content: impl Into<String>) -> Self {
        self.mutation = content.into();
        self
    }

    pub fn calls(&self) -> MockCalls {
        self.calls.clone()
    }
}

impl ConfigBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn detect_applicability(&self, _env: &Environment) -> Applicability {
        self.applicability.clone()
    }

    fn snapshot_targets(&self) -> Vec<SnapshotTarget> {
        match &self.target_file {
            Some(path) => vec![SnapshotTarget::File(path.clone())],
            None => Vec::new(),
        }
    }

    fn current_state(&self) -> Result<String, BackendError> {
        Ok("mock state".to_owned())
    }

    fn apply(&mut self, _candidate: &CandidateState) -> Result<ApplyOutcome, BackendError> {
        self.calls.apply.fetch_add(1, Ordering::SeqCst);
        if let Some(detail) = &self.apply_error {
            return Err(BackendError::CommandFailed {
                command: "mock apply".to_owned(),
                detail: detail.clone(),
            });
        }
        if let Some(path) = &self.target_file {
            std::fs::write(path, &self.mutation)?;
        }
        Ok(ApplyOutcome {
            changed: true,
            ..ApplyOutcome::default()
        })
    }

    fn verify(&self, _candidate: &CandidateState) -> Result<VerificationReport, BackendError> {
        self.calls.verify.fetch_add(1, Ordering::SeqCst);
        Ok(self.report.clone())
    }

    fn post_restore(&self) -> Result<(), BackendError> {
        self.calls.post_restore.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confit_state::Ipv6Candidate;

    fn candidate() -> CandidateState {
        CandidateState::Ipv6(Ipv6Candidate { disabled: true })
    }

    #[test]
    fn counters_visible_after_boxing() {
        let mock = MockBackend::new();
        let calls = mock.calls();
        let mut boxed: Box<dyn ConfigBackend> = Box::new(mock);
        boxed.apply(&candidate()).unwrap();
        boxed.verify(&candidate()).unwrap();
        boxed.verify(&candidate()).unwrap();
        assert_eq!(calls.apply(), 1);
        assert_eq!(calls.verify(), 2);
    }

    #[test]
    fn scripted_apply_failure() {
        let mut mock = MockBackend::new().failing_apply("disk on fire");
        assert!(matches!(
            mock.apply(&candidate()),
            Err(BackendError::CommandFailed { .. })
        ));
    }

    #[test]
    fn target_file_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("victim.conf");
        std::fs::write(&path, "original\n").unwrap();
        let mut mock = MockBackend::new().with_target_file(&path);
        mock.apply(&candidate()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "mutated by mock\n");
    }
}
