use crate::lifecycle::{validate_transition, Phase};
use crate::lock::EngineLock;
use crate::verifier::{commits, evaluate};
use crate::EngineError;
use confit_backend::{select_backend, Applicability, BackendKind, ConfigBackend, HostPaths};
use confit_backup::{BackupLayout, BackupStore, Snapshot};
use confit_state::{
    CandidateState, Environment, Outcome, TransactionResult, Verdict, VerificationReport,
};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const RESULT_FILE: &str = "result.json";

/// Runs candidates through the fixed transaction sequence: detect,
/// snapshot, apply, verify, then commit or roll back.
///
/// Every run produces a [`TransactionResult`]; `Err` is reserved for
/// infrastructure problems (lock contention, unusable backup root) where
/// the transaction never started. Once a snapshot exists, all failure
/// modes are folded into the result instead.
pub struct MutationEngine {
    store: BackupStore,
    env: Environment,
    paths: HostPaths,
}

impl MutationEngine {
    pub fn new(backup_root: impl Into<std::path::PathBuf>, env: Environment, paths: HostPaths) -> Self {
        Self {
            store: BackupStore::new(BackupLayout::new(backup_root)),
            env,
            paths,
        }
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Run one operation with the backend selected for `kind`.
    pub fn run(
        &self,
        operation: &str,
        kind: BackendKind,
        candidate: &CandidateState,
    ) -> Result<TransactionResult, EngineError> {
        let backend = select_backend(kind, &self.env, &self.paths);
        self.run_with_backend(operation, backend, candidate)
    }

    /// Run one operation with an explicit backend instance.
    pub fn run_with_backend(
        &self,
        operation: &str,
        mut backend: Box<dyn ConfigBackend>,
        candidate: &CandidateState,
    ) -> Result<TransactionResult, EngineError> {
        let _lock = EngineLock::acquire(&self.store.layout().lock_file())?;
        self.store.layout().initialize()?;

        info!("transaction start: {operation} via {} backend", backend.name());
        let mut phase = Phase::Init;
        let mut result = TransactionResult {
            operation: operation.to_owned(),
            outcome: Outcome::Aborted,
            verdict: None,
            snapshot_dir: None,
            report: None,
            failed_step: None,
            errors: Vec::new(),
            restore_failed: false,
        };

        match backend.detect_applicability(&self.env) {
            Applicability::Inapplicable(reason) => {
                advance(&mut phase, Phase::Aborted)?;
                warn!("{operation}: inapplicable, {reason}");
                result.failed_step = Some("detect".to_owned());
                result.errors.push(reason);
                return self.finish(result);
            }
            Applicability::Satisfied(reason) => {
                advance(&mut phase, Phase::Detected)?;
                advance(&mut phase, Phase::Committed)?;
                info!("{operation}: already satisfied, nothing to do");
                let mut report = VerificationReport::new();
                report.push("already-satisfied", true, true, reason);
                result.outcome = Outcome::Committed;
                result.verdict = Some(Verdict::Pass);
                result.report = Some(report);
                return self.finish(result);
            }
            Applicability::Applicable => advance(&mut phase, Phase::Detected)?,
        }

        // Unacknowledged warnings stop the transaction before any state
        // is captured or touched.
        if !candidate.acknowledged() && !candidate.warnings().is_empty() {
            advance(&mut phase, Phase::Aborted)?;
            result.failed_step = Some("acknowledge".to_owned());
            for warning in candidate.warnings() {
                result.errors.push(warning.message.clone());
            }
            return self.finish(result);
        }

        let snapshot = match self.store.take(operation, &backend.snapshot_targets()) {
            Ok(snapshot) => {
                advance(&mut phase, Phase::Snapshotted)?;
                result.snapshot_dir = Some(snapshot.dir.clone());
                snapshot
            }
            Err(e) => {
                // Nothing was mutated; refusing to apply what we cannot
                // restore is the whole point of the snapshot phase.
                advance(&mut phase, Phase::Aborted)?;
                result.failed_step = Some("snapshot".to_owned());
                result.errors.push(e.to_string());
                return self.finish(result);
            }
        };

        match backend.apply(candidate) {
            Ok(outcome) => {
                advance(&mut phase, Phase::Applied)?;
                for note in &outcome.notes {
                    info!("{operation}: {note}");
                }
                if !outcome.skipped_keys.is_empty() {
                    warn!(
                        "{operation}: skipped unsupported keys: {}",
                        outcome.skipped_keys.join(", ")
                    );
                }
            }
            Err(e) => {
                result.failed_step = Some("apply".to_owned());
                result.errors.push(e.to_string());
                self.rollback(backend.as_ref(), &snapshot, &mut result);
                advance(&mut phase, Phase::RolledBack)?;
                result.outcome = Outcome::RolledBack;
                return self.finish(result);
            }
        }

        let report = match backend.verify(candidate) {
            Ok(report) => {
                advance(&mut phase, Phase::Verified)?;
                report
            }
            Err(e) => {
                result.failed_step = Some("verify".to_owned());
                result.errors.push(e.to_string());
                self.rollback(backend.as_ref(), &snapshot, &mut result);
                advance(&mut phase, Phase::RolledBack)?;
                result.outcome = Outcome::RolledBack;
                return self.finish(result);
            }
        };

        let verdict = evaluate(&report);
        result.verdict = Some(verdict);
        result.report = Some(report);
        if commits(verdict) {
            advance(&mut phase, Phase::Committed)?;
            info!("{operation}: committed with verdict {verdict}");
            result.outcome = Outcome::Committed;
        } else {
            result.failed_step = Some("verify".to_owned());
            self.rollback(backend.as_ref(), &snapshot, &mut result);
            advance(&mut phase, Phase::RolledBack)?;
            result.outcome = Outcome::RolledBack;
        }
        self.finish(result)
    }

    fn rollback(
        &self,
        backend: &dyn ConfigBackend,
        snapshot: &Snapshot,
        result: &mut TransactionResult,
    ) {
        warn!("{}: rolling back to snapshot {}", result.operation, snapshot.id);
        if let Err(e) = self.store.restore(snapshot) {
            result.restore_failed = true;
            result.errors.push(format!("restore failed: {e}"));
            return;
        }
        // Restoring files is not enough for daemon-owned state; the
        // backend re-triggers whatever loads them.
        if let Err(e) = backend.post_restore() {
            result.restore_failed = true;
            result.errors.push(format!("post-restore failed: {e}"));
        }
    }

    /// Persist the transaction record next to its snapshot, then hand the
    /// result back. Runs that aborted before a snapshot leave no record
    /// on disk; they changed nothing.
    fn finish(&self, result: TransactionResult) -> Result<TransactionResult, EngineError> {
        if let Some(dir) = &result.snapshot_dir {
            let json = serde_json::to_string_pretty(&result)?;
            fs::write(dir.join(RESULT_FILE), json)?;
        }
        Ok(result)
    }
}

/// Load the persisted record of a past transaction, if one exists.
pub fn load_result(snapshot_dir: &Path) -> Result<Option<TransactionResult>, EngineError> {
    let path = snapshot_dir.join(RESULT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&json)?))
}

fn advance(phase: &mut Phase, to: Phase) -> Result<(), EngineError> {
    validate_transition(*phase, to)?;
    *phase = to;
    Ok(())
}
