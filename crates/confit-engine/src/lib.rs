//! Transaction orchestration for Confit.
//!
//! This crate ties detection, snapshots, and subsystem backends into the
//! `MutationEngine` whose single entry point runs one candidate through
//! detect, snapshot, apply, verify, and commit-or-rollback. It also owns
//! the cross-process engine lock and the phase state machine.

pub mod lifecycle;
pub mod lock;
pub mod transaction;
pub mod verifier;

pub use lifecycle::{validate_transition, Phase};
pub use lock::EngineLock;
pub use transaction::{load_result, MutationEngine};
pub use verifier::evaluate;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("backup error: {0}")]
    Backup(#[from] confit_backup::BackupError),
    #[error("backend error: {0}")]
    Backend(#[from] confit_backend::BackendError),
    #[error("another mutation is already running (lock held at {0})")]
    Locked(String),
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
