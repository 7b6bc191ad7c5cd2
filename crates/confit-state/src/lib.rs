//! Shared data model and validation for Confit.
//!
//! This crate defines the types every other layer speaks: the detected
//! host `Environment`, the per-backend `CandidateState` variants with
//! their validation rules, `VerificationReport` checks, and the final
//! `TransactionResult` handed back to the caller.

pub mod candidate;
pub mod credential;
pub mod environment;
pub mod net;
pub mod report;
pub mod versions;

pub use candidate::{
    CandidateState, CandidateWarning, DnsCandidate, Ipv6Candidate, KernelCandidate, SshCandidate,
    SysctlCandidate, SysctlEntry,
};
pub use credential::{score_credential, Credential};
pub use environment::{DnsManagerKind, Environment, PackageManagerKind, ServiceManagerKind};
pub use net::{parse_ipv4, validate_port};
pub use report::{Check, Outcome, TransactionResult, Verdict, VerificationReport};
pub use versions::{KernelVersion, BBR_MINIMUM};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid IPv4 address '{addr}': {reason}")]
    InvalidIpv4 { addr: String, reason: String },
    #[error("port {0} is outside the allowed range 1024-65535")]
    PortOutOfRange(u16),
    #[error("invalid kernel version '{0}'")]
    InvalidKernelVersion(String),
    #[error("invalid sysctl entry: {0}")]
    InvalidSysctl(String),
    #[error("DNS candidate requires 1 to 4 servers, got {0}")]
    DnsServerCount(usize),
    #[error("empty candidate: {0}")]
    EmptyCandidate(String),
}
