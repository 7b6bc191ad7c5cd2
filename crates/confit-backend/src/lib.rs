//! Subsystem backends and host detection for Confit.
//!
//! This crate implements the mutation layer: the pluggable `ConfigBackend`
//! trait with one implementation per subsystem (sysctl, DNS, SSH, kernel
//! package, IPv6 toggle), the read-only `EnvironmentDetector`, probe
//! helpers with bounded timeouts, and a `MockBackend` for engine tests.

pub mod backend;
pub mod detect;
mod fsutil;
pub mod dns;
pub mod ipv6;
pub mod kernel;
pub mod mock;
pub mod probe;
pub mod ssh;
pub mod sysctl;

pub use backend::{
    select_backend, Applicability, ApplyOutcome, BackendKind, ConfigBackend, HostPaths,
};
pub use detect::EnvironmentDetector;
pub use dns::DnsBackend;
pub use ipv6::Ipv6Backend;
pub use kernel::KernelBackend;
pub use mock::{MockBackend, MockCalls};
pub use ssh::SshBackend;
pub use sysctl::SysctlBackend;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{backend}' cannot apply a {got} candidate")]
    CandidateMismatch { backend: String, got: String },
    #[error("command '{command}' failed: {detail}")]
    CommandFailed { command: String, detail: String },
    #[error("command '{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },
    #[error("daemon config syntax check failed: {0}")]
    SyntaxCheck(String),
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),
}
