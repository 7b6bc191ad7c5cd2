use crate::BackendError;
use confit_backup::SnapshotTarget;
use confit_state::{CandidateState, Environment, VerificationReport};
use std::path::PathBuf;

/// Host file locations a backend reads and mutates.
///
/// Injectable so tests operate on a fixture tree instead of the real
/// system. `live` gates the side-effecting commands (reloads, restarts,
/// syntax checks, resolution probes); fixture-tree tests disable it.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub sysctl_conf: PathBuf,
    pub proc_sys: PathBuf,
    pub resolv_conf: PathBuf,
    pub resolved_conf: PathBuf,
    pub nm_conf_dir: PathBuf,
    pub sshd_config: PathBuf,
    pub live: bool,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            sysctl_conf: PathBuf::from("/etc/sysctl.conf"),
            proc_sys: PathBuf::from("/proc/sys"),
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            resolved_conf: PathBuf::from("/etc/systemd/resolved.conf"),
            nm_conf_dir: PathBuf::from("/etc/NetworkManager/conf.d"),
            sshd_config: PathBuf::from("/etc/ssh/sshd_config"),
            live: true,
        }
    }
}

impl HostPaths {
    /// A fixture tree rooted under `root`, with live commands disabled.
    pub fn rooted(root: &std::path::Path) -> Self {
        Self {
            sysctl_conf: root.join("etc/sysctl.conf"),
            proc_sys: root.join("proc/sys"),
            resolv_conf: root.join("etc/resolv.conf"),
            resolved_conf: root.join("etc/systemd/resolved.conf"),
            nm_conf_dir: root.join("etc/NetworkManager/conf.d"),
            sshd_config: root.join("etc/ssh/sshd_config"),
            live: false,
        }
    }
}

/// Whether a backend can or should run on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    Applicable,
    /// The desired state already holds; commit without applying.
    Satisfied(String),
    /// The backend cannot run here; abort before any mutation.
    Inapplicable(String),
}

/// What `apply` did, for the transaction record.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    pub changed: bool,
    /// Keys dropped by the partial-success policy (unsupported on this host).
    pub skipped_keys: Vec<String>,
    pub notes: Vec<String>,
}

/// A pluggable adapter encapsulating how one subsystem's state is read,
/// changed, and checked. Exactly one backend instance touches its
/// subsystem at a time; the engine enforces snapshot-before-apply using
/// [`snapshot_targets`](Self::snapshot_targets).
pub trait ConfigBackend {
    fn name(&self) -> &str;

    fn detect_applicability(&self, env: &Environment) -> Applicability;

    /// State the engine must capture before `apply` may run.
    fn snapshot_targets(&self) -> Vec<SnapshotTarget>;

    /// Human-readable description of the subsystem's current state.
    fn current_state(&self) -> Result<String, BackendError>;

    fn apply(&mut self, candidate: &CandidateState) -> Result<ApplyOutcome, BackendError>;

    fn verify(&self, candidate: &CandidateState) -> Result<VerificationReport, BackendError>;

    /// Re-establish runtime state after the engine has restored the
    /// snapshot files. Backends whose `apply` restarts a daemon must
    /// replay that restart here, or the live process keeps running with
    /// the rolled-back configuration.
    fn post_restore(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// The five concrete backend kinds, selected once per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sysctl,
    Dns,
    Ssh,
    Kernel,
    Ipv6,
}

/// Construct the backend for `kind`, bound to the detected environment.
pub fn select_backend(
    kind: BackendKind,
    env: &Environment,
    paths: &HostPaths,
) -> Box<dyn ConfigBackend> {
    match kind {
        BackendKind::Sysctl => Box::new(crate::sysctl::SysctlBackend::new(paths.clone())),
        BackendKind::Dns => Box::new(crate::dns::DnsBackend::new(env, paths.clone())),
        BackendKind::Ssh => Box::new(crate::ssh::SshBackend::new(env, paths.clone())),
        BackendKind::Kernel => Box::new(crate::kernel::KernelBackend::new(env, paths.clone())),
        BackendKind::Ipv6 => Box::new(crate::ipv6::Ipv6Backend::new(paths.clone())),
    }
}

/// Name of the candidate variant, for mismatch errors.
pub(crate) fn candidate_kind(candidate: &CandidateState) -> &'static str {
    match candidate {
        CandidateState::Sysctl(_) => "sysctl",
        CandidateState::Dns(_) => "dns",
        CandidateState::Ssh(_) => "ssh",
        CandidateState::Kernel(_) => "kernel",
        CandidateState::Ipv6(_) => "ipv6",
    }
}
