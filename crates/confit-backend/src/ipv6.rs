use crate::backend::{candidate_kind, Applicability, ApplyOutcome, ConfigBackend, HostPaths};
use crate::sysctl::SysctlBackend;
use crate::BackendError;
use confit_backup::SnapshotTarget;
use confit_state::{CandidateState, Environment, SysctlEntry, VerificationReport};

/// The three toggles that disable IPv6 on every interface, present and
/// future. All or nothing: a host with only some of them set still
/// accepts IPv6 traffic on the rest.
const IPV6_KEYS: [&str; 3] = [
    "net.ipv6.conf.all.disable_ipv6",
    "net.ipv6.conf.default.disable_ipv6",
    "net.ipv6.conf.lo.disable_ipv6",
];

/// IPv6 enable/disable backend, layered on the sysctl managed section so
/// the two operations share one file without clobbering each other.
pub struct Ipv6Backend {
    paths: HostPaths,
    inner: SysctlBackend,
}

impl Ipv6Backend {
    pub fn new(paths: HostPaths) -> Self {
        Self {
            inner: SysctlBackend::new(paths.clone()),
            paths,
        }
    }

    fn entries(disabled: bool) -> Vec<SysctlEntry> {
        let value = if disabled { "1" } else { "0" };
        IPV6_KEYS
            .iter()
            .map(|key| SysctlEntry::new(*key, value))
            .collect()
    }
}

impl ConfigBackend for Ipv6Backend {
    fn name(&self) -> &str {
        "ipv6"
    }

    fn detect_applicability(&self, _env: &Environment) -> Applicability {
        if self.paths.live && !self.paths.proc_sys.join("net/ipv6").is_dir() {
            return Applicability::Satisfied(
                "IPv6 is not compiled into this kernel".to_owned(),
            );
        }
        Applicability::Applicable
    }

    fn snapshot_targets(&self) -> Vec<SnapshotTarget> {
        vec![SnapshotTarget::File(self.paths.sysctl_conf.clone())]
    }

    fn current_state(&self) -> Result<String, BackendError> {
        let mut lines = Vec::new();
        for key in IPV6_KEYS {
            match crate::sysctl::read_live(&self.paths.proc_sys, key) {
                Ok(value) => lines.push(format!("{key} = {value}")),
                Err(_) => lines.push(format!("{key} = <unreadable>")),
            }
        }
        Ok(lines.join("\n"))
    }

    fn apply(&mut self, candidate: &CandidateState) -> Result<ApplyOutcome, BackendError> {
        let CandidateState::Ipv6(c) = candidate else {
            return Err(BackendError::CandidateMismatch {
                backend: self.name().to_owned(),
                got: candidate_kind(candidate).to_owned(),
            });
        };
        self.inner.apply_entries(&Self::entries(c.disabled))
    }

    fn verify(&self, candidate: &CandidateState) -> Result<VerificationReport, BackendError> {
        let CandidateState::Ipv6(c) = candidate else {
            return Err(BackendError::CandidateMismatch {
                backend: self.name().to_owned(),
                got: candidate_kind(candidate).to_owned(),
            });
        };
        // Half-disabled IPv6 is worse than either state, so every one of
        // the three toggles is mandatory.
        let mut report = self.inner.verify_entries(&Self::entries(c.disabled), true);
        for check in &mut report.checks {
            check.mandatory = true;
        }
        Ok(report)
    }

    fn post_restore(&self) -> Result<(), BackendError> {
        self.inner.post_restore()
    }
}
