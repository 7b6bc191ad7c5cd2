use crate::backend::{candidate_kind, Applicability, ApplyOutcome, ConfigBackend, HostPaths};
use crate::{probe, BackendError};
use confit_backup::SnapshotTarget;
use confit_state::{
    CandidateState, Environment, KernelVersion, PackageManagerKind, VerificationReport,
};
use std::time::Duration;
use tracing::info;

/// Package installs pull from the network and can legitimately take a
/// while; everything else a backend runs finishes in seconds.
const INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Newer-kernel backend. Installs the distribution's kernel package when
/// the running version is below the requested minimum. The new kernel is
/// only picked up at reboot, so a successful install verifies as
/// pending-reboot rather than pass.
pub struct KernelBackend {
    running: KernelVersion,
    package_manager: PackageManagerKind,
    paths: HostPaths,
    installed: bool,
}

impl KernelBackend {
    pub fn new(env: &Environment, paths: HostPaths) -> Self {
        Self {
            running: env.kernel_version,
            package_manager: env.package_manager,
            paths,
            installed: false,
        }
    }

    /// The kernel package this distribution family ships.
    fn package(&self) -> Option<&'static str> {
        match self.package_manager {
            PackageManagerKind::Apt => Some("linux-image-amd64"),
            PackageManagerKind::Dnf | PackageManagerKind::Yum => Some("kernel-ml"),
            PackageManagerKind::Pacman => Some("linux"),
            PackageManagerKind::Zypper => Some("kernel-default"),
            PackageManagerKind::Unknown => None,
        }
    }

    fn install_argv(&self, package: &str) -> Vec<String> {
        let argv: Vec<&str> = match self.package_manager {
            PackageManagerKind::Apt => vec!["apt-get", "install", "-y", package],
            PackageManagerKind::Dnf => vec!["dnf", "install", "-y", package],
            PackageManagerKind::Yum => vec!["yum", "install", "-y", package],
            PackageManagerKind::Pacman => vec!["pacman", "-S", "--noconfirm", package],
            PackageManagerKind::Zypper => {
                vec!["zypper", "--non-interactive", "install", package]
            }
            PackageManagerKind::Unknown => vec![],
        };
        argv.into_iter().map(str::to_owned).collect()
    }
}

impl ConfigBackend for KernelBackend {
    fn name(&self) -> &str {
        "kernel"
    }

    fn detect_applicability(&self, _env: &Environment) -> Applicability {
        if self.package().is_none() {
            return Applicability::Inapplicable(
                "no supported package manager on this host".to_owned(),
            );
        }
        Applicability::Applicable
    }

    fn snapshot_targets(&self) -> Vec<SnapshotTarget> {
        // Record-only: a package install cannot be undone mechanically,
        // but the pre-install version is kept for manual recovery.
        vec![SnapshotTarget::Command {
            label: "running-kernel".to_owned(),
            query: vec!["uname".to_owned(), "-r".to_owned()],
            apply: None,
        }]
    }

    fn current_state(&self) -> Result<String, BackendError> {
        Ok(format!("running kernel {}", self.running))
    }

    fn apply(&mut self, candidate: &CandidateState) -> Result<ApplyOutcome, BackendError> {
        let CandidateState::Kernel(c) = candidate else {
            return Err(BackendError::CandidateMismatch {
                backend: self.name().to_owned(),
                got: candidate_kind(candidate).to_owned(),
            });
        };

        let mut outcome = ApplyOutcome::default();
        if self.running >= c.minimum {
            outcome.notes.push(format!(
                "running kernel {} already meets minimum {}",
                self.running, c.minimum
            ));
            return Ok(outcome);
        }

        let Some(package) = self.package() else {
            return Err(BackendError::UnsupportedEnvironment(
                "no supported package manager on this host".to_owned(),
            ));
        };
        if self.paths.live {
            let argv = self.install_argv(package);
            let argv_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
            let out = probe::run_command(&argv_refs, INSTALL_TIMEOUT)?;
            if !out.success {
                return Err(BackendError::CommandFailed {
                    command: argv.join(" "),
                    detail: out.stderr.trim().to_owned(),
                });
            }
            info!("installed {package}, effective after reboot");
        }
        self.installed = true;
        outcome.changed = true;
        outcome
            .notes
            .push(format!("{package} installed, reboot required"));
        Ok(outcome)
    }

    fn verify(&self, candidate: &CandidateState) -> Result<VerificationReport, BackendError> {
        let CandidateState::Kernel(c) = candidate else {
            return Err(BackendError::CandidateMismatch {
                backend: self.name().to_owned(),
                got: candidate_kind(candidate).to_owned(),
            });
        };

        let mut report = VerificationReport::new();
        if self.running >= c.minimum {
            report.push(
                "kernel version",
                true,
                true,
                format!("{} >= {}", self.running, c.minimum),
            );
        } else if self.installed {
            report.push(
                "kernel package installed",
                true,
                true,
                format!(
                    "running {} stays below {} until reboot",
                    self.running, c.minimum
                ),
            );
            report.pending_reboot = true;
        } else {
            report.push(
                "kernel version",
                false,
                true,
                format!("running {} below minimum {}", self.running, c.minimum),
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confit_state::{KernelCandidate, BBR_MINIMUM};

    fn env(kernel: &str, pm: PackageManagerKind) -> Environment {
        Environment {
            kernel_version: kernel.parse().unwrap(),
            package_manager: pm,
            ..Environment::unknown()
        }
    }

    fn candidate() -> CandidateState {
        CandidateState::Kernel(KernelCandidate::default())
    }

    #[test]
    fn satisfied_kernel_applies_as_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = KernelBackend::new(
            &env("5.15.0-91-generic", PackageManagerKind::Apt),
            HostPaths::rooted(dir.path()),
        );
        let outcome = backend.apply(&candidate()).unwrap();
        assert!(!outcome.changed);
        assert!(outcome.notes[0].contains("already meets"));

        let report = backend.verify(&candidate()).unwrap();
        assert!(report.checks[0].passed);
        assert!(!report.pending_reboot);
    }

    #[test]
    fn old_kernel_install_verifies_pending_reboot() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = KernelBackend::new(
            &env("3.10.0", PackageManagerKind::Dnf),
            HostPaths::rooted(dir.path()),
        );
        let outcome = backend.apply(&candidate()).unwrap();
        assert!(outcome.changed);

        let report = backend.verify(&candidate()).unwrap();
        assert!(report.checks[0].passed);
        assert!(report.pending_reboot);
    }

    #[test]
    fn old_kernel_without_install_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let backend = KernelBackend::new(
            &env("3.10.0", PackageManagerKind::Apt),
            HostPaths::rooted(dir.path()),
        );
        let report = backend.verify(&candidate()).unwrap();
        assert_eq!(report.mandatory_failures().count(), 1);
    }

    #[test]
    fn unknown_package_manager_is_inapplicable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = KernelBackend::new(
            &env("3.10.0", PackageManagerKind::Unknown),
            HostPaths::rooted(dir.path()),
        );
        assert!(matches!(
            backend.detect_applicability(&Environment::unknown()),
            Applicability::Inapplicable(_)
        ));
    }

    #[test]
    fn package_table_per_family() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted(dir.path());
        let cases = [
            (PackageManagerKind::Apt, "linux-image-amd64"),
            (PackageManagerKind::Dnf, "kernel-ml"),
            (PackageManagerKind::Yum, "kernel-ml"),
            (PackageManagerKind::Pacman, "linux"),
            (PackageManagerKind::Zypper, "kernel-default"),
        ];
        for (pm, expected) in cases {
            let backend = KernelBackend::new(&env("3.10.0", pm), paths.clone());
            assert_eq!(backend.package(), Some(expected));
        }
    }

    #[test]
    fn default_minimum_is_bbr_floor() {
        assert_eq!(KernelCandidate::default().minimum, BBR_MINIMUM);
    }
}
