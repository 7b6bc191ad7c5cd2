use crate::backend::{candidate_kind, Applicability, ApplyOutcome, ConfigBackend, HostPaths};
use crate::fsutil::write_atomic;
use crate::sysctl::read_or_empty;
use crate::{probe, BackendError};
use confit_backup::SnapshotTarget;
use confit_state::{CandidateState, Environment, ServiceManagerKind, VerificationReport};
use std::time::Duration;
use tracing::{info, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);
const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// SSH hardening backend: moves the daemon's listening port and/or
/// rotates a user credential. The config file is syntax-checked with
/// `sshd -t` before any restart; a daemon that refuses its own config
/// would lock the operator out, so that failure forces a rollback.
pub struct SshBackend {
    service_manager: ServiceManagerKind,
    paths: HostPaths,
    restarted: bool,
}

impl SshBackend {
    pub fn new(env: &Environment, paths: HostPaths) -> Self {
        Self {
            service_manager: env.service_manager,
            paths,
            restarted: false,
        }
    }

    fn syntax_check(&self) -> Result<(), BackendError> {
        let config = self.paths.sshd_config.display().to_string();
        let out = probe::run_command(&["sshd", "-t", "-f", config.as_str()], COMMAND_TIMEOUT)?;
        if !out.success {
            return Err(BackendError::SyntaxCheck(out.stderr.trim().to_owned()));
        }
        Ok(())
    }

    fn restart_daemon(&self) -> Result<(), BackendError> {
        match self.service_manager {
            ServiceManagerKind::Systemd => {
                // Unit name differs across families (sshd on RHEL/Arch,
                // ssh on Debian); try both before giving up.
                for unit in ["sshd", "ssh"] {
                    let out =
                        probe::run_command(&["systemctl", "restart", unit], COMMAND_TIMEOUT)?;
                    if out.success {
                        info!("restarted {unit} via systemctl");
                        return Ok(());
                    }
                }
                Err(BackendError::CommandFailed {
                    command: "systemctl restart sshd|ssh".to_owned(),
                    detail: "neither unit could be restarted".to_owned(),
                })
            }
            ServiceManagerKind::SysV => {
                let out = probe::run_command(&["service", "ssh", "restart"], COMMAND_TIMEOUT)?;
                if out.success {
                    Ok(())
                } else {
                    Err(BackendError::CommandFailed {
                        command: "service ssh restart".to_owned(),
                        detail: out.stderr.trim().to_owned(),
                    })
                }
            }
            ServiceManagerKind::None => {
                warn!("no service manager detected, daemon not restarted");
                Ok(())
            }
        }
    }

    fn change_credential(&self, username: &str, password: &str) -> Result<(), BackendError> {
        let input = format!("{username}:{password}\n");
        let out = probe::run_command_with_input(&["chpasswd"], &input, COMMAND_TIMEOUT)?;
        if !out.success {
            return Err(BackendError::CommandFailed {
                command: "chpasswd".to_owned(),
                detail: out.stderr.trim().to_owned(),
            });
        }
        info!("credential rotated for {username}");
        Ok(())
    }
}

impl ConfigBackend for SshBackend {
    fn name(&self) -> &str {
        "ssh"
    }

    fn detect_applicability(&self, _env: &Environment) -> Applicability {
        if !self.paths.sshd_config.exists() {
            return Applicability::Inapplicable(format!(
                "{} not found, is an SSH server installed?",
                self.paths.sshd_config.display()
            ));
        }
        Applicability::Applicable
    }

    fn snapshot_targets(&self) -> Vec<SnapshotTarget> {
        vec![SnapshotTarget::File(self.paths.sshd_config.clone())]
    }

    fn current_state(&self) -> Result<String, BackendError> {
        let content = read_or_empty(&self.paths.sshd_config)?;
        Ok(format!("listening port {}", active_port(&content)))
    }

    fn apply(&mut self, candidate: &CandidateState) -> Result<ApplyOutcome, BackendError> {
        let CandidateState::Ssh(c) = candidate else {
            return Err(BackendError::CandidateMismatch {
                backend: self.name().to_owned(),
                got: candidate_kind(candidate).to_owned(),
            });
        };

        let mut outcome = ApplyOutcome::default();
        if let Some(port) = c.port {
            let existing = read_or_empty(&self.paths.sshd_config)?;
            let updated = set_port_directive(&existing, port);
            if updated != existing {
                write_atomic(&self.paths.sshd_config, &updated)?;
                outcome.changed = true;
            } else {
                outcome.notes.push(format!("port already set to {port}"));
            }
            if self.paths.live {
                self.syntax_check()?;
                self.restart_daemon()?;
                self.restarted = true;
            }
        }
        if let Some(ref cred) = c.credential {
            if self.paths.live {
                self.change_credential(&cred.username, cred.password())?;
                outcome.changed = true;
            }
            // Passwords are hashed; the pre-change value cannot be
            // captured, so a rollback leaves the new one in place.
            outcome
                .notes
                .push("credential change is not reversible by restore".to_owned());
        }
        Ok(outcome)
    }

    fn verify(&self, candidate: &CandidateState) -> Result<VerificationReport, BackendError> {
        let CandidateState::Ssh(c) = candidate else {
            return Err(BackendError::CandidateMismatch {
                backend: self.name().to_owned(),
                got: candidate_kind(candidate).to_owned(),
            });
        };

        let mut report = VerificationReport::new();
        if let Some(port) = c.port {
            let content = read_or_empty(&self.paths.sshd_config)?;
            let configured = active_port(&content) == port;
            report.push(
                format!("config port {port}"),
                configured,
                true,
                if configured {
                    "directive present"
                } else {
                    "directive missing"
                },
            );
            if self.paths.live {
                let listening = probe::port_in_use(port, PORT_PROBE_TIMEOUT);
                report.push(
                    format!("daemon listening on {port}"),
                    listening,
                    true,
                    if listening {
                        "connection accepted"
                    } else {
                        "nothing accepting connections"
                    },
                );
            }
        }
        if c.credential.is_some() {
            report.push(
                "credential rotated",
                true,
                false,
                "applied via chpasswd, not independently verifiable",
            );
        }
        Ok(report)
    }

    /// A daemon restarted onto the candidate port must be restarted again
    /// once the original config is back, or it keeps listening on the
    /// rolled-back port.
    fn post_restore(&self) -> Result<(), BackendError> {
        if self.restarted {
            self.restart_daemon()?;
        }
        Ok(())
    }
}

/// Replace the active `Port` directive, or append one when the file only
/// carries the commented default. Commented lines are left alone.
pub(crate) fn set_port_directive(existing: &str, port: u16) -> String {
    let mut out = String::new();
    let mut replaced = false;
    for line in existing.lines() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with('#') && trimmed.starts_with("Port ") {
            if !replaced {
                out.push_str(&format!("Port {port}\n"));
                replaced = true;
            }
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !replaced {
        out.push_str(&format!("Port {port}\n"));
    }
    out
}

/// The port the daemon would listen on, 22 when no directive is active.
pub(crate) fn active_port(config: &str) -> u16 {
    for line in config.lines() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with('#') {
            if let Some(value) = trimmed.strip_prefix("Port ") {
                if let Ok(port) = value.trim().parse() {
                    return port;
                }
            }
        }
    }
    22
}

#[cfg(test)]
mod tests {
    use super::*;
    use confit_state::{Credential, SshCandidate};
    use std::fs;

    fn fixture(config: &str) -> (tempfile::TempDir, SshBackend) {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted(dir.path());
        fs::create_dir_all(paths.sshd_config.parent().unwrap()).unwrap();
        fs::write(&paths.sshd_config, config).unwrap();
        let backend = SshBackend::new(&Environment::unknown(), paths);
        (dir, backend)
    }

    #[test]
    fn port_directive_replaces_active_line() {
        let out = set_port_directive("#Port 22\nPort 22\nPermitRootLogin no\n", 2222);
        assert_eq!(out, "#Port 22\nPort 2222\nPermitRootLogin no\n");
    }

    #[test]
    fn port_directive_appended_when_only_commented() {
        let out = set_port_directive("#Port 22\n", 2222);
        assert_eq!(out, "#Port 22\nPort 2222\n");
    }

    #[test]
    fn duplicate_port_directives_collapse_to_one() {
        let out = set_port_directive("Port 22\nPort 2022\n", 2222);
        assert_eq!(out, "Port 2222\n");
    }

    #[test]
    fn active_port_defaults_to_22() {
        assert_eq!(active_port("#Port 2222\n"), 22);
        assert_eq!(active_port("Port 2222\n"), 2222);
    }

    #[test]
    fn apply_rewrites_config_and_verify_reads_it_back() {
        let (_dir, mut backend) = fixture("#Port 22\nPermitRootLogin no\n");
        let candidate =
            CandidateState::Ssh(SshCandidate::new(Some(2222), None).unwrap());
        let outcome = backend.apply(&candidate).unwrap();
        assert!(outcome.changed);

        let report = backend.verify(&candidate).unwrap();
        assert_eq!(report.checks.len(), 1);
        assert!(report.checks[0].passed && report.checks[0].mandatory);
    }

    #[test]
    fn apply_is_idempotent_on_port() {
        let (_dir, mut backend) = fixture("Port 2222\n");
        let candidate =
            CandidateState::Ssh(SshCandidate::new(Some(2222), None).unwrap());
        let outcome = backend.apply(&candidate).unwrap();
        assert!(!outcome.changed);
        assert!(outcome.notes[0].contains("already set"));
    }

    #[test]
    fn credential_only_apply_notes_irreversibility() {
        let (_dir, mut backend) = fixture("Port 22\n");
        let cred = Credential::new("deploy", "Str0ng!Passphrase");
        let candidate =
            CandidateState::Ssh(SshCandidate::new(None, Some(cred)).unwrap());
        let outcome = backend.apply(&candidate).unwrap();
        assert!(outcome
            .notes
            .iter()
            .any(|n| n.contains("not reversible")));
    }

    #[test]
    fn post_restore_skips_restart_when_daemon_untouched() {
        let (_dir, mut backend) = fixture("#Port 22\n");
        let candidate =
            CandidateState::Ssh(SshCandidate::new(Some(2222), None).unwrap());
        backend.apply(&candidate).unwrap();
        assert!(!backend.restarted);
        backend.post_restore().unwrap();
    }

    #[test]
    fn inapplicable_without_sshd_config() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SshBackend::new(&Environment::unknown(), HostPaths::rooted(dir.path()));
        assert!(matches!(
            backend.detect_applicability(&Environment::unknown()),
            Applicability::Inapplicable(_)
        ));
    }

    #[test]
    fn current_state_reports_active_port() {
        let (_dir, backend) = fixture("Port 2200\n");
        assert_eq!(backend.current_state().unwrap(), "listening port 2200");
    }
}
