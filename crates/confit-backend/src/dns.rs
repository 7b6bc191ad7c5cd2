use crate::backend::{candidate_kind, Applicability, ApplyOutcome, ConfigBackend, HostPaths};
use crate::fsutil::write_atomic;
use crate::sysctl::read_or_empty;
use crate::{probe, BackendError};
use confit_backup::SnapshotTarget;
use confit_state::{CandidateState, DnsManagerKind, Environment, VerificationReport};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const NM_DROPIN: &str = "confit-dns.conf";
const RESTART_TIMEOUT: Duration = Duration::from_secs(15);
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Domains probed after a resolver change. Verification passes as long
/// as at least one resolves; losing every one of them means the host
/// just went deaf and must be rolled back.
const PROBE_DOMAINS: [&str; 3] = ["debian.org", "cloudflare.com", "example.com"];

/// Nameserver backend. The write path depends on who owns resolution on
/// this host: systemd-resolved gets its DNS= directive, NetworkManager
/// gets a conf.d drop-in, and bare hosts get resolv.conf rewritten.
pub struct DnsBackend {
    mode: DnsManagerKind,
    paths: HostPaths,
}

impl DnsBackend {
    pub fn new(env: &Environment, paths: HostPaths) -> Self {
        Self {
            mode: env.dns_manager,
            paths,
        }
    }

    fn nm_dropin_path(&self) -> PathBuf {
        self.paths.nm_conf_dir.join(NM_DROPIN)
    }

    fn restart_resolver(&self) -> Result<(), BackendError> {
        let argv: &[&str] = match self.mode {
            DnsManagerKind::Resolved => &["systemctl", "restart", "systemd-resolved"],
            DnsManagerKind::NetworkManager => &["systemctl", "reload", "NetworkManager"],
            DnsManagerKind::Direct => return Ok(()),
        };
        let out = probe::run_command(argv, RESTART_TIMEOUT)?;
        if !out.success {
            return Err(BackendError::CommandFailed {
                command: argv.join(" "),
                detail: out.stderr.trim().to_owned(),
            });
        }
        Ok(())
    }
}

impl ConfigBackend for DnsBackend {
    fn name(&self) -> &str {
        "dns"
    }

    fn detect_applicability(&self, _env: &Environment) -> Applicability {
        Applicability::Applicable
    }

    fn snapshot_targets(&self) -> Vec<SnapshotTarget> {
        match self.mode {
            DnsManagerKind::Resolved => vec![
                SnapshotTarget::File(self.paths.resolved_conf.clone()),
                SnapshotTarget::File(self.paths.resolv_conf.clone()),
            ],
            DnsManagerKind::NetworkManager => vec![
                SnapshotTarget::File(self.nm_dropin_path()),
                SnapshotTarget::File(self.paths.resolv_conf.clone()),
            ],
            DnsManagerKind::Direct => {
                vec![SnapshotTarget::File(self.paths.resolv_conf.clone())]
            }
        }
    }

    fn current_state(&self) -> Result<String, BackendError> {
        let content = read_or_empty(&self.paths.resolv_conf)?;
        let servers: Vec<&str> = content
            .lines()
            .filter_map(|l| l.trim().strip_prefix("nameserver "))
            .map(str::trim)
            .collect();
        if servers.is_empty() {
            Ok(format!("{}: no nameservers configured", self.mode))
        } else {
            Ok(format!("{}: nameservers {}", self.mode, servers.join(", ")))
        }
    }

    fn apply(&mut self, candidate: &CandidateState) -> Result<ApplyOutcome, BackendError> {
        let CandidateState::Dns(c) = candidate else {
            return Err(BackendError::CandidateMismatch {
                backend: self.name().to_owned(),
                got: candidate_kind(candidate).to_owned(),
            });
        };

        match self.mode {
            DnsManagerKind::Resolved => {
                let existing = read_or_empty(&self.paths.resolved_conf)?;
                let updated = set_resolved_dns(&existing, &c.servers);
                write_atomic(&self.paths.resolved_conf, &updated)?;
                info!("resolved.conf DNS directive set to {} servers", c.servers.len());
            }
            DnsManagerKind::NetworkManager => {
                let dropin = nm_dropin(&c.servers);
                write_atomic(&self.nm_dropin_path(), &dropin)?;
                info!("NetworkManager drop-in written: {}", self.nm_dropin_path().display());
            }
            DnsManagerKind::Direct => {
                let existing = read_or_empty(&self.paths.resolv_conf)?;
                let updated = rewrite_resolv_conf(&existing, &c.servers);
                write_atomic(&self.paths.resolv_conf, &updated)?;
                debug!("resolv.conf rewritten in place");
            }
        }

        if self.paths.live {
            self.restart_resolver()?;
        }
        Ok(ApplyOutcome {
            changed: true,
            ..ApplyOutcome::default()
        })
    }

    fn verify(&self, candidate: &CandidateState) -> Result<VerificationReport, BackendError> {
        let CandidateState::Dns(c) = candidate else {
            return Err(BackendError::CandidateMismatch {
                backend: self.name().to_owned(),
                got: candidate_kind(candidate).to_owned(),
            });
        };

        let mut report = VerificationReport::new();
        if self.paths.live {
            // Small settle window: resolved restarts asynchronously.
            std::thread::sleep(Duration::from_millis(500));
            let mut any = false;
            for domain in PROBE_DOMAINS {
                let resolved = probe::resolve_probe(domain, RESOLVE_TIMEOUT);
                any |= resolved;
                report.push(
                    format!("resolve {domain}"),
                    resolved,
                    false,
                    if resolved { "resolved" } else { "no answer" },
                );
            }
            // Individual domains may be flaky; total loss is the failure
            // that warrants rollback.
            report.push(
                "resolution-alive",
                any,
                true,
                if any {
                    "at least one probe domain resolved"
                } else {
                    "no probe domain resolved, resolver is dead"
                },
            );
        } else {
            let written = match self.mode {
                DnsManagerKind::Resolved => read_or_empty(&self.paths.resolved_conf)?,
                DnsManagerKind::NetworkManager => read_or_empty(&self.nm_dropin_path())?,
                DnsManagerKind::Direct => read_or_empty(&self.paths.resolv_conf)?,
            };
            let configured = configured_servers(&written, self.mode);
            for server in &c.servers {
                let present = configured.iter().any(|s| s == &server.to_string());
                report.push(
                    format!("configured {server}"),
                    present,
                    true,
                    if present { "present" } else { "missing" },
                );
            }
        }
        Ok(report)
    }

    fn post_restore(&self) -> Result<(), BackendError> {
        if self.paths.live {
            self.restart_resolver()?;
        }
        Ok(())
    }
}

/// The server addresses a written config actually declares, parsed per
/// mode rather than substring-matched: `1.1.1.1` must not be satisfied
/// by a file that only mentions `11.1.1.11`.
pub(crate) fn configured_servers(written: &str, mode: DnsManagerKind) -> Vec<String> {
    let mut servers = Vec::new();
    for line in written.lines() {
        let trimmed = line.trim();
        match mode {
            DnsManagerKind::Direct => {
                if let Some(rest) = trimmed.strip_prefix("nameserver") {
                    servers.extend(rest.split_whitespace().map(str::to_owned));
                }
            }
            DnsManagerKind::Resolved => {
                if let Some(rest) = trimmed.strip_prefix("DNS=") {
                    servers.extend(rest.split_whitespace().map(str::to_owned));
                }
            }
            DnsManagerKind::NetworkManager => {
                if let Some(rest) = trimmed.strip_prefix("servers=") {
                    servers.extend(
                        rest.split([';', ','])
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::to_owned),
                    );
                }
            }
        }
    }
    servers
}

/// Replace the nameserver lines of a resolv.conf, keeping everything
/// else (search, options, comments) where it was. New nameservers land
/// where the first old one stood, or at the end of the file.
pub(crate) fn rewrite_resolv_conf(existing: &str, servers: &[Ipv4Addr]) -> String {
    let mut out = String::new();
    let mut inserted = false;
    for line in existing.lines() {
        if line.trim_start().starts_with("nameserver") {
            if !inserted {
                for server in servers {
                    out.push_str(&format!("nameserver {server}\n"));
                }
                inserted = true;
            }
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !inserted {
        for server in servers {
            out.push_str(&format!("nameserver {server}\n"));
        }
    }
    out
}

/// Set the DNS= directive inside the [Resolve] section, creating the
/// section if the file never had one.
pub(crate) fn set_resolved_dns(existing: &str, servers: &[Ipv4Addr]) -> String {
    let joined = servers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    let directive = format!("DNS={joined}");

    let mut out = String::new();
    let mut in_resolve = false;
    let mut written = false;
    for line in existing.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            if in_resolve && !written {
                out.push_str(&directive);
                out.push('\n');
                written = true;
            }
            in_resolve = trimmed == "[Resolve]";
        } else if in_resolve && is_dns_directive(trimmed) {
            if !written {
                out.push_str(&directive);
                out.push('\n');
                written = true;
            }
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !written {
        if !out.contains("[Resolve]") {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("[Resolve]\n");
        }
        out.push_str(&directive);
        out.push('\n');
    }
    out
}

fn is_dns_directive(line: &str) -> bool {
    // Matches both the active directive and the shipped commented default.
    line.starts_with("DNS=") || line.starts_with("#DNS=")
}

/// A global-dns drop-in pinning nameservers for every connection.
pub(crate) fn nm_dropin(servers: &[Ipv4Addr]) -> String {
    let joined = servers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("[global-dns-domain-*]\nservers={joined}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use confit_state::DnsCandidate;
    use std::fs;

    fn servers(addrs: &[&str]) -> Vec<Ipv4Addr> {
        addrs.iter().map(|a| a.parse().unwrap()).collect()
    }

    fn env_with(mode: DnsManagerKind) -> Environment {
        Environment {
            dns_manager: mode,
            ..Environment::unknown()
        }
    }

    #[test]
    fn rewrite_replaces_nameservers_in_place() {
        let existing = "search lan\nnameserver 192.168.1.1\noptions timeout:2\n";
        let out = rewrite_resolv_conf(existing, &servers(&["8.8.8.8", "1.1.1.1"]));
        assert_eq!(
            out,
            "search lan\nnameserver 8.8.8.8\nnameserver 1.1.1.1\noptions timeout:2\n"
        );
    }

    #[test]
    fn rewrite_appends_when_no_nameserver_present() {
        let out = rewrite_resolv_conf("search lan\n", &servers(&["9.9.9.9"]));
        assert_eq!(out, "search lan\nnameserver 9.9.9.9\n");
    }

    #[test]
    fn resolved_directive_replaces_commented_default() {
        let existing = "[Resolve]\n#DNS=\n#FallbackDNS=\n";
        let out = set_resolved_dns(existing, &servers(&["8.8.8.8", "8.8.4.4"]));
        assert!(out.contains("DNS=8.8.8.8 8.8.4.4\n"));
        assert!(out.contains("#FallbackDNS=\n"));
        assert_eq!(out.matches("DNS=8.8.8.8").count(), 1);
    }

    #[test]
    fn resolved_directive_created_when_file_empty() {
        let out = set_resolved_dns("", &servers(&["1.1.1.1"]));
        assert_eq!(out, "[Resolve]\nDNS=1.1.1.1\n");
    }

    #[test]
    fn resolved_directive_idempotent() {
        let first = set_resolved_dns("", &servers(&["1.1.1.1"]));
        let second = set_resolved_dns(&first, &servers(&["1.1.1.1"]));
        assert_eq!(first, second);
    }

    #[test]
    fn nm_dropin_format() {
        let out = nm_dropin(&servers(&["8.8.8.8", "1.1.1.1"]));
        assert_eq!(out, "[global-dns-domain-*]\nservers=8.8.8.8,1.1.1.1\n");
    }

    #[test]
    fn direct_mode_apply_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted(dir.path());
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(&paths.resolv_conf, "nameserver 10.0.0.1\n").unwrap();

        let mut backend = DnsBackend::new(&env_with(DnsManagerKind::Direct), paths);
        let candidate =
            CandidateState::Dns(DnsCandidate::parse(&["8.8.8.8", "1.1.1.1"]).unwrap());
        backend.apply(&candidate).unwrap();

        let written = fs::read_to_string(dir.path().join("etc/resolv.conf")).unwrap();
        assert!(!written.contains("10.0.0.1"));
        let report = backend.verify(&candidate).unwrap();
        assert_eq!(report.checks.len(), 2);
        assert!(report.checks.iter().all(|c| c.passed && c.mandatory));
    }

    #[test]
    fn resolved_mode_snapshots_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DnsBackend::new(
            &env_with(DnsManagerKind::Resolved),
            HostPaths::rooted(dir.path()),
        );
        assert_eq!(backend.snapshot_targets().len(), 2);
    }

    #[test]
    fn nm_mode_writes_dropin() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DnsBackend::new(
            &env_with(DnsManagerKind::NetworkManager),
            HostPaths::rooted(dir.path()),
        );
        let candidate = CandidateState::Dns(DnsCandidate::parse(&["9.9.9.9"]).unwrap());
        backend.apply(&candidate).unwrap();
        let dropin =
            fs::read_to_string(dir.path().join("etc/NetworkManager/conf.d").join(NM_DROPIN))
                .unwrap();
        assert!(dropin.contains("servers=9.9.9.9"));
    }

    #[test]
    fn verify_matches_whole_addresses_not_substrings() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted(dir.path());
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        // 11.1.1.11 contains "1.1.1.1" as a substring but is a different
        // server; verification must treat the candidate as missing.
        fs::write(&paths.resolv_conf, "nameserver 11.1.1.11\n").unwrap();

        let backend = DnsBackend::new(&env_with(DnsManagerKind::Direct), paths);
        let candidate = CandidateState::Dns(DnsCandidate::parse(&["1.1.1.1"]).unwrap());
        let report = backend.verify(&candidate).unwrap();
        assert!(report.checks.iter().all(|c| !c.passed));
    }

    #[test]
    fn configured_servers_parsed_per_mode() {
        assert_eq!(
            configured_servers("search lan\nnameserver 8.8.8.8\n", DnsManagerKind::Direct),
            vec!["8.8.8.8"]
        );
        assert_eq!(
            configured_servers("[Resolve]\nDNS=1.1.1.1 9.9.9.9\n", DnsManagerKind::Resolved),
            vec!["1.1.1.1", "9.9.9.9"]
        );
        assert_eq!(
            configured_servers(
                "[global-dns-domain-*]\nservers=8.8.8.8,1.1.1.1\n",
                DnsManagerKind::NetworkManager
            ),
            vec!["8.8.8.8", "1.1.1.1"]
        );
    }

    #[test]
    fn post_restore_is_quiet_off_host() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DnsBackend::new(
            &env_with(DnsManagerKind::Resolved),
            HostPaths::rooted(dir.path()),
        );
        backend.post_restore().unwrap();
    }

    #[test]
    fn wrong_candidate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend =
            DnsBackend::new(&env_with(DnsManagerKind::Direct), HostPaths::rooted(dir.path()));
        let candidate = CandidateState::Ipv6(confit_state::Ipv6Candidate { disabled: true });
        assert!(matches!(
            backend.apply(&candidate),
            Err(BackendError::CandidateMismatch { .. })
        ));
    }
}
