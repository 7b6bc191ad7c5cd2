use crate::backend::{candidate_kind, Applicability, ApplyOutcome, ConfigBackend, HostPaths};
use crate::fsutil::write_atomic;
use crate::{probe, BackendError};
use confit_backup::SnapshotTarget;
use confit_state::{CandidateState, Environment, SysctlEntry, VerificationReport};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Marker pair around the section this tool owns inside the sysctl
/// configuration file. Everything outside the markers is never touched.
pub const SECTION_BEGIN: &str = "# --- confit managed section: begin ---";
pub const SECTION_END: &str = "# --- confit managed section: end ---";

const RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Kernel parameter backend: merges `key = value` lines into the managed
/// section, reloads, and verifies against the live values under
/// `/proc/sys` rather than the file.
///
/// Unsupported parameters (heterogeneous hosts legitimately lack some,
/// e.g. connection tracking inside containers) are filtered out on a
/// single reload retry instead of failing the whole tuning.
pub struct SysctlBackend {
    paths: HostPaths,
    skipped: Vec<String>,
}

impl SysctlBackend {
    pub fn new(paths: HostPaths) -> Self {
        Self {
            paths,
            skipped: Vec::new(),
        }
    }

    pub(crate) fn apply_entries(
        &mut self,
        entries: &[SysctlEntry],
    ) -> Result<ApplyOutcome, BackendError> {
        let existing = read_or_empty(&self.paths.sysctl_conf)?;
        let merged = merge_managed_section(&existing, entries);
        let changed = merged != existing;
        if changed {
            write_atomic(&self.paths.sysctl_conf, &merged)?;
            debug!("managed section updated in {}", self.paths.sysctl_conf.display());
        } else {
            debug!("managed section already current, file untouched");
        }

        let mut outcome = ApplyOutcome {
            changed,
            ..ApplyOutcome::default()
        };
        if !changed {
            outcome.notes.push("configuration already current".to_owned());
        }

        if self.paths.live {
            self.reload(&merged, &mut outcome)?;
        }
        self.skipped.clone_from(&outcome.skipped_keys);
        Ok(outcome)
    }

    fn reload(&self, merged: &str, outcome: &mut ApplyOutcome) -> Result<(), BackendError> {
        let conf = self.paths.sysctl_conf.display().to_string();
        let out = probe::run_command(&["sysctl", "-p", conf.as_str()], RELOAD_TIMEOUT)?;
        if out.success {
            return Ok(());
        }

        // Partial-success policy: drop the parameters this host does not
        // have and retry exactly once.
        let unsupported = parse_unsupported_keys(&out.stderr);
        if unsupported.is_empty() {
            return Err(BackendError::CommandFailed {
                command: format!("sysctl -p {conf}"),
                detail: out.stderr.trim().to_owned(),
            });
        }
        warn!(
            "reload rejected unsupported parameters, retrying without: {}",
            unsupported.join(", ")
        );
        let filtered = remove_managed_keys(merged, &unsupported);
        write_atomic(&self.paths.sysctl_conf, &filtered)?;

        let retry = probe::run_command(&["sysctl", "-p", conf.as_str()], RELOAD_TIMEOUT)?;
        if !retry.success {
            return Err(BackendError::CommandFailed {
                command: format!("sysctl -p {conf} (retry)"),
                detail: retry.stderr.trim().to_owned(),
            });
        }
        outcome.skipped_keys = unsupported;
        Ok(())
    }

    pub(crate) fn verify_entries(
        &self,
        entries: &[SysctlEntry],
        mandatory: bool,
    ) -> VerificationReport {
        let mut report = VerificationReport::new();
        for entry in entries {
            if self.skipped.contains(&entry.key) {
                report.push(
                    &entry.key,
                    false,
                    false,
                    "skipped: parameter unsupported on this host",
                );
                continue;
            }
            match read_live(&self.paths.proc_sys, &entry.key) {
                Ok(actual) if values_match(&actual, &entry.value) => {
                    report.push(&entry.key, true, mandatory, format!("live value {actual}"));
                }
                Ok(actual) => {
                    report.push(
                        &entry.key,
                        false,
                        mandatory,
                        format!("live value '{actual}' != requested '{}'", entry.value),
                    );
                }
                Err(e) => {
                    report.push(
                        &entry.key,
                        false,
                        false,
                        format!("parameter not readable on this host: {e}"),
                    );
                }
            }
        }
        report
    }
}

impl ConfigBackend for SysctlBackend {
    fn name(&self) -> &str {
        "sysctl"
    }

    fn detect_applicability(&self, _env: &Environment) -> Applicability {
        if self.paths.live && !self.paths.proc_sys.is_dir() {
            return Applicability::Inapplicable("/proc/sys is not available".to_owned());
        }
        Applicability::Applicable
    }

    fn snapshot_targets(&self) -> Vec<SnapshotTarget> {
        vec![SnapshotTarget::File(self.paths.sysctl_conf.clone())]
    }

    fn current_state(&self) -> Result<String, BackendError> {
        let content = read_or_empty(&self.paths.sysctl_conf)?;
        match managed_section(&content) {
            Some(section) if !section.trim().is_empty() => Ok(section),
            _ => Ok("no managed section".to_owned()),
        }
    }

    fn apply(&mut self, candidate: &CandidateState) -> Result<ApplyOutcome, BackendError> {
        let CandidateState::Sysctl(c) = candidate else {
            return Err(BackendError::CandidateMismatch {
                backend: self.name().to_owned(),
                got: candidate_kind(candidate).to_owned(),
            });
        };
        self.apply_entries(&c.entries)
    }

    fn verify(&self, candidate: &CandidateState) -> Result<VerificationReport, BackendError> {
        let CandidateState::Sysctl(c) = candidate else {
            return Err(BackendError::CandidateMismatch {
                backend: self.name().to_owned(),
                got: candidate_kind(candidate).to_owned(),
            });
        };
        Ok(self.verify_entries(&c.entries, true))
    }

    /// `apply` loaded the candidate values into the kernel; reloading the
    /// restored file puts the previous managed values back.
    fn post_restore(&self) -> Result<(), BackendError> {
        if self.paths.live {
            let conf = self.paths.sysctl_conf.display().to_string();
            let out = probe::run_command(&["sysctl", "-p", conf.as_str()], RELOAD_TIMEOUT)?;
            if !out.success {
                return Err(BackendError::CommandFailed {
                    command: format!("sysctl -p {conf}"),
                    detail: out.stderr.trim().to_owned(),
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn read_or_empty(path: &Path) -> Result<String, BackendError> {
    if path.exists() {
        Ok(fs::read_to_string(path)?)
    } else {
        Ok(String::new())
    }
}

/// The lines inside the marker pair, if present.
fn managed_section(content: &str) -> Option<String> {
    let mut inside = false;
    let mut section = String::new();
    for line in content.lines() {
        if line.trim() == SECTION_BEGIN {
            inside = true;
            continue;
        }
        if line.trim() == SECTION_END {
            return Some(section);
        }
        if inside {
            section.push_str(line);
            section.push('\n');
        }
    }
    None
}

/// Merge entries into the managed section, leaving unrelated lines alone.
///
/// Existing managed keys keep their position; a key present in both takes
/// the candidate's value; new keys are appended to the section. Managed
/// keys from earlier runs that the candidate does not mention survive, so
/// different operations sharing the file do not clobber each other.
/// Re-running with an identical candidate produces identical output.
pub(crate) fn merge_managed_section(existing: &str, entries: &[SysctlEntry]) -> String {
    let mut merged: Vec<SysctlEntry> = Vec::new();
    if let Some(section) = managed_section(existing) {
        for line in section.lines() {
            if let Some((key, value)) = parse_kv(line) {
                merged.push(SysctlEntry::new(key, value));
            }
        }
    }
    for entry in entries {
        if let Some(existing_entry) = merged.iter_mut().find(|e| e.key == entry.key) {
            existing_entry.value.clone_from(&entry.value);
        } else {
            merged.push(entry.clone());
        }
    }

    let mut block = String::new();
    block.push_str(SECTION_BEGIN);
    block.push('\n');
    for entry in &merged {
        block.push_str(&format!("{} = {}\n", entry.key, entry.value));
    }
    block.push_str(SECTION_END);
    block.push('\n');

    replace_managed_block(existing, &block)
}

/// Drop the given keys from the managed section (partial-success policy).
pub(crate) fn remove_managed_keys(content: &str, keys: &[String]) -> String {
    let Some(section) = managed_section(content) else {
        return content.to_owned();
    };
    let mut block = String::new();
    block.push_str(SECTION_BEGIN);
    block.push('\n');
    for line in section.lines() {
        match parse_kv(line) {
            Some((key, _)) if keys.iter().any(|k| k == key) => {}
            _ => {
                block.push_str(line);
                block.push('\n');
            }
        }
    }
    block.push_str(SECTION_END);
    block.push('\n');
    replace_managed_block(content, &block)
}

fn replace_managed_block(existing: &str, block: &str) -> String {
    let lines: Vec<&str> = existing.lines().collect();
    let begin = lines.iter().position(|l| l.trim() == SECTION_BEGIN);
    let end = lines.iter().position(|l| l.trim() == SECTION_END);

    match (begin, end) {
        (Some(b), Some(e)) if b < e => {
            let mut out = String::new();
            for line in &lines[..b] {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str(block);
            for line in &lines[e + 1..] {
                out.push_str(line);
                out.push('\n');
            }
            out
        }
        _ => {
            let mut out = existing.to_owned();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(block);
            out
        }
    }
}

fn parse_kv(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Read the live value of a dotted key from the /proc/sys tree.
pub(crate) fn read_live(proc_sys: &Path, key: &str) -> Result<String, std::io::Error> {
    let rel: String = key.replace('.', "/");
    let value = fs::read_to_string(proc_sys.join(rel))?;
    Ok(value.trim().to_owned())
}

/// Kernel reports some values tab-separated (e.g. `net.ipv4.tcp_rmem`);
/// compare whitespace-normalized.
pub(crate) fn values_match(actual: &str, desired: &str) -> bool {
    actual.split_whitespace().collect::<Vec<_>>() == desired.split_whitespace().collect::<Vec<_>>()
}

/// Extract the dotted keys `sysctl -p` rejected as missing on this host.
fn parse_unsupported_keys(stderr: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for line in stderr.lines() {
        if let Some(rest) = line.split("cannot stat /proc/sys/").nth(1) {
            let path = rest.split(':').next().unwrap_or("").trim();
            if !path.is_empty() {
                let key = path.replace('/', ".");
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> Vec<SysctlEntry> {
        pairs
            .iter()
            .map(|(k, v)| SysctlEntry::new(*k, *v))
            .collect()
    }

    #[test]
    fn merge_into_empty_file() {
        let merged = merge_managed_section("", &entries(&[("net.core.somaxconn", "4096")]));
        assert!(merged.starts_with(SECTION_BEGIN));
        assert!(merged.contains("net.core.somaxconn = 4096\n"));
        assert!(merged.trim_end().ends_with(SECTION_END));
    }

    #[test]
    fn unrelated_lines_untouched() {
        let existing = "# local tweaks\nvm.swappiness = 10\n";
        let merged = merge_managed_section(existing, &entries(&[("net.ipv4.tcp_fastopen", "3")]));
        assert!(merged.starts_with("# local tweaks\nvm.swappiness = 10\n"));
        assert!(merged.contains("net.ipv4.tcp_fastopen = 3"));
    }

    #[test]
    fn rerun_with_same_candidate_is_identical() {
        let first = merge_managed_section(
            "",
            &entries(&[("net.core.somaxconn", "4096"), ("net.ipv4.tcp_fastopen", "3")]),
        );
        let second = merge_managed_section(
            &first,
            &entries(&[("net.core.somaxconn", "4096"), ("net.ipv4.tcp_fastopen", "3")]),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn no_duplicate_keys_on_rerun() {
        let first = merge_managed_section("", &entries(&[("net.core.somaxconn", "4096")]));
        let second = merge_managed_section(&first, &entries(&[("net.core.somaxconn", "8192")]));
        assert_eq!(second.matches("net.core.somaxconn").count(), 1);
        assert!(second.contains("net.core.somaxconn = 8192"));
        assert_eq!(second.matches(SECTION_BEGIN).count(), 1);
    }

    #[test]
    fn foreign_managed_keys_survive() {
        let first = merge_managed_section("", &entries(&[("net.ipv6.conf.all.disable_ipv6", "1")]));
        let second = merge_managed_section(&first, &entries(&[("net.core.somaxconn", "4096")]));
        assert!(second.contains("net.ipv6.conf.all.disable_ipv6 = 1"));
        assert!(second.contains("net.core.somaxconn = 4096"));
    }

    #[test]
    fn remove_keys_from_managed_block() {
        let content = merge_managed_section(
            "vm.swappiness = 10\n",
            &entries(&[("net.a.b", "1"), ("net.c.d", "2")]),
        );
        let filtered = remove_managed_keys(&content, &["net.a.b".to_owned()]);
        assert!(!filtered.contains("net.a.b"));
        assert!(filtered.contains("net.c.d = 2"));
        assert!(filtered.contains("vm.swappiness = 10"));
    }

    #[test]
    fn parse_unsupported_from_stderr() {
        let stderr = "sysctl: cannot stat /proc/sys/net/netfilter/nf_conntrack_max: No such file or directory\n\
                      sysctl: cannot stat /proc/sys/net/ipv4/tcp_no_metrics_save: No such file or directory\n";
        let keys = parse_unsupported_keys(stderr);
        assert_eq!(
            keys,
            vec![
                "net.netfilter.nf_conntrack_max".to_owned(),
                "net.ipv4.tcp_no_metrics_save".to_owned(),
            ]
        );
    }

    #[test]
    fn values_match_normalizes_whitespace() {
        assert!(values_match("4096\t87380\t6291456", "4096 87380 6291456"));
        assert!(values_match("1", "1"));
        assert!(!values_match("0", "1"));
    }

    #[test]
    fn apply_writes_file_and_reports_no_change_on_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted(dir.path());
        let mut backend = SysctlBackend::new(paths);
        let candidate = CandidateState::Sysctl(
            confit_state::SysctlCandidate::new(entries(&[("net.core.somaxconn", "4096")])).unwrap(),
        );

        let first = backend.apply(&candidate).unwrap();
        assert!(first.changed);
        let second = backend.apply(&candidate).unwrap();
        assert!(!second.changed);
    }

    #[test]
    fn verify_reads_live_values_not_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted(dir.path());
        fs::create_dir_all(dir.path().join("proc/sys/net/core")).unwrap();
        fs::write(dir.path().join("proc/sys/net/core/somaxconn"), "4096\n").unwrap();

        let mut backend = SysctlBackend::new(paths);
        let candidate = CandidateState::Sysctl(
            confit_state::SysctlCandidate::new(entries(&[("net.core.somaxconn", "4096")])).unwrap(),
        );
        backend.apply(&candidate).unwrap();
        let report = backend.verify(&candidate).unwrap();
        assert_eq!(report.checks.len(), 1);
        assert!(report.checks[0].passed);
        assert!(report.checks[0].mandatory);
    }

    #[test]
    fn verify_flags_mismatched_live_value() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted(dir.path());
        fs::create_dir_all(dir.path().join("proc/sys/net/core")).unwrap();
        fs::write(dir.path().join("proc/sys/net/core/somaxconn"), "128\n").unwrap();

        let backend = SysctlBackend::new(paths);
        let candidate = CandidateState::Sysctl(
            confit_state::SysctlCandidate::new(entries(&[("net.core.somaxconn", "4096")])).unwrap(),
        );
        let report = backend.verify(&candidate).unwrap();
        assert!(!report.checks[0].passed);
        assert!(report.checks[0].mandatory);
    }

    #[test]
    fn missing_live_parameter_is_not_mandatory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SysctlBackend::new(HostPaths::rooted(dir.path()));
        let candidate = CandidateState::Sysctl(
            confit_state::SysctlCandidate::new(entries(&[("net.netfilter.nf_conntrack_max", "65536")]))
                .unwrap(),
        );
        let report = backend.verify(&candidate).unwrap();
        assert!(!report.checks[0].passed);
        assert!(!report.checks[0].mandatory);
    }

    #[test]
    fn candidate_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SysctlBackend::new(HostPaths::rooted(dir.path()));
        let candidate =
            CandidateState::Ipv6(confit_state::Ipv6Candidate { disabled: true });
        assert!(matches!(
            backend.apply(&candidate),
            Err(BackendError::CandidateMismatch { .. })
        ));
    }

    #[test]
    fn current_state_shows_managed_section() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted(dir.path());
        let mut backend = SysctlBackend::new(paths);
        assert_eq!(backend.current_state().unwrap(), "no managed section");

        let candidate = CandidateState::Sysctl(
            confit_state::SysctlCandidate::new(entries(&[("net.core.somaxconn", "4096")])).unwrap(),
        );
        backend.apply(&candidate).unwrap();
        assert!(backend
            .current_state()
            .unwrap()
            .contains("net.core.somaxconn = 4096"));
    }
}
