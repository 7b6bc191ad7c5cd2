use crate::credential::{score_credential, Credential};
use crate::net::{parse_ipv4, validate_port};
use crate::versions::{KernelVersion, BBR_MINIMUM};
use crate::StateError;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// A soft policy violation attached to a candidate. Warnings never block
/// on their own, but the engine refuses a warned candidate until the
/// caller has explicitly acknowledged it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateWarning {
    pub message: String,
}

impl CandidateWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysctlEntry {
    pub key: String,
    pub value: String,
}

impl SysctlEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A set of `key = value` kernel parameters to merge into the managed
/// sysctl section. Keys are dotted (`net.core.somaxconn`), deduplicated
/// on construction with the last occurrence winning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysctlCandidate {
    pub entries: Vec<SysctlEntry>,
}

impl SysctlCandidate {
    pub fn new(entries: Vec<SysctlEntry>) -> Result<Self, StateError> {
        if entries.is_empty() {
            return Err(StateError::EmptyCandidate(
                "sysctl candidate has no entries".to_owned(),
            ));
        }
        let mut deduped: Vec<SysctlEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.key.is_empty()
                || !entry.key.contains('.')
                || entry.key.chars().any(char::is_whitespace)
            {
                return Err(StateError::InvalidSysctl(format!(
                    "'{}' is not a dotted sysctl key",
                    entry.key
                )));
            }
            if entry.value.is_empty() {
                return Err(StateError::InvalidSysctl(format!(
                    "key '{}' has an empty value",
                    entry.key
                )));
            }
            if let Some(existing) = deduped.iter_mut().find(|e| e.key == entry.key) {
                existing.value = entry.value;
            } else {
                deduped.push(entry);
            }
        }
        Ok(Self { entries: deduped })
    }
}

/// 1-4 validated, de-duplicated IPv4 resolver addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsCandidate {
    pub servers: Vec<Ipv4Addr>,
}

impl DnsCandidate {
    pub fn parse<S: AsRef<str>>(inputs: &[S]) -> Result<Self, StateError> {
        if inputs.is_empty() || inputs.len() > 4 {
            return Err(StateError::DnsServerCount(inputs.len()));
        }
        let mut servers: Vec<Ipv4Addr> = Vec::with_capacity(inputs.len());
        for input in inputs {
            let addr = parse_ipv4(input.as_ref())?;
            if !servers.contains(&addr) {
                servers.push(addr);
            }
        }
        Ok(Self { servers })
    }
}

/// SSH hardening candidate: a new listening port, a credential change,
/// or both. Port range violations are hard errors; weak credentials and
/// already-bound ports are warnings requiring acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshCandidate {
    pub port: Option<u16>,
    pub credential: Option<Credential>,
    pub warnings: Vec<CandidateWarning>,
    pub acknowledged: bool,
}

impl SshCandidate {
    pub fn new(port: Option<u16>, credential: Option<Credential>) -> Result<Self, StateError> {
        if port.is_none() && credential.is_none() {
            return Err(StateError::EmptyCandidate(
                "ssh candidate changes neither port nor credential".to_owned(),
            ));
        }
        if let Some(p) = port {
            validate_port(p)?;
        }
        let mut warnings = Vec::new();
        if let Some(ref c) = credential {
            for violation in score_credential(c) {
                warnings.push(CandidateWarning::new(format!(
                    "credential policy: {violation}"
                )));
            }
        }
        Ok(Self {
            port,
            credential,
            warnings,
            acknowledged: false,
        })
    }

    /// Attach an externally discovered warning (e.g. the port liveness
    /// probe found something already listening).
    pub fn flag(&mut self, message: impl Into<String>) {
        self.warnings.push(CandidateWarning::new(message));
    }

    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelCandidate {
    pub minimum: KernelVersion,
}

impl Default for KernelCandidate {
    fn default() -> Self {
        Self {
            minimum: BBR_MINIMUM,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ipv6Candidate {
    pub disabled: bool,
}

/// The desired state handed to a backend, one variant per backend kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CandidateState {
    Sysctl(SysctlCandidate),
    Dns(DnsCandidate),
    Ssh(SshCandidate),
    Kernel(KernelCandidate),
    Ipv6(Ipv6Candidate),
}

impl CandidateState {
    /// Warnings requiring acknowledgement before the engine will proceed.
    pub fn warnings(&self) -> &[CandidateWarning] {
        match self {
            Self::Ssh(c) => &c.warnings,
            _ => &[],
        }
    }

    pub fn acknowledged(&self) -> bool {
        match self {
            Self::Ssh(c) => c.acknowledged,
            _ => true,
        }
    }
}
