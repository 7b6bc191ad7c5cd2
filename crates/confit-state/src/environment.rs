use crate::versions::KernelVersion;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceManagerKind {
    Systemd,
    SysV,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Apt,
    Yum,
    Dnf,
    Pacman,
    Zypper,
    Unknown,
}

impl PackageManagerKind {
    /// The binary probed for during detection, if any.
    pub fn binary(self) -> Option<&'static str> {
        match self {
            Self::Apt => Some("apt-get"),
            Self::Yum => Some("yum"),
            Self::Dnf => Some("dnf"),
            Self::Pacman => Some("pacman"),
            Self::Zypper => Some("zypper"),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsManagerKind {
    /// systemd-resolved owns resolution (stub resolver or managed resolv.conf).
    Resolved,
    /// NetworkManager rewrites resolv.conf on connection changes.
    NetworkManager,
    /// Plain resolv.conf, edited directly.
    Direct,
}

impl fmt::Display for ServiceManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Systemd => write!(f, "systemd"),
            Self::SysV => write!(f, "sysv"),
            Self::None => write!(f, "none"),
        }
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apt => write!(f, "apt"),
            Self::Yum => write!(f, "yum"),
            Self::Dnf => write!(f, "dnf"),
            Self::Pacman => write!(f, "pacman"),
            Self::Zypper => write!(f, "zypper"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for DnsManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => write!(f, "systemd-resolved"),
            Self::NetworkManager => write!(f, "networkmanager"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// What the detector learned about this host.
///
/// Computed once per transaction and immutable thereafter. `Unknown`
/// variants are legitimate detection results, not errors; consumers treat
/// them as "use the generic path".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    /// Normalized distro family: "debian", "rhel", "arch", "suse", or "unknown".
    pub os_family: String,
    pub os_version: String,
    pub kernel_version: KernelVersion,
    pub service_manager: ServiceManagerKind,
    pub package_manager: PackageManagerKind,
    pub dns_manager: DnsManagerKind,
}

impl Environment {
    /// The maximally degraded environment: every probe came up empty.
    /// Still a valid input for backends with a generic path.
    pub fn unknown() -> Self {
        Self {
            os_family: "unknown".to_owned(),
            os_version: String::new(),
            kernel_version: KernelVersion::new(0, 0, 0),
            service_manager: ServiceManagerKind::None,
            package_manager: PackageManagerKind::Unknown,
            dns_manager: DnsManagerKind::Direct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display() {
        assert_eq!(ServiceManagerKind::Systemd.to_string(), "systemd");
        assert_eq!(PackageManagerKind::Apt.to_string(), "apt");
        assert_eq!(PackageManagerKind::Unknown.to_string(), "unknown");
        assert_eq!(DnsManagerKind::Resolved.to_string(), "systemd-resolved");
    }

    #[test]
    fn package_manager_binaries() {
        assert_eq!(PackageManagerKind::Apt.binary(), Some("apt-get"));
        assert_eq!(PackageManagerKind::Unknown.binary(), None);
    }

    #[test]
    fn unknown_environment_is_usable() {
        let env = Environment::unknown();
        assert_eq!(env.os_family, "unknown");
        assert_eq!(env.package_manager, PackageManagerKind::Unknown);
        assert_eq!(env.dns_manager, DnsManagerKind::Direct);
    }

    #[test]
    fn environment_serializes() {
        let env = Environment::unknown();
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"os_family\":\"unknown\""));
        let back: Environment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.service_manager, ServiceManagerKind::None);
    }
}
