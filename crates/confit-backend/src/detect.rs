use confit_state::{
    DnsManagerKind, Environment, KernelVersion, PackageManagerKind, ServiceManagerKind,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read-only host environment detection.
///
/// Probes are ordered from most to least specific and the first match
/// wins; partial results from different probes are never merged.
/// Detection never fails: every field degrades to an `Unknown`-style
/// value that callers treat as "use the generic path".
pub struct EnvironmentDetector {
    etc: PathBuf,
    proc: PathBuf,
    run: PathBuf,
    path_dirs: Vec<PathBuf>,
}

impl Default for EnvironmentDetector {
    fn default() -> Self {
        let path_dirs = std::env::var("PATH")
            .unwrap_or_default()
            .split(':')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();
        Self {
            etc: PathBuf::from("/etc"),
            proc: PathBuf::from("/proc"),
            run: PathBuf::from("/run"),
            path_dirs,
        }
    }
}

impl EnvironmentDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A detector reading a fixture tree: `<root>/etc`, `<root>/proc`,
    /// `<root>/run`, with binaries probed under `<root>/bin`.
    pub fn rooted(root: &Path) -> Self {
        Self {
            etc: root.join("etc"),
            proc: root.join("proc"),
            run: root.join("run"),
            path_dirs: vec![root.join("bin")],
        }
    }

    pub fn detect(&self) -> Environment {
        let (os_family, os_version) = self.detect_os();
        let env = Environment {
            os_family,
            os_version,
            kernel_version: self.detect_kernel(),
            service_manager: self.detect_service_manager(),
            package_manager: self.detect_package_manager(),
            dns_manager: self.detect_dns_manager(),
        };
        debug!(
            "detected environment: {} {} kernel {} ({}, {}, dns {})",
            env.os_family,
            env.os_version,
            env.kernel_version,
            env.service_manager,
            env.package_manager,
            env.dns_manager
        );
        env
    }

    fn detect_os(&self) -> (String, String) {
        // Structured release metadata first.
        if let Ok(content) = fs::read_to_string(self.etc.join("os-release")) {
            let id = os_release_field(&content, "ID");
            let id_like = os_release_field(&content, "ID_LIKE");
            let version = os_release_field(&content, "VERSION_ID");
            if let Some(family) = normalize_family(&id, &id_like) {
                return (family, version);
            }
        }
        // Fallback marker files, most specific first.
        if self.etc.join("debian_version").exists() {
            let version = fs::read_to_string(self.etc.join("debian_version"))
                .map(|s| s.trim().to_owned())
                .unwrap_or_default();
            return ("debian".to_owned(), version);
        }
        if self.etc.join("redhat-release").exists() {
            return ("rhel".to_owned(), String::new());
        }
        ("unknown".to_owned(), String::new())
    }

    fn detect_kernel(&self) -> KernelVersion {
        fs::read_to_string(self.proc.join("sys/kernel/osrelease"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(KernelVersion {
                major: 0,
                minor: 0,
                patch: 0,
            })
    }

    fn detect_service_manager(&self) -> ServiceManagerKind {
        // systemd advertises itself with this directory at runtime.
        if self.run.join("systemd/system").is_dir() {
            return ServiceManagerKind::Systemd;
        }
        if self.etc.join("init.d").is_dir() {
            return ServiceManagerKind::SysV;
        }
        ServiceManagerKind::None
    }

    fn detect_package_manager(&self) -> PackageManagerKind {
        // dnf before yum: dnf systems usually ship a yum compatibility
        // symlink, and the more specific manager must win.
        let candidates = [
            PackageManagerKind::Apt,
            PackageManagerKind::Dnf,
            PackageManagerKind::Yum,
            PackageManagerKind::Pacman,
            PackageManagerKind::Zypper,
        ];
        for kind in candidates {
            if let Some(binary) = kind.binary() {
                if self.binary_exists(binary) {
                    return kind;
                }
            }
        }
        PackageManagerKind::Unknown
    }

    fn detect_dns_manager(&self) -> DnsManagerKind {
        let resolv = self.etc.join("resolv.conf");

        // A resolv.conf symlink into systemd-resolved's runtime tree is
        // the authoritative marker; the stub-resolver address is next.
        if let Ok(target) = fs::read_link(&resolv) {
            if target.to_string_lossy().contains("systemd") {
                return DnsManagerKind::Resolved;
            }
        }
        if let Ok(content) = fs::read_to_string(&resolv) {
            if content.contains("127.0.0.53") {
                return DnsManagerKind::Resolved;
            }
            if content.contains("Generated by NetworkManager") {
                return DnsManagerKind::NetworkManager;
            }
        }
        if self.run.join("NetworkManager").is_dir() {
            return DnsManagerKind::NetworkManager;
        }
        DnsManagerKind::Direct
    }

    fn binary_exists(&self, name: &str) -> bool {
        self.path_dirs.iter().any(|dir| dir.join(name).is_file())
    }
}

fn os_release_field(content: &str, field: &str) -> String {
    for line in content.lines() {
        if let Some(value) = line.strip_prefix(field) {
            if let Some(value) = value.strip_prefix('=') {
                return value.trim().trim_matches('"').to_owned();
            }
        }
    }
    String::new()
}

fn normalize_family(id: &str, id_like: &str) -> Option<String> {
    let known = |s: &str| match s {
        "debian" | "ubuntu" | "raspbian" | "linuxmint" => Some("debian"),
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" => Some("rhel"),
        "arch" | "manjaro" => Some("arch"),
        "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" => Some("suse"),
        _ => None,
    };
    if let Some(family) = known(id) {
        return Some(family.to_owned());
    }
    for like in id_like.split_whitespace() {
        if let Some(family) = known(like) {
            return Some(family.to_owned());
        }
    }
    None
}
