//! Operation names, sysctl presets, and the `apply` profile schema.

use confit_state::SysctlEntry;
use serde::Deserialize;
use std::path::Path;

pub const OP_TUNE: &str = "tune";
pub const OP_BBR: &str = "bbr";
pub const OP_DNS: &str = "dns";
pub const OP_SSH: &str = "ssh";
pub const OP_IPV6: &str = "disable-ipv6";
pub const OP_KERNEL: &str = "kernel";

/// General-purpose TCP/network tuning for servers: bigger buffers and
/// backlogs, fast open, MTU probing. Values are conservative enough for
/// hosts from 1 GB of RAM up.
pub fn tcp_tuning_entries() -> Vec<SysctlEntry> {
    [
        ("net.core.somaxconn", "65535"),
        ("net.core.netdev_max_backlog", "16384"),
        ("net.core.rmem_max", "67108864"),
        ("net.core.wmem_max", "67108864"),
        ("net.ipv4.tcp_rmem", "4096 87380 67108864"),
        ("net.ipv4.tcp_wmem", "4096 65536 67108864"),
        ("net.ipv4.tcp_max_syn_backlog", "8192"),
        ("net.ipv4.tcp_fastopen", "3"),
        ("net.ipv4.tcp_mtu_probing", "1"),
        ("net.ipv4.tcp_tw_reuse", "1"),
        ("net.ipv4.tcp_slow_start_after_idle", "0"),
        ("net.ipv4.ip_local_port_range", "1024 65535"),
    ]
    .into_iter()
    .map(|(k, v)| SysctlEntry::new(k, v))
    .collect()
}

/// BBR needs the fq qdisc alongside the congestion control switch.
pub fn bbr_entries() -> Vec<SysctlEntry> {
    vec![
        SysctlEntry::new("net.core.default_qdisc", "fq"),
        SysctlEntry::new("net.ipv4.tcp_congestion_control", "bbr"),
    ]
}

/// Parse `--set key=value` pairs from the command line.
pub fn parse_set_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Vec<SysctlEntry>, String> {
    let mut entries = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let pair = pair.as_ref();
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("'{pair}' is not a key=value pair"));
        };
        entries.push(SysctlEntry::new(key.trim(), value.trim()));
    }
    Ok(entries)
}

/// A TOML profile for `confit apply`: one optional section per
/// operation, executed in a fixed order regardless of file order.
///
/// Credentials deliberately have no place here; password rotation stays
/// interactive.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub tune: Option<TuneSection>,
    pub bbr: Option<BbrSection>,
    pub dns: Option<DnsSection>,
    pub ssh: Option<SshSection>,
    #[serde(rename = "disable-ipv6")]
    pub disable_ipv6: Option<Ipv6Section>,
    pub kernel: Option<KernelSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuneSection {
    #[serde(default = "default_true")]
    pub preset: bool,
    #[serde(default)]
    pub set: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BbrSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsSection {
    pub servers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshSection {
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ipv6Section {
    #[serde(default = "default_true")]
    pub disabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelSection {
    pub minimum: Option<String>,
}

fn default_true() -> bool {
    true
}

pub fn load_profile(path: &Path) -> Result<Profile, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read profile {}: {e}", path.display()))?;
    toml::from_str(&content).map_err(|e| format!("failed to parse profile: {e}"))
}
