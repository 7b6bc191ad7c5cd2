use super::{
    colorize_outcome, colorize_verdict, json_pretty, spin_fail, spin_ok, spinner, Context,
    EXIT_ABORTED, EXIT_FAILURE, EXIT_SUCCESS,
};
use crate::catalog::{self, OP_BBR, OP_DNS, OP_IPV6, OP_KERNEL, OP_SSH, OP_TUNE};
use confit_backend::BackendKind;
use confit_state::{
    CandidateState, DnsCandidate, Ipv6Candidate, Outcome, SshCandidate, SysctlCandidate,
    TransactionResult, BBR_MINIMUM,
};
use std::path::Path;

pub fn run(ctx: &Context, profile_path: &Path) -> Result<u8, String> {
    let profile = catalog::load_profile(profile_path)?;
    let engine = ctx.engine();
    let planned = plan(ctx, &profile, engine.environment().kernel_version)?;
    if planned.is_empty() {
        return Err("profile names no operations".to_owned());
    }

    let mut results: Vec<TransactionResult> = Vec::new();
    for (operation, kind, candidate) in planned {
        let pb = (!ctx.json).then(|| spinner(&format!("running {operation}")));
        let result = engine
            .run(operation, kind, &candidate)
            .map_err(|e| e.to_string())?;
        if let Some(pb) = &pb {
            if result.succeeded() {
                spin_ok(pb, &format!("{operation} {}", result.outcome));
            } else {
                spin_fail(pb, &format!("{operation} {}", result.outcome));
            }
        }
        results.push(result);
    }

    if ctx.json {
        println!("{}", json_pretty(&results)?);
    } else {
        println!("\nsummary:");
        for result in &results {
            match result.verdict {
                Some(verdict) => println!(
                    "  {:<14} {} ({})",
                    result.operation,
                    colorize_outcome(result.outcome),
                    colorize_verdict(verdict)
                ),
                None => println!(
                    "  {:<14} {}",
                    result.operation,
                    colorize_outcome(result.outcome)
                ),
            }
            for error in &result.errors {
                eprintln!("    {error}");
            }
        }
    }
    Ok(worst_exit_code(&results))
}

type Planned = (&'static str, BackendKind, CandidateState);

/// Fixed execution order regardless of section order in the file.
/// Kernel install runs last so everything else verifies before the host
/// picks up a pending-reboot verdict.
fn plan(
    ctx: &Context,
    profile: &catalog::Profile,
    kernel: confit_state::KernelVersion,
) -> Result<Vec<Planned>, String> {
    let mut planned: Vec<Planned> = Vec::new();

    if let Some(tune) = &profile.tune {
        planned.push((
            OP_TUNE,
            BackendKind::Sysctl,
            super::tune::build_candidate(&tune.set, !tune.preset)?,
        ));
    }
    if profile.bbr.as_ref().is_some_and(|b| b.enabled) {
        if kernel < BBR_MINIMUM {
            return Err(format!(
                "profile enables bbr but the running kernel {kernel} predates {BBR_MINIMUM}; \
                 add a [kernel] section, apply, reboot, then re-apply"
            ));
        }
        let candidate =
            SysctlCandidate::new(catalog::bbr_entries()).map_err(|e| e.to_string())?;
        planned.push((OP_BBR, BackendKind::Sysctl, CandidateState::Sysctl(candidate)));
    }
    if let Some(ipv6) = &profile.disable_ipv6 {
        planned.push((
            OP_IPV6,
            BackendKind::Ipv6,
            CandidateState::Ipv6(Ipv6Candidate {
                disabled: ipv6.disabled,
            }),
        ));
    }
    if let Some(dns) = &profile.dns {
        let candidate = DnsCandidate::parse(&dns.servers).map_err(|e| e.to_string())?;
        planned.push((OP_DNS, BackendKind::Dns, CandidateState::Dns(candidate)));
    }
    if let Some(ssh) = &profile.ssh {
        let mut candidate =
            SshCandidate::new(Some(ssh.port), None).map_err(|e| e.to_string())?;
        // Profiles run unattended; --yes is the only way to wave
        // warnings through.
        if ctx.yes {
            candidate.acknowledge();
        }
        planned.push((OP_SSH, BackendKind::Ssh, CandidateState::Ssh(candidate)));
    }
    if let Some(kernel_section) = &profile.kernel {
        planned.push((
            OP_KERNEL,
            BackendKind::Kernel,
            super::kernel::build_candidate(kernel_section.minimum.as_deref())?,
        ));
    }
    Ok(planned)
}

fn worst_exit_code(results: &[TransactionResult]) -> u8 {
    if results.iter().any(|r| r.outcome == Outcome::RolledBack) {
        EXIT_FAILURE
    } else if results.iter().any(|r| r.outcome == Outcome::Aborted) {
        EXIT_ABORTED
    } else {
        EXIT_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx() -> Context {
        Context {
            backup_dir: PathBuf::from("/tmp/confit-test"),
            json: false,
            yes: false,
        }
    }

    fn full_profile() -> catalog::Profile {
        toml::from_str(
            r#"
            [kernel]
            [ssh]
            port = 2222
            [dns]
            servers = ["8.8.8.8"]
            [bbr]
            [tune]
            [disable-ipv6]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn plan_order_is_fixed() {
        let kernel = "5.15.0".parse().unwrap();
        let planned = plan(&ctx(), &full_profile(), kernel).unwrap();
        let ops: Vec<&str> = planned.iter().map(|(op, _, _)| *op).collect();
        assert_eq!(ops, vec![OP_TUNE, OP_BBR, OP_IPV6, OP_DNS, OP_SSH, OP_KERNEL]);
    }

    #[test]
    fn bbr_on_old_kernel_fails_the_plan() {
        let kernel = "3.10.0".parse().unwrap();
        let err = plan(&ctx(), &full_profile(), kernel).unwrap_err();
        assert!(err.contains("bbr"));
    }

    #[test]
    fn empty_profile_plans_nothing() {
        let kernel = "5.15.0".parse().unwrap();
        let planned = plan(&ctx(), &catalog::Profile::default(), kernel).unwrap();
        assert!(planned.is_empty());
    }

    #[test]
    fn worst_exit_code_prefers_rollback() {
        let mk = |outcome| TransactionResult {
            operation: "x".to_owned(),
            outcome,
            verdict: None,
            snapshot_dir: None,
            report: None,
            failed_step: None,
            errors: Vec::new(),
            restore_failed: false,
        };
        assert_eq!(worst_exit_code(&[mk(Outcome::Committed)]), EXIT_SUCCESS);
        assert_eq!(
            worst_exit_code(&[mk(Outcome::Committed), mk(Outcome::Aborted)]),
            EXIT_ABORTED
        );
        assert_eq!(
            worst_exit_code(&[mk(Outcome::Aborted), mk(Outcome::RolledBack)]),
            EXIT_FAILURE
        );
    }
}
