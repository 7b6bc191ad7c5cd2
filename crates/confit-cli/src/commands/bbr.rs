use super::{Context, EXIT_ABORTED};
use crate::catalog::{self, OP_BBR};
use confit_backend::BackendKind;
use confit_state::{CandidateState, SysctlCandidate, BBR_MINIMUM};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let engine = ctx.engine();
    let kernel = engine.environment().kernel_version;
    if kernel < BBR_MINIMUM {
        eprintln!(
            "running kernel {kernel} predates BBR (needs {BBR_MINIMUM} or newer); \
             run `confit kernel` first, reboot, then retry"
        );
        return Ok(EXIT_ABORTED);
    }

    let candidate = SysctlCandidate::new(catalog::bbr_entries()).map_err(|e| e.to_string())?;
    super::execute(ctx, OP_BBR, BackendKind::Sysctl, &CandidateState::Sysctl(candidate))
}
