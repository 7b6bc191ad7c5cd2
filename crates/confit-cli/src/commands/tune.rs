use super::Context;
use crate::catalog::{self, OP_TUNE};
use confit_backend::BackendKind;
use confit_state::{CandidateState, SysctlCandidate};

pub fn run(ctx: &Context, set: &[String], no_preset: bool) -> Result<u8, String> {
    let candidate = build_candidate(set, no_preset)?;
    super::execute(ctx, OP_TUNE, BackendKind::Sysctl, &candidate)
}

pub fn build_candidate(set: &[String], no_preset: bool) -> Result<CandidateState, String> {
    let mut entries = if no_preset {
        Vec::new()
    } else {
        catalog::tcp_tuning_entries()
    };
    entries.extend(catalog::parse_set_pairs(set)?);
    let candidate = SysctlCandidate::new(entries).map_err(|e| e.to_string())?;
    Ok(CandidateState::Sysctl(candidate))
}
