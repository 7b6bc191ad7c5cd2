use super::Context;
use crate::catalog::OP_DNS;
use confit_backend::BackendKind;
use confit_state::{CandidateState, DnsCandidate};

pub fn run(ctx: &Context, servers: &[String]) -> Result<u8, String> {
    let candidate = DnsCandidate::parse(servers).map_err(|e| e.to_string())?;
    super::execute(ctx, OP_DNS, BackendKind::Dns, &CandidateState::Dns(candidate))
}
