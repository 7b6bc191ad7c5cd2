use super::Context;
use crate::catalog::OP_IPV6;
use confit_backend::BackendKind;
use confit_state::{CandidateState, Ipv6Candidate};

pub fn run(ctx: &Context, revert: bool) -> Result<u8, String> {
    let candidate = Ipv6Candidate { disabled: !revert };
    super::execute(ctx, OP_IPV6, BackendKind::Ipv6, &CandidateState::Ipv6(candidate))
}
