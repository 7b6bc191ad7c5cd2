use super::Context;
use crate::catalog::OP_KERNEL;
use confit_backend::BackendKind;
use confit_state::{CandidateState, KernelCandidate};

pub fn run(ctx: &Context, minimum: Option<&str>) -> Result<u8, String> {
    let candidate = build_candidate(minimum)?;
    super::execute(ctx, OP_KERNEL, BackendKind::Kernel, &candidate)
}

pub fn build_candidate(minimum: Option<&str>) -> Result<CandidateState, String> {
    let candidate = match minimum {
        Some(version) => KernelCandidate {
            minimum: version
                .parse()
                .map_err(|e| format!("invalid --minimum: {e}"))?,
        },
        None => KernelCandidate::default(),
    };
    Ok(CandidateState::Kernel(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use confit_state::BBR_MINIMUM;

    #[test]
    fn default_minimum_is_the_bbr_floor() {
        let CandidateState::Kernel(c) = build_candidate(None).unwrap() else {
            panic!("wrong candidate kind");
        };
        assert_eq!(c.minimum, BBR_MINIMUM);
    }

    #[test]
    fn explicit_minimum_parses() {
        let CandidateState::Kernel(c) = build_candidate(Some("5.10.0")).unwrap() else {
            panic!("wrong candidate kind");
        };
        assert_eq!(c.minimum.to_string(), "5.10.0");
    }

    #[test]
    fn garbage_minimum_is_rejected() {
        assert!(build_candidate(Some("not-a-version")).is_err());
    }
}
