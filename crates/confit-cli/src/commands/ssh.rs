use super::{confirm, Context, EXIT_ABORTED};
use crate::catalog::OP_SSH;
use confit_backend::{probe, BackendKind};
use confit_state::{CandidateState, Credential, SshCandidate};
use std::time::Duration;

const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn run(ctx: &Context, port: Option<u16>, user: Option<&str>) -> Result<u8, String> {
    let credential = match user {
        Some(username) => Some(Credential::new(username, prompt_password(username)?)),
        None => None,
    };
    let mut candidate = SshCandidate::new(port, credential).map_err(|e| e.to_string())?;

    if let Some(port) = port {
        if probe::port_in_use(port, PORT_PROBE_TIMEOUT) {
            candidate.flag(format!(
                "port {port} already has a listener; it may belong to another service"
            ));
        }
    }

    if !candidate.warnings.is_empty() {
        eprintln!("warnings:");
        for warning in &candidate.warnings {
            eprintln!("  ! {}", warning.message);
        }
        if confirm(ctx, "proceed anyway?")? {
            candidate.acknowledge();
        } else {
            eprintln!("aborted; nothing was changed");
            return Ok(EXIT_ABORTED);
        }
    }

    super::execute(ctx, OP_SSH, BackendKind::Ssh, &CandidateState::Ssh(candidate))
}

fn prompt_password(username: &str) -> Result<String, String> {
    dialoguer::Password::new()
        .with_prompt(format!("new password for {username}"))
        .with_confirmation("repeat password", "passwords do not match")
        .interact()
        .map_err(|e| format!("password prompt failed: {e}"))
}
