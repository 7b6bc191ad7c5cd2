pub mod apply;
pub mod bbr;
pub mod completions;
pub mod detect;
pub mod disable_ipv6;
pub mod dns;
pub mod kernel;
pub mod restore;
pub mod snapshots;
pub mod ssh;
pub mod tune;

use confit_backend::{BackendKind, EnvironmentDetector, HostPaths};
use confit_engine::MutationEngine;
use confit_state::{CandidateState, Outcome, TransactionResult, Verdict};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_ABORTED: u8 = 2;

/// Per-invocation settings shared by every command.
pub struct Context {
    pub backup_dir: PathBuf,
    pub json: bool,
    pub yes: bool,
}

impl Context {
    pub fn engine(&self) -> MutationEngine {
        let env = EnvironmentDetector::new().detect();
        MutationEngine::new(&self.backup_dir, env, HostPaths::default())
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_outcome(outcome: Outcome) -> String {
    use console::Style;
    let s = outcome.to_string();
    match outcome {
        Outcome::Committed => Style::new().green().apply_to(s).to_string(),
        Outcome::RolledBack => Style::new().red().bold().apply_to(s).to_string(),
        Outcome::Aborted => Style::new().yellow().apply_to(s).to_string(),
    }
}

pub fn colorize_verdict(verdict: Verdict) -> String {
    use console::Style;
    let s = verdict.to_string();
    match verdict {
        Verdict::Pass => Style::new().green().apply_to(s).to_string(),
        Verdict::Degraded => Style::new().yellow().apply_to(s).to_string(),
        Verdict::PendingReboot => Style::new().cyan().apply_to(s).to_string(),
        Verdict::Fail => Style::new().red().bold().apply_to(s).to_string(),
    }
}

/// Run one operation through the engine and render its result.
pub fn execute(
    ctx: &Context,
    operation: &str,
    kind: BackendKind,
    candidate: &CandidateState,
) -> Result<u8, String> {
    let engine = ctx.engine();
    let pb = (!ctx.json).then(|| spinner(&format!("running {operation}")));
    let result = engine
        .run(operation, kind, candidate)
        .map_err(|e| e.to_string());
    if let Some(pb) = &pb {
        match &result {
            Ok(r) if r.succeeded() => spin_ok(pb, &format!("{operation} {}", r.outcome)),
            Ok(r) => spin_fail(pb, &format!("{operation} {}", r.outcome)),
            Err(_) => spin_fail(pb, &format!("{operation} failed to run")),
        }
    }
    render_result(ctx, &result?)
}

/// Print a transaction result and map its outcome to an exit code.
pub fn render_result(ctx: &Context, result: &TransactionResult) -> Result<u8, String> {
    if ctx.json {
        println!("{}", json_pretty(result)?);
    } else {
        if let Some(report) = &result.report {
            for check in &report.checks {
                let mark = if check.passed { "✓" } else { "✗" };
                let kind = if check.mandatory { "" } else { " (optional)" };
                println!("  {mark} {}{kind}: {}", check.name, check.detail);
            }
        }
        match result.verdict {
            Some(verdict) => println!(
                "{}: {} (verdict: {})",
                result.operation,
                colorize_outcome(result.outcome),
                colorize_verdict(verdict)
            ),
            None => println!(
                "{}: {}",
                result.operation,
                colorize_outcome(result.outcome)
            ),
        }
        if result.verdict == Some(Verdict::PendingReboot) {
            println!("reboot the host to finish this change");
        }
        for error in &result.errors {
            eprintln!("  {error}");
        }
        if result.restore_failed {
            if let Some(dir) = &result.snapshot_dir {
                eprintln!(
                    "rollback failed; recover manually from snapshot at {}",
                    dir.display()
                );
            }
        } else if let Some(dir) = &result.snapshot_dir {
            println!("snapshot: {}", dir.display());
        }
    }
    Ok(exit_code(result))
}

pub fn exit_code(result: &TransactionResult) -> u8 {
    match result.outcome {
        Outcome::Committed => EXIT_SUCCESS,
        Outcome::RolledBack => EXIT_FAILURE,
        Outcome::Aborted => EXIT_ABORTED,
    }
}

/// Ask for confirmation, honoring `--yes`.
pub fn confirm(ctx: &Context, prompt: &str) -> Result<bool, String> {
    if ctx.yes {
        return Ok(true);
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))
}
