mod catalog;
mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::EXIT_FAILURE;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "confit",
    version,
    about = "Transactional host configuration engine for Linux"
)]
struct Cli {
    /// Directory holding snapshots and transaction records.
    #[arg(long, default_value = "/var/lib/confit")]
    backup_dir: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Answer yes to confirmations and acknowledge policy warnings.
    #[arg(short, long, default_value_t = false, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply the TCP/network tuning preset to the kernel.
    Tune {
        /// Extra `key=value` pairs applied on top of the preset.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
        /// Apply only --set pairs, skipping the built-in preset.
        #[arg(long, default_value_t = false)]
        no_preset: bool,
    },
    /// Enable the BBR congestion control algorithm.
    Bbr,
    /// Point the host's resolver at the given nameservers (1 to 4).
    Dns {
        /// Nameserver IPv4 addresses, in priority order.
        #[arg(required = true, num_args = 1..=4)]
        servers: Vec<String>,
    },
    /// Harden the SSH daemon: move its port and/or rotate a credential.
    Ssh {
        /// New listening port (1024-65535).
        #[arg(long)]
        port: Option<u16>,
        /// Account whose password should be rotated (prompts for it).
        #[arg(long)]
        user: Option<String>,
    },
    /// Disable IPv6 on all interfaces, present and future.
    DisableIpv6 {
        /// Re-enable IPv6 instead.
        #[arg(long, default_value_t = false)]
        revert: bool,
    },
    /// Install a newer kernel when the running one is too old.
    Kernel {
        /// Minimum acceptable version (default: the BBR floor, 4.9.0).
        #[arg(long)]
        minimum: Option<String>,
    },
    /// Run several operations from a TOML profile, in a fixed order.
    Apply {
        /// Path to the profile file.
        profile: PathBuf,
    },
    /// Detect and print this host's environment.
    Detect,
    /// List snapshots taken by past transactions.
    Snapshots {
        /// Only snapshots for this operation.
        #[arg(long)]
        operation: Option<String>,
    },
    /// Restore host state from a snapshot.
    Restore {
        /// Snapshot id, or a path to a snapshot directory.
        snapshot: String,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CONFIT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let ctx = commands::Context {
        backup_dir: cli.backup_dir,
        json: cli.json,
        yes: cli.yes,
    };

    let result = match cli.command {
        Commands::Tune { set, no_preset } => commands::tune::run(&ctx, &set, no_preset),
        Commands::Bbr => commands::bbr::run(&ctx),
        Commands::Dns { servers } => commands::dns::run(&ctx, &servers),
        Commands::Ssh { port, user } => commands::ssh::run(&ctx, port, user.as_deref()),
        Commands::DisableIpv6 { revert } => commands::disable_ipv6::run(&ctx, revert),
        Commands::Kernel { minimum } => commands::kernel::run(&ctx, minimum.as_deref()),
        Commands::Apply { profile } => commands::apply::run(&ctx, &profile),
        Commands::Detect => commands::detect::run(&ctx),
        Commands::Snapshots { operation } => {
            commands::snapshots::run(&ctx, operation.as_deref())
        }
        Commands::Restore { snapshot } => commands::restore::run(&ctx, &snapshot),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
