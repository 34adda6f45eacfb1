mod commands;

use berth_core::install_signal_handler;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_ENGINE_ERROR, EXIT_FAILURE, EXIT_MANIFEST_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "berth",
    version,
    about = "Bring up throwaway containers with staged, rollback-safe teardown"
)]
struct Cli {
    /// Container transport to drive (docker or mock).
    #[arg(long, default_value = "docker", global = true)]
    transport: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision the manifest's container and keep it up until stdin closes.
    Up {
        /// Path to manifest TOML file.
        #[arg(default_value = "berth.toml")]
        manifest: PathBuf,
    },
    /// Provision the container, run one command in it, then tear it down.
    Exec {
        /// Path to manifest TOML file.
        #[arg(long, default_value = "berth.toml")]
        manifest: PathBuf,
        /// Command and arguments to run.
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
    /// Validate a manifest and show the stages it would run.
    Check {
        /// Path to manifest TOML file.
        #[arg(default_value = "berth.toml")]
        manifest: PathBuf,
    },
    /// Parse an engine port listing such as "0.0.0.0:32768->80/tcp, 443/tcp".
    Ports { listing: String },
    /// Parse and normalize an image reference.
    Image { reference: String },
    /// Generate shell completions.
    Completions { shell: Shell },
    /// Check that the selected transport and the manifest are usable.
    Doctor {
        /// Path to manifest TOML file.
        #[arg(default_value = "berth.toml")]
        manifest: PathBuf,
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
            tracing_subscriber::EnvFilter::try_from_env("BERTH_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let transport = cli.transport.as_str();

    let result = match cli.command {
        Commands::Up { manifest } => commands::up::run(&manifest, transport, json_output),
        Commands::Exec { manifest, command } => {
            commands::exec::run(&manifest, transport, &command, json_output)
        }
        Commands::Check { manifest } => commands::check::run(&manifest, transport, json_output),
        Commands::Ports { listing } => commands::ports::run(&listing, json_output),
        Commands::Image { reference } => commands::image::run(&reference, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::Doctor { manifest } => commands::doctor::run(&manifest, transport, json_output),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:") {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("engine error:") {
                EXIT_ENGINE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
