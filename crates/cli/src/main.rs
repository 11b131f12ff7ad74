// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `flux` - the runner CLI.
//!
//! One operational subcommand: `daemon`, which runs the task runner in
//! the foreground until a shutdown signal. All operational input comes
//! from configuration (flags > environment > `~/.flux/config.json`).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flux", version, about = "Flux task runner")]
struct Cli {
    #[command(flatten)]
    overrides: config::Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the task-runner daemon in the foreground
    Daemon,
    /// Print the resolved configuration (secrets redacted)
    Config,
}

/// Log to stderr, or to rotating files under `FLUX_LOG_DIR` when the
/// runner is managed as an OS service.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match std::env::var("FLUX_LOG_DIR") {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "runner.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // The guard flushes on drop; it must outlive main
            Box::leak(Box::new(guard));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let runner_config = config::load(&cli.overrides)?;
    match cli.command {
        Command::Daemon => {
            flux_daemon::run_daemon(runner_config).await?;
            Ok(())
        }
        Command::Config => {
            let redacted = config::redacted(&runner_config);
            println!("{}", serde_json::to_string_pretty(&redacted)?);
            Ok(())
        }
    }
}
