// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "vigil",
    about = "Personal-assistant agent runtime: event gateway, scheduler and workflow orchestrator",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// One-shot message to send through the gateway; prints the reply and exits.
    /// Omit to start the long-running service (scheduler + stdin channel).
    #[arg(value_name = "MESSAGE")]
    pub message: Option<String>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Agent mode hint passed to model selection (e.g. "research", "plan")
    #[arg(long, short = 'm')]
    pub mode: Option<String>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration and exit
    ShowConfig,
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// List recorded conversation sessions
    Sessions {
        /// Maximum number of sessions to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },
    /// List workflow projects and their status
    Projects,
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "vigil", &mut std::io::stdout());
}
