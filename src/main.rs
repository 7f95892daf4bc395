//! statebind - run and inspect UI state machines
//!
//! Loads a machine definition (JSON or YAML), builds a service from it and
//! dispatches events one-shot or from an interactive REPL.

mod commands;
mod config;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statebind")]
#[command(about = "Run and inspect UI state machines")]
#[command(version)]
struct Cli {
    /// Config file (YAML)
    #[arg(short, long, env = "STATEBIND_CONFIG")]
    config: Option<PathBuf>,

    /// Machine definition file (JSON or YAML)
    #[arg(short, long)]
    machine: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl {
        /// Initial context JSON (or @file.json)
        #[arg(long)]
        context: Option<String>,

        /// Props JSON (or @file.json)
        #[arg(long)]
        props: Option<String>,
    },

    /// Print states, events and checksum of the machine
    Inspect,

    /// Start the machine, send events and print the result
    Run {
        /// Events to send, as TYPE or TYPE={json payload}
        events: Vec<String>,

        /// Initial context JSON (or @file.json)
        #[arg(long)]
        context: Option<String>,

        /// Props JSON (or @file.json)
        #[arg(long)]
        props: Option<String>,

        /// Dispatch without starting the service first
        #[arg(long)]
        no_start: bool,
    },

    /// Validate machine definition files
    Validate {
        /// Files to check (defaults to the configured machine)
        files: Vec<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration (from file if given, then env overrides)
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return Err(e.into());
        }
    };
    if let Some(machine) = cli.machine {
        config.runner.machine = Some(machine);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .init();

    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    let command = cli.command.unwrap_or(Commands::Repl {
        context: None,
        props: None,
    });

    match command {
        Commands::Repl { context, props } => {
            let machine = commands::load_machine(config.machine_path()?)?;
            let service = commands::build_service(machine, context.as_deref(), props.as_deref())?;
            if config.runner.auto_start {
                service.start();
            }
            repl::run(service, &config.repl.history_path())?;
        }
        cmd => match commands::execute(cmd, &config) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
