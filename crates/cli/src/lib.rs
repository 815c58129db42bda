pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use helpline_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "helpline",
    about = "Helpline operator CLI",
    long_about = "Apply migrations, check runtime readiness, and inspect support tickets.",
    after_help = "Examples:\n  helpline doctor --json\n  helpline migrate\n  helpline ticket show local-1718000000000-3f2a"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a helpline.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending migrations to the primary database")]
    Migrate,
    #[command(about = "Check config, primary store, fallback store, and local vector file")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Inspect support tickets")]
    Ticket {
        #[command(subcommand)]
        command: TicketCommand,
    },
}

#[derive(Debug, Subcommand)]
enum TicketCommand {
    #[command(about = "Print one ticket as JSON, reading primary first and the file store second")]
    Show { id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Ticket { command: TicketCommand::Show { id } } => {
            commands::ticket::show(options, &id)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
