pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "teamdesk",
    about = "Teamdesk operator CLI",
    long_about = "Apply migrations, inspect configuration, check readiness, and print the slash command schemas.",
    after_help = "Examples:\n  teamdesk doctor --json\n  teamdesk config\n  teamdesk commands"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Discord settings, natural-language settings, and the database")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the slash command schemas as the platform receives them")]
    Commands,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::CommandResult::plain(0, commands::config::run()),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Commands => commands::schemas::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
