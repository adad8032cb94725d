pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use plantwise_core::config::{AppConfig, LoadOptions};

use crate::commands::ask::AskArgs;

#[derive(Debug, Parser)]
#[command(
    name = "plantwise",
    about = "Plantwise operations assistant CLI",
    long_about = "Ask the plant operations agent questions, inspect its tools, and manage the CMMS store.",
    after_help = "Examples:\n  plantwise seed\n  plantwise ask \"How many biodiesel tanks are there?\"\n  plantwise tools --agent regulatory\n  plantwise doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Read configuration from this TOML file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run one conversational turn and print the structured response")]
    Ask {
        question: String,
        #[arg(long, default_value = "maintenance", help = "Agent profile to answer with")]
        agent: String,
        #[arg(long, value_name = "PATH", help = "Replay a JSON plan instead of calling the model")]
        plan_script: Option<PathBuf>,
    },
    #[command(about = "List the tools an agent profile may call")]
    Tools {
        #[arg(long, default_value = "maintenance")]
        agent: String,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the CMMS seed dataset and verify the reference records")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model readiness, knowledge store, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    if let Ok(config) = AppConfig::load(options.clone()) {
        logging::init(&config.logging);
    }

    let result = match cli.command {
        Command::Ask { question, agent, plan_script } => {
            commands::ask::run(&options, &AskArgs { question, agent, plan_script })
        }
        Command::Tools { agent } => commands::tools::run(&options, &agent),
        Command::Migrate => commands::migrate::run(&options),
        Command::Seed => commands::seed::run(&options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(&options, json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
