//! Streak Keeper CLI - main entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use streak_keeper::commands::{self, ContactsAction, ServeOptions};
use streak_keeper::{logging, metrics, RunOutcome, Settings};

#[derive(Parser)]
#[command(name = "streak_keeper")]
#[command(about = "Daily streak reminders over a cookie-restored browser session", long_about = None)]
#[command(version)]
struct Cli {
    /// YAML config file (defaults to ./streak.yml when present)
    #[arg(long, env = "STREAK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: REST API, Telegram bot and daily scheduler
    Serve {
        /// Do not start the Telegram bot
        #[arg(long, default_value_t = false)]
        no_bot: bool,

        /// Do not start the REST API
        #[arg(long, default_value_t = false)]
        no_api: bool,

        /// Do not start the daily scheduler
        #[arg(long, default_value_t = false)]
        no_scheduler: bool,
    },

    /// Send the streak message now and wait for the result
    Run {
        /// Locate contacts without sending anything
        #[arg(long, default_value_t = false)]
        test: bool,

        /// Message to send instead of the configured one
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Run only the daily scheduler
    Schedule,

    /// Manage the contact list
    Contacts {
        #[command(subcommand)]
        action: ContactsCommand,
    },
}

#[derive(Subcommand)]
enum ContactsCommand {
    /// Show all contacts
    List,
    /// Add a contact by display name
    Add {
        #[arg(required = true)]
        nickname: Vec<String>,
    },
    /// Remove a contact by display name
    Remove {
        #[arg(required = true)]
        nickname: Vec<String>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Serve { .. } => "serve",
            Commands::Run { .. } => "run",
            Commands::Schedule => "schedule",
            Commands::Contacts { .. } => "contacts",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Settings::load().context("loading configuration")?,
    };

    // Stdout, daily log file and optional Telegram forwarding
    let _log_guard = logging::init(&settings).context("initializing logging")?;

    let command_name = cli.command.name();
    metrics::record_command_start(command_name);
    let start = Instant::now();

    let result = execute_command(cli.command, settings).await;

    metrics::record_command_result(command_name, start.elapsed(), result.is_ok());

    result
}

async fn execute_command(command: Commands, settings: Settings) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            no_bot,
            no_api,
            no_scheduler,
        } => {
            let options = ServeOptions {
                api: !no_api,
                bot: !no_bot,
                scheduler: !no_scheduler,
            };
            commands::serve::run(settings, options).await?;
        }
        Commands::Run { test, message } => {
            let outcome = commands::run::run(settings, message, test).await?;
            if let RunOutcome::Aborted { error, .. } = outcome {
                bail!("run aborted: {}", error);
            }
        }
        Commands::Schedule => {
            commands::schedule::run(settings).await?;
        }
        Commands::Contacts { action } => {
            let action = match action {
                ContactsCommand::List => ContactsAction::List,
                ContactsCommand::Add { nickname } => ContactsAction::Add(nickname.join(" ")),
                ContactsCommand::Remove { nickname } => ContactsAction::Remove(nickname.join(" ")),
            };
            commands::contacts::run(&settings, action)?;
        }
    }

    Ok(())
}
