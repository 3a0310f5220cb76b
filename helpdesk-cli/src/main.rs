//! Main entry point for the HelpDesk command-line client.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use dotenv::dotenv;
use shared::config::{ClientConfig, ConfigOverrides};
use url::Url;

mod commands;
mod logging;

use commands::{
    session::SessionCommand,
    thread::TicketCommand,
    tickets::ListArgs,
    users::UsersCommand,
};

/// HelpDesk CLI
#[derive(Parser)]
#[command(name = "helpdesk")]
#[command(about = "Command-line client for the HelpDesk support desk", long_about = None)]
struct Cli {
    /// Path to the configuration file (optional)
    #[arg(
        long,
        short,
        global = true,
        help = "Path to the configuration file (e.g., helpdesk.yaml, helpdesk.json or helpdesk.toml)"
    )]
    config: Option<PathBuf>,

    /// Ticket API base URL, overriding the configuration
    #[arg(
        long,
        global = true,
        help = "Ticket API base URL (e.g., http://localhost:8080/api)"
    )]
    api_url: Option<Url>,

    /// STOMP broker URL, overriding the configuration
    #[arg(
        long,
        global = true,
        help = "STOMP broker WebSocket URL (e.g., ws://localhost:8080/ws/websocket)"
    )]
    ws_url: Option<Url>,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the HelpDesk CLI
#[derive(Subcommand)]
enum Commands {
    /// Sign in, sign out and inspect the stored session
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// List tickets, optionally watching the board for live updates
    Tickets(ListArgs),

    /// Work with a single ticket thread
    Ticket {
        #[command(subcommand)]
        command: TicketCommand,
    },

    /// Manage user accounts (administrators only)
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script
        #[arg(
            long,
            short,
            help = "The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)"
        )]
        shell: Shell,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate. Defaults to yaml.
        #[arg(
            long,
            short,
            help = "Format of the configuration file to generate (yaml, json or toml). Defaults to yaml."
        )]
        format: Option<String>,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_base_url: self.api_url.clone(),
            ws_url: self.ws_url.clone(),
            page_size: match &self.command {
                Commands::Tickets(args) => args.size,
                _ => None,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let overrides = cli.overrides();
    let resolve = |path: Option<PathBuf>| -> Result<ClientConfig> {
        let config = ClientConfig::load_config(path, &overrides)?;
        logging::initialize_tracing(&config.logging);
        Ok(config)
    };

    match cli.command {
        Commands::Session { command } => {
            commands::session::run(&resolve(cli.config)?, command).await?;
        }
        Commands::Tickets(args) => {
            commands::tickets::list(&resolve(cli.config)?, args).await?;
        }
        Commands::Ticket { command } => {
            commands::thread::run(&resolve(cli.config)?, command).await?;
        }
        Commands::Users { command } => {
            commands::users::run(&resolve(cli.config)?, command).await?;
        }
        Commands::Completion { shell } => {
            commands::completion::generate_completion(shell);
        }
        Commands::Config { format } => {
            commands::config::generate_config(format.as_deref().unwrap_or("yaml"))?;
        }
    }

    Ok(())
}
