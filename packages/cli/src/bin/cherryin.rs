use clap::{Parser, Subcommand};
use colored::*;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::security::SecurityCommands;
use cherryin_cli::{load_config, DEFAULT_USER};

#[derive(Parser)]
#[command(name = "cherryin")]
#[command(about = "CherryIN CLI - sign in with OAuth and call the CherryIN API")]
#[command(version)]
struct Cli {
    /// Local user whose tokens are used
    #[arg(long, global = true, default_value = DEFAULT_USER)]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the browser
    Login {
        /// Sign in again even if a valid token is stored
        #[arg(long)]
        force: bool,

        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Revoke and delete the stored tokens
    Logout,
    /// Show authentication status
    Status,
    /// Refresh the access token now
    Refresh,
    /// Show the account balance
    Balance,
    /// Show the signed-in account
    Whoami,
    /// Send an authenticated request to the CherryIN API
    Request {
        /// API path, e.g. /api/v1/oauth/balance
        path: String,

        #[arg(long, short = 'X', default_value = "GET")]
        method: String,

        /// JSON request body
        #[arg(long, short = 'd')]
        data: Option<String>,
    },
    /// Manage encryption of stored tokens
    #[command(subcommand)]
    Security(SecurityCommands),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config()?;
    let user = cli.user.as_str();

    match cli.command {
        Commands::Login { force, no_browser } => {
            cli::auth::login(&config, user, force, no_browser).await
        }
        Commands::Logout => cli::auth::logout(&config, user).await,
        Commands::Status => cli::auth::status(&config, user).await,
        Commands::Refresh => cli::auth::refresh(&config, user).await,
        Commands::Balance => cli::account::balance(&config, user).await,
        Commands::Whoami => cli::account::whoami(&config, user).await,
        Commands::Request { path, method, data } => {
            cli::account::request(&config, user, &path, &method, data.as_deref()).await
        }
        Commands::Security(command) => command.execute(&config).await,
    }
}
