//! lcj - Life Changing Journey API client
//!
//! Command-line access to the assessment platform's REST API with
//! automatic token refresh.

mod api;
mod auth;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lcj")]
#[command(about = "Command-line client for the Life Changing Journey API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password. Prefer LCJ_PASSWORD: a value given here lands in
        /// shell history, and the fallback prompt echoes what is typed
        #[arg(short, long, env = "LCJ_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Sign in again even if a session is active
        #[arg(short, long)]
        force: bool,
    },

    /// Log out and clear stored credentials
    Logout,

    /// Show current session status
    Status,

    /// Show the signed-in user's profile
    Whoami,

    /// Send an authenticated request to the API
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Path relative to the API base URL, e.g. /tests
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Extra header as 'Name: value' (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Send the request this many times
        #[arg(short, long, default_value = "1")]
        repeat: usize,

        /// Print per-endpoint latency stats afterwards
        #[arg(short, long)]
        stats: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login {
            email,
            password,
            force,
        } => {
            auth::login(&email, password, force).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Whoami => {
            api::whoami().await?;
        }
        Commands::Request {
            method,
            path,
            data,
            headers,
            repeat,
            stats,
        } => {
            api::request(api::RawRequest {
                method,
                path,
                data,
                headers,
                repeat,
                stats,
            })
            .await?;
        }
    }

    Ok(())
}
