//! gaivota-chat - Gaivota News team chat client
//!
//! Realtime staff chat with read receipts and typing indicators, in the
//! terminal.

mod api;
mod auth;
mod config;
mod models;
mod realtime;
mod store;
mod sync;
mod tui;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gaivota-chat")]
#[command(about = "Team chat for the Gaivota News newsroom", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the backend project URL and API key
    Configure {
        /// Project URL, e.g. https://abcd.supabase.co
        #[arg(long)]
        url: Option<String>,

        /// Public (anon) API key
        #[arg(long)]
        anon_key: Option<String>,

        /// Notification sound for incoming messages
        #[arg(long, value_enum)]
        sound: Option<Toggle>,
    },

    /// Sign in with e-mail and password
    Login {
        #[arg(short, long)]
        email: String,

        /// Password (prefer the environment variable)
        #[arg(short, long, env = "GAIVOTA_PASSWORD", hide_env_values = true)]
        password: String,

        /// Sign in again even if a valid session exists
        #[arg(short, long)]
        force: bool,
    },

    /// Log out and clear the stored session
    Logout,

    /// Show configuration and session status
    Status,

    /// Show current user, role and chat availability
    Whoami,

    /// Print recent messages with read receipts
    History {
        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Send a text message
    Send {
        /// Message content
        message: String,
    },

    /// Upload a file and send it as a message
    SendFile {
        path: PathBuf,
    },

    /// Open the chat screen
    Chat {
        /// Start with the panel open
        #[arg(long)]
        open: bool,

        /// Offline demo with a simulated colleague
        #[arg(long)]
        demo: bool,
    },
}

fn configure(url: Option<String>, anon_key: Option<String>, sound: Option<Toggle>) -> Result<()> {
    if url.is_none() && anon_key.is_none() && sound.is_none() {
        bail!("Nothing to configure. Pass --url, --anon-key or --sound.");
    }
    let mut config = config::Config::load()?;
    if let Some(url) = url {
        config.project_url = Some(url.trim_end_matches('/').to_string());
    }
    if let Some(key) = anon_key {
        config.anon_key = Some(key);
    }
    if let Some(sound) = sound {
        config.sound_enabled = matches!(sound, Toggle::On);
    }
    config.save()?;
    println!("Configuration saved.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter =
        || tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    // The chat screen owns the terminal, so its logs go to a buffer.
    let logs = tui::LogBuffer::new();
    if matches!(cli.command, Commands::Chat { .. }) {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .without_time()
                    .with_writer(logs.clone()),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    match cli.command {
        Commands::Configure {
            url,
            anon_key,
            sound,
        } => {
            configure(url, anon_key, sound)?;
        }
        Commands::Login {
            email,
            password,
            force,
        } => {
            auth::login(&email, &password, force).await?;
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
        Commands::History { limit } => {
            api::history(limit).await?;
        }
        Commands::Send { message } => {
            tracing::info!("Sending message...");
            api::send(&message).await?;
        }
        Commands::SendFile { path } => {
            tracing::info!("Uploading {}...", path.display());
            api::send_file(&path).await?;
        }
        Commands::Chat { open, demo } => {
            tui::run(tui::ChatOptions { open, demo }, logs).await?;
        }
    }

    Ok(())
}
