use anyhow::Context;
use bonkarena_client::Client;
use bonkarena_ledger::{Config, Engine, FileStorage};
use bonkarena_types::AuthToken;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bonkarena", about = "Inspect and reconcile a bonkarena player ledger.")]
struct Args {
    /// Path to the YAML config file
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the persisted snapshot
    Status,
    /// Replace the cached totals with the server's
    Refresh {
        #[arg(long)]
        token: String,
    },
    /// Play one session and withdraw it
    Play {
        /// BONK earned during the session
        #[arg(long, default_value_t = 0.0)]
        earn: f64,
        /// Credits earned during the session
        #[arg(long, default_value_t = 0.0)]
        credits: f64,
        /// Minigame success ratio in [0, 1]
        #[arg(long, default_value_t = 1.0)]
        ratio: f64,
        #[arg(long)]
        token: String,
    },
    /// Push the cached token total to the server as-is
    Publish {
        #[arg(long)]
        token: String,
    },
    /// Push the credits balance to the server
    PushCredits {
        #[arg(long)]
        token: String,
    },
}

fn print(value: &impl Serialize) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("could not encode output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config).context("could not load config")?;

    // Configure telemetry
    let level = config.log_level()?;
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let storage = FileStorage::open(&config.storage_directory)
        .context("could not open storage directory")?;
    let client = Client::new(&config.server_url).context("invalid server url")?;
    let engine = Engine::new(config, Arc::new(storage), Arc::new(client));
    info!(command = ?args.command, "running");

    match args.command {
        Command::Status => print(&engine.snapshot()),
        Command::Refresh { token } => {
            let totals = engine
                .refresh(&AuthToken::new(token))
                .await
                .context("could not refresh totals")?;
            print(&totals)
        }
        Command::Play {
            earn,
            credits,
            ratio,
            token,
        } => {
            engine.start_session()?;
            engine.earn(earn)?;
            engine.earn_credits(credits)?;
            let withdrawal = engine.withdraw(ratio, &AuthToken::new(token)).await?;
            print(&withdrawal)
        }
        Command::Publish { token } => {
            let outcome = engine.publish(&AuthToken::new(token)).await;
            print(&outcome)
        }
        Command::PushCredits { token } => {
            let receipt = engine
                .push_credits(&AuthToken::new(token))
                .await
                .context("could not push credits")?;
            print(&receipt)
        }
    }
}
