mod commands;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use lastman_core::{
    ErrorClass, GameConfig, GameError, ManualOracle, ManualOracleState, RoundEngine,
    SettlementJournal, Storage,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ORACLE_STATE_KEY: &str = "manual_oracle";

#[derive(Parser)]
#[command(name = "lastman")]
#[command(about = "Last Man Standing - round and bonus engine")]
#[command(version)]
struct Cli {
    /// Data directory for game storage
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Act as if the current time were this RFC3339 timestamp
    #[arg(long, global = true)]
    at: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a game configuration to the data directory
    Init(commands::InitArgs),
    /// Show the active round
    Status,
    /// Show a round by id
    Round { round: u64 },
    /// List the bonus slots of a round
    Bonuses { round: u64 },
    /// List finalized rounds
    Summaries,
    /// Deposit into the active round
    Deposit {
        /// Depositor identity
        identity: String,
        /// Amount to deposit (defaults to the current quote)
        #[arg(short, long)]
        amount: Option<lastman_core::Amount>,
    },
    /// Finalize the active round if its timeout has passed
    CheckTimeout,
    /// Claim the prize of a finalized round
    Claim { identity: String, round: u64 },
    /// Pay a revealed bonus
    PayBonus { round: u64, deposit: u64 },
    /// Re-send the oracle request of a stuck bonus slot
    Redispatch { round: u64, deposit: u64 },
    /// Operator: cancel an unresolved bonus slot
    CancelSlot {
        operator: String,
        round: u64,
        deposit: u64,
        reason: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Operator: transfer funds released after the prize claim
    Sweep {
        operator: String,
        round: u64,
        to: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Inspect and answer the local oracle
    #[command(subcommand)]
    Oracle(commands::OracleCommands),
    /// List recorded oracle anomalies
    Anomalies,
    /// Show the administrative audit log
    Audit,
    /// List journaled settlement credits
    Payouts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "lastman={},lastman_core={}",
            log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Get data directory
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lastman")
    });
    tokio::fs::create_dir_all(&data_dir).await?;
    tracing::debug!("Using data directory {}", data_dir.display());

    let config_path = data_dir.join("config.json");
    if let Commands::Init(args) = cli.command {
        return commands::init(&config_path, args);
    }

    let config = if config_path.exists() {
        GameConfig::load(&config_path)?
    } else {
        GameConfig::default()
    };

    let storage = Arc::new(Storage::new(&data_dir.join("lastman.db")).await?);
    let oracle = Arc::new(load_oracle(&storage).await?);
    let journal = Arc::new(SettlementJournal::new(storage.clone()));
    let engine =
        RoundEngine::with_storage(config, journal.clone(), oracle.clone(), storage.clone()).await?;

    let now = cli.at.unwrap_or_else(Utc::now);
    let ctx = commands::Context {
        engine: &engine,
        oracle: &oracle,
        journal: &journal,
        now,
    };

    let result = match cli.command {
        Commands::Init(_) => Ok(()),
        Commands::Status => commands::show_status(&ctx).await,
        Commands::Round { round } => commands::show_round(&ctx, round).await,
        Commands::Bonuses { round } => commands::list_bonuses(&ctx, round).await,
        Commands::Summaries => commands::list_summaries(&ctx).await,
        Commands::Deposit { identity, amount } => {
            commands::deposit(&ctx, &identity, amount).await
        }
        Commands::CheckTimeout => commands::check_timeout(&ctx).await,
        Commands::Claim { identity, round } => commands::claim(&ctx, &identity, round).await,
        Commands::PayBonus { round, deposit } => commands::pay_bonus(&ctx, round, deposit).await,
        Commands::Redispatch { round, deposit } => {
            commands::redispatch(&ctx, round, deposit).await
        }
        Commands::CancelSlot {
            operator,
            round,
            deposit,
            reason,
            force,
        } => commands::cancel_slot(&ctx, &operator, round, deposit, &reason, force).await,
        Commands::Sweep {
            operator,
            round,
            to,
            force,
        } => commands::sweep(&ctx, &operator, round, &to, force).await,
        Commands::Oracle(cmd) => commands::handle_oracle_command(cmd, &ctx).await,
        Commands::Anomalies => commands::list_anomalies(&ctx),
        Commands::Audit => commands::show_audit(&ctx),
        Commands::Payouts => commands::list_payouts(&ctx).await,
    };

    // The oracle queue lives outside the engine tables
    save_oracle(&storage, &oracle).await?;

    if let Err(e) = result {
        report(&e);
        std::process::exit(1);
    }

    Ok(())
}

async fn load_oracle(storage: &Storage) -> anyhow::Result<ManualOracle> {
    let state = match storage.get_meta(ORACLE_STATE_KEY).await? {
        Some(json) => serde_json::from_str::<ManualOracleState>(&json)?,
        None => ManualOracleState::default(),
    };
    Ok(ManualOracle::restore(state))
}

async fn save_oracle(storage: &Storage, oracle: &ManualOracle) -> anyhow::Result<()> {
    let json = serde_json::to_string(&oracle.state())?;
    storage.put_meta(ORACLE_STATE_KEY, &json).await?;
    Ok(())
}

fn report(e: &GameError) {
    match e {
        GameError::WrongAmount { expected, got } => {
            eprintln!("Error: Wrong deposit amount");
            eprintln!("Expected: {}, Got: {}", expected, got);
        }
        GameError::TimeoutNotReached { remaining_secs, .. } => {
            eprintln!("Error: Round has not timed out yet");
            eprintln!("Time remaining: {}s", remaining_secs);
        }
        GameError::NothingToRedispatch(slot) => {
            eprintln!("Error: Slot {} is not waiting on a failed dispatch", slot);
            eprintln!("Use 'lastman bonuses {}' to see slot phases", slot.round_id);
        }
        _ => {
            eprintln!("Error: {}", e);
            if e.class() == ErrorClass::Infrastructure {
                eprintln!("This may be transient, retry the command");
            }
        }
    }
}
