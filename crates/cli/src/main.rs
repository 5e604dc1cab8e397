use clap::{Parser, Subcommand};
use keeper_core::fmt::preview;
use keeper_core::{AppConfig, BrokerMode, Chain, ConfigLoader, OrderBroker};
use keeper_engine::{EntryEngine, EntryRequest, ExitManager, ScriptNotifier};
use keeper_store::{EntryLockDir, InstanceLock, PositionStore, TradeLedger};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "keeper")]
#[command(about = "Automated position lifecycle keeper", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enter a position through the admission pipeline
    Enter {
        /// Contract address (EVM) or mint (Solana)
        ca: String,
        /// Signal score, 0-10; routes size and mode
        #[arg(short, long, default_value_t = 0)]
        score: u8,
        /// Chain override (solana, base, ethereum, polygon, unichain)
        #[arg(long)]
        chain: Option<Chain>,
        /// Mode override; defaults to score routing
        #[arg(short, long)]
        mode: Option<String>,
        /// Display name for notifications and the ledger
        #[arg(long)]
        token: Option<String>,
        /// Position size override in USD
        #[arg(long)]
        size: Option<Decimal>,
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run the exit manager daemon
    Run {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show stored positions
    Positions {
        /// Include closed positions
        #[arg(long)]
        all: bool,
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show the tail of the trade log
    Ledger {
        /// Number of rows to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl Commands {
    fn config_path(&self) -> Option<&Path> {
        match self {
            Self::Enter { config, .. }
            | Self::Run { config }
            | Self::Positions { config, .. }
            | Self::Ledger { config, .. } => config.as_deref(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.command.config_path() {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    init_logging(config.log_file.as_deref())?;
    config.validate()?;

    match cli.command {
        Commands::Enter {
            ca,
            score,
            chain,
            mode,
            token,
            size,
            ..
        } => {
            let mut request = EntryRequest::new(ca, score);
            request.chain = chain;
            request.mode = mode;
            request.token = token;
            request.size_usd = size;
            run_enter(&config, request).await?;
        }
        Commands::Run { .. } => {
            run_exit_manager(config).await?;
        }
        Commands::Positions { all, .. } => {
            run_positions(&config, all)?;
        }
        Commands::Ledger { limit, .. } => {
            run_ledger(&config, limit)?;
        }
    }

    Ok(())
}

/// Logs go to stderr so `enter` can keep stdout clean for its JSON
/// payload; a configured log file gets the stream appended instead.
fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn make_broker(config: &AppConfig) -> Arc<dyn OrderBroker> {
    match config.broker.mode {
        BrokerMode::Live => Arc::new(keeper_bankr::BankrClient::from_settings(&config.broker)),
        BrokerMode::Paper => {
            info!("paper broker active, no real orders will be placed");
            Arc::new(keeper_bankr::PaperBroker::new())
        }
    }
}

async fn run_enter(config: &AppConfig, request: EntryRequest) -> anyhow::Result<()> {
    let oracle = keeper_dexscreener::DexScreenerClient::new(
        keeper_dexscreener::DexScreenerConfig::from_settings(&config.oracle),
    )?;
    let engine = EntryEngine::new(
        PositionStore::new(&config.store.positions_file),
        TradeLedger::new(&config.store.trade_log),
        EntryLockDir::new(&config.store.lock_dir),
        Arc::new(oracle),
        make_broker(config),
        Arc::new(keeper_chain::RpcBalances::new(config.chains.clone())?),
        Arc::new(ScriptNotifier::from_settings(&config.notifications)),
        config.entry.clone(),
        config.modes.clone(),
    );

    match engine.enter(request).await {
        Ok(receipt) => {
            let payload = serde_json::json!({
                "success": true,
                "trade": &receipt,
                "mode_params": &receipt.mode_params,
            });
            println!("{payload}");
        }
        Err(rejection) => {
            error!("{rejection}");
            let payload = serde_json::json!({
                "success": false,
                "error": rejection.to_string(),
            });
            println!("{payload}");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn run_exit_manager(config: AppConfig) -> anyhow::Result<()> {
    // One daemon per store; a second instance exits immediately.
    let _instance = InstanceLock::acquire(&config.store.instance_lock)?;

    info!(
        positions = %config.store.positions_file.display(),
        poll_secs = config.exits.poll_interval_seconds,
        reconcile_cycles = config.exits.reconcile_every_cycles,
        broker = ?config.broker.mode,
        "keeper starting"
    );
    for name in config.modes.names() {
        info!(mode = name, params = %config.modes.resolve(name).summary(), "mode loaded");
    }
    if let Some(evm) = &config.chains.wallets.evm {
        info!(wallet = %preview(evm, 10), "evm wallet");
    }
    if let Some(solana) = &config.chains.wallets.solana {
        info!(wallet = %preview(solana, 10), "solana wallet");
    }

    let oracle = keeper_dexscreener::DexScreenerClient::new(
        keeper_dexscreener::DexScreenerConfig::from_settings(&config.oracle),
    )?;
    let manager = ExitManager::new(
        PositionStore::new(&config.store.positions_file),
        TradeLedger::new(&config.store.trade_log),
        Arc::new(oracle),
        make_broker(&config),
        Arc::new(keeper_chain::RpcBalances::new(config.chains.clone())?),
        Arc::new(ScriptNotifier::from_settings(&config.notifications)),
        config.modes.clone(),
        &config.entry.protected_assets,
        &config.exits,
    );

    manager.run(shutdown_channel()).await;
    Ok(())
}

/// Flips to true on SIGINT or SIGTERM; the manager finishes its cycle in
/// flight before stopping.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            error!(%err, "could not install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn run_positions(config: &AppConfig, all: bool) -> anyhow::Result<()> {
    let book = PositionStore::new(&config.store.positions_file).load()?;
    let shown = book
        .iter()
        .filter(|(_, p)| all || !p.closed)
        .collect::<Vec<_>>();
    if shown.is_empty() {
        println!("no positions");
        return Ok(());
    }

    println!(
        "{:<14} {:<10} {:<8} {:>8} {:>7} {:>7}  STATUS",
        "ADDRESS", "TOKEN", "MODE", "SIZE", "MULT", "PEAK"
    );
    for (key, pos) in shown {
        let status = if pos.closed {
            pos.close_reason.clone().unwrap_or_else(|| "closed".to_string())
        } else if pos.first_exit_done {
            "open (tp taken)".to_string()
        } else {
            "open".to_string()
        };
        println!(
            "{:<14} {:<10} {:<8} {:>8} {:>6.2}x {:>6.2}x  {status}",
            preview(key, 12),
            pos.token,
            pos.mode,
            format!("${}", pos.buy_amount_usd),
            pos.multiple(),
            pos.peak_multiple(),
        );
    }
    Ok(())
}

fn run_ledger(config: &AppConfig, limit: usize) -> anyhow::Result<()> {
    let rows = TradeLedger::new(&config.store.trade_log).read_tail(limit)?;
    if rows.is_empty() {
        println!("no trades recorded");
        return Ok(());
    }
    for row in rows {
        println!(
            "{} {:<16} {:<10} {:>8} {:<8} {:<9} {}",
            row.ts.format("%Y-%m-%d %H:%M:%S"),
            row.action.label(),
            row.token,
            format!("${}", row.amount),
            row.mode,
            format!("{:?}", row.status).to_lowercase(),
            row.reason,
        );
    }
    Ok(())
}
