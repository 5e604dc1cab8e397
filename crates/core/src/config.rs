use crate::asset::Chain;
use crate::error::StartupError;
use crate::modes::ModeTable;
use crate::thresholds::ScoreTable;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level application configuration.
///
/// Loaded once at startup, validated, and passed down explicitly; nothing
/// reads configuration from globals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub chains: ChainsConfig,
    #[serde(default)]
    pub notifications: NotifyConfig,
    #[serde(default)]
    pub entry: EntryConfig,
    #[serde(default)]
    pub exits: ExitLoopConfig,
    /// Optional log file the subscriber appends to alongside stdout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(flatten)]
    pub modes: ModeTable,
}

impl AppConfig {
    /// Fatal startup validation: mode routing must never dead-end and the
    /// poll cadence must be usable.
    ///
    /// # Errors
    ///
    /// Returns the first `StartupError` found.
    pub fn validate(&self) -> Result<(), StartupError> {
        self.modes.validate()?;
        self.entry.score_to_size.validate("score_to_size")?;
        self.entry.score_to_mode.validate("score_to_mode")?;
        for mode in self.entry.score_to_mode.values() {
            if self.modes.get(mode).is_none() {
                return Err(StartupError::UnknownMappedMode { mode: mode.clone() });
            }
        }
        if self.exits.poll_interval_seconds == 0 {
            return Err(StartupError::InvalidPollInterval);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Position table path.
    #[serde(default = "default_positions_file")]
    pub positions_file: PathBuf,
    /// Append-only trade log path.
    #[serde(default = "default_trade_log")]
    pub trade_log: PathBuf,
    /// Directory for per-asset entry locks.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
    /// Single-instance lock for the exit manager.
    #[serde(default = "default_instance_lock")]
    pub instance_lock: PathBuf,
}

fn default_positions_file() -> PathBuf {
    PathBuf::from("data/positions.json")
}

fn default_trade_log() -> PathBuf {
    PathBuf::from("data/trade-log.jsonl")
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("data/locks")
}

fn default_instance_lock() -> PathBuf {
    PathBuf::from("/tmp/keeper.lock")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            positions_file: default_positions_file(),
            trade_log: default_trade_log(),
            lock_dir: default_lock_dir(),
            instance_lock: default_instance_lock(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_oracle_base_url")]
    pub base_url: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
    /// Extra attempts after the first request fails.
    #[serde(default = "default_oracle_retries")]
    pub max_retries: u32,
}

fn default_oracle_base_url() -> String {
    "https://api.dexscreener.com".to_string()
}

const fn default_requests_per_minute() -> u32 {
    40
}

const fn default_oracle_timeout() -> u64 {
    10
}

const fn default_oracle_retries() -> u32 {
    2
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_oracle_base_url(),
            requests_per_minute: default_requests_per_minute(),
            timeout_secs: default_oracle_timeout(),
            max_retries: default_oracle_retries(),
        }
    }
}

/// Broker execution mode. Paper mode fabricates fills with no side effects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    #[default]
    Live,
    Paper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Shell script invoked with one natural-language instruction argument.
    #[serde(default = "default_broker_script")]
    pub script: PathBuf,
    /// Subprocess deadline; the broker resolves orders slowly.
    #[serde(default = "default_broker_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub mode: BrokerMode,
}

fn default_broker_script() -> PathBuf {
    PathBuf::from("scripts/bankr.sh")
}

const fn default_broker_timeout() -> u64 {
    330
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            script: default_broker_script(),
            timeout_secs: default_broker_timeout(),
            mode: BrokerMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainsConfig {
    /// JSON-RPC endpoint per chain.
    #[serde(default = "default_rpc_urls")]
    pub rpc_urls: BTreeMap<Chain, String>,
    #[serde(default)]
    pub wallets: WalletsConfig,
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletsConfig {
    /// One EVM wallet address shared across all EVM chains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solana: Option<String>,
}

fn default_rpc_urls() -> BTreeMap<Chain, String> {
    BTreeMap::from([
        (Chain::Base, "https://mainnet.base.org".to_string()),
        (Chain::Ethereum, "https://eth.llamarpc.com".to_string()),
        (Chain::Polygon, "https://polygon-rpc.com".to_string()),
        (Chain::Unichain, "https://mainnet.unichain.org".to_string()),
        (
            Chain::Solana,
            "https://api.mainnet-beta.solana.com".to_string(),
        ),
    ])
}

const fn default_rpc_timeout() -> u64 {
    10
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            rpc_urls: default_rpc_urls(),
            wallets: WalletsConfig::default(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Script invoked as `script <level> <kind> <text>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_notify_timeout() -> u64 {
    15
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            script: None,
            timeout_secs: default_notify_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    /// Hard cap applied after score sizing and overrides.
    #[serde(default = "default_max_position_size")]
    pub max_position_size_usd: Decimal,
    /// Market-cap ceiling; 0 disables the check.
    #[serde(default)]
    pub mcap_ceiling_usd: f64,
    /// Re-entry cooldown after a close; 0 disables.
    #[serde(default)]
    pub cooldown_minutes: u32,
    /// Fallback size when the score table has no matching entry.
    #[serde(default = "default_fallback_size")]
    pub fallback_size_usd: Decimal,
    #[serde(default = "default_score_to_size")]
    pub score_to_size: ScoreTable<Decimal>,
    #[serde(default = "default_score_to_mode")]
    pub score_to_mode: ScoreTable<String>,
    /// Assets never traded or auto-sold (e.g. gate-token holdings).
    /// Compared case-insensitively against contract addresses.
    #[serde(default)]
    pub protected_assets: Vec<String>,
    #[serde(default)]
    pub token_gate: TokenGateConfig,
}

fn default_max_position_size() -> Decimal {
    Decimal::from(200)
}

fn default_fallback_size() -> Decimal {
    // $2.50 probe size for unscored signals.
    Decimal::new(250, 2)
}

fn default_score_to_size() -> ScoreTable<Decimal> {
    ScoreTable::new(vec![
        (0, Decimal::from(50)),
        (3, Decimal::from(100)),
        (5, Decimal::from(150)),
        (8, Decimal::from(200)),
    ])
}

fn default_score_to_mode() -> ScoreTable<String> {
    ScoreTable::new(vec![
        (0, "snipe".to_string()),
        (5, "snipe".to_string()),
        (8, "swing".to_string()),
    ])
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            max_position_size_usd: default_max_position_size(),
            mcap_ceiling_usd: 0.0,
            cooldown_minutes: 0,
            fallback_size_usd: default_fallback_size(),
            score_to_size: default_score_to_size(),
            score_to_mode: default_score_to_mode(),
            protected_assets: Vec::new(),
            token_gate: TokenGateConfig::default(),
        }
    }
}

/// Membership gate: entries require the wallet to hold a minimum balance of
/// one specific token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGateConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub min_balance: f64,
    #[serde(default = "default_gate_chain")]
    pub chain: Chain,
    /// Display symbol for gate messages.
    #[serde(default = "default_gate_symbol")]
    pub symbol: String,
    /// ERC-20 decimals used to scale raw balances on EVM chains.
    #[serde(default = "default_gate_decimals")]
    pub decimals: u32,
}

const fn default_gate_chain() -> Chain {
    Chain::Base
}

fn default_gate_symbol() -> String {
    "TOKEN".to_string()
}

const fn default_gate_decimals() -> u32 {
    18
}

impl Default for TokenGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            min_balance: 0.0,
            chain: default_gate_chain(),
            symbol: default_gate_symbol(),
            decimals: default_gate_decimals(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitLoopConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Reconciliation cadence in poll cycles.
    #[serde(default = "default_reconcile_cycles")]
    pub reconcile_every_cycles: u32,
    /// Cycles between per-position status lines when nothing triggers.
    #[serde(default = "default_status_cycles")]
    pub status_every_cycles: u32,
    /// Wait before the post-trade balance confirmation.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_seconds: u64,
}

const fn default_poll_interval() -> u64 {
    10
}

const fn default_reconcile_cycles() -> u32 {
    30
}

const fn default_status_cycles() -> u32 {
    30
}

const fn default_settle_delay() -> u64 {
    5
}

impl Default for ExitLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            reconcile_every_cycles: default_reconcile_cycles(),
            status_every_cycles: default_status_cycles(),
            settle_delay_seconds: default_settle_delay(),
        }
    }
}
