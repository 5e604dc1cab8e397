pub mod asset;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod fmt;
pub mod ledger;
pub mod modes;
pub mod position;
pub mod thresholds;
pub mod traits;

pub use asset::{detect_chain, AssetId, Chain};
pub use config::{
    AppConfig, BrokerConfig, BrokerMode, ChainsConfig, EntryConfig, ExitLoopConfig, NotifyConfig,
    OracleConfig, StoreConfig, TokenGateConfig, WalletsConfig,
};
pub use config_loader::ConfigLoader;
pub use error::StartupError;
pub use ledger::{ActionStatus, LedgerRecord, TradeAction};
pub use modes::{ModeParams, ModeTable};
pub use position::{Position, PositionBook};
pub use thresholds::ScoreTable;
pub use traits::{
    BalanceSource, Notifier, NotifyKind, NotifyLevel, OrderBroker, OrderInstruction, OrderOutcome,
    PriceOracle, Quote,
};
