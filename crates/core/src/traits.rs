use crate::asset::AssetId;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A live price and market-cap snapshot for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price_usd: f64,
    pub market_cap_usd: f64,
}

/// Market data source for entry pricing and the exit loop.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current quote, or `None` when the venue has no usable pair.
    ///
    /// Transport failures surface as errors. Callers treat both the same
    /// way: skip this cycle, try again on the next one.
    async fn quote(&self, asset: &AssetId) -> Result<Option<Quote>>;
}

/// One order for the execution client, in engine terms. Brokers render it
/// into their own wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderInstruction {
    Buy { asset: AssetId, usd: Decimal },
    SellPercent { asset: AssetId, percent: u8 },
    SellAll { asset: AssetId },
}

impl OrderInstruction {
    #[must_use]
    pub const fn asset(&self) -> &AssetId {
        match self {
            Self::Buy { asset, .. } | Self::SellPercent { asset, .. } | Self::SellAll { asset } => {
                asset
            }
        }
    }
}

/// Result of one broker submission.
///
/// Failures are data, not errors: the response text travels into ledger
/// rows and notifications either way, and the engines decide what to retry.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub success: bool,
    pub response: String,
}

impl OrderOutcome {
    #[must_use]
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
        }
    }

    #[must_use]
    pub fn failed(response: impl Into<String>) -> Self {
        Self {
            success: false,
            response: response.into(),
        }
    }
}

/// Natural-language order executor.
#[async_trait]
pub trait OrderBroker: Send + Sync {
    async fn submit(&self, instruction: &OrderInstruction) -> OrderOutcome;
}

/// Authoritative on-chain holdings reader.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Balance of `asset` held by the configured wallet for its chain.
    ///
    /// Solana balances come back UI-scaled; EVM balances are raw token
    /// units. Errors mean "could not check" and callers must skip rather
    /// than assume zero.
    async fn holdings(&self, asset: &AssetId) -> Result<f64>;
}

/// Notification severity, the script's first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Trade,
    Warning,
    Error,
}

impl NotifyLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Trade => "trade",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Notification category, the script's second argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Buy,
    Sell,
    Error,
    Info,
}

impl NotifyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

/// Human-alert channel.
///
/// Implementations must never fail the trading path: delivery problems are
/// logged and swallowed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, level: NotifyLevel, kind: NotifyKind, text: &str);
}
