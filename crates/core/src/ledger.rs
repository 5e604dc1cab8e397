use crate::asset::Chain;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Broker responses are truncated to this many characters before they are
/// written to the ledger.
pub const MAX_RESPONSE_CHARS: usize = 200;

/// Ledger action. Partial sells carry the sold percentage in the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    SellPct(u8),
    SellAll,
    ReconciledClose,
}

impl TradeAction {
    /// Wire spelling used in ledger rows (`BUY`, `SELL_30PCT`, `SELL_ALL`,
    /// `RECONCILED_CLOSE`).
    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::Buy => "BUY".to_string(),
            Self::SellPct(pct) => format!("SELL_{pct}PCT"),
            Self::SellAll => "SELL_ALL".to_string(),
            Self::ReconciledClose => "RECONCILED_CLOSE".to_string(),
        }
    }

    fn parse(label: &str) -> Option<Self> {
        match label {
            "BUY" => Some(Self::Buy),
            "SELL_ALL" => Some(Self::SellAll),
            "RECONCILED_CLOSE" => Some(Self::ReconciledClose),
            other => other
                .strip_prefix("SELL_")
                .and_then(|rest| rest.strip_suffix("PCT"))
                .and_then(|pct| pct.parse().ok())
                .map(Self::SellPct),
        }
    }
}

impl Serialize for TradeAction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for TradeAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Self::parse(&label).ok_or_else(|| D::Error::custom(format!("unknown trade action `{label}`")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Completed,
    Failed,
}

/// One append-only trade log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub ts: DateTime<Utc>,
    pub token: String,
    pub ca: String,
    pub chain: Chain,
    pub action: TradeAction,
    /// USD amount as an exact decimal, serialized as a string.
    pub amount: Decimal,
    pub mode: String,
    /// Signal score; recorded on entries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    pub reason: String,
    pub status: ActionStatus,
    /// Extracted transaction reference, empty when none was found.
    #[serde(default)]
    pub tx: String,
    /// Truncated broker response.
    #[serde(default)]
    pub response: String,
}

impl LedgerRecord {
    /// Builds a row stamped now, truncating the broker response.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token: impl Into<String>,
        ca: impl Into<String>,
        chain: Chain,
        action: TradeAction,
        amount: Decimal,
        mode: impl Into<String>,
        reason: impl Into<String>,
        status: ActionStatus,
        tx: impl Into<String>,
        response: &str,
    ) -> Self {
        Self {
            ts: Utc::now(),
            token: token.into(),
            ca: ca.into(),
            chain,
            action,
            amount,
            mode: mode.into(),
            score: None,
            reason: reason.into(),
            status,
            tx: tx.into(),
            response: response.chars().take(MAX_RESPONSE_CHARS).collect(),
        }
    }

    #[must_use]
    pub fn with_score(mut self, score: u8) -> Self {
        self.score = Some(score);
        self
    }
}
