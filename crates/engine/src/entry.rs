//! Entry admission.
//!
//! One call per proposed position. The per-asset lock is taken before any
//! check runs, so two concurrent entries for the same token can never both
//! reach the broker; everything after the lock is a straight-line pipeline
//! of guards that short-circuits on the first rejection. Nothing is
//! persisted unless the buy confirms.

use keeper_bankr::extract_tx_reference;
use keeper_core::fmt::{preview, usd};
use keeper_core::{
    ActionStatus, AssetId, BalanceSource, Chain, EntryConfig, LedgerRecord, ModeParams, ModeTable,
    Notifier, NotifyKind, NotifyLevel, OrderBroker, OrderInstruction, Position, PriceOracle, Quote,
    TradeAction,
};
use keeper_store::{EntryLockDir, LockError, PositionStore, TradeLedger};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// One proposed entry, as received from the CLI or a signal pipeline.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub address: String,
    /// Signal score, 0-10.
    pub score: u8,
    pub chain: Option<Chain>,
    pub mode: Option<String>,
    pub token: Option<String>,
    pub size_usd: Option<Decimal>,
}

impl EntryRequest {
    #[must_use]
    pub fn new(address: impl Into<String>, score: u8) -> Self {
        Self {
            address: address.into(),
            score,
            chain: None,
            mode: None,
            token: None,
            size_usd: None,
        }
    }
}

/// Confirmed entry, returned after the position is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct EntryReceipt {
    pub ca: String,
    pub token: String,
    pub chain: Chain,
    pub mode: String,
    pub score: u8,
    pub size_usd: Decimal,
    pub entry_price: f64,
    pub entry_mcap: f64,
    pub tx_hash: String,
    pub timestamp: String,
    /// Resolved exit parameters, reported separately from the trade block.
    #[serde(skip)]
    pub mode_params: ModeParams,
}

/// Admission rejections. Expected, synchronous, never retried by the
/// engine; the message is the operator-facing explanation.
#[derive(Debug, Error)]
pub enum EntryRejection {
    #[error("Entry already in progress for {asset} (locked by another process)")]
    Locked { asset: String },

    #[error("{0}")]
    TokenGate(String),

    #[error("Token {asset} is protected, cannot trade")]
    Protected { asset: String },

    #[error("Already in position for {asset}")]
    AlreadyOpen { asset: String },

    #[error("Cooldown active for {asset}: closed {elapsed_min}m ago, {remaining_min}m remaining")]
    Cooldown {
        asset: String,
        elapsed_min: u64,
        remaining_min: u64,
    },

    #[error("Could not fetch price/mcap for {asset} from DexScreener")]
    NoQuote { asset: String },

    #[error("Mcap ${mcap} exceeds ceiling ${ceiling}")]
    McapCeiling { mcap: String, ceiling: String },

    #[error("Unknown mode '{mode}'. Available: {available}")]
    UnknownMode { mode: String, available: String },

    #[error("Bankr buy failed: {response}")]
    ExecutionFailed { response: String },

    /// Infrastructure fault (store or ledger I/O), not an admission verdict.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The admission pipeline with its injected collaborators.
pub struct EntryEngine {
    store: PositionStore,
    ledger: TradeLedger,
    locks: EntryLockDir,
    oracle: Arc<dyn PriceOracle>,
    broker: Arc<dyn OrderBroker>,
    balances: Arc<dyn BalanceSource>,
    notifier: Arc<dyn Notifier>,
    entry: EntryConfig,
    modes: ModeTable,
}

impl EntryEngine {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: PositionStore,
        ledger: TradeLedger,
        locks: EntryLockDir,
        oracle: Arc<dyn PriceOracle>,
        broker: Arc<dyn OrderBroker>,
        balances: Arc<dyn BalanceSource>,
        notifier: Arc<dyn Notifier>,
        entry: EntryConfig,
        modes: ModeTable,
    ) -> Self {
        Self {
            store,
            ledger,
            locks,
            oracle,
            broker,
            balances,
            notifier,
            entry,
            modes,
        }
    }

    /// Runs one admission. Acquires the per-asset entry lock first; the
    /// lock is released on every path out of this function.
    ///
    /// # Errors
    ///
    /// Returns an [`EntryRejection`] naming the failed check, or
    /// `EntryRejection::Internal` for store/ledger faults.
    pub async fn enter(&self, request: EntryRequest) -> Result<EntryReceipt, EntryRejection> {
        let asset = AssetId::new(request.address.trim(), request.chain);
        let key = asset.canonical_key();
        let token = request
            .token
            .clone()
            .unwrap_or_else(|| preview(&asset.address, 12));

        let _lock = self
            .locks
            .try_acquire(&key)
            .map_err(|err| match err {
                LockError::Busy { .. } => EntryRejection::Locked {
                    asset: asset.address.clone(),
                },
                LockError::Io { .. } => EntryRejection::Internal(err.into()),
            })?;
        info!(asset = %preview(&asset.address, 12), "acquired entry lock");

        self.check_token_gate().await?;
        self.check_protected(&asset)?;

        let book = self.store.load().map_err(EntryRejection::Internal)?;
        if book.has_open(&key) {
            return Err(EntryRejection::AlreadyOpen {
                asset: asset.address,
            });
        }
        self.check_cooldown(&asset, book.get(&key))?;

        let quote = self.fetch_quote(&asset).await?;
        self.check_ceiling(&quote)?;

        let mode = self.resolve_mode(&request)?;
        let size_usd = self.resolve_size(&request);
        let params = self.modes.resolve(&mode);

        info!(
            token,
            %mode,
            size = %size_usd,
            score = request.score,
            chain = %asset.chain,
            mcap = %usd(quote.market_cap_usd),
            "entering position"
        );

        let outcome = self
            .broker
            .submit(&OrderInstruction::Buy {
                asset: asset.clone(),
                usd: size_usd,
            })
            .await;

        if !outcome.success {
            error!(token, response = %outcome.response, "buy failed");
            self.ledger
                .append(
                    &LedgerRecord::new(
                        &token,
                        &asset.address,
                        asset.chain,
                        TradeAction::Buy,
                        size_usd,
                        &mode,
                        "ENTRY",
                        ActionStatus::Failed,
                        "",
                        &outcome.response,
                    )
                    .with_score(request.score),
                )
                .map_err(EntryRejection::Internal)?;
            self.notifier
                .send(
                    NotifyLevel::Error,
                    NotifyKind::Buy,
                    &format!("BUY FAILED for {token}: {}", outcome.response),
                )
                .await;
            return Err(EntryRejection::ExecutionFailed {
                response: outcome.response,
            });
        }

        let tx_hash = extract_tx_reference(&outcome.response, asset.chain);
        let position = Position::open(
            &token,
            asset.chain,
            quote.price_usd,
            quote.market_cap_usd,
            size_usd,
            &mode,
            Some(request.score),
            (!tx_hash.is_empty()).then(|| tx_hash.clone()),
        );
        let timestamp = position.buy_ts.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        self.store
            .update(|book| {
                book.insert(&key, position);
            })
            .map_err(EntryRejection::Internal)?;
        info!(token, "position written");

        self.ledger
            .append(
                &LedgerRecord::new(
                    &token,
                    &asset.address,
                    asset.chain,
                    TradeAction::Buy,
                    size_usd,
                    &mode,
                    "ENTRY",
                    ActionStatus::Completed,
                    &tx_hash,
                    &outcome.response,
                )
                .with_score(request.score),
            )
            .map_err(EntryRejection::Internal)?;

        self.notifier
            .send(
                NotifyLevel::Trade,
                NotifyKind::Buy,
                &format!(
                    "BUY {token} | ${size_usd:.2} | mode={mode} | score={} | mcap=${} | chain={} | {}",
                    request.score,
                    usd(quote.market_cap_usd),
                    asset.chain,
                    params.summary(),
                ),
            )
            .await;

        Ok(EntryReceipt {
            ca: asset.address,
            token,
            chain: asset.chain,
            mode,
            score: request.score,
            size_usd,
            entry_price: quote.price_usd,
            entry_mcap: quote.market_cap_usd,
            tx_hash,
            timestamp,
            mode_params: params,
        })
    }

    /// Membership gate: the wallet must hold the configured minimum of the
    /// gate token. Uncheckable balances reject, never pass.
    async fn check_token_gate(&self) -> Result<(), EntryRejection> {
        let gate = &self.entry.token_gate;
        if !gate.enabled || gate.min_balance <= 0.0 {
            return Ok(());
        }
        let Some(gate_token) = &gate.token else {
            return Ok(());
        };

        let gate_asset = AssetId::new(gate_token.clone(), Some(gate.chain));
        let balance = match self.balances.holdings(&gate_asset).await {
            Ok(raw) if gate.chain.is_evm() => raw / 10f64.powi(gate.decimals as i32),
            Ok(ui) => ui,
            Err(err) => {
                warn!(%err, "token gate check failed");
                return Err(EntryRejection::TokenGate(format!(
                    "Token gate check failed: {err}"
                )));
            }
        };

        if balance >= gate.min_balance {
            info!(
                balance = %usd(balance),
                symbol = %gate.symbol,
                min = %usd(gate.min_balance),
                "token gate passed"
            );
            Ok(())
        } else {
            let message = format!(
                "Token gate: wallet holds {} {}, need {}",
                usd(balance),
                gate.symbol,
                usd(gate.min_balance)
            );
            warn!("{message}");
            Err(EntryRejection::TokenGate(message))
        }
    }

    fn check_protected(&self, asset: &AssetId) -> Result<(), EntryRejection> {
        let needle = asset.address.to_lowercase();
        if self
            .entry
            .protected_assets
            .iter()
            .any(|p| p.to_lowercase() == needle)
        {
            return Err(EntryRejection::Protected {
                asset: asset.address.clone(),
            });
        }
        Ok(())
    }

    /// Re-entry cooldown on a previously-closed record. A close timestamp
    /// that fails to parse never blocks re-entry.
    fn check_cooldown(
        &self,
        asset: &AssetId,
        previous: Option<&Position>,
    ) -> Result<(), EntryRejection> {
        if self.entry.cooldown_minutes == 0 {
            return Ok(());
        }
        let Some(previous) = previous.filter(|p| p.closed) else {
            return Ok(());
        };
        let Some(elapsed) = previous.minutes_since_close(chrono::Utc::now()) else {
            return Ok(());
        };
        let cooldown = f64::from(self.entry.cooldown_minutes);
        if elapsed < cooldown {
            return Err(EntryRejection::Cooldown {
                asset: asset.address.clone(),
                elapsed_min: elapsed as u64,
                remaining_min: (cooldown - elapsed) as u64,
            });
        }
        Ok(())
    }

    async fn fetch_quote(&self, asset: &AssetId) -> Result<Quote, EntryRejection> {
        info!(asset = %preview(&asset.address, 12), "fetching price");
        match self.oracle.quote(asset).await {
            Ok(Some(quote)) => Ok(quote),
            Ok(None) => Err(EntryRejection::NoQuote {
                asset: asset.address.clone(),
            }),
            Err(err) => {
                warn!(%err, "quote lookup failed");
                Err(EntryRejection::NoQuote {
                    asset: asset.address.clone(),
                })
            }
        }
    }

    fn check_ceiling(&self, quote: &Quote) -> Result<(), EntryRejection> {
        let ceiling = self.entry.mcap_ceiling_usd;
        if ceiling > 0.0 && quote.market_cap_usd > ceiling {
            return Err(EntryRejection::McapCeiling {
                mcap: usd(quote.market_cap_usd),
                ceiling: usd(ceiling),
            });
        }
        Ok(())
    }

    /// Explicit mode wins and must exist; otherwise the score table routes,
    /// falling back to the default mode.
    fn resolve_mode(&self, request: &EntryRequest) -> Result<String, EntryRejection> {
        if let Some(explicit) = &request.mode {
            let name = explicit.to_lowercase();
            if self.modes.get(&name).is_none() {
                return Err(EntryRejection::UnknownMode {
                    mode: name,
                    available: self.modes.names().join(", "),
                });
            }
            return Ok(name);
        }
        Ok(self
            .entry
            .score_to_mode
            .resolve(request.score)
            .cloned()
            .unwrap_or_else(|| self.modes.default_mode.clone()))
    }

    /// Explicit positive size wins, then the score table, then the probe
    /// fallback; the result is clamped to the configured maximum.
    fn resolve_size(&self, request: &EntryRequest) -> Decimal {
        let mut size = match request.size_usd {
            Some(explicit) if explicit > Decimal::ZERO => {
                info!(size = %explicit, "size override");
                explicit
            }
            _ => self
                .entry
                .score_to_size
                .resolve(request.score)
                .copied()
                .unwrap_or(self.entry.fallback_size_usd),
        };
        if size > self.entry.max_position_size_usd {
            warn!(
                size = %size,
                max = %self.entry.max_position_size_usd,
                "size exceeds max, capping"
            );
            size = self.entry.max_position_size_usd;
        }
        size
    }
}
