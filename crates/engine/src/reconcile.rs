//! On-chain reconciliation.
//!
//! The store is a belief about what the wallet holds; the chain is the
//! fact. Positions the wallet no longer backs (manual sells, rugs,
//! transfers) are closed administratively so the exit loop stops pricing
//! ghosts.

use keeper_core::fmt::preview;
use keeper_core::{
    ActionStatus, AssetId, BalanceSource, LedgerRecord, Notifier, NotifyKind, NotifyLevel,
    TradeAction,
};
use keeper_store::{PositionStore, TradeLedger};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

const RECONCILE_REASON: &str = "RECONCILED_EMPTY";
const RECONCILE_RESPONSE: &str = "wallet empty - exit not initiated by keeper";

/// Audits open positions against on-chain balances and closes the ones
/// the wallet no longer holds.
pub struct Reconciler {
    store: PositionStore,
    ledger: TradeLedger,
    balances: Arc<dyn BalanceSource>,
    notifier: Arc<dyn Notifier>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        store: PositionStore,
        ledger: TradeLedger,
        balances: Arc<dyn BalanceSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            ledger,
            balances,
            notifier,
        }
    }

    /// One reconciliation sweep. Balance-read failures skip the position
    /// rather than close it; "could not check" never means "empty".
    ///
    /// # Errors
    ///
    /// Fails only on store or ledger I/O.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let mut book = self.store.load()?;
        let keys = book.open_keys();
        if keys.is_empty() {
            return Ok(());
        }

        let mut mismatches = Vec::new();
        for key in keys {
            let Some(position) = book.get(&key) else {
                continue;
            };
            let asset = AssetId::new(key.clone(), Some(position.chain));
            let balance = match self.balances.holdings(&asset).await {
                Ok(balance) => balance,
                Err(err) => {
                    warn!(token = position.token, %err, "balance check failed, skipping");
                    continue;
                }
            };
            if balance > 0.0 {
                continue;
            }

            let (token, chain, mode) = (position.token.clone(), position.chain, position.mode.clone());
            warn!(token, mode, "open position with empty wallet, closing");
            mismatches.push(format!(
                "{token} ({}...): open but wallet empty [mode={mode}]",
                preview(&key, 8)
            ));
            self.ledger.append(&LedgerRecord::new(
                &token,
                &key,
                chain,
                TradeAction::ReconciledClose,
                Decimal::ZERO,
                &mode,
                RECONCILE_REASON,
                ActionStatus::Completed,
                "",
                RECONCILE_RESPONSE,
            ))?;
            if let Some(position) = book.get_mut(&key) {
                position.force_close(RECONCILE_REASON);
            }
        }

        if mismatches.is_empty() {
            return Ok(());
        }
        self.store.save(&book)?;
        info!(closed = mismatches.len(), "reconciliation closed positions");
        self.notifier
            .send(
                NotifyLevel::Warning,
                NotifyKind::Info,
                &format!("Reconciled: {}", mismatches.join("; ")),
            )
            .await;
        Ok(())
    }
}
