//! The exit decision loop.
//!
//! Decisions and execution are split: [`evaluate`] is a pure function from
//! a position and its mode parameters to an exit signal, and
//! [`ExitManager`] is the daemon that feeds it fresh quotes, executes the
//! signals through the broker, and keeps the store and ledger in step.

use crate::reconcile::Reconciler;
use keeper_core::fmt::usd;
use keeper_core::{
    ActionStatus, AssetId, BalanceSource, ExitLoopConfig, LedgerRecord, ModeParams, ModeTable,
    Notifier, NotifyKind, NotifyLevel, OrderBroker, OrderInstruction, Position, PositionBook,
    PriceOracle, TradeAction,
};
use keeper_store::{PositionStore, TradeLedger};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Escalating failure notifications: loud on the first attempts, quiet
/// after, loud again at the high-water mark.
const RETRY_NOTIFY_EARLY: u32 = 3;
const RETRY_NOTIFY_ESCALATE: u32 = 10;

/// What the rules say should happen to a position right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitSignal {
    /// Sell a fraction of the remaining stake; fires at most once.
    Partial { sell_pct: u8, reason: String },
    /// Sell everything and close the position.
    Full { reason: String },
}

/// Applies the mode's exit rules to the position's current state.
///
/// Rule order matches precedence: hard stop, then take-profit, then
/// trailing stop. After a partial exit the effective stop is raised to
/// breakeven so banked profit is protected. Trailing arms after the
/// take-profit, or for modes without one, once the position is above
/// entry. A mode with no rules configured never signals.
#[must_use]
pub fn evaluate(position: &Position, params: &ModeParams) -> Option<ExitSignal> {
    if position.entry_mcap <= 0.0 {
        return None;
    }
    let multiple = position.multiple();

    if let Some(stop_at) = params.stop_at {
        let effective_stop = if position.first_exit_done {
            stop_at.max(1.0)
        } else {
            stop_at
        };
        if multiple < effective_stop {
            return Some(ExitSignal::Full {
                reason: format!("HARD_STOP_{multiple:.2}x"),
            });
        }
    }

    if let Some(take_profit) = params.take_profit {
        if !position.first_exit_done && multiple >= take_profit {
            return Some(ExitSignal::Partial {
                sell_pct: (params.take_profit_size * 100.0).round() as u8,
                reason: format!("TP1_{multiple:.2}x"),
            });
        }
    }

    if let Some(trailing) = params.trailing_stop {
        let trailing_active =
            position.first_exit_done || (params.take_profit.is_none() && multiple >= 1.0);
        if trailing_active && position.peak_mcap > 0.0 {
            let (trail_pct, trail_label) =
                match (params.trailing_stop_tight, params.trailing_stop_tight_below) {
                    (Some(tight), Some(tight_below)) => {
                        if position.peak_multiple() >= tight_below {
                            (trailing, "wide")
                        } else {
                            (tight, "tight")
                        }
                    }
                    _ => (trailing, "flat"),
                };
            let drawdown = position.drawdown_from_peak();
            if drawdown >= trail_pct {
                return Some(ExitSignal::Full {
                    reason: format!(
                        "TRAILING_{trail_label}_{:.0}%_from_{:.1}x_peak",
                        drawdown * 100.0,
                        position.peak_multiple()
                    ),
                });
            }
        }
    }

    None
}

/// The polling daemon: re-prices every open position on a fixed interval,
/// executes triggered exits, and runs reconciliation every Nth cycle.
pub struct ExitManager {
    store: PositionStore,
    ledger: TradeLedger,
    oracle: Arc<dyn PriceOracle>,
    broker: Arc<dyn OrderBroker>,
    balances: Arc<dyn BalanceSource>,
    notifier: Arc<dyn Notifier>,
    modes: ModeTable,
    /// Lowercased protected addresses, skipped before any oracle spend.
    protected: Vec<String>,
    poll_interval: Duration,
    reconcile_every_cycles: u32,
    status_every_cycles: u32,
    settle_delay: Duration,
    reconciler: Reconciler,
    status_counters: HashMap<String, u32>,
}

impl ExitManager {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: PositionStore,
        ledger: TradeLedger,
        oracle: Arc<dyn PriceOracle>,
        broker: Arc<dyn OrderBroker>,
        balances: Arc<dyn BalanceSource>,
        notifier: Arc<dyn Notifier>,
        modes: ModeTable,
        protected_assets: &[String],
        settings: &ExitLoopConfig,
    ) -> Self {
        let reconciler = Reconciler::new(
            store.clone(),
            ledger.clone(),
            balances.clone(),
            notifier.clone(),
        );
        Self {
            store,
            ledger,
            oracle,
            broker,
            balances,
            notifier,
            modes,
            protected: protected_assets.iter().map(|a| a.to_lowercase()).collect(),
            poll_interval: Duration::from_secs(settings.poll_interval_seconds),
            reconcile_every_cycles: settings.reconcile_every_cycles.max(1),
            status_every_cycles: settings.status_every_cycles.max(1),
            settle_delay: Duration::from_secs(settings.settle_delay_seconds),
            reconciler,
            status_counters: HashMap::new(),
        }
    }

    /// Runs until `shutdown` flips to true. A cycle in flight always
    /// finishes before the loop exits, so store mutations are never cut
    /// short by the signal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_secs = self.poll_interval.as_secs(),
            reconcile_cycles = self.reconcile_every_cycles,
            "exit manager starting"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    cycle += 1;
                    self.run_cycle(cycle).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("exit manager stopped");
    }

    /// One complete poll cycle: price checks plus, on the reconciliation
    /// cadence, the on-chain audit. Public so tests can drive the loop
    /// without the ticker.
    pub async fn run_cycle(&mut self, cycle: u64) {
        if let Err(err) = self.check_positions().await {
            error!(%err, "position check failed");
        }
        if cycle % u64::from(self.reconcile_every_cycles) == 0 {
            if let Err(err) = self.reconciler.reconcile().await {
                error!(%err, "reconciliation failed");
            }
        }
    }

    /// Re-prices every open, non-protected position and executes whatever
    /// the rules trigger. Quote-only changes are saved once at the end;
    /// executed exits save immediately.
    async fn check_positions(&mut self) -> anyhow::Result<()> {
        let mut book = self.store.load()?;
        let keys = book.open_keys();
        if keys.is_empty() {
            return Ok(());
        }

        let mut any_changes = false;
        for key in keys {
            if self.protected.contains(&key.to_lowercase()) {
                continue;
            }
            let Some(position) = book.get(&key) else {
                continue;
            };
            let token = position.token.clone();
            let asset = AssetId::new(key.clone(), Some(position.chain));
            let params = self.modes.resolve(&position.mode);

            let quote = match self.oracle.quote(&asset).await {
                Ok(Some(quote)) => quote,
                Ok(None) => {
                    warn!(token, "no price data, skipping");
                    continue;
                }
                Err(err) => {
                    warn!(token, %err, "quote failed, skipping");
                    continue;
                }
            };
            if position.entry_mcap <= 0.0 {
                warn!(token, "no entry mcap, skipping");
                continue;
            }

            let position = book
                .get_mut(&key)
                .ok_or_else(|| anyhow::anyhow!("position vanished mid-cycle: {key}"))?;
            position.record_quote(quote.price_usd, quote.market_cap_usd);
            any_changes = true;

            match evaluate(position, &params) {
                Some(ExitSignal::Partial { sell_pct, reason }) => {
                    self.execute_partial_exit(&mut book, &key, &params, sell_pct, &reason)
                        .await?;
                }
                Some(ExitSignal::Full { reason }) => {
                    self.execute_full_exit(&mut book, &key, &params, &reason)
                        .await?;
                }
                None => self.log_status(&key, &book),
            }
        }

        if any_changes {
            self.store.save(&book)?;
        }
        Ok(())
    }

    async fn execute_partial_exit(
        &self,
        book: &mut PositionBook,
        key: &str,
        params: &ModeParams,
        sell_pct: u8,
        reason: &str,
    ) -> anyhow::Result<()> {
        let (token, chain, mode, multiple, entry_mcap, mcap) = {
            let pos = book.get(key).ok_or_else(|| anyhow::anyhow!("missing {key}"))?;
            (
                pos.token.clone(),
                pos.chain,
                pos.mode.clone(),
                pos.multiple(),
                pos.entry_mcap,
                pos.current_mcap,
            )
        };
        let asset = AssetId::new(key.to_string(), Some(chain));

        info!(
            token,
            multiple = format!("{multiple:.2}"),
            sell_pct,
            mode,
            "take profit triggered"
        );
        self.notifier
            .send(
                NotifyLevel::Trade,
                NotifyKind::Sell,
                &format!("{token} hit {multiple:.1}x, selling {sell_pct}% [mode={mode}]"),
            )
            .await;

        let outcome = self
            .broker
            .submit(&OrderInstruction::SellPercent {
                asset: asset.clone(),
                percent: sell_pct,
            })
            .await;

        if outcome.success {
            let pos = book
                .get_mut(key)
                .ok_or_else(|| anyhow::anyhow!("missing {key}"))?;
            let sold = pos.apply_partial_exit(params.take_profit_size);
            let remaining = pos.remaining_usd;
            info!(
                token,
                sold = %sold,
                remaining = %remaining,
                "take profit executed"
            );
            self.notifier
                .send(
                    NotifyLevel::Trade,
                    NotifyKind::Sell,
                    &format!(
                        "Sold {sell_pct}% of {token} at {multiple:.1}x (Entry ${} -> ${}) [{mode}] | \
                         Sold ~${sold:.2}, remaining ~${remaining:.2}",
                        usd(entry_mcap),
                        usd(mcap),
                    ),
                )
                .await;
            self.ledger.append(&LedgerRecord::new(
                &token,
                key,
                chain,
                TradeAction::SellPct(sell_pct),
                sold,
                &mode,
                reason,
                ActionStatus::Completed,
                keeper_bankr::extract_tx_reference(&outcome.response, chain),
                &outcome.response,
            ))?;
            self.store.save(book)?;
            self.confirm_balance(&asset, &token, "partial sell").await;
        } else {
            self.record_sell_failure(book, key, &token, reason, &outcome.response, true)
                .await?;
        }
        Ok(())
    }

    async fn execute_full_exit(
        &self,
        book: &mut PositionBook,
        key: &str,
        params: &ModeParams,
        reason: &str,
    ) -> anyhow::Result<()> {
        let (token, chain, mode, multiple, entry_mcap, mcap, peak_mcap, peak_multiple) = {
            let pos = book.get(key).ok_or_else(|| anyhow::anyhow!("missing {key}"))?;
            (
                pos.token.clone(),
                pos.chain,
                pos.mode.clone(),
                pos.multiple(),
                pos.entry_mcap,
                pos.current_mcap,
                pos.peak_mcap,
                pos.peak_multiple(),
            )
        };
        let asset = AssetId::new(key.to_string(), Some(chain));

        self.notifier
            .send(
                NotifyLevel::Trade,
                NotifyKind::Sell,
                &format!("{token} {reason} at {multiple:.1}x, selling all [{mode}]"),
            )
            .await;

        let outcome = self
            .broker
            .submit(&OrderInstruction::SellAll {
                asset: asset.clone(),
            })
            .await;

        if outcome.success {
            let pos = book
                .get_mut(key)
                .ok_or_else(|| anyhow::anyhow!("missing {key}"))?;
            let remaining = pos.remaining_usd;
            let est_pnl = pos.apply_close(reason, mcap, multiple, params.take_profit);
            info!(
                token,
                reason,
                multiple = format!("{multiple:.2}"),
                est_pnl = %est_pnl,
                mode,
                "position closed"
            );
            let sign = if est_pnl >= Decimal::ZERO { "+" } else { "" };
            self.notifier
                .send(
                    NotifyLevel::Trade,
                    NotifyKind::Sell,
                    &format!(
                        "{token} closed at {multiple:.2}x ({reason}) [{mode}] | \
                         Entry ${} -> Peak ${} ({peak_multiple:.1}x) -> Exit ${} | \
                         P&L: {sign}${est_pnl:.2}",
                        usd(entry_mcap),
                        usd(peak_mcap),
                        usd(mcap),
                    ),
                )
                .await;
            self.ledger.append(&LedgerRecord::new(
                &token,
                key,
                chain,
                TradeAction::SellAll,
                remaining.round_dp(2),
                &mode,
                reason,
                ActionStatus::Completed,
                keeper_bankr::extract_tx_reference(&outcome.response, chain),
                &outcome.response,
            ))?;
            self.store.save(book)?;
            self.confirm_balance(&asset, &token, "full exit").await;
        } else {
            self.record_sell_failure(book, key, &token, reason, &outcome.response, false)
                .await?;
        }
        Ok(())
    }

    /// Failed sells are retried every cycle forever; the notification
    /// volume follows the escalation policy instead.
    async fn record_sell_failure(
        &self,
        book: &mut PositionBook,
        key: &str,
        token: &str,
        reason: &str,
        response: &str,
        partial: bool,
    ) -> anyhow::Result<()> {
        let pos = book
            .get_mut(key)
            .ok_or_else(|| anyhow::anyhow!("missing {key}"))?;
        let attempts = pos.bump_sell_retries();
        error!(token, reason, attempts, response, "sell failed");

        let message = if attempts <= RETRY_NOTIFY_EARLY {
            let what = if partial { "TP sell" } else { "exit" };
            Some(format!(
                "{token} {what} FAILED ({reason}, attempt {attempts}): {response}"
            ))
        } else if attempts == RETRY_NOTIFY_ESCALATE {
            let what = if partial { "TP sell" } else { "exit" };
            Some(format!(
                "{token} {what} FAILED {attempts} times, needs manual intervention: {response}"
            ))
        } else {
            None
        };
        if let Some(message) = message {
            self.notifier
                .send(NotifyLevel::Error, NotifyKind::Error, &message)
                .await;
        }
        self.store.save(book)?;
        Ok(())
    }

    /// Post-trade on-chain confirmation, log-only: the sell already
    /// succeeded from the broker's point of view; this is early warning
    /// for fills that did not land.
    async fn confirm_balance(&self, asset: &AssetId, token: &str, trade_type: &str) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        match self.balances.holdings(asset).await {
            Ok(balance) if balance == 0.0 => {
                info!(token, trade_type, "on-chain verified, zero balance");
            }
            Ok(balance) => {
                info!(token, trade_type, balance, "on-chain balance after trade");
            }
            Err(err) => warn!(token, %err, "could not verify on-chain balance"),
        }
    }

    /// Heartbeat for positions with no trigger this cycle, throttled per
    /// position so hold modes stay visible without flooding the log.
    fn log_status(&mut self, key: &str, book: &PositionBook) {
        let counter = self.status_counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        if *counter % self.status_every_cycles != 0 {
            return;
        }
        if let Some(pos) = book.get(key) {
            info!(
                token = pos.token,
                multiple = format!("{:.2}x", pos.multiple()),
                peak = format!("{:.2}x", pos.peak_multiple()),
                mcap = %usd(pos.current_mcap),
                first_exit = pos.first_exit_done,
                mode = pos.mode,
                "status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;
    use crate::testutil::{FailBroker, FixedBalances, FixedOracle, SequenceOracle};
    use keeper_bankr::PaperBroker;
    use keeper_core::Chain;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    const KEY: &str = "0xabc123";

    fn swing_params() -> ModeParams {
        ModeTable::default().resolve("swing")
    }

    fn open_position(size: Decimal) -> Position {
        Position::open(
            "TEST",
            Chain::Base,
            0.001,
            100_000.0,
            size,
            "swing",
            Some(8),
            None,
        )
    }

    fn at_mcap(mut pos: Position, mcap: f64) -> Position {
        pos.record_quote(pos.entry_price * mcap / pos.entry_mcap, mcap);
        pos
    }

    // ── evaluate: hard stop ──

    #[test]
    fn test_hard_stop_fires_below_threshold() {
        let pos = at_mcap(open_position(dec!(200)), 65_000.0);
        let signal = evaluate(&pos, &swing_params()).unwrap();
        assert_eq!(
            signal,
            ExitSignal::Full {
                reason: "HARD_STOP_0.65x".to_string()
            }
        );
    }

    #[test]
    fn test_hard_stop_holds_at_threshold() {
        let pos = at_mcap(open_position(dec!(200)), 70_000.0);
        assert_eq!(evaluate(&pos, &swing_params()), None);
    }

    #[test]
    fn test_hard_stop_moves_to_breakeven_after_take_profit() {
        // Stop is 0.70x; after a partial exit 0.95x must still stop out.
        let mut pos = at_mcap(open_position(dec!(200)), 130_000.0);
        pos.apply_partial_exit(0.3);
        let pos = at_mcap(pos, 95_000.0);

        let signal = evaluate(&pos, &swing_params()).unwrap();
        assert_eq!(
            signal,
            ExitSignal::Full {
                reason: "HARD_STOP_0.95x".to_string()
            }
        );
    }

    #[test]
    fn test_breakeven_stop_only_after_partial_exit() {
        let pos = at_mcap(open_position(dec!(200)), 95_000.0);
        assert_eq!(evaluate(&pos, &swing_params()), None);
    }

    // ── evaluate: take profit ──

    #[test]
    fn test_take_profit_fires_at_target() {
        let pos = at_mcap(open_position(dec!(200)), 130_000.0);
        let signal = evaluate(&pos, &swing_params()).unwrap();
        assert_eq!(
            signal,
            ExitSignal::Partial {
                sell_pct: 30,
                reason: "TP1_1.30x".to_string()
            }
        );
    }

    #[test]
    fn test_take_profit_fires_only_once() {
        let mut pos = at_mcap(open_position(dec!(200)), 130_000.0);
        pos.apply_partial_exit(0.3);
        // Still at the TP level, but first_exit_done suppresses a second one.
        assert_eq!(evaluate(&pos, &swing_params()), None);
    }

    // ── evaluate: trailing stop ──

    #[test]
    fn test_trailing_inactive_before_take_profit() {
        // Peak 1.9x, back to 1.2x: 37% drawdown but TP never fired.
        let pos = at_mcap(at_mcap(open_position(dec!(200)), 190_000.0), 120_000.0);
        let params = ModeParams {
            take_profit: Some(5.0), // far away, so TP does not trigger here
            ..swing_params()
        };
        assert_eq!(evaluate(&pos, &params), None);
    }

    #[test]
    fn test_trailing_tier_selection() {
        // Peak 1.8x < 2.0x threshold: tight 15% trail applies.
        let mut pos = at_mcap(open_position(dec!(200)), 180_000.0);
        pos.apply_partial_exit(0.3);
        let pos = at_mcap(pos, 150_000.0); // 16.7% drawdown
        let signal = evaluate(&pos, &swing_params()).unwrap();
        assert_eq!(
            signal,
            ExitSignal::Full {
                reason: "TRAILING_tight_17%_from_1.8x_peak".to_string()
            }
        );

        // Peak 2.5x >= 2.0x: wide 25% trail, so a 17% drawdown holds.
        let mut pos = at_mcap(open_position(dec!(200)), 250_000.0);
        pos.apply_partial_exit(0.3);
        let pos = at_mcap(pos, 207_000.0); // 17.2% drawdown
        assert_eq!(evaluate(&pos, &swing_params()), None);

        let pos = at_mcap(pos, 187_000.0); // 25.2% drawdown
        let signal = evaluate(&pos, &swing_params()).unwrap();
        assert!(matches!(
            signal,
            ExitSignal::Full { reason } if reason == "TRAILING_wide_25%_from_2.5x_peak"
        ));
    }

    #[test]
    fn test_flat_trail_without_tiers() {
        let params = ModeParams {
            stop_at: Some(0.5),
            trailing_stop: Some(0.30),
            ..ModeParams::default()
        };
        // No TP configured: trailing arms once above entry.
        let pos = at_mcap(at_mcap(open_position(dec!(100)), 200_000.0), 130_000.0);
        let signal = evaluate(&pos, &params).unwrap();
        assert_eq!(
            signal,
            ExitSignal::Full {
                reason: "TRAILING_flat_35%_from_2.0x_peak".to_string()
            }
        );
    }

    #[test]
    fn test_tp_less_mode_trailing_needs_breakeven() {
        let params = ModeParams {
            stop_at: Some(0.5),
            trailing_stop: Some(0.30),
            ..ModeParams::default()
        };
        // Peaked below entry, 33% off that peak: trailing must stay silent
        // under 1.0x, and 0.60x is still above the hard stop.
        let pos = at_mcap(at_mcap(open_position(dec!(100)), 90_000.0), 60_000.0);
        assert_eq!(evaluate(&pos, &params), None);
    }

    #[test]
    fn test_hold_mode_never_signals() {
        let params = ModeParams::default();
        for mcap in [10_000.0, 100_000.0, 1_000_000.0] {
            let pos = at_mcap(open_position(dec!(100)), mcap);
            assert_eq!(evaluate(&pos, &params), None);
        }
    }

    #[test]
    fn test_zero_entry_mcap_never_signals() {
        let mut pos = open_position(dec!(100));
        pos.entry_mcap = 0.0;
        assert_eq!(evaluate(&pos, &swing_params()), None);
    }

    // ── ExitManager end-to-end ──

    struct Harness {
        _dir: TempDir,
        store: PositionStore,
        ledger: TradeLedger,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        Harness {
            store: PositionStore::new(dir.path().join("positions.json")),
            ledger: TradeLedger::new(dir.path().join("trade-log.jsonl")),
            _dir: dir,
        }
    }

    fn manager(
        h: &Harness,
        oracle: Arc<dyn PriceOracle>,
        broker: Arc<dyn OrderBroker>,
        protected: &[String],
    ) -> ExitManager {
        let settings = ExitLoopConfig {
            poll_interval_seconds: 1,
            reconcile_every_cycles: 1000,
            status_every_cycles: 30,
            settle_delay_seconds: 0,
        };
        ExitManager::new(
            h.store.clone(),
            h.ledger.clone(),
            oracle,
            broker,
            Arc::new(FixedBalances(0.0)),
            Arc::new(NullNotifier),
            ModeTable::default(),
            protected,
            &settings,
        )
    }

    fn seed(h: &Harness, key: &str, position: Position) {
        let mut book = PositionBook::new();
        book.insert(key, position);
        h.store.save(&book).unwrap();
    }

    #[tokio::test]
    async fn test_cycle_updates_quote_and_peak() {
        let h = harness();
        seed(&h, KEY, open_position(dec!(200)));
        let mut mgr = manager(
            &h,
            Arc::new(FixedOracle::quote(0.0011, 110_000.0)),
            Arc::new(PaperBroker::new()),
            &[],
        );

        mgr.run_cycle(1).await;

        let book = h.store.load().unwrap();
        let pos = book.get(KEY).unwrap();
        assert_eq!(pos.current_mcap, 110_000.0);
        assert_eq!(pos.peak_mcap, 110_000.0);
        assert!(!pos.closed);
        assert!(h.ledger.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oracle_failure_skips_cycle_without_mutation() {
        let h = harness();
        seed(&h, KEY, open_position(dec!(200)));
        let mut mgr = manager(&h, Arc::new(FixedOracle::none()), Arc::new(FailBroker), &[]);

        mgr.run_cycle(1).await;

        let book = h.store.load().unwrap();
        let pos = book.get(KEY).unwrap();
        assert_eq!(pos.current_mcap, 100_000.0);
        assert!(!pos.closed);
    }

    #[tokio::test]
    async fn test_protected_position_is_never_touched() {
        let h = harness();
        seed(&h, KEY, open_position(dec!(200)));
        let mut mgr = manager(
            &h,
            Arc::new(FixedOracle::quote(0.0001, 10_000.0)), // deep stop territory
            Arc::new(PaperBroker::new()),
            &[KEY.to_uppercase()],
        );

        mgr.run_cycle(1).await;

        let pos = h.store.load().unwrap().get(KEY).cloned().unwrap();
        assert!(!pos.closed);
        assert_eq!(pos.current_mcap, 100_000.0); // not even re-priced
    }

    #[tokio::test]
    async fn test_hard_stop_closes_position() {
        let h = harness();
        seed(&h, KEY, open_position(dec!(200)));
        let broker = Arc::new(PaperBroker::new());
        let mut mgr = manager(
            &h,
            Arc::new(FixedOracle::quote(0.00065, 65_000.0)),
            broker.clone(),
            &[],
        );

        mgr.run_cycle(1).await;

        let pos = h.store.load().unwrap().get(KEY).cloned().unwrap();
        assert!(pos.closed);
        assert_eq!(pos.close_reason.as_deref(), Some("HARD_STOP_0.65x"));
        assert_eq!(pos.est_pnl_usd, Some(dec!(-70.00)));
        assert_eq!(pos.remaining_usd, Decimal::ZERO);

        let rows = h.ledger.read_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, TradeAction::SellAll);
        assert_eq!(rows[0].amount, dec!(200.00));
        assert_eq!(broker.submitted(), vec!["sell all of my 0xabc123 on base"]);
    }

    #[tokio::test]
    async fn test_failed_sell_keeps_position_open_and_counts() {
        let h = harness();
        seed(&h, KEY, open_position(dec!(200)));
        let mut mgr = manager(
            &h,
            Arc::new(FixedOracle::quote(0.00065, 65_000.0)),
            Arc::new(FailBroker),
            &[],
        );

        mgr.run_cycle(1).await;
        mgr.run_cycle(2).await;

        let pos = h.store.load().unwrap().get(KEY).cloned().unwrap();
        assert!(!pos.closed);
        assert_eq!(pos.sell_retries, 2);
        assert!(h.ledger.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_lifecycle_take_profit_then_trailing() {
        // Entry $200 at 100k, swing mode. 2.5x fires TP, peak at 300k,
        // 25% drawdown to 225k fires the wide trail.
        let h = harness();
        seed(&h, KEY, open_position(dec!(200)));
        let broker = Arc::new(PaperBroker::new());
        let oracle = Arc::new(SequenceOracle::new(vec![
            Some((0.0025, 250_000.0)),
            Some((0.003, 300_000.0)),
            Some((0.00225, 225_000.0)),
        ]));
        let mut mgr = manager(&h, oracle, broker.clone(), &[]);

        mgr.run_cycle(1).await; // take profit at 2.5x
        let pos = h.store.load().unwrap().get(KEY).cloned().unwrap();
        assert!(pos.first_exit_done);
        assert_eq!(pos.remaining_usd, dec!(140.00));
        assert!(!pos.closed);

        mgr.run_cycle(2).await; // new peak, no trigger
        let pos = h.store.load().unwrap().get(KEY).cloned().unwrap();
        assert_eq!(pos.peak_mcap, 300_000.0);
        assert!(!pos.closed);

        mgr.run_cycle(3).await; // trailing stop
        let pos = h.store.load().unwrap().get(KEY).cloned().unwrap();
        assert!(pos.closed);
        assert_eq!(
            pos.close_reason.as_deref(),
            Some("TRAILING_wide_25%_from_3.0x_peak")
        );
        assert_eq!(pos.close_multiple, Some(2.25));
        // 140 * 2.25 + 60 * 1.3 - 200 = 193
        assert_eq!(pos.est_pnl_usd, Some(dec!(193.00)));

        let rows = h.ledger.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, TradeAction::SellPct(30));
        assert_eq!(rows[0].amount, dec!(60.00));
        assert_eq!(rows[0].reason, "TP1_2.50x");
        assert_eq!(rows[1].action, TradeAction::SellAll);
        assert_eq!(rows[1].amount, dec!(140.00));

        assert_eq!(
            broker.submitted(),
            vec![
                "sell 30% of my 0xabc123 on base",
                "sell all of my 0xabc123 on base",
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_positions_are_ignored() {
        let h = harness();
        let mut pos = open_position(dec!(200));
        pos.apply_close("HARD_STOP_0.65x", 65_000.0, 0.65, None);
        seed(&h, KEY, pos);
        let broker = Arc::new(PaperBroker::new());
        let mut mgr = manager(
            &h,
            Arc::new(FixedOracle::quote(0.001, 100_000.0)),
            broker.clone(),
            &[],
        );

        mgr.run_cycle(1).await;
        assert!(broker.submitted().is_empty());
    }
}
