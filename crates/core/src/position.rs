use crate::asset::Chain;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tracked position, keyed in the store by canonical asset address.
///
/// USD amounts are exact decimals; prices and market caps are floats
/// straight from the oracle. A record is never deleted on close, only
/// flagged, so the cooldown check can see recent history. Re-entry after
/// cooldown overwrites the closed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Human label (ticker or truncated address).
    pub token: String,
    pub chain: Chain,
    pub buy_ts: DateTime<Utc>,
    pub entry_mcap: f64,
    pub entry_price: f64,
    pub buy_amount_usd: Decimal,
    /// Book value still held, scaled down by partial exits.
    pub remaining_usd: Decimal,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    pub current_mcap: f64,
    pub current_price: f64,
    /// High-water mark; only ever moves up.
    pub peak_mcap: f64,
    #[serde(default)]
    pub first_exit_done: bool,
    #[serde(default)]
    pub closed: bool,
    /// Kept as text; the cooldown check parses it leniently so a malformed
    /// value never blocks re-entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_mcap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_multiple: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub est_pnl_usd: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Consecutive failed sell attempts; cleared on success.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub sell_retries: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde requires &T
fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Position {
    /// Opens a new record with current and peak seeded from the entry quote.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        token: impl Into<String>,
        chain: Chain,
        price: f64,
        mcap: f64,
        size_usd: Decimal,
        mode: impl Into<String>,
        score: Option<u8>,
        tx_hash: Option<String>,
    ) -> Self {
        Self {
            token: token.into(),
            chain,
            buy_ts: Utc::now(),
            entry_mcap: mcap,
            entry_price: price,
            buy_amount_usd: size_usd,
            remaining_usd: size_usd,
            mode: mode.into(),
            score,
            current_mcap: mcap,
            current_price: price,
            peak_mcap: mcap,
            first_exit_done: false,
            closed: false,
            close_ts: None,
            close_reason: None,
            close_mcap: None,
            close_multiple: None,
            est_pnl_usd: None,
            tx_hash,
            sell_retries: 0,
        }
    }

    /// Refreshes the live quote and advances the peak water mark.
    ///
    /// Returns true when any stored field changed.
    pub fn record_quote(&mut self, price: f64, mcap: f64) -> bool {
        let mut changed = self.current_price != price || self.current_mcap != mcap;
        self.current_price = price;
        self.current_mcap = mcap;
        if mcap > self.peak_mcap {
            self.peak_mcap = mcap;
            changed = true;
        }
        changed
    }

    /// Market-cap multiple versus entry; zero when the entry cap is unusable.
    #[must_use]
    pub fn multiple(&self) -> f64 {
        if self.entry_mcap > 0.0 {
            self.current_mcap / self.entry_mcap
        } else {
            0.0
        }
    }

    #[must_use]
    pub fn peak_multiple(&self) -> f64 {
        if self.entry_mcap > 0.0 {
            self.peak_mcap / self.entry_mcap
        } else {
            0.0
        }
    }

    /// Fractional drop from the peak water mark (0.25 = 25% below peak).
    #[must_use]
    pub fn drawdown_from_peak(&self) -> f64 {
        if self.peak_mcap > 0.0 {
            1.0 - self.current_mcap / self.peak_mcap
        } else {
            0.0
        }
    }

    /// Books a partial exit of `fraction` of the remaining stake and returns
    /// the booked proceeds of the sold slice.
    ///
    /// Remaining value stays at entry basis; the close-time estimate
    /// revalues the slice at the take-profit multiple.
    pub fn apply_partial_exit(&mut self, fraction: f64) -> Decimal {
        let before = self.remaining_usd;
        let sold = before * to_decimal(fraction);
        self.remaining_usd = (before - sold).round_dp(2);
        self.first_exit_done = true;
        self.sell_retries = 0;
        sold.round_dp(2)
    }

    /// Closes the position after a confirmed full exit and returns the
    /// estimated P&L.
    ///
    /// The sold-early slice is valued at the take-profit multiple when one
    /// fired, otherwise at entry basis.
    pub fn apply_close(
        &mut self,
        reason: impl Into<String>,
        mcap: f64,
        multiple: f64,
        tp_multiple: Option<f64>,
    ) -> Decimal {
        let remaining = self.remaining_usd;
        let sold_early = self.buy_amount_usd - remaining;
        let est_pnl = (remaining * to_decimal(multiple)
            + sold_early * to_decimal(tp_multiple.unwrap_or(1.0))
            - self.buy_amount_usd)
            .round_dp(2);

        self.closed = true;
        self.close_ts = Some(now_ts());
        self.close_reason = Some(reason.into());
        self.close_mcap = Some(mcap);
        self.close_multiple = Some(round3(multiple));
        self.est_pnl_usd = Some(est_pnl);
        self.remaining_usd = Decimal::ZERO;
        self.sell_retries = 0;
        est_pnl
    }

    /// Marks the record closed without a confirmed sell. Used by
    /// reconciliation when the wallet is already empty; no multiple or P&L
    /// is recorded because the exit price is unknown.
    pub fn force_close(&mut self, reason: impl Into<String>) {
        self.closed = true;
        self.close_ts = Some(now_ts());
        self.close_reason = Some(reason.into());
        self.remaining_usd = Decimal::ZERO;
    }

    pub fn bump_sell_retries(&mut self) -> u32 {
        self.sell_retries += 1;
        self.sell_retries
    }

    /// Minutes since the close timestamp, when it parses.
    #[must_use]
    pub fn minutes_since_close(&self, now: DateTime<Utc>) -> Option<f64> {
        let raw = self.close_ts.as_deref()?;
        let parsed = DateTime::parse_from_rfc3339(raw).ok()?;
        Some((now - parsed.with_timezone(&Utc)).num_seconds() as f64 / 60.0)
    }
}

fn now_ts() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or_default()
}

/// Position table keyed by canonical asset key.
///
/// Serialized transparently, so the store file stays a bare
/// address-to-record JSON object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionBook {
    positions: BTreeMap<String, Position>,
}

impl PositionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Position> {
        self.positions.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Position> {
        self.positions.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, position: Position) -> Option<Position> {
        self.positions.insert(key.into(), position)
    }

    /// True when an open (not closed) record exists for the key.
    #[must_use]
    pub fn has_open(&self, key: &str) -> bool {
        self.positions.get(key).is_some_and(|p| !p.closed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Position)> {
        self.positions.iter()
    }

    /// Open positions only.
    pub fn open_iter(&self) -> impl Iterator<Item = (&String, &Position)> {
        self.positions.iter().filter(|(_, p)| !p.closed)
    }

    /// Keys of open positions, cloned so callers can re-borrow mutably.
    #[must_use]
    pub fn open_keys(&self) -> Vec<String> {
        self.open_iter().map(|(k, _)| k.clone()).collect()
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn swing_position(size: Decimal) -> Position {
        Position::open(
            "TEST",
            Chain::Base,
            0.001,
            100_000.0,
            size,
            "swing",
            Some(8),
            Some("0xabc".to_string()),
        )
    }

    #[test]
    fn test_open_seeds_current_and_peak() {
        let pos = swing_position(dec!(200));
        assert_eq!(pos.current_mcap, 100_000.0);
        assert_eq!(pos.peak_mcap, 100_000.0);
        assert_eq!(pos.remaining_usd, dec!(200));
        assert!(!pos.closed);
        assert!(!pos.first_exit_done);
    }

    #[test]
    fn test_peak_only_moves_up() {
        let mut pos = swing_position(dec!(200));
        pos.record_quote(0.0011, 110_000.0);
        pos.record_quote(0.0009, 90_000.0);
        pos.record_quote(0.0013, 130_000.0);
        pos.record_quote(0.0008, 80_000.0);
        assert_eq!(pos.peak_mcap, 130_000.0);
        assert_eq!(pos.current_mcap, 80_000.0);
    }

    #[test]
    fn test_record_quote_reports_changes() {
        let mut pos = swing_position(dec!(200));
        assert!(pos.record_quote(0.0011, 110_000.0));
        assert!(!pos.record_quote(0.0011, 110_000.0));
    }

    #[test]
    fn test_multiple_guards_zero_entry() {
        let mut pos = swing_position(dec!(200));
        pos.entry_mcap = 0.0;
        assert_eq!(pos.multiple(), 0.0);
        assert_eq!(pos.peak_multiple(), 0.0);
    }

    #[test]
    fn test_partial_exit_scales_remaining() {
        let mut pos = swing_position(dec!(200));
        let sold = pos.apply_partial_exit(0.3);
        assert_eq!(sold, dec!(60.00));
        assert_eq!(pos.remaining_usd, dec!(140.00));
        assert!(pos.first_exit_done);

        let mut pos = swing_position(dec!(150));
        let sold = pos.apply_partial_exit(0.3);
        assert_eq!(sold, dec!(45.00));
        assert_eq!(pos.remaining_usd, dec!(105.00));
    }

    #[test]
    fn test_close_pnl_after_take_profit() {
        // $200 buy, 30% sold at 1.3x, rest exits at 0.9x: 126 + 78 - 200 = 4.
        let mut pos = swing_position(dec!(200));
        pos.apply_partial_exit(0.3);
        let pnl = pos.apply_close("HARD_STOP_0.90x", 90_000.0, 0.9, Some(1.3));
        assert_eq!(pnl, dec!(4.00));
        assert!(pos.closed);
        assert_eq!(pos.remaining_usd, Decimal::ZERO);
        assert_eq!(pos.close_multiple, Some(0.9));
    }

    #[test]
    fn test_close_pnl_after_take_profit_and_run() {
        // $150 buy, 30% sold at 1.3x, rest exits at 2.0x: 210 + 58.5 - 150.
        let mut pos = swing_position(dec!(150));
        pos.apply_partial_exit(0.3);
        let pnl = pos.apply_close("TRAILING_wide_25%_from_2.5x_peak", 200_000.0, 2.0, Some(1.3));
        assert_eq!(pnl, dec!(118.50));
    }

    #[test]
    fn test_close_pnl_without_take_profit() {
        let mut pos = swing_position(dec!(100));
        let pnl = pos.apply_close("TRAILING_flat_33%_from_3.0x_peak", 300_000.0, 3.0, None);
        assert_eq!(pnl, dec!(200.00));

        let mut pos = swing_position(dec!(100));
        let pnl = pos.apply_close("HARD_STOP_0.50x", 50_000.0, 0.5, None);
        assert_eq!(pnl, dec!(-50.00));
    }

    #[test]
    fn test_close_rounds_multiple_to_three_places() {
        let mut pos = swing_position(dec!(100));
        pos.apply_close("HARD_STOP_0.67x", 66_666.0, 0.666_66, None);
        assert_eq!(pos.close_multiple, Some(0.667));
    }

    #[test]
    fn test_force_close_records_no_multiple() {
        let mut pos = swing_position(dec!(200));
        pos.force_close("RECONCILED_EMPTY");
        assert!(pos.closed);
        assert_eq!(pos.remaining_usd, Decimal::ZERO);
        assert_eq!(pos.close_reason.as_deref(), Some("RECONCILED_EMPTY"));
        assert!(pos.close_mcap.is_none());
        assert!(pos.close_multiple.is_none());
        assert!(pos.est_pnl_usd.is_none());
    }

    #[test]
    fn test_sell_retries_cleared_on_success() {
        let mut pos = swing_position(dec!(200));
        assert_eq!(pos.bump_sell_retries(), 1);
        assert_eq!(pos.bump_sell_retries(), 2);
        pos.apply_partial_exit(0.3);
        assert_eq!(pos.sell_retries, 0);
    }

    #[test]
    fn test_minutes_since_close_parses_both_offsets() {
        let now = Utc::now();
        let mut pos = swing_position(dec!(200));

        pos.close_ts = Some((now - Duration::minutes(15)).to_rfc3339());
        let elapsed = pos.minutes_since_close(now).unwrap();
        assert!((elapsed - 15.0).abs() < 0.1);

        pos.close_ts = Some(
            (now - Duration::minutes(45))
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string(),
        );
        let elapsed = pos.minutes_since_close(now).unwrap();
        assert!((elapsed - 45.0).abs() < 0.1);

        pos.close_ts = Some("not-a-timestamp".to_string());
        assert!(pos.minutes_since_close(now).is_none());

        pos.close_ts = None;
        assert!(pos.minutes_since_close(now).is_none());
    }

    #[test]
    fn test_serde_omits_empty_fields() {
        let pos = swing_position(dec!(200));
        let json = serde_json::to_value(&pos).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("sell_retries"));
        assert!(!obj.contains_key("close_reason"));
        // Exact decimals serialize as strings.
        assert_eq!(obj["buy_amount_usd"], serde_json::json!("200"));
    }

    #[test]
    fn test_book_open_filtering() {
        let mut book = PositionBook::new();
        book.insert("0xaaa", swing_position(dec!(100)));
        let mut closed = swing_position(dec!(50));
        closed.force_close("RECONCILED_EMPTY");
        book.insert("0xbbb", closed);

        assert_eq!(book.len(), 2);
        assert_eq!(book.open_count(), 1);
        assert!(book.has_open("0xaaa"));
        assert!(!book.has_open("0xbbb"));
        assert!(!book.has_open("0xccc"));
        assert_eq!(book.open_keys(), vec!["0xaaa".to_string()]);
    }

    #[test]
    fn test_book_round_trips_as_bare_object() {
        let mut book = PositionBook::new();
        book.insert("0xaaa", swing_position(dec!(100)));
        let json = serde_json::to_string(&book).unwrap();
        assert!(json.starts_with("{\"0xaaa\""));
        let back: PositionBook = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.get("0xaaa").unwrap().buy_amount_usd, dec!(100));
    }
}
