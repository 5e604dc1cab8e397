use crate::error::StartupError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Exit rules for one mode.
///
/// Multiples are relative to entry market cap; trailing percentages are
/// fractional drawdowns from the peak water mark. Every field is optional,
/// so a bare `{}` entry behaves as a hold mode with no mechanical exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeParams {
    /// Hard floor as a multiple of entry (0.85 exits below -15%).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_at: Option<f64>,
    /// Partial-exit trigger as a multiple of entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    /// Fraction of the remaining stake sold when the take-profit fires.
    #[serde(default = "default_take_profit_size")]
    pub take_profit_size: f64,
    /// Wide trailing drawdown from peak (0.25 exits 25% off the top).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_stop: Option<f64>,
    /// Tighter trailing drawdown used while the peak multiple is still
    /// below `trailing_stop_tight_below`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_stop_tight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_stop_tight_below: Option<f64>,
}

const fn default_take_profit_size() -> f64 {
    0.3
}

impl Default for ModeParams {
    fn default() -> Self {
        Self {
            stop_at: None,
            take_profit: None,
            take_profit_size: default_take_profit_size(),
            trailing_stop: None,
            trailing_stop_tight: None,
            trailing_stop_tight_below: None,
        }
    }
}

impl ModeParams {
    /// One-line parameter summary for startup logs and buy notifications,
    /// e.g. `stop=0.7x tp=1.3x trail=25%`.
    #[must_use]
    pub fn summary(&self) -> String {
        let stop = self
            .stop_at
            .map_or_else(|| "none".to_string(), |v| format!("{v}x"));
        let tp = self
            .take_profit
            .map_or_else(|| "none".to_string(), |v| format!("{v}x"));
        let trail = self
            .trailing_stop
            .map_or_else(|| "none".to_string(), |v| format!("{:.0}%", v * 100.0));
        format!("stop={stop} tp={tp} trail={trail}")
    }
}

/// The mode rule table plus the fallback applied to unknown names.
///
/// Ships with four stock modes (snipe, swing, gamble, diamond); operators
/// can redefine them or add their own under `[modes.<name>]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTable {
    #[serde(default = "default_modes")]
    pub modes: BTreeMap<String, ModeParams>,
    #[serde(default = "default_mode_name")]
    pub default_mode: String,
}

impl Default for ModeTable {
    fn default() -> Self {
        Self {
            modes: default_modes(),
            default_mode: default_mode_name(),
        }
    }
}

impl ModeTable {
    /// Exit params for `name`. Unknown names warn and fall back to the
    /// default mode; a missing default degrades to a hold mode.
    #[must_use]
    pub fn resolve(&self, name: &str) -> ModeParams {
        if let Some(params) = self.modes.get(name) {
            return params.clone();
        }
        warn!(mode = %name, default = %self.default_mode, "unknown mode, using default");
        if let Some(params) = self.modes.get(&self.default_mode) {
            return params.clone();
        }
        warn!(default = %self.default_mode, "default mode missing from table, holding");
        ModeParams::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModeParams> {
        self.modes.get(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.modes.keys().map(String::as_str).collect()
    }

    /// Startup validation: the table must be non-empty and contain the
    /// default mode.
    ///
    /// # Errors
    ///
    /// Returns a `StartupError` describing the first violation found.
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.modes.is_empty() {
            return Err(StartupError::EmptyModeTable);
        }
        if !self.modes.contains_key(&self.default_mode) {
            return Err(StartupError::UnknownDefaultMode {
                mode: self.default_mode.clone(),
            });
        }
        Ok(())
    }
}

fn default_modes() -> BTreeMap<String, ModeParams> {
    BTreeMap::from([
        (
            "snipe".to_string(),
            ModeParams {
                stop_at: Some(0.85),
                take_profit: Some(1.15),
                trailing_stop: Some(0.10),
                ..ModeParams::default()
            },
        ),
        (
            "swing".to_string(),
            ModeParams {
                stop_at: Some(0.70),
                take_profit: Some(1.30),
                take_profit_size: 0.3,
                trailing_stop: Some(0.25),
                trailing_stop_tight: Some(0.15),
                trailing_stop_tight_below: Some(2.0),
            },
        ),
        (
            "gamble".to_string(),
            ModeParams {
                stop_at: Some(0.50),
                trailing_stop: Some(0.30),
                ..ModeParams::default()
            },
        ),
        // Diamond hands: hold until told otherwise.
        ("diamond".to_string(), ModeParams::default()),
    ])
}

fn default_mode_name() -> String {
    "swing".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_modes_present() {
        let table = ModeTable::default();
        assert_eq!(table.names(), vec!["diamond", "gamble", "snipe", "swing"]);
        assert_eq!(table.default_mode, "swing");

        let swing = table.get("swing").unwrap();
        assert_eq!(swing.stop_at, Some(0.70));
        assert_eq!(swing.take_profit, Some(1.30));
        assert_eq!(swing.trailing_stop_tight_below, Some(2.0));

        let diamond = table.get("diamond").unwrap();
        assert!(diamond.stop_at.is_none());
        assert!(diamond.take_profit.is_none());
        assert!(diamond.trailing_stop.is_none());
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let table = ModeTable::default();
        let params = table.resolve("nonexistent");
        assert_eq!(params, table.resolve("swing"));
    }

    #[test]
    fn test_resolve_degrades_to_hold_when_default_missing() {
        let table = ModeTable {
            modes: BTreeMap::new(),
            default_mode: "swing".to_string(),
        };
        let params = table.resolve("anything");
        assert_eq!(params, ModeParams::default());
    }

    #[test]
    fn test_validate_rejects_bad_tables() {
        let empty = ModeTable {
            modes: BTreeMap::new(),
            default_mode: "swing".to_string(),
        };
        assert!(matches!(
            empty.validate(),
            Err(StartupError::EmptyModeTable)
        ));

        let missing_default = ModeTable {
            modes: BTreeMap::from([("snipe".to_string(), ModeParams::default())]),
            default_mode: "swing".to_string(),
        };
        assert!(matches!(
            missing_default.validate(),
            Err(StartupError::UnknownDefaultMode { .. })
        ));

        assert!(ModeTable::default().validate().is_ok());
    }

    #[test]
    fn test_summary_format() {
        let table = ModeTable::default();
        assert_eq!(
            table.resolve("swing").summary(),
            "stop=0.7x tp=1.3x trail=25%"
        );
        assert_eq!(
            table.resolve("diamond").summary(),
            "stop=none tp=none trail=none"
        );
        assert_eq!(
            table.resolve("gamble").summary(),
            "stop=0.5x tp=none trail=30%"
        );
    }

    #[test]
    fn test_take_profit_size_defaults_in_serde() {
        let params: ModeParams =
            serde_json::from_str(r#"{"stop_at": 0.8, "take_profit": 1.2}"#).unwrap();
        assert_eq!(params.take_profit_size, 0.3);
    }
}
