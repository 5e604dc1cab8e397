use crate::error::StartupError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Score-indexed lookup table: the entry with the highest threshold at or
/// below the score wins.
///
/// Config files spell the keys as stringified integers, e.g.
/// `{"0": 50, "5": 150, "8": 200}`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScoreTable<T> {
    /// Sorted ascending by threshold.
    entries: Vec<(u8, T)>,
}

impl<T> ScoreTable<T> {
    /// Builds a table from unsorted threshold/value pairs.
    #[must_use]
    pub fn new(mut entries: Vec<(u8, T)>) -> Self {
        entries.sort_by_key(|(threshold, _)| *threshold);
        Self { entries }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value for the highest threshold at or below `score`.
    #[must_use]
    pub fn resolve(&self, score: u8) -> Option<&T> {
        let idx = self
            .entries
            .partition_point(|(threshold, _)| *threshold <= score);
        idx.checked_sub(1).map(|i| &self.entries[i].1)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, value)| value)
    }

    /// Startup validation: a floor entry at threshold 0 must exist so every
    /// score resolves to something.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::MissingZeroThreshold` naming the table.
    pub fn validate(&self, table_name: &str) -> Result<(), StartupError> {
        if self.entries.first().map(|(threshold, _)| *threshold) == Some(0) {
            Ok(())
        } else {
            Err(StartupError::MissingZeroThreshold {
                table: table_name.to_string(),
            })
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for ScoreTable<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, T>::deserialize(deserializer)?;
        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let threshold = key
                .trim()
                .parse::<u8>()
                .map_err(|_| D::Error::custom(format!("score threshold `{key}` is not an integer")))?;
            entries.push((threshold, value));
        }
        Ok(Self::new(entries))
    }
}

impl<T: Serialize> Serialize for ScoreTable<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.entries.iter().map(|(threshold, value)| (threshold.to_string(), value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_table() -> ScoreTable<f64> {
        ScoreTable::new(vec![(8, 200.0), (5, 150.0), (3, 100.0), (0, 50.0)])
    }

    #[test]
    fn test_floor_lookup() {
        let table = size_table();
        assert_eq!(table.resolve(10), Some(&200.0));
        assert_eq!(table.resolve(8), Some(&200.0));
        assert_eq!(table.resolve(7), Some(&150.0));
        assert_eq!(table.resolve(5), Some(&150.0));
        assert_eq!(table.resolve(4), Some(&100.0));
        assert_eq!(table.resolve(3), Some(&100.0));
        assert_eq!(table.resolve(1), Some(&50.0));
        assert_eq!(table.resolve(0), Some(&50.0));
    }

    #[test]
    fn test_no_floor_entry_misses_low_scores() {
        let table = ScoreTable::new(vec![(5, "snipe"), (8, "swing")]);
        assert_eq!(table.resolve(3), None);
        assert_eq!(table.resolve(6), Some(&"snipe"));
    }

    #[test]
    fn test_empty_table_resolves_nothing() {
        let table: ScoreTable<f64> = ScoreTable::default();
        assert_eq!(table.resolve(10), None);
    }

    #[test]
    fn test_deserializes_stringified_keys() {
        let table: ScoreTable<f64> =
            serde_json::from_str(r#"{"8": 200.0, "5": 150.0, "3": 100.0, "0": 50.0}"#).unwrap();
        assert_eq!(table, size_table());

        let modes: ScoreTable<String> =
            serde_json::from_str(r#"{"8": "swing", "5": "snipe", "0": "snipe"}"#).unwrap();
        assert_eq!(modes.resolve(3), Some(&"snipe".to_string()));
        assert_eq!(modes.resolve(9), Some(&"swing".to_string()));
    }

    #[test]
    fn test_rejects_non_integer_keys() {
        let result: Result<ScoreTable<f64>, _> = serde_json::from_str(r#"{"high": 200.0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serializes_back_to_string_keys() {
        let json = serde_json::to_string(&size_table()).unwrap();
        assert!(json.contains("\"0\":"));
        assert!(json.contains("\"8\":"));
    }

    #[test]
    fn test_validate_requires_zero_floor() {
        assert!(size_table().validate("score_to_size").is_ok());
        let gapped = ScoreTable::new(vec![(3, 100.0)]);
        assert!(matches!(
            gapped.validate("score_to_size"),
            Err(StartupError::MissingZeroThreshold { .. })
        ));
        let empty: ScoreTable<f64> = ScoreTable::default();
        assert!(empty.validate("score_to_size").is_err());
    }
}
