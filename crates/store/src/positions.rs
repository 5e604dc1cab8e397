//! Atomic JSON persistence for the position book.

use anyhow::{Context, Result};
use keeper_core::PositionBook;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// File-backed position table.
///
/// The whole book is rewritten on every save. Writes go to a temp file in
/// the same directory and land with an atomic rename, so a reader never
/// observes a torn store.
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the book. A missing file is an empty book; an unreadable or
    /// unparseable file is an error, never silently empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<PositionBook> {
        if !self.path.exists() {
            return Ok(PositionBook::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read position store {}", self.path.display()))?;
        let book: PositionBook = serde_json::from_str(&raw)
            .with_context(|| format!("Position store {} is not valid JSON", self.path.display()))?;
        Ok(book)
    }

    /// Replaces the store file with `book` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the temp file
    /// cannot be written or renamed into place.
    pub fn save(&self, book: &PositionBook) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create store directory {}", dir.display()))?;

        let tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&tmp, book).context("Failed to serialize position book")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace position store {}", self.path.display()))?;
        debug!(path = %self.path.display(), positions = book.len(), "position store saved");
        Ok(())
    }

    /// Loads, applies `mutate`, and saves in one step.
    ///
    /// # Errors
    ///
    /// Propagates load and save failures.
    pub fn update(&self, mutate: impl FnOnce(&mut PositionBook)) -> Result<PositionBook> {
        let mut book = self.load()?;
        mutate(&mut book);
        self.save(&book)?;
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::{Chain, Position};
    use rust_decimal_macros::dec;

    fn sample_position() -> Position {
        Position::open(
            "PEPE",
            Chain::Base,
            0.0001,
            1_000_000.0,
            dec!(100),
            "swing",
            Some(8),
            None,
        )
    }

    #[test]
    fn missing_file_loads_empty_book() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));
        let book = store.load().unwrap();
        assert!(book.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));

        let mut book = PositionBook::new();
        book.insert("0xabc123".to_string(), sample_position());
        store.save(&book).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        let pos = loaded.get("0xabc123").unwrap();
        assert_eq!(pos.token, "PEPE");
        assert_eq!(pos.buy_amount_usd, dec!(100));
    }

    #[test]
    fn save_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("deep").join("positions.json");
        let store = PositionStore::new(&nested);
        store.save(&PositionBook::new()).unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn corrupt_store_is_an_error_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");
        fs::write(&path, "{not json").unwrap();
        let store = PositionStore::new(&path);
        assert!(store.load().is_err());
    }

    #[test]
    fn update_applies_mutation_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));

        store
            .update(|book| {
                book.insert("0xabc123".to_string(), sample_position());
            })
            .unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.has_open("0xabc123"));
    }

    #[test]
    fn save_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));

        let mut book = PositionBook::new();
        book.insert("0xabc123".to_string(), sample_position());
        store.save(&book).unwrap();
        store.save(&PositionBook::new()).unwrap();

        assert!(store.load().unwrap().is_empty());
    }
}
