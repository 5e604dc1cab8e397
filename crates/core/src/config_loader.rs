use crate::config::AppConfig;
use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging the default TOML file (when present),
    /// `KEEPER_`-prefixed environment variables, and an optional JSON
    /// overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed.
    pub fn load() -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file("config/keeper.toml"))
            .merge(Env::prefixed("KEEPER_"))
            .join(Json::file("config/keeper.json"))
            .extract()?;

        Ok(config)
    }

    /// Loads configuration from an explicit TOML path. Unlike [`load`],
    /// a missing file is an error here: an operator naming a config file
    /// expects it to be used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    ///
    /// [`load`]: ConfigLoader::load
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        let config: AppConfig = Figment::new()
            .merge(Toml::file_exact(path))
            .merge(Env::prefixed("KEEPER_"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
default_mode = "gamble"

[entry]
cooldown_minutes = 45

[exits]
poll_interval_seconds = 5

[modes.gamble]
stop_at = 0.5
trailing_stop = 0.3
"#
        )
        .unwrap();

        let config = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(config.modes.default_mode, "gamble");
        assert_eq!(config.entry.cooldown_minutes, 45);
        assert_eq!(config.exits.poll_interval_seconds, 5);
        assert_eq!(config.modes.get("gamble").unwrap().stop_at, Some(0.5));
    }

    #[test]
    fn test_load_from_missing_file_is_fatal() {
        let result = ConfigLoader::load_from("/nonexistent/keeper.toml");
        assert!(result.is_err());
    }
}
