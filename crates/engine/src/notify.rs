//! Human-alert delivery.
//!
//! Every message is logged at the mapped tracing level first; the optional
//! script is a best-effort extra. A broken notification channel must never
//! stall or fail the trading path, so script errors are logged and dropped.

use async_trait::async_trait;
use keeper_core::{Notifier, NotifyConfig, NotifyKind, NotifyLevel};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Logs messages and optionally forwards them to a shell script invoked as
/// `script <level> <kind> <text>`.
#[derive(Debug, Clone)]
pub struct ScriptNotifier {
    enabled: bool,
    script: Option<PathBuf>,
    timeout: Duration,
}

impl ScriptNotifier {
    #[must_use]
    pub fn new(enabled: bool, script: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            enabled,
            script,
            timeout,
        }
    }

    /// Builds a notifier from the app-level notification settings.
    #[must_use]
    pub fn from_settings(settings: &NotifyConfig) -> Self {
        Self::new(
            settings.enabled,
            settings.script.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    async fn run_script(&self, level: NotifyLevel, kind: NotifyKind, text: &str) {
        let Some(script) = &self.script else {
            return;
        };
        let mut command = Command::new(script);
        command.arg(level.as_str()).arg(kind.as_str()).arg(text);
        command.kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(script = %script.display(), %err, "notification script failed"),
            Err(_) => warn!(script = %script.display(), "notification script timed out"),
        }
    }
}

#[async_trait]
impl Notifier for ScriptNotifier {
    async fn send(&self, level: NotifyLevel, kind: NotifyKind, text: &str) {
        if !self.enabled {
            return;
        }
        match level {
            NotifyLevel::Error => {
                error!("[NOTIFY:{}:{}] {text}", level.as_str(), kind.as_str());
            }
            NotifyLevel::Warning => {
                warn!("[NOTIFY:{}:{}] {text}", level.as_str(), kind.as_str());
            }
            NotifyLevel::Info | NotifyLevel::Trade => {
                info!("[NOTIFY:{}:{}] {text}", level.as_str(), kind.as_str());
            }
        }
        self.run_script(level, kind, text).await;
    }
}

/// Swallows every message. Used when notifications are disabled and as the
/// engine-test double.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _level: NotifyLevel, _kind: NotifyKind, _text: &str) {}
}
