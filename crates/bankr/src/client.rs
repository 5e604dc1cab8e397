//! Bankr subprocess execution.

use crate::instruction::{is_sell, render_prompt};
use crate::response::extract_reply;
use async_trait::async_trait;
use keeper_core::{BrokerConfig, OrderBroker, OrderInstruction, OrderOutcome};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info};

/// Executes orders by running the bankr CLI with a natural-language prompt
/// as its single argument.
///
/// Subprocess contract: exit code 0 with non-empty stdout is success, and
/// stdout is a JSON envelope whose `response` field carries the reply
/// text. Everything else is a failure whose text comes from stderr, then
/// stdout, then a placeholder. Failures never panic and never error; they
/// come back as unsuccessful outcomes carrying the reply text.
#[derive(Debug, Clone)]
pub struct BankrClient {
    script: PathBuf,
    timeout: Duration,
}

impl BankrClient {
    #[must_use]
    pub fn new(script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            script: script.into(),
            timeout,
        }
    }

    /// Builds a client from the app-level broker settings.
    #[must_use]
    pub fn from_settings(settings: &BrokerConfig) -> Self {
        Self::new(&settings.script, Duration::from_secs(settings.timeout_secs))
    }

    #[must_use]
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Runs one prompt through the bankr CLI.
    ///
    /// Every run sets `BANKR_ALLOW_TRADE=1`; sells additionally set
    /// `BANKR_ALLOW_SELL=1` for the CLI's legacy sell guard.
    async fn run(&self, prompt: &str, sell: bool) -> OrderOutcome {
        info!("Executing bankr: {prompt}");

        let mut command = Command::new(&self.script);
        command.arg(prompt);
        command.env("BANKR_ALLOW_TRADE", "1");
        if sell {
            command.env("BANKR_ALLOW_SELL", "1");
        }
        command.kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                let text = format!("bankr.sh not found at {}", self.script.display());
                error!("{text}");
                return OrderOutcome::failed(text);
            }
            Ok(Err(err)) => {
                error!(%err, "bankr spawn failed");
                return OrderOutcome::failed(err.to_string());
            }
            Err(_) => {
                error!(timeout_secs = self.timeout.as_secs(), "bankr timed out");
                return OrderOutcome::failed("bankr.sh timed out");
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() && !stdout.is_empty() {
            return OrderOutcome::ok(extract_reply(&stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let text = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            "bankr failed with no output".to_string()
        };
        OrderOutcome::failed(text)
    }
}

#[async_trait]
impl OrderBroker for BankrClient {
    async fn submit(&self, instruction: &OrderInstruction) -> OrderOutcome {
        self.run(&render_prompt(instruction), is_sell(instruction))
            .await
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use keeper_core::{AssetId, Chain};
    use rust_decimal_macros::dec;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("bankr.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn buy() -> OrderInstruction {
        OrderInstruction::Buy {
            asset: AssetId::new("0xabc123", Some(Chain::Base)),
            usd: dec!(100),
        }
    }

    fn sell_all() -> OrderInstruction {
        OrderInstruction::SellAll {
            asset: AssetId::new("0xabc123", Some(Chain::Base)),
        }
    }

    #[tokio::test]
    async fn test_success_unwraps_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), r#"echo '{"response": "Bought $100 of PEPE"}'"#);

        let outcome = BankrClient::new(script, Duration::from_secs(5))
            .submit(&buy())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.response, "Bought $100 of PEPE");
    }

    #[tokio::test]
    async fn test_prompt_is_single_argument() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), r#"echo "$1""#);

        let outcome = BankrClient::new(script, Duration::from_secs(5))
            .submit(&buy())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.response, "buy 100 dollars of 0xabc123 on base");
    }

    #[tokio::test]
    async fn test_buy_sets_trade_flag_only() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            r#"echo "trade=$BANKR_ALLOW_TRADE sell=$BANKR_ALLOW_SELL""#,
        );

        let client = BankrClient::new(script, Duration::from_secs(5));
        let outcome = client.submit(&buy()).await;
        assert_eq!(outcome.response, "trade=1 sell=");

        let outcome = client.submit(&sell_all()).await;
        assert_eq!(outcome.response, "trade=1 sell=1");
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'insufficient balance' >&2\nexit 1");

        let outcome = BankrClient::new(script, Duration::from_secs(5))
            .submit(&buy())
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.response, "insufficient balance");
    }

    #[tokio::test]
    async fn test_empty_output_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "exit 0");

        let outcome = BankrClient::new(script, Duration::from_secs(5))
            .submit(&buy())
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.response, "bankr failed with no output");
    }

    #[tokio::test]
    async fn test_missing_script_failure() {
        let outcome = BankrClient::new("/nonexistent/bankr.sh", Duration::from_secs(5))
            .submit(&buy())
            .await;
        assert!(!outcome.success);
        assert!(outcome.response.contains("not found at /nonexistent/bankr.sh"));
    }

    #[tokio::test]
    async fn test_slow_script_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 5\necho done");

        let outcome = BankrClient::new(script, Duration::from_millis(100))
            .submit(&buy())
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.response, "bankr.sh timed out");
    }

    #[tokio::test]
    async fn test_plain_text_stdout_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'swap routed'");

        let outcome = BankrClient::new(script, Duration::from_secs(5))
            .submit(&buy())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.response, "swap routed");
    }
}
