//! The [`BalanceSource`] implementation over public JSON-RPC endpoints.

use crate::error::{ChainError, Result};
use crate::{evm, solana};
use async_trait::async_trait;
use keeper_core::{AssetId, BalanceSource, Chain, ChainsConfig};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Reads wallet holdings straight from chain RPC nodes.
///
/// One EVM wallet serves every EVM chain; Solana has its own. A missing
/// wallet or endpoint is an error, so callers skip the check instead of
/// mistaking "not configured" for an empty wallet.
#[derive(Debug, Clone)]
pub struct RpcBalances {
    http: Client,
    config: ChainsConfig,
}

impl RpcBalances {
    /// Creates a balance reader over the configured endpoints.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: ChainsConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChainError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn rpc_url(&self, chain: Chain) -> Result<&str> {
        self.config
            .rpc_urls
            .get(&chain)
            .map(String::as_str)
            .ok_or(ChainError::MissingRpcUrl { chain })
    }

    /// Raw-unit ERC-20 balance of the configured EVM wallet.
    ///
    /// # Errors
    /// Propagates RPC failures; errors when no EVM wallet is configured.
    pub async fn evm_holdings(&self, chain: Chain, token: &str) -> Result<u128> {
        let wallet = self
            .config
            .wallets
            .evm
            .as_deref()
            .ok_or(ChainError::MissingWallet { chain })?;
        let url = self.rpc_url(chain)?;
        let raw = evm::erc20_balance(&self.http, url, token, wallet).await?;
        debug!(%chain, token, raw, "evm balance read");
        Ok(raw)
    }

    /// UI-scaled SPL balance of the configured Solana wallet.
    ///
    /// # Errors
    /// Propagates RPC failures; errors when no Solana wallet is configured.
    pub async fn solana_holdings(&self, mint: &str) -> Result<f64> {
        let wallet = self
            .config
            .wallets
            .solana
            .as_deref()
            .ok_or(ChainError::MissingWallet {
                chain: Chain::Solana,
            })?;
        let url = self.rpc_url(Chain::Solana)?;
        let total = solana::token_balance(&self.http, url, wallet, mint).await?;
        debug!(mint, total, "solana balance read");
        Ok(total)
    }
}

#[async_trait]
impl BalanceSource for RpcBalances {
    async fn holdings(&self, asset: &AssetId) -> anyhow::Result<f64> {
        if asset.chain == Chain::Solana {
            Ok(self.solana_holdings(&asset.address).await?)
        } else {
            let raw = self.evm_holdings(asset.chain, &asset.address).await?;
            Ok(raw as f64)
        }
    }
}
