//! Error types for chain RPC reads.

use keeper_core::Chain;
use thiserror::Error;

/// Errors that can occur when reading on-chain balances.
///
/// Every variant means "could not check". Callers skip the asset rather
/// than treat a failed read as a zero balance.
#[derive(Debug, Error)]
pub enum ChainError {
    /// No wallet is configured for the chain family.
    #[error("no wallet configured for {chain}")]
    MissingWallet {
        /// The chain whose wallet is missing.
        chain: Chain,
    },

    /// No RPC endpoint is configured for the chain.
    #[error("no RPC endpoint configured for {chain}")]
    MissingRpcUrl {
        /// The chain whose endpoint is missing.
        chain: Chain,
    },

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error: {message}")]
    Rpc {
        /// Error message from the node.
        message: String,
    },

    /// The node's balance payload could not be parsed.
    #[error("unparseable balance: {0}")]
    BadBalance(String),

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Result type alias for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;
