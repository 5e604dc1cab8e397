use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Chains the keeper can hold positions on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Solana,
    Base,
    Ethereum,
    Polygon,
    Unichain,
}

impl Chain {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Solana => "solana",
            Self::Base => "base",
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Unichain => "unichain",
        }
    }

    /// True for chains with EVM-style hex addresses.
    #[must_use]
    pub const fn is_evm(self) -> bool {
        !matches!(self, Self::Solana)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "solana" | "sol" => Ok(Self::Solana),
            "base" => Ok(Self::Base),
            "ethereum" | "eth" => Ok(Self::Ethereum),
            "polygon" => Ok(Self::Polygon),
            "unichain" => Ok(Self::Unichain),
            _ => Err(UnknownChain(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown chain: {0}")]
pub struct UnknownChain(pub String);

/// Guesses the chain from the shape of a contract address.
///
/// `0x`-prefixed addresses go to Base; base58 strings of mint length go to
/// Solana; everything else falls back to Base. Callers pass an explicit
/// chain to override.
#[must_use]
pub fn detect_chain(address: &str) -> Chain {
    if address.starts_with("0x") || address.starts_with("0X") {
        return Chain::Base;
    }
    if (32..=44).contains(&address.len()) && address.chars().all(is_base58) {
        return Chain::Solana;
    }
    Chain::Base
}

fn is_base58(c: char) -> bool {
    c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l')
}

/// A token identified by contract address and chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AssetId {
    pub address: String,
    pub chain: Chain,
}

impl AssetId {
    /// Builds an asset id, detecting the chain from the address shape when
    /// no explicit chain is given.
    #[must_use]
    pub fn new(address: impl Into<String>, chain: Option<Chain>) -> Self {
        let address = address.into();
        let chain = chain.unwrap_or_else(|| detect_chain(&address));
        Self { address, chain }
    }

    /// Store key for this asset.
    ///
    /// EVM addresses are case-insensitive and normalized to lowercase so one
    /// token can never appear under two spellings. Solana mints are
    /// case-sensitive and kept verbatim.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        if self.chain.is_evm() {
            self.address.to_lowercase()
        } else {
            self.address.clone()
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.chain)
    }
}
