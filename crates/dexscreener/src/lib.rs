//! DexScreener market data integration.
//!
//! Implements the keeper's [`PriceOracle`](keeper_core::PriceOracle) seam
//! against the public DexScreener token endpoint.

pub mod client;
pub mod error;

pub use client::{DexScreenerClient, DexScreenerConfig, DEXSCREENER_URL};
pub use error::{DexScreenerError, Result};
