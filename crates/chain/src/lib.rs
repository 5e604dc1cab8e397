//! On-chain balance reads.
//!
//! Implements the keeper's [`BalanceSource`](keeper_core::BalanceSource)
//! seam against public JSON-RPC nodes: `eth_call` balance words on EVM
//! chains, `getTokenAccountsByOwner` sums on Solana.

pub mod balances;
pub mod error;
pub mod evm;
pub mod solana;

pub use balances::RpcBalances;
pub use error::{ChainError, Result};
