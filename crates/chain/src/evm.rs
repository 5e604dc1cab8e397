//! ERC-20 balance reads via `eth_call`.

use crate::error::{ChainError, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// `balanceOf(address)` function selector.
const BALANCE_OF_SELECTOR: &str = "0x70a08231";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Builds the `balanceOf` calldata for a wallet: selector plus the
/// lowercased address left-padded to a 32-byte word.
fn balance_call_data(wallet: &str) -> String {
    let lowered = wallet.to_lowercase();
    let stripped = lowered.strip_prefix("0x").unwrap_or(&lowered);
    format!("{BALANCE_OF_SELECTOR}{stripped:0>64}")
}

/// Parses a 32-byte hex word into raw token units.
///
/// An empty word (`0x`, the answer for reverts and non-contracts) is an
/// error, not zero. Values past `u128` saturate; only zero versus nonzero
/// matters to callers.
fn parse_hex_balance(raw: &str) -> Result<u128> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ChainError::BadBalance(raw.to_string()));
    }
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(0);
    }
    if trimmed.len() > 32 {
        return Ok(u128::MAX);
    }
    u128::from_str_radix(trimmed, 16).map_err(|_| ChainError::BadBalance(raw.to_string()))
}

/// Reads the wallet's raw-unit balance of an ERC-20 token.
///
/// # Errors
///
/// Returns an error on transport failures, JSON-RPC error answers, and
/// unparseable balance words.
pub async fn erc20_balance(
    http: &Client,
    rpc_url: &str,
    token: &str,
    wallet: &str,
) -> Result<u128> {
    let payload = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_call",
        "params": [{"to": token, "data": balance_call_data(wallet)}, "latest"],
    });

    let response = http.post(rpc_url).json(&payload).send().await?;
    let body: RpcResponse = response.error_for_status()?.json().await?;

    if let Some(err) = body.error {
        return Err(ChainError::Rpc {
            message: format!("{} (code {})", err.message, err.code),
        });
    }
    let raw = body.result.ok_or_else(|| ChainError::Rpc {
        message: "response carried neither result nor error".to_string(),
    })?;
    parse_hex_balance(&raw)
}
