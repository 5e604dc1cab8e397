//! SPL token balance reads via `getTokenAccountsByOwner`.

use crate::error::{ChainError, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

// The jsonParsed shape nests the figure five levels deep. Every level
// defaults so one oddly-shaped account reads as zero instead of failing
// the whole sum, matching how the node omits fields for exotic accounts.

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<TokenAccounts>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenAccounts {
    #[serde(default)]
    value: Vec<TokenAccountEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenAccountEntry {
    #[serde(default)]
    account: TokenAccount,
}

#[derive(Debug, Default, Deserialize)]
struct TokenAccount {
    #[serde(default)]
    data: AccountData,
}

#[derive(Debug, Default, Deserialize)]
struct AccountData {
    #[serde(default)]
    parsed: ParsedData,
}

#[derive(Debug, Default, Deserialize)]
struct ParsedData {
    #[serde(default)]
    info: ParsedInfo,
}

#[derive(Debug, Default, Deserialize)]
struct ParsedInfo {
    #[serde(default, rename = "tokenAmount")]
    token_amount: TokenAmount,
}

#[derive(Debug, Default, Deserialize)]
struct TokenAmount {
    /// UI-scaled amount; the node sends null when it cannot represent it.
    #[serde(default, rename = "uiAmount")]
    ui_amount: Option<f64>,
}

/// Sums the wallet's UI-scaled balance of a mint across all its token
/// accounts.
///
/// # Errors
///
/// Returns an error on transport failures and JSON-RPC error answers.
pub async fn token_balance(
    http: &Client,
    rpc_url: &str,
    wallet: &str,
    mint: &str,
) -> Result<f64> {
    let payload = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "getTokenAccountsByOwner",
        "params": [wallet, {"mint": mint}, {"encoding": "jsonParsed"}],
    });

    let response = http.post(rpc_url).json(&payload).send().await?;
    let body: RpcResponse = response.error_for_status()?.json().await?;

    if let Some(err) = body.error {
        return Err(ChainError::Rpc {
            message: format!("{} (code {})", err.message, err.code),
        });
    }
    let accounts = body.result.ok_or_else(|| ChainError::Rpc {
        message: "response carried neither result nor error".to_string(),
    })?;

    Ok(accounts
        .value
        .iter()
        .map(|entry| {
            entry
                .account
                .data
                .parsed
                .info
                .token_amount
                .ui_amount
                .unwrap_or(0.0)
        })
        .sum())
}
