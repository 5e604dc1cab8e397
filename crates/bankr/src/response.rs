//! Bankr reply handling.

use keeper_core::Chain;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Successful bankr runs print a JSON envelope on stdout.
#[derive(Debug, Deserialize)]
struct ReplyEnvelope {
    response: Option<String>,
}

/// Extracts the reply text from bankr stdout.
///
/// Well-formed stdout is a JSON envelope whose `response` field carries
/// the human-readable result. Anything else passes through verbatim.
#[must_use]
pub fn extract_reply(stdout: &str) -> String {
    match serde_json::from_str::<ReplyEnvelope>(stdout) {
        Ok(ReplyEnvelope {
            response: Some(text),
        }) => text,
        _ => stdout.to_string(),
    }
}

fn tx_regex() -> &'static Regex {
    static TX: OnceLock<Regex> = OnceLock::new();
    TX.get_or_init(|| Regex::new("[0-9a-fA-F]{64}").expect("fixed hex pattern"))
}

/// Finds a 64-hex-char transaction reference in the reply text.
///
/// EVM chains get a `0x` prefix when the reply carried a bare digest.
/// Returns an empty string when no reference is present.
#[must_use]
pub fn extract_tx_reference(reply: &str, chain: Chain) -> String {
    let Some(found) = tx_regex().find(reply) else {
        return String::new();
    };
    let digest = found.as_str();
    if chain == Chain::Solana {
        digest.to_string()
    } else {
        format!("0x{digest}")
    }
}
