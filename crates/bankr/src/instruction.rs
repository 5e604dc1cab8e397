//! Natural-language prompt rendering.
//!
//! Bankr takes a plain-English order as its single argument. The phrasing
//! here is load-bearing: the CLI parses these shapes, so changes to the
//! wording are protocol changes.

use keeper_core::OrderInstruction;

/// Renders an instruction as the bankr prompt.
///
/// ```
/// use keeper_bankr::render_prompt;
/// use keeper_core::{AssetId, Chain, OrderInstruction};
/// use rust_decimal::Decimal;
///
/// let asset = AssetId::new("0xabc123", Some(Chain::Base));
/// let prompt = render_prompt(&OrderInstruction::Buy {
///     asset,
///     usd: Decimal::from(100),
/// });
/// assert_eq!(prompt, "buy 100 dollars of 0xabc123 on base");
/// ```
#[must_use]
pub fn render_prompt(instruction: &OrderInstruction) -> String {
    match instruction {
        OrderInstruction::Buy { asset, usd } => {
            format!("buy {} dollars of {} on {}", usd, asset.address, asset.chain)
        }
        OrderInstruction::SellPercent { asset, percent } => {
            format!("sell {}% of my {} on {}", percent, asset.address, asset.chain)
        }
        OrderInstruction::SellAll { asset } => {
            format!("sell all of my {} on {}", asset.address, asset.chain)
        }
    }
}

/// True when the instruction reduces or closes a position.
#[must_use]
pub const fn is_sell(instruction: &OrderInstruction) -> bool {
    matches!(
        instruction,
        OrderInstruction::SellPercent { .. } | OrderInstruction::SellAll { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::{AssetId, Chain};
    use rust_decimal_macros::dec;

    fn base_asset() -> AssetId {
        AssetId::new("0xabc123", Some(Chain::Base))
    }

    fn sol_asset() -> AssetId {
        AssetId::new("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU", Some(Chain::Solana))
    }

    #[test]
    fn test_buy_prompt() {
        let prompt = render_prompt(&OrderInstruction::Buy {
            asset: base_asset(),
            usd: dec!(150),
        });
        assert_eq!(prompt, "buy 150 dollars of 0xabc123 on base");
    }

    #[test]
    fn test_buy_prompt_keeps_cents() {
        let prompt = render_prompt(&OrderInstruction::Buy {
            asset: base_asset(),
            usd: dec!(2.50),
        });
        assert_eq!(prompt, "buy 2.50 dollars of 0xabc123 on base");
    }

    #[test]
    fn test_sell_percent_prompt() {
        let prompt = render_prompt(&OrderInstruction::SellPercent {
            asset: sol_asset(),
            percent: 30,
        });
        assert_eq!(
            prompt,
            "sell 30% of my 7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU on solana"
        );
    }

    #[test]
    fn test_sell_all_prompt() {
        let prompt = render_prompt(&OrderInstruction::SellAll {
            asset: base_asset(),
        });
        assert_eq!(prompt, "sell all of my 0xabc123 on base");
    }

    #[test]
    fn test_sell_classification() {
        assert!(!is_sell(&OrderInstruction::Buy {
            asset: base_asset(),
            usd: dec!(1),
        }));
        assert!(is_sell(&OrderInstruction::SellPercent {
            asset: base_asset(),
            percent: 30,
        }));
        assert!(is_sell(&OrderInstruction::SellAll {
            asset: base_asset(),
        }));
    }
}
