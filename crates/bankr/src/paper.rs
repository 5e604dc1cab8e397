//! Paper broker for dry runs.
//!
//! # Safety
//!
//! This broker makes **zero subprocess calls**. Every instruction is
//! recorded and acknowledged locally, so the rest of the pipeline (ledger
//! rows, notifications, position writes) behaves exactly as in live mode
//! while no real order can ever leave the machine.

use crate::instruction::render_prompt;
use async_trait::async_trait;
use keeper_core::{OrderBroker, OrderInstruction, OrderOutcome};
use std::sync::Mutex;
use tracing::info;

/// Records prompts instead of executing them.
#[derive(Debug, Default)]
pub struct PaperBroker {
    submitted: Mutex<Vec<String>>,
}

impl PaperBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prompts submitted so far, oldest first.
    #[must_use]
    pub fn submitted(&self) -> Vec<String> {
        self.submitted
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OrderBroker for PaperBroker {
    async fn submit(&self, instruction: &OrderInstruction) -> OrderOutcome {
        let prompt = render_prompt(instruction);
        info!("paper broker: {prompt}");
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(prompt.clone());
        }
        // No tx reference in the reply: paper fills have nothing on chain.
        OrderOutcome::ok(format!("[paper] {prompt}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::{AssetId, Chain};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_broker_records_and_acks() {
        let broker = PaperBroker::new();
        let asset = AssetId::new("0xabc123", Some(Chain::Base));

        let outcome = broker
            .submit(&OrderInstruction::Buy {
                asset: asset.clone(),
                usd: dec!(50),
            })
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.response, "[paper] buy 50 dollars of 0xabc123 on base");

        broker
            .submit(&OrderInstruction::SellAll { asset })
            .await;
        assert_eq!(
            broker.submitted(),
            vec![
                "buy 50 dollars of 0xabc123 on base".to_string(),
                "sell all of my 0xabc123 on base".to_string(),
            ]
        );
    }
}
