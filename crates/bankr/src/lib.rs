//! Bankr broker integration.
//!
//! Orders leave the keeper as plain-English prompts run through the bankr
//! CLI. This crate renders instructions into prompts, drives the
//! subprocess, and digs transaction references out of the replies. A
//! paper broker stands in for the CLI on dry runs.

pub mod client;
pub mod instruction;
pub mod paper;
pub mod response;

pub use client::BankrClient;
pub use instruction::{is_sell, render_prompt};
pub use paper::PaperBroker;
pub use response::{extract_reply, extract_tx_reference};
