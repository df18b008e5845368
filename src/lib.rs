//! # Presale
//!
//! Purchase orchestration engine for tiered on-chain token sales.
//!
//! A buyer picks a payment currency, enters either side of the purchase, approves the sale
//! contract to spend fungible tokens if needed and submits the purchase. The
//! [`PurchaseOrchestrator`](orchestrator::PurchaseOrchestrator) owns all of that state and is
//! driven through a [`PurchaseHandle`](service::PurchaseHandle).

pub mod allowance;
pub mod calculator;
pub mod chain;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod network;
pub mod orchestrator;
pub mod price;
pub mod serde;
pub mod service;
pub mod spawn;
pub mod transactions;
pub mod types;
