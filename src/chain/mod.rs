//! Access to the wallet, the sale contract and the payment tokens.

mod api;
pub use api::{ChainApi, ReceiptOutcome, Result};

mod memory;
pub use memory::{AllowanceReads, CallCounts, InMemoryChain, TxBehavior};

mod rpc;
pub use rpc::RpcChain;
