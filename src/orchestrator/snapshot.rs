use crate::{
    allowance::ApprovalState,
    error::SurfacedError,
    network::{NetworkNotice, NetworkStatus},
    price::Quote,
    types::{Currency, SaleState},
};
use alloy::primitives::{B256, ChainId, U256};
use rust_decimal::Decimal;
use serde::Serialize;

/// Read-only view of the purchase engine for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseSnapshot {
    /// The payment currency.
    pub currency: Currency,
    /// Displayed pay amount.
    pub pay_draft: String,
    /// Committed pay amount.
    pub pay_amount: Option<Decimal>,
    /// Displayed sale token amount.
    pub token_draft: String,
    /// Committed sale token amount.
    pub token_amount: Option<Decimal>,
    /// Whether the amounts were computed with a price that is not live.
    pub degraded: bool,
    /// The last read sale state.
    pub sale: Option<SaleState>,
    /// The quote used for the native asset.
    pub quote: Option<Quote>,
    /// The connected chain status.
    pub network: NetworkStatus,
    /// Set after a failed network switch.
    pub network_notice: Option<NetworkNotice>,
    /// The chain the sale lives on.
    pub required_chain_id: ChainId,
    /// The approval state.
    pub approval: ApprovalState,
    /// The cached allowance.
    pub allowance: Option<U256>,
    /// Whether an approval is needed before the purchase.
    pub needs_approval: bool,
    /// Whether an approval can be started.
    pub can_approve: bool,
    /// Whether the purchase can be submitted.
    pub can_submit: bool,
    /// Whether a purchase is being signed or mined.
    pub is_purchasing: bool,
    /// Whether the wallet is on the sale's chain.
    pub is_correct_network: bool,
    /// State of the last simulation.
    pub simulation: String,
    /// State of the purchase.
    pub purchase: String,
    /// Hash of the purchase transaction, once broadcast.
    pub purchase_tx: Option<B256>,
    /// The last surfaced error.
    pub error: Option<SurfacedError>,
}
