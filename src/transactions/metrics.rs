use metrics::{Counter, Histogram};
use metrics_derive::Metrics;

/// Metrics for the [`PurchaseOrchestrator`](crate::orchestrator::PurchaseOrchestrator).
#[derive(Metrics)]
#[metrics(scope = "purchase")]
pub struct PurchaseMetrics {
    /// Number of sent approvals.
    pub approvals_sent: Counter,
    /// Number of approvals reflected in the allowance.
    pub approvals_confirmed: Counter,
    /// Number of rejected, reverted or timed out approvals.
    pub approvals_failed: Counter,
    /// Number of failed simulations.
    pub simulations_failed: Counter,
    /// Number of sent purchases.
    pub purchases_sent: Counter,
    /// Number of confirmed purchases.
    pub purchases_confirmed: Counter,
    /// Number of reverted purchases.
    pub purchases_reverted: Counter,
    /// Number of rejected or timed out purchases.
    pub purchases_failed: Counter,
    /// Time it takes to confirm purchases, in milliseconds.
    pub confirmation_time: Histogram,
}
