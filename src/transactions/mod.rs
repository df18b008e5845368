//! Purchase simulation and the purchase transaction state machine.

mod metrics;
pub use metrics::PurchaseMetrics;

mod purchase;
pub use purchase::{PurchaseMachine, PurchaseState};

mod simulator;
pub use simulator::{PreparedPurchase, SimulationInputs, SimulationState, TransactionSimulator};
