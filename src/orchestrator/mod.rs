//! The purchase orchestrator.
//!
//! Owns every piece of purchase state and exposes the verbs the presentation layer drives it
//! with. All mutation happens through `&mut self`; background work reports back through
//! [`OrchestratorEvent`]s tagged with the epoch they were started in.

mod event;
pub use event::OrchestratorEvent;

mod snapshot;
pub use snapshot::PurchaseSnapshot;

use crate::{
    allowance::{AllowanceRecord, ApprovalMachine, ApprovalState},
    calculator::{AmountCalculator, Conversion},
    chain::{ChainApi, ReceiptOutcome},
    config::{AllowanceConfig, PurchaseConfig},
    error::{PreconditionError, PurchaseError, SurfacedError, TransactionError},
    network::{NetworkGuard, NetworkStatus},
    price::{PriceOracle, Quote},
    transactions::{
        PurchaseMachine, PurchaseMetrics, PurchaseState, SimulationInputs, SimulationState,
        TransactionSimulator,
    },
    types::{
        AmountPair, Currency, PurchaseCall, SaleState,
        amount::{floor_to, parse_amount},
    },
};
use alloy::primitives::{Address, B256, U256};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinSet, time::Instant};
use tracing::{debug, info, trace, warn};

/// Coordinates the calculator, the approval and purchase state machines, the simulator and the
/// network guard.
#[derive(Debug)]
pub struct PurchaseOrchestrator {
    /// Chain access.
    chain: Arc<dyn ChainApi>,
    /// Native asset price.
    oracle: PriceOracle,
    /// Amount conversions.
    calculator: AmountCalculator,
    /// Purchase dry runs.
    simulator: TransactionSimulator,
    /// Token addresses of the fungible currencies.
    tokens: HashMap<Currency, Address>,
    /// Approval timeout and reconcile settings.
    allowance_config: AllowanceConfig,
    /// Time the wallet may take to sign a purchase.
    signature_timeout: Duration,
    /// Time a purchase may take to be mined.
    confirmation_timeout: Duration,
    /// Sender for results of background work.
    events_tx: mpsc::UnboundedSender<OrchestratorEvent>,
    /// Background approvals, purchases and reads. Aborted on drop.
    tasks: JoinSet<()>,
    /// Metrics.
    metrics: Arc<PurchaseMetrics>,

    /// Bumped whenever the currency changes or the purchase state is reset.
    epoch: u64,
    /// The payment currency.
    currency: Currency,
    /// The pay and token amounts.
    amounts: AmountPair,
    /// Whether the committed amounts were computed with a price that is not live.
    degraded: bool,
    /// The quote the committed amounts were computed with.
    quote: Option<Quote>,
    /// The last read sale state.
    sale: Option<SaleState>,
    /// The connected chain.
    network: NetworkGuard,
    /// The approval state of the currency.
    approval: ApprovalMachine,
    /// The last simulation and the inputs it was run for.
    simulation: SimulationState,
    simulated_inputs: Option<SimulationInputs>,
    /// The purchase transaction.
    purchase: PurchaseMachine,
    /// The last surfaced error.
    last_error: Option<SurfacedError>,
}

impl PurchaseOrchestrator {
    /// Creates a new [`PurchaseOrchestrator`] and the receiver of its background events.
    pub fn new(
        config: &PurchaseConfig,
        chain: Arc<dyn ChainApi>,
        oracle: PriceOracle,
    ) -> (Self, mpsc::UnboundedReceiver<OrchestratorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let currency = Currency::default();

        let this = Self {
            simulator: TransactionSimulator::new(chain.clone()),
            chain,
            oracle,
            calculator: AmountCalculator::new(config.sale.token_decimals),
            tokens: config.sale.tokens.clone(),
            allowance_config: config.allowance.clone(),
            signature_timeout: config.transactions.signature_timeout,
            confirmation_timeout: config.transactions.confirmation_timeout,
            events_tx,
            tasks: JoinSet::new(),
            metrics: Arc::new(PurchaseMetrics::default()),
            epoch: 0,
            currency,
            amounts: AmountPair::default(),
            degraded: false,
            quote: None,
            sale: None,
            network: NetworkGuard::new(config.chain.required_chain_id),
            approval: ApprovalMachine::new(currency),
            simulation: SimulationState::Idle,
            simulated_inputs: None,
            purchase: PurchaseMachine::default(),
            last_error: None,
        };

        (this, events_rx)
    }

    /// Reads the connected chain, the sale state and the allowance.
    pub async fn start(&mut self) {
        self.refresh_network().await;
        if let Err(err) = self.refresh_sale_state().await {
            debug!(%err, "Starting without a sale state");
        }
        self.request_allowance();
    }

    /// The payment currency.
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// The pay and token amounts.
    pub fn amounts(&self) -> &AmountPair {
        &self.amounts
    }

    /// The last read sale state.
    pub fn sale(&self) -> Option<&SaleState> {
        self.sale.as_ref()
    }

    /// The approval state of the currency.
    pub fn approval_state(&self) -> ApprovalState {
        self.approval.state()
    }

    /// The cached allowance, if known.
    pub fn allowance(&self) -> Option<&AllowanceRecord> {
        self.approval.allowance()
    }

    /// The last simulation.
    pub fn simulation(&self) -> &SimulationState {
        &self.simulation
    }

    /// The purchase transaction state.
    pub fn purchase_state(&self) -> &PurchaseState {
        self.purchase.state()
    }

    /// The current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether an approval is needed before the purchase.
    pub fn needs_approval(&self) -> bool {
        self.approval.needs_approval()
    }

    /// Whether the wallet is on the sale's chain.
    pub fn is_correct_network(&self) -> bool {
        self.network.is_correct()
    }

    /// Whether a purchase is being signed or mined.
    pub fn is_purchasing(&self) -> bool {
        self.purchase.is_busy()
    }

    /// Whether an approval can be started now.
    pub fn can_approve(&self) -> bool {
        self.network.is_correct()
            && !self.purchase.is_busy()
            && self.amounts.is_settled()
            && matches!(self.approval.state(), ApprovalState::Insufficient { .. })
    }

    /// Whether the purchase can be submitted now.
    ///
    /// Requires a successful simulation for exactly the current inputs.
    pub fn can_submit(&self) -> bool {
        !self.purchase.is_busy()
            && self.simulation.prepared().is_some()
            && self.simulated_inputs.as_ref() == Some(&self.simulation_inputs())
    }

    /// Returns the read-only view of the current state.
    pub fn snapshot(&self) -> PurchaseSnapshot {
        PurchaseSnapshot {
            currency: self.currency,
            pay_draft: self.amounts.pay.draft().to_string(),
            pay_amount: self.amounts.pay.committed(),
            token_draft: self.amounts.token.draft().to_string(),
            token_amount: self.amounts.token.committed(),
            degraded: self.degraded,
            sale: self.sale.clone(),
            quote: self.quote.clone(),
            network: self.network.status(),
            network_notice: self.network.notice().cloned(),
            required_chain_id: self.network.required(),
            approval: self.approval.state(),
            allowance: self.approval.allowance().map(|record| record.amount),
            needs_approval: self.needs_approval(),
            can_approve: self.can_approve(),
            can_submit: self.can_submit(),
            is_purchasing: self.is_purchasing(),
            is_correct_network: self.is_correct_network(),
            simulation: self.simulation.label().to_string(),
            purchase: self.purchase.state().label().to_string(),
            purchase_tx: self.purchase.state().tx_hash(),
            error: self.last_error.clone(),
        }
    }

    /// Reads the connected chain.
    pub async fn refresh_network(&mut self) -> NetworkStatus {
        match self.chain.chain_id().await {
            Ok(chain_id) => {
                let was_correct = self.network.is_correct();
                self.network.set_current(chain_id);
                if was_correct != self.network.is_correct() {
                    self.invalidate_simulation();
                }
            }
            Err(err) => warn!(%err, "Failed to read chain id"),
        }
        self.network.status()
    }

    /// Asks the wallet to switch to the sale's chain.
    ///
    /// A failed switch leaves a manual switch notice in the snapshot.
    pub async fn switch_network(&mut self) -> NetworkStatus {
        let status = self.network.switch(self.chain.as_ref()).await;
        if self.network.is_correct() {
            self.request_allowance();
            self.reevaluate().await;
        }
        status
    }

    /// Reads the sale state. On failure the previous state is kept.
    pub async fn refresh_sale_state(&mut self) -> Result<SaleState, PurchaseError> {
        let result = self.chain.sale_state().await.map_err(PurchaseError::from);
        match &result {
            Ok(sale) => {
                debug!(
                    active = sale.active,
                    tier = sale.current_tier.index,
                    sold = %sale.total_sold,
                    "Sale state refreshed"
                );
                self.sale = Some(sale.clone());
            }
            Err(err) => warn!(%err, "Failed to read sale state, keeping the previous one"),
        }
        self.surface(result)
    }

    /// Switches the payment currency.
    ///
    /// Both amounts and the cached allowance are dropped before anything is read for the new
    /// currency.
    pub async fn set_currency(&mut self, currency: Currency) -> Result<(), PurchaseError> {
        let result = self.try_set_currency(currency);
        self.surface(result)
    }

    fn try_set_currency(&mut self, currency: Currency) -> Result<(), PurchaseError> {
        if self.purchase.is_busy() {
            return Err(PreconditionError::PurchaseInProgress.into());
        }
        if !currency.is_native() && !self.tokens.contains_key(&currency) {
            return Err(PreconditionError::UnsupportedCurrency(currency).into());
        }
        if currency == self.currency {
            return Ok(());
        }

        info!(from = %self.currency, to = %currency, "Switching currency");
        self.currency = currency;
        self.reset_purchase_state();
        self.request_allowance();
        Ok(())
    }

    /// Updates the displayed pay amount. No chain call is made.
    pub fn edit_pay_amount(&mut self, input: &str) {
        self.amounts.pay.edit(input);
        self.invalidate_review();
    }

    /// Updates the displayed token amount. No chain call is made.
    pub fn edit_token_amount(&mut self, input: &str) {
        self.amounts.token.edit(input);
        self.invalidate_review();
    }

    /// Commits the pay amount and derives the token amount from it.
    pub async fn commit_pay_amount(&mut self, input: &str) -> Result<Conversion, PurchaseError> {
        let result = self.try_commit_pay_amount(input).await;
        self.surface(result)
    }

    async fn try_commit_pay_amount(&mut self, input: &str) -> Result<Conversion, PurchaseError> {
        self.ensure_can_edit()?;
        self.amounts.pay.edit(input);

        let pay = match parse_amount(input).and_then(|pay| floor_to(pay, self.currency.decimals()))
        {
            Ok(pay) => pay,
            Err(err) => {
                self.amounts.pay.invalidate();
                self.amounts.token.clear();
                self.invalidate_review();
                return Err(err.into());
            }
        };

        let tier = self.current_tier()?;
        let quote = self.oracle.quote().await;
        let conversion = self.calculator.token_amount(self.currency, pay, &tier, &quote)?;
        trace!(currency = %self.currency, %pay, token = %conversion.amount, "Pay amount committed");

        self.amounts.pay.commit(pay);
        self.amounts.token.commit(conversion.amount);
        self.degraded = conversion.degraded;
        self.quote = Some(quote);
        self.reevaluate().await;

        Ok(conversion)
    }

    /// Commits the token amount and derives the pay amount from it.
    ///
    /// The native pay amount is computed locally, fungible pay amounts are read from the sale
    /// contract.
    pub async fn commit_token_amount(&mut self, input: &str) -> Result<Conversion, PurchaseError> {
        let result = self.try_commit_token_amount(input).await;
        self.surface(result)
    }

    async fn try_commit_token_amount(&mut self, input: &str) -> Result<Conversion, PurchaseError> {
        self.ensure_can_edit()?;
        self.amounts.token.edit(input);

        let decimals = self.calculator.sale_token_decimals();
        let token = match parse_amount(input).and_then(|token| floor_to(token, decimals)) {
            Ok(token) => token,
            Err(err) => {
                self.amounts.token.invalidate();
                self.amounts.pay.clear();
                self.invalidate_review();
                return Err(err.into());
            }
        };

        let tier = self.current_tier()?;
        let quote = self.oracle.quote().await;
        let conversion = match self.tokens.get(&self.currency) {
            None => self.calculator.native_pay_amount(token, &tier, &quote)?,
            Some(address) => {
                let token_minor = self.calculator.token_minor_units(token)?;
                let required = self.chain.required_pay_amount(*address, token_minor).await?;
                let amount = floor_to(self.currency.from_minor_units(required)?, self.currency.decimals())?;
                Conversion { amount, degraded: false }
            }
        };
        trace!(currency = %self.currency, %token, pay = %conversion.amount, "Token amount committed");

        self.amounts.token.commit(token);
        self.amounts.pay.commit(conversion.amount);
        self.degraded = conversion.degraded;
        self.quote = Some(quote);
        self.reevaluate().await;

        Ok(conversion)
    }

    /// Starts the approval if one is needed, otherwise simulates the purchase and presents it for
    /// confirmation.
    pub async fn approve_or_purchase(&mut self) -> Result<(), PurchaseError> {
        let result = self.try_approve_or_purchase().await;
        self.surface(result)
    }

    async fn try_approve_or_purchase(&mut self) -> Result<(), PurchaseError> {
        self.network.ensure_correct()?;
        if self.purchase.is_busy() {
            return Err(PreconditionError::PurchaseInProgress.into());
        }
        if self.amounts.pay.committed().is_none() {
            return Err(PreconditionError::NoCommittedAmount.into());
        }
        if !self.amounts.is_settled() {
            return Err(PreconditionError::DraftNotCommitted.into());
        }

        if self.approval.needs_approval() {
            let required = match self.approval.begin() {
                Ok(required) => required,
                Err(err) => {
                    if err == PreconditionError::AllowanceUnknown {
                        self.request_allowance();
                    }
                    return Err(err.into());
                }
            };
            self.spawn_approval(required);
            return Ok(());
        }

        // a retry re-runs a failed simulation
        if matches!(self.simulation, SimulationState::Failed(_)) {
            self.invalidate_simulation();
        }
        self.reevaluate().await;
        match &self.simulation {
            SimulationState::Ready(prepared) => {
                self.purchase.review(prepared.clone())?;
                Ok(())
            }
            SimulationState::Blocked(err) => Err(err.clone().into()),
            SimulationState::Failed(err) => Err(err.clone().into()),
            SimulationState::Idle => Err(PreconditionError::SimulationNotReady.into()),
        }
    }

    /// Signs and submits the reviewed purchase.
    pub async fn confirm_purchase(&mut self) -> Result<(), PurchaseError> {
        let result = self.try_confirm_purchase();
        self.surface(result)
    }

    fn try_confirm_purchase(&mut self) -> Result<(), PurchaseError> {
        self.network.ensure_correct()?;

        let prepared = match self.purchase.state() {
            PurchaseState::AwaitingConfirmation(prepared) => prepared.clone(),
            _ if self.purchase.is_busy() => {
                return Err(PreconditionError::PurchaseInProgress.into());
            }
            _ => return Err(PreconditionError::NothingToConfirm.into()),
        };

        let fresh = prepared.currency == self.currency
            && Some(prepared.pay_amount) == self.amounts.pay.committed()
            && self.amounts.is_settled()
            && self.can_submit()
            && self.simulation.prepared() == Some(&prepared);
        if !fresh {
            self.purchase.reset();
            return Err(PreconditionError::StaleSimulation.into());
        }

        let prepared = self.purchase.sign()?;
        self.spawn_purchase(prepared.call);
        Ok(())
    }

    /// Drops the amounts, the cached allowance, the simulation and the purchase state.
    pub async fn close_and_reset(&mut self) -> Result<(), PurchaseError> {
        let result = if self.purchase.is_busy() {
            Err(PreconditionError::PurchaseInProgress.into())
        } else {
            self.reset_purchase_state();
            self.request_allowance();
            Ok(())
        };
        self.surface(result)
    }

    /// Applies the result of background work.
    pub async fn handle_event(&mut self, event: OrchestratorEvent) {
        if let Some(epoch) = event.epoch()
            && epoch != self.epoch
        {
            debug!(?event, epoch = self.epoch, "Discarding stale event");
            return;
        }

        match event {
            OrchestratorEvent::Tick => {
                while self.tasks.try_join_next().is_some() {}
                self.refresh_network().await;
                if !self.approval.state().is_in_flight() {
                    self.request_allowance();
                }
            }
            OrchestratorEvent::AllowanceRead { currency, result, .. } => {
                if currency != self.currency {
                    return;
                }
                match result {
                    Ok(record) => {
                        trace!(?record, "Allowance read");
                        let required = self.required_pay_minor_units();
                        self.approval.apply_allowance(record, required);
                        self.reevaluate().await;
                    }
                    Err(err) => warn!(%err, %currency, "Failed to read allowance"),
                }
            }
            OrchestratorEvent::ApprovalSubmitted { tx_hash, .. } => {
                info!(%tx_hash, currency = %self.currency, "Approval submitted");
                self.approval.submitted(tx_hash);
            }
            OrchestratorEvent::ApprovalMined { tx_hash, .. } => {
                debug!(%tx_hash, "Approval mined, reconciling allowance");
                self.approval.mined();
            }
            OrchestratorEvent::AllowanceReconciled { record, .. } => {
                info!(amount = %record.amount, currency = %self.currency, "Approval confirmed");
                self.metrics.approvals_confirmed.increment(1);
                let required = self.required_pay_minor_units();
                self.approval.reconciled(record, required);
                self.reevaluate().await;
            }
            OrchestratorEvent::ApprovalFailed { error, .. } => {
                warn!(%error, currency = %self.currency, "Approval failed");
                self.metrics.approvals_failed.increment(1);
                self.last_error = Some((&PurchaseError::from(error.clone())).into());
                self.approval.failed(error);
            }
            OrchestratorEvent::PurchaseSubmitted { tx_hash, .. } => {
                info!(%tx_hash, "Purchase submitted");
                self.purchase.submitted(tx_hash);
            }
            OrchestratorEvent::PurchaseConfirming { tx_hash, .. } => {
                self.purchase.confirming(tx_hash);
            }
            OrchestratorEvent::PurchaseResolved { tx_hash, outcome, elapsed, .. } => {
                match outcome {
                    ReceiptOutcome::Success => {
                        info!(%tx_hash, ?elapsed, "Purchase confirmed");
                        self.metrics.purchases_confirmed.increment(1);
                        self.metrics.confirmation_time.record(elapsed.as_millis() as f64);
                        self.reset_purchase_state();
                        self.purchase.confirmed(tx_hash);
                        self.request_allowance();
                        if let Err(err) = self.refresh_sale_state().await {
                            debug!(%err, "Sale state not refreshed after purchase");
                        }
                    }
                    ReceiptOutcome::Reverted => {
                        warn!(%tx_hash, "Purchase reverted");
                        self.metrics.purchases_reverted.increment(1);
                        self.last_error =
                            Some((&PurchaseError::from(TransactionError::Reverted(tx_hash))).into());
                        self.purchase.reverted(tx_hash);
                    }
                    ReceiptOutcome::TimedOut => {
                        let error = TransactionError::TimedOut(self.confirmation_timeout);
                        self.fail_purchase(error);
                    }
                }
            }
            OrchestratorEvent::PurchaseFailed { error, .. } => self.fail_purchase(error),
        }
    }

    fn fail_purchase(&mut self, error: TransactionError) {
        warn!(%error, "Purchase failed");
        self.metrics.purchases_failed.increment(1);
        self.last_error = Some((&PurchaseError::from(error.clone())).into());
        self.purchase.failed(error);
    }

    /// Records the error of a verb, or clears the last one on success.
    fn surface<T>(&mut self, result: Result<T, PurchaseError>) -> Result<T, PurchaseError> {
        self.last_error = result.as_ref().err().map(SurfacedError::from);
        result
    }

    /// Commits are only possible on the sale's chain and outside of a running purchase.
    fn ensure_can_edit(&self) -> Result<(), PurchaseError> {
        self.network.ensure_correct()?;
        if self.purchase.is_busy() {
            return Err(PreconditionError::PurchaseInProgress.into());
        }
        Ok(())
    }

    fn current_tier(&self) -> Result<crate::types::PricingTier, PreconditionError> {
        self.sale
            .as_ref()
            .map(|sale| sale.current_tier)
            .ok_or(PreconditionError::SaleStateUnavailable)
    }

    /// Committed pay amount in minor units of the currency.
    fn required_pay_minor_units(&self) -> Option<U256> {
        self.amounts.pay.committed().and_then(|pay| self.currency.to_minor_units(pay).ok())
    }

    fn simulation_inputs(&self) -> SimulationInputs {
        SimulationInputs {
            currency: self.currency,
            token: self.tokens.get(&self.currency).copied().filter(|_| !self.currency.is_native()),
            pay_amount: self.amounts.pay.committed(),
            amounts_settled: self.amounts.is_settled(),
            sale_active: self.sale.as_ref().map(SaleState::accepts_purchases),
            approval: self.approval.state(),
            allowance: self.approval.allowance().map(|record| record.amount),
            network: self.network.status(),
            required_chain: self.network.required(),
        }
    }

    /// Re-evaluates the approval state and simulates the purchase if its inputs changed.
    async fn reevaluate(&mut self) {
        let required = self.required_pay_minor_units();
        self.approval.evaluate(required);

        let inputs = self.simulation_inputs();
        if self.simulated_inputs.as_ref() == Some(&inputs) {
            return;
        }

        let quote = match &self.quote {
            Some(quote) => quote.clone(),
            None => self.oracle.quote().await,
        };
        let state = self.simulator.simulate(&inputs, &quote).await;
        if matches!(state, SimulationState::Failed(_)) {
            self.metrics.simulations_failed.increment(1);
        }

        self.simulation = state;
        self.simulated_inputs = Some(inputs);

        if let PurchaseState::AwaitingConfirmation(prepared) = self.purchase.state()
            && self.simulation.prepared() != Some(prepared)
        {
            self.purchase.reset();
        }
    }

    /// Drops the simulation so that it is re-run on the next evaluation.
    fn invalidate_simulation(&mut self) {
        self.simulation = SimulationState::Idle;
        self.simulated_inputs = None;
    }

    /// Drops the simulation and any purchase awaiting confirmation.
    fn invalidate_review(&mut self) {
        self.invalidate_simulation();
        if matches!(self.purchase.state(), PurchaseState::AwaitingConfirmation(_)) {
            self.purchase.reset();
        }
    }

    /// Starts a new epoch with empty amounts, no cached allowance and no simulation.
    fn reset_purchase_state(&mut self) {
        self.epoch += 1;
        self.amounts.reset();
        self.degraded = false;
        self.quote = None;
        self.approval.reset(self.currency);
        self.invalidate_simulation();
        self.purchase.reset();
        self.last_error = None;
    }

    /// Reads the allowance of the active currency in the background.
    fn request_allowance(&mut self) {
        let Some(token) = self.tokens.get(&self.currency).copied() else { return };
        if self.currency.is_native() || !self.network.is_correct() {
            return;
        }

        let (chain, events_tx, epoch, currency) =
            (self.chain.clone(), self.events_tx.clone(), self.epoch, self.currency);
        self.tasks.spawn(async move {
            let (owner, spender) = (chain.account(), chain.sale_contract());
            let result = chain
                .allowance(token, owner, spender)
                .await
                .map(|amount| AllowanceRecord { currency, owner, spender, amount });
            let _ = events_tx.send(OrchestratorEvent::AllowanceRead { epoch, currency, result });
        });
    }

    /// Sends the approval and waits for it, then reads the allowance until it reflects the
    /// approval or the reconcile attempts run out.
    ///
    /// The whole sequence is bounded by the approval timeout.
    fn spawn_approval(&mut self, required: U256) {
        let Some(token) = self.tokens.get(&self.currency).copied() else { return };

        self.metrics.approvals_sent.increment(1);
        let (chain, events_tx, epoch, currency) =
            (self.chain.clone(), self.events_tx.clone(), self.epoch, self.currency);
        let AllowanceConfig { approval_timeout, reconcile_attempts, reconcile_backoff, .. } =
            self.allowance_config.clone();

        info!(%currency, %required, "Starting approval");
        self.tasks.spawn(async move {
            let deadline = Instant::now() + approval_timeout;
            let approval = async {
                let tx_hash = send_approval(
                    chain.as_ref(),
                    &events_tx,
                    epoch,
                    token,
                    required,
                    approval_timeout,
                )
                .await?;
                let _ = events_tx.send(OrchestratorEvent::ApprovalMined { epoch, tx_hash });
                reconcile_allowance(
                    chain.as_ref(),
                    currency,
                    token,
                    required,
                    reconcile_attempts,
                    reconcile_backoff,
                )
                .await
            };

            let event = match tokio::time::timeout_at(deadline, approval).await {
                Ok(Ok(record)) => OrchestratorEvent::AllowanceReconciled { epoch, record },
                Ok(Err(error)) => OrchestratorEvent::ApprovalFailed { epoch, error },
                Err(_) => OrchestratorEvent::ApprovalFailed {
                    epoch,
                    error: TransactionError::TimedOut(approval_timeout),
                },
            };
            let _ = events_tx.send(event);
        });
    }

    /// Sends the purchase and waits for its receipt.
    fn spawn_purchase(&mut self, call: PurchaseCall) {
        self.metrics.purchases_sent.increment(1);
        let (chain, events_tx, epoch) = (self.chain.clone(), self.events_tx.clone(), self.epoch);
        let (signature_timeout, timeout) = (self.signature_timeout, self.confirmation_timeout);

        info!(value = %call.value(), pay = %call.pay_amount(), "Sending purchase");
        self.tasks.spawn(async move {
            let sent = match tokio::time::timeout(signature_timeout, chain.send_purchase(&call))
                .await
            {
                Ok(Ok(tx_hash)) => Ok(tx_hash),
                Ok(Err(err)) => Err(TransactionError::from(err)),
                Err(_) => Err(TransactionError::TimedOut(signature_timeout)),
            };
            let tx_hash = match sent {
                Ok(tx_hash) => tx_hash,
                Err(error) => {
                    let _ = events_tx.send(OrchestratorEvent::PurchaseFailed { epoch, error });
                    return;
                }
            };
            let _ = events_tx.send(OrchestratorEvent::PurchaseSubmitted { epoch, tx_hash });
            let _ = events_tx.send(OrchestratorEvent::PurchaseConfirming { epoch, tx_hash });

            let started = Instant::now();
            let event = match chain.wait_for_receipt(tx_hash, timeout).await {
                Ok(outcome) => OrchestratorEvent::PurchaseResolved {
                    epoch,
                    tx_hash,
                    outcome,
                    elapsed: started.elapsed(),
                },
                Err(err) => {
                    OrchestratorEvent::PurchaseFailed { epoch, error: TransactionError::from(err) }
                }
            };
            let _ = events_tx.send(event);
        });
    }
}

/// Sends the approval and waits until it is mined.
async fn send_approval(
    chain: &dyn ChainApi,
    events_tx: &mpsc::UnboundedSender<OrchestratorEvent>,
    epoch: u64,
    token: Address,
    amount: U256,
    timeout: Duration,
) -> Result<B256, TransactionError> {
    let tx_hash = chain.send_approval(token, chain.sale_contract(), amount).await?;
    let _ = events_tx.send(OrchestratorEvent::ApprovalSubmitted { epoch, tx_hash });

    match chain.wait_for_receipt(tx_hash, timeout).await? {
        ReceiptOutcome::Success => Ok(tx_hash),
        ReceiptOutcome::Reverted => Err(TransactionError::Reverted(tx_hash)),
        ReceiptOutcome::TimedOut => Err(TransactionError::TimedOut(timeout)),
    }
}

/// Reads the allowance until it covers `required`.
///
/// Read errors count as attempts. Fails with the last read allowance once the attempts run out.
async fn reconcile_allowance(
    chain: &dyn ChainApi,
    currency: Currency,
    token: Address,
    required: U256,
    attempts: u32,
    backoff: Duration,
) -> Result<AllowanceRecord, TransactionError> {
    let (owner, spender) = (chain.account(), chain.sale_contract());

    let mut allowance = U256::ZERO;
    for attempt in 1..=attempts {
        match chain.allowance(token, owner, spender).await {
            Ok(amount) if amount >= required => {
                return Ok(AllowanceRecord { currency, owner, spender, amount });
            }
            Ok(amount) => {
                debug!(attempt, %amount, %required, "Allowance does not reflect approval yet");
                allowance = amount;
            }
            Err(err) => warn!(attempt, %err, "Failed to read allowance after approval"),
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
        }
    }

    Err(TransactionError::AllowanceNotReflected { required, allowance })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{InMemoryChain, TxBehavior},
        error::{ErrorKind, SimulationError},
    };
    use rust_decimal::Decimal;

    fn usdt() -> Address {
        Currency::USDT.default_address()
    }

    fn tokens(amount: u64) -> U256 {
        U256::from(amount) * U256::from(10u64).pow(U256::from(18))
    }

    async fn orchestrator(
        chain: InMemoryChain,
    ) -> (PurchaseOrchestrator, mpsc::UnboundedReceiver<OrchestratorEvent>, Arc<InMemoryChain>) {
        let chain = Arc::new(chain);
        let oracle = PriceOracle::default().with_constant_rate(2500.0);
        let (mut orchestrator, rx) =
            PurchaseOrchestrator::new(&PurchaseConfig::default(), chain.clone(), oracle);
        orchestrator.start().await;
        (orchestrator, rx, chain)
    }

    /// Applies background events until none arrive for a while.
    async fn pump(
        orchestrator: &mut PurchaseOrchestrator,
        rx: &mut mpsc::UnboundedReceiver<OrchestratorEvent>,
    ) {
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
        {
            orchestrator.handle_event(event).await;
        }
    }

    #[tokio::test]
    async fn native_purchase() {
        let (mut orchestrator, mut rx, chain) = orchestrator(InMemoryChain::default()).await;
        assert!(orchestrator.is_correct_network());
        assert!(!orchestrator.needs_approval());

        let conversion = orchestrator.commit_pay_amount("1").await.unwrap();
        assert_eq!(conversion.amount, Decimal::from(2_500_000));
        assert!(!conversion.degraded);
        assert!(orchestrator.can_submit());

        orchestrator.approve_or_purchase().await.unwrap();
        assert_eq!(orchestrator.purchase_state().label(), "awaitingConfirmation");

        orchestrator.confirm_purchase().await.unwrap();
        assert!(orchestrator.is_purchasing());
        pump(&mut orchestrator, &mut rx).await;

        assert_eq!(orchestrator.purchase_state().label(), "confirmed");
        assert!(orchestrator.amounts().pay.committed().is_none());
        assert_eq!(orchestrator.sale().unwrap().total_sold, tokens(2_500_000));
        assert_eq!(chain.counts().purchases, 1);
    }

    #[tokio::test]
    async fn token_purchase_with_approval() {
        let (mut orchestrator, mut rx, chain) = orchestrator(InMemoryChain::default()).await;
        orchestrator.set_currency(Currency::USDT).await.unwrap();
        pump(&mut orchestrator, &mut rx).await;
        assert_eq!(orchestrator.approval_state(), ApprovalState::Sufficient);

        let conversion = orchestrator.commit_pay_amount("100").await.unwrap();
        assert_eq!(conversion.amount, Decimal::from(100_000));
        assert_eq!(
            orchestrator.approval_state(),
            ApprovalState::Insufficient { required: U256::from(100_000_000u64) }
        );
        assert!(orchestrator.can_approve());
        assert!(!orchestrator.can_submit());
        assert_eq!(chain.counts().simulations, 0);

        orchestrator.approve_or_purchase().await.unwrap();
        assert!(orchestrator.approval_state().is_in_flight());
        pump(&mut orchestrator, &mut rx).await;

        assert_eq!(orchestrator.approval_state(), ApprovalState::Sufficient);
        assert!(orchestrator.can_submit());

        orchestrator.approve_or_purchase().await.unwrap();
        orchestrator.confirm_purchase().await.unwrap();
        pump(&mut orchestrator, &mut rx).await;

        assert_eq!(orchestrator.purchase_state().label(), "confirmed");
        assert_eq!(orchestrator.sale().unwrap().total_sold, tokens(100_000));
        assert_eq!(orchestrator.allowance().unwrap().amount, U256::ZERO);
    }

    #[tokio::test]
    async fn token_amount_reads_required_pay_amount() {
        let (mut orchestrator, mut rx, chain) = orchestrator(InMemoryChain::default()).await;
        orchestrator.set_currency(Currency::USDC).await.unwrap();
        pump(&mut orchestrator, &mut rx).await;

        orchestrator.edit_token_amount("100");
        orchestrator.edit_token_amount("1000");
        assert_eq!(chain.counts().required_pay_reads, 0);

        let conversion = orchestrator.commit_token_amount("1000").await.unwrap();
        assert_eq!(conversion.amount, Decimal::ONE);
        assert_eq!(chain.counts().required_pay_reads, 1);
        assert_eq!(orchestrator.amounts().pay.committed(), Some(Decimal::ONE));
    }

    #[tokio::test]
    async fn currency_switch_resets_state() {
        let chain = InMemoryChain::default().with_allowance(usdt(), U256::from(5_000_000u64));
        let (mut orchestrator, mut rx, _) = orchestrator(chain).await;
        orchestrator.commit_pay_amount("1").await.unwrap();

        orchestrator.set_currency(Currency::USDT).await.unwrap();
        assert!(orchestrator.amounts().pay.committed().is_none());
        assert!(orchestrator.amounts().token.committed().is_none());
        assert!(orchestrator.allowance().is_none());
        assert_eq!(orchestrator.approval_state(), ApprovalState::Checking);
        assert!(orchestrator.needs_approval());

        pump(&mut orchestrator, &mut rx).await;
        assert_eq!(orchestrator.allowance().unwrap().amount, U256::from(5_000_000u64));
        assert_eq!(orchestrator.allowance().unwrap().currency, Currency::USDT);
    }

    #[tokio::test]
    async fn stale_events_are_discarded() {
        let (mut orchestrator, _rx, _) = orchestrator(InMemoryChain::default()).await;
        orchestrator.set_currency(Currency::USDT).await.unwrap();
        let stale = orchestrator.epoch() - 1;

        let record = AllowanceRecord {
            currency: Currency::USDT,
            owner: Address::ZERO,
            spender: Address::ZERO,
            amount: U256::MAX,
        };
        orchestrator
            .handle_event(OrchestratorEvent::AllowanceRead {
                epoch: stale,
                currency: Currency::USDT,
                result: Ok(record),
            })
            .await;
        assert!(orchestrator.allowance().is_none());

        orchestrator
            .handle_event(OrchestratorEvent::AllowanceRead {
                epoch: orchestrator.epoch(),
                currency: Currency::USDC,
                result: Ok(record),
            })
            .await;
        assert!(orchestrator.allowance().is_none());
    }

    #[tokio::test]
    async fn wrong_network_blocks_commits() {
        let (mut orchestrator, _rx, chain) =
            orchestrator(InMemoryChain::default().with_chain_id(5)).await;
        assert!(!orchestrator.is_correct_network());

        orchestrator.edit_pay_amount("1");
        let err = orchestrator.commit_pay_amount("1").await.unwrap_err();
        assert!(matches!(
            err,
            PurchaseError::Precondition(PreconditionError::WrongNetwork { current: Some(5), required: 1 })
        ));
        assert_eq!(orchestrator.snapshot().error.unwrap().kind, ErrorKind::Precondition);

        assert_eq!(orchestrator.switch_network().await, NetworkStatus::Correct);
        assert!(orchestrator.commit_pay_amount("1").await.is_ok());
        assert_eq!(chain.counts().simulations, 1);
    }

    #[tokio::test]
    async fn failed_simulation_blocks_submission() {
        let chain = InMemoryChain::default().with_simulation_failure("tier sold out");
        let (mut orchestrator, _rx, chain) = orchestrator(chain).await;

        orchestrator.commit_pay_amount("1").await.unwrap();
        assert!(matches!(orchestrator.simulation(), SimulationState::Failed(_)));
        assert!(!orchestrator.can_submit());

        let err = orchestrator.approve_or_purchase().await.unwrap_err();
        assert!(matches!(err, PurchaseError::Simulation(SimulationError::Reverted(_))));
        assert_eq!(
            orchestrator.confirm_purchase().await.unwrap_err().to_string(),
            PreconditionError::NothingToConfirm.to_string()
        );
        assert_eq!(chain.counts().purchases, 0);
    }

    #[tokio::test]
    async fn editing_invalidates_review() {
        let (mut orchestrator, _rx, chain) = orchestrator(InMemoryChain::default()).await;
        orchestrator.commit_pay_amount("1").await.unwrap();
        orchestrator.approve_or_purchase().await.unwrap();

        orchestrator.edit_pay_amount("2");
        assert_eq!(orchestrator.purchase_state(), &PurchaseState::Idle);
        assert!(!orchestrator.can_submit());
        assert!(matches!(
            orchestrator.approve_or_purchase().await,
            Err(PurchaseError::Precondition(PreconditionError::DraftNotCommitted))
        ));
        assert_eq!(chain.counts().purchases, 0);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_chain() {
        let (mut orchestrator, _rx, chain) = orchestrator(InMemoryChain::default()).await;

        for input in ["", "abc", "0", "-1"] {
            let err = orchestrator.commit_pay_amount(input).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Input);
        }
        assert!(orchestrator.amounts().token.committed().is_none());
        assert_eq!(chain.counts().simulations, 0);
    }

    #[tokio::test]
    async fn reverted_purchase_is_distinct_from_failure() {
        let chain = InMemoryChain::default().with_purchase_behavior(TxBehavior::Revert);
        let (mut orchestrator, mut rx, _) = orchestrator(chain).await;

        orchestrator.commit_pay_amount("1").await.unwrap();
        orchestrator.approve_or_purchase().await.unwrap();
        orchestrator.confirm_purchase().await.unwrap();
        pump(&mut orchestrator, &mut rx).await;

        assert_eq!(orchestrator.purchase_state().label(), "reverted");
        assert_eq!(orchestrator.snapshot().error.unwrap().kind, ErrorKind::Transaction);
        // amounts survive a revert so the user can retry
        assert_eq!(orchestrator.amounts().pay.committed(), Some(Decimal::ONE));
    }

    #[tokio::test]
    async fn reset_is_refused_while_purchasing() {
        let chain = InMemoryChain::default().with_purchase_behavior(TxBehavior::NeverSigned);
        let (mut orchestrator, _rx, _) = orchestrator(chain).await;

        orchestrator.commit_pay_amount("1").await.unwrap();
        orchestrator.approve_or_purchase().await.unwrap();
        orchestrator.confirm_purchase().await.unwrap();

        assert!(matches!(
            orchestrator.close_and_reset().await,
            Err(PurchaseError::Precondition(PreconditionError::PurchaseInProgress))
        ));
        assert!(matches!(
            orchestrator.set_currency(Currency::USDC).await,
            Err(PurchaseError::Precondition(PreconditionError::PurchaseInProgress))
        ));
        assert_eq!(orchestrator.currency(), Currency::ETH);
    }
}
