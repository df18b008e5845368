//! Service running the [`PurchaseOrchestrator`] and its handle.
use crate::{
    calculator::Conversion,
    error::PurchaseError,
    network::NetworkStatus,
    orchestrator::{OrchestratorEvent, PurchaseOrchestrator, PurchaseSnapshot},
    types::{Currency, SaleState},
};
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, trace};

/// Messages accepted by the [`PurchaseService`].
#[derive(Debug)]
pub enum PurchaseServiceMessage {
    /// Switch the payment currency.
    SetCurrency { currency: Currency, response: oneshot::Sender<Result<(), PurchaseError>> },
    /// Update the displayed pay amount.
    EditPayAmount(String),
    /// Update the displayed token amount.
    EditTokenAmount(String),
    /// Commit the pay amount.
    CommitPayAmount { input: String, response: oneshot::Sender<Result<Conversion, PurchaseError>> },
    /// Commit the token amount.
    CommitTokenAmount {
        input: String,
        response: oneshot::Sender<Result<Conversion, PurchaseError>>,
    },
    /// Approve, or simulate and present the purchase.
    ApproveOrPurchase { response: oneshot::Sender<Result<(), PurchaseError>> },
    /// Sign and submit the reviewed purchase.
    ConfirmPurchase { response: oneshot::Sender<Result<(), PurchaseError>> },
    /// Reset the purchase state.
    CloseAndReset { response: oneshot::Sender<Result<(), PurchaseError>> },
    /// Ask the wallet to switch to the sale's chain.
    SwitchNetwork { response: oneshot::Sender<NetworkStatus> },
    /// Re-read the sale state.
    RefreshSaleState { response: oneshot::Sender<Result<SaleState, PurchaseError>> },
}

/// Handle to communicate with the [`PurchaseService`].
#[derive(Debug, Clone)]
pub struct PurchaseHandle {
    command_tx: mpsc::UnboundedSender<PurchaseServiceMessage>,
    snapshot_rx: watch::Receiver<PurchaseSnapshot>,
}

impl PurchaseHandle {
    /// Returns the latest snapshot.
    pub fn snapshot(&self) -> PurchaseSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Subscribes to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<PurchaseSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Switches the payment currency.
    pub async fn set_currency(&self, currency: Currency) -> Result<(), PurchaseError> {
        self.request(|response| PurchaseServiceMessage::SetCurrency { currency, response }).await?
    }

    /// Updates the displayed pay amount without committing it.
    pub fn edit_pay_amount(&self, input: impl Into<String>) -> Result<(), PurchaseError> {
        self.send(PurchaseServiceMessage::EditPayAmount(input.into()))
    }

    /// Updates the displayed token amount without committing it.
    pub fn edit_token_amount(&self, input: impl Into<String>) -> Result<(), PurchaseError> {
        self.send(PurchaseServiceMessage::EditTokenAmount(input.into()))
    }

    /// Commits the pay amount and returns the derived token amount.
    pub async fn commit_pay_amount(
        &self,
        input: impl Into<String>,
    ) -> Result<Conversion, PurchaseError> {
        let input = input.into();
        self.request(|response| PurchaseServiceMessage::CommitPayAmount { input, response }).await?
    }

    /// Commits the token amount and returns the derived pay amount.
    pub async fn commit_token_amount(
        &self,
        input: impl Into<String>,
    ) -> Result<Conversion, PurchaseError> {
        let input = input.into();
        self.request(|response| PurchaseServiceMessage::CommitTokenAmount { input, response })
            .await?
    }

    /// Starts the approval, or simulates the purchase and presents it for confirmation.
    pub async fn approve_or_purchase(&self) -> Result<(), PurchaseError> {
        self.request(|response| PurchaseServiceMessage::ApproveOrPurchase { response }).await?
    }

    /// Signs and submits the reviewed purchase.
    pub async fn confirm_purchase(&self) -> Result<(), PurchaseError> {
        self.request(|response| PurchaseServiceMessage::ConfirmPurchase { response }).await?
    }

    /// Drops the amounts, the cached allowance and the purchase state.
    pub async fn close_and_reset(&self) -> Result<(), PurchaseError> {
        self.request(|response| PurchaseServiceMessage::CloseAndReset { response }).await?
    }

    /// Asks the wallet to switch to the sale's chain.
    pub async fn switch_network(&self) -> Result<NetworkStatus, PurchaseError> {
        self.request(|response| PurchaseServiceMessage::SwitchNetwork { response }).await
    }

    /// Re-reads the sale state.
    pub async fn refresh_sale_state(&self) -> Result<SaleState, PurchaseError> {
        self.request(|response| PurchaseServiceMessage::RefreshSaleState { response }).await?
    }

    /// Waits until a snapshot satisfies `f` and returns it.
    pub async fn wait_for(
        &self,
        f: impl FnMut(&PurchaseSnapshot) -> bool,
    ) -> Result<PurchaseSnapshot, PurchaseError> {
        let mut rx = self.subscribe();
        let snapshot = rx.wait_for(f).await.map_err(|_| PurchaseError::ServiceStopped)?;
        Ok(snapshot.clone())
    }

    fn send(&self, message: PurchaseServiceMessage) -> Result<(), PurchaseError> {
        self.command_tx.send(message).map_err(|_| PurchaseError::ServiceStopped)
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> PurchaseServiceMessage,
    ) -> Result<T, PurchaseError> {
        let (tx, rx) = oneshot::channel();
        self.send(message(tx))?;
        rx.await.map_err(|_| PurchaseError::ServiceStopped)
    }
}

/// Service driving a [`PurchaseOrchestrator`].
///
/// Commands are applied one at a time. Between commands the service applies the results of
/// background work and, every refresh interval, re-reads the connected chain and the allowance.
#[derive(Debug)]
pub struct PurchaseService {
    /// The orchestrator owning all purchase state.
    orchestrator: PurchaseOrchestrator,
    /// Incoming commands.
    command_rx: mpsc::UnboundedReceiver<PurchaseServiceMessage>,
    /// Results of background work.
    events_rx: mpsc::UnboundedReceiver<OrchestratorEvent>,
    /// Publishes a snapshot after every change.
    snapshot_tx: watch::Sender<PurchaseSnapshot>,
    /// Interval of the periodic refresh.
    refresh_interval: Duration,
}

impl PurchaseService {
    /// Creates a new [`PurchaseService`].
    pub fn new(
        orchestrator: PurchaseOrchestrator,
        events_rx: mpsc::UnboundedReceiver<OrchestratorEvent>,
        refresh_interval: Duration,
    ) -> (Self, PurchaseHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(orchestrator.snapshot());
        let this = Self { orchestrator, command_rx, events_rx, snapshot_tx, refresh_interval };

        (this, PurchaseHandle { command_tx, snapshot_rx })
    }

    /// Creates a new [`PurchaseService`] and spawns it.
    pub fn spawn(
        orchestrator: PurchaseOrchestrator,
        events_rx: mpsc::UnboundedReceiver<OrchestratorEvent>,
        refresh_interval: Duration,
    ) -> (PurchaseHandle, JoinHandle<()>) {
        let (this, handle) = Self::new(orchestrator, events_rx, refresh_interval);
        (handle, tokio::spawn(this.into_future()))
    }

    async fn into_future(mut self) {
        self.orchestrator.start().await;
        self.publish();

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("All purchase handles dropped, stopping service");
                        break;
                    };
                    self.handle_command(command).await;
                }
                Some(event) = self.events_rx.recv() => {
                    trace!(?event, "Applying background event");
                    self.orchestrator.handle_event(event).await;
                }
                _ = ticker.tick() => self.orchestrator.handle_event(OrchestratorEvent::Tick).await,
            }
            self.publish();
        }
    }

    async fn handle_command(&mut self, command: PurchaseServiceMessage) {
        match command {
            PurchaseServiceMessage::SetCurrency { currency, response } => {
                let result = self.orchestrator.set_currency(currency).await;
                self.respond(response, result);
            }
            PurchaseServiceMessage::EditPayAmount(input) => {
                self.orchestrator.edit_pay_amount(&input)
            }
            PurchaseServiceMessage::EditTokenAmount(input) => {
                self.orchestrator.edit_token_amount(&input)
            }
            PurchaseServiceMessage::CommitPayAmount { input, response } => {
                let result = self.orchestrator.commit_pay_amount(&input).await;
                self.respond(response, result);
            }
            PurchaseServiceMessage::CommitTokenAmount { input, response } => {
                let result = self.orchestrator.commit_token_amount(&input).await;
                self.respond(response, result);
            }
            PurchaseServiceMessage::ApproveOrPurchase { response } => {
                let result = self.orchestrator.approve_or_purchase().await;
                self.respond(response, result);
            }
            PurchaseServiceMessage::ConfirmPurchase { response } => {
                let result = self.orchestrator.confirm_purchase().await;
                self.respond(response, result);
            }
            PurchaseServiceMessage::CloseAndReset { response } => {
                let result = self.orchestrator.close_and_reset().await;
                self.respond(response, result);
            }
            PurchaseServiceMessage::SwitchNetwork { response } => {
                let status = self.orchestrator.switch_network().await;
                self.respond(response, status);
            }
            PurchaseServiceMessage::RefreshSaleState { response } => {
                let result = self.orchestrator.refresh_sale_state().await;
                self.respond(response, result);
            }
        }
    }

    /// Publishes the snapshot before replying, so the caller observes the effect of its command.
    fn respond<T>(&self, response: oneshot::Sender<T>, value: T) {
        self.publish();
        let _ = response.send(value);
    }

    fn publish(&self) {
        self.snapshot_tx.send_if_modified(|snapshot| {
            let next = self.orchestrator.snapshot();
            if *snapshot == next {
                return false;
            }
            *snapshot = next;
            true
        });
    }
}
