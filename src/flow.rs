use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use log::{debug, warn};
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};

use crate::api::{Event, EventId, Prediction, Receipt};
use crate::client::PredictionApi;
use crate::error::FlowError;
use crate::ledger::{AccessLedger, LedgerError, Settlement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    #[default]
    Idle,
    CheckingAccess,
    AwaitingPayment,
    SubmittingPayment,
    AwaitingSettlement,
    FetchingPrediction,
    Done,
    Failed,
}
impl Display for FlowState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Idle => "Idle",
            Self::CheckingAccess => "CheckingAccess",
            Self::AwaitingPayment => "AwaitingPayment",
            Self::SubmittingPayment => "SubmittingPayment",
            Self::AwaitingSettlement => "AwaitingSettlement",
            Self::FetchingPrediction => "FetchingPrediction",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        write!(f, "{}", output)
    }
}

/// Explicit session state shared between the flow and its caller.
///
/// Each invocation bumps the generation; a stale invocation that observes
/// a newer generation discards its result instead of writing here, so an
/// outstanding settlement poll can never resolve into a newer selection's
/// state. The session never holds an error and a prediction at once.
#[derive(Debug, Default)]
pub struct Session {
    account: Option<Address>,
    selected: Option<EventId>,
    state: FlowState,
    prediction: Option<Prediction>,
    error: Option<String>,
    generation: u64,
}
impl Session {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn connect(&mut self, account: Address) {
        self.account = Some(account);
    }
    pub fn disconnect(&mut self) {
        self.account = None;
        self.selected = None;
        self.state = FlowState::Idle;
        self.prediction = None;
        self.error = None;
        self.generation += 1;
    }
    pub fn account(&self) -> Option<Address> {
        self.account
    }
    pub fn selected(&self) -> Option<EventId> {
        self.selected
    }
    pub fn state(&self) -> FlowState {
        self.state
    }
    pub fn prediction(&self) -> Option<&Prediction> {
        self.prediction.as_ref()
    }
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub poll_interval: Duration,
    pub settlement_timeout: Duration,
    /// Used only when the ledger's advertised price cannot be read.
    pub fallback_price: U256,
}
impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            settlement_timeout: Duration::from_secs(120),
            fallback_price: U256::from(10_000_000_000_000_000u64),
        }
    }
}

/// The purchase-gated retrieval flow.
///
/// One invocation performs at most one payment submission, one or more
/// ledger reads and at most one prediction fetch; nothing is retried
/// automatically. Retry is a fresh invocation by the user, which the
/// ledger tolerates because a settled purchase is idempotent per account
/// and event.
pub struct Flow {
    api: PredictionApi,
    ledger: Arc<dyn AccessLedger + Send + Sync>,
    config: FlowConfig,
}
impl Flow {
    pub fn new(
        api: PredictionApi,
        ledger: Arc<dyn AccessLedger + Send + Sync>,
        config: FlowConfig,
    ) -> Self {
        Self {
            api,
            ledger,
            config,
        }
    }

    /// Runs the full flow for one selected event: fresh access check,
    /// payment if needed, settlement wait, access re-check, fetch.
    pub async fn get_prediction(
        &self,
        session: &Arc<RwLock<Session>>,
        event: &Event,
    ) -> Result<Prediction, FlowError> {
        let (account, generation) = {
            let mut s = session.write().await;
            s.generation += 1;
            let Some(account) = s.account else {
                s.selected = Some(event.id);
                s.prediction = None;
                s.error = Some(FlowError::NotConnected.to_string());
                s.state = FlowState::Failed;
                return Err(FlowError::NotConnected);
            };
            s.selected = Some(event.id);
            s.prediction = None;
            s.error = None;
            s.state = FlowState::CheckingAccess;
            (account, s.generation)
        };
        debug!("retrieving prediction for event {}", event.id);
        match self.run(session, generation, account, event).await {
            Ok(prediction) => {
                let mut s = session.write().await;
                if s.generation != generation {
                    return Err(FlowError::Superseded);
                }
                s.prediction = Some(prediction.clone());
                s.error = None;
                s.state = FlowState::Done;
                Ok(prediction)
            }
            Err(FlowError::Superseded) => Err(FlowError::Superseded),
            Err(e) => {
                let mut s = session.write().await;
                if s.generation == generation {
                    s.prediction = None;
                    s.error = Some(e.to_string());
                    s.state = FlowState::Failed;
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        session: &Arc<RwLock<Session>>,
        generation: u64,
        account: Address,
        event: &Event,
    ) -> Result<Prediction, FlowError> {
        self.ledger.ensure_network().await.map_err(|e| match e {
            LedgerError::WrongNetwork { expected, actual } => {
                FlowError::WrongNetwork { expected, actual }
            }
            other => FlowError::AccessCheck(other.to_string()),
        })?;
        self.check_current(session, generation).await?;

        // Always a fresh read: payment may have completed out-of-band.
        let granted = self
            .ledger
            .can_access(account, event.id)
            .await
            .map_err(|e| FlowError::AccessCheck(e.to_string()))?;
        self.check_current(session, generation).await?;

        if !granted {
            self.pay(session, generation, account, event).await?;
        }

        self.set_state(session, generation, FlowState::FetchingPrediction)
            .await?;
        let prediction = self.api.fetch_prediction(event.id).await?;
        self.check_current(session, generation).await?;
        Ok(prediction)
    }

    /// The payment leg: one submission, settlement wait, access re-check.
    async fn pay(
        &self,
        session: &Arc<RwLock<Session>>,
        generation: u64,
        account: Address,
        event: &Event,
    ) -> Result<(), FlowError> {
        self.set_state(session, generation, FlowState::AwaitingPayment)
            .await?;
        let price = match self.ledger.price().await {
            Ok(price) => price,
            Err(e) => {
                warn!("price read failed, using fallback: {}", e);
                self.config.fallback_price
            }
        };
        self.set_state(session, generation, FlowState::SubmittingPayment)
            .await?;
        debug!("purchasing access to event {} for {} wei", event.id, price);
        let receipt = match self.ledger.purchase(account, event.id, price).await {
            Ok(receipt) => receipt,
            // Paid out-of-band since the access check: nothing owed.
            Err(LedgerError::AlreadyPurchased) => return Ok(()),
            Err(LedgerError::UserRejected) => return Err(FlowError::PaymentCancelled),
            Err(LedgerError::InsufficientFunds) | Err(LedgerError::InsufficientPayment) => {
                return Err(FlowError::InsufficientFunds)
            }
            Err(e) => return Err(FlowError::PaymentFailed(e.to_string())),
        };
        self.set_state(session, generation, FlowState::AwaitingSettlement)
            .await?;
        self.await_settlement(session, generation, &receipt).await?;

        // The payment is mined; if access still is not granted something
        // is wrong on the contract side and paying again would double
        // charge. Hard stop.
        let confirmed = self
            .ledger
            .can_access(account, event.id)
            .await
            .map_err(|e| FlowError::AccessCheck(e.to_string()))?;
        self.check_current(session, generation).await?;
        if !confirmed {
            return Err(FlowError::PaymentVerificationFailed);
        }
        Ok(())
    }

    async fn await_settlement(
        &self,
        session: &Arc<RwLock<Session>>,
        generation: u64,
        receipt: &Receipt,
    ) -> Result<(), FlowError> {
        let deadline = Instant::now() + self.config.settlement_timeout;
        loop {
            match self.ledger.settlement(receipt).await {
                Ok(Settlement::Confirmed) => {
                    debug!("payment {} settled", receipt);
                    return Ok(());
                }
                Ok(Settlement::Reverted) => {
                    return Err(FlowError::PaymentFailed(
                        "payment transaction reverted".to_string(),
                    ))
                }
                Ok(Settlement::Pending) => {}
                // A failed poll is not a failed payment; the next tick
                // re-checks until the ceiling.
                Err(e) => warn!("settlement check failed: {}", e),
            }
            if Instant::now() >= deadline {
                return Err(FlowError::SettlementTimeout(self.config.settlement_timeout));
            }
            sleep(self.config.poll_interval).await;
            self.check_current(session, generation).await?;
        }
    }

    /// Owner-only sweep of accumulated fees.
    pub async fn withdraw(&self, session: &Arc<RwLock<Session>>) -> Result<U256, FlowError> {
        let account = session
            .read()
            .await
            .account()
            .ok_or(FlowError::NotConnected)?;
        self.ledger.ensure_network().await.map_err(|e| match e {
            LedgerError::WrongNetwork { expected, actual } => {
                FlowError::WrongNetwork { expected, actual }
            }
            other => FlowError::Withdrawal(other.to_string()),
        })?;
        let amount = self
            .ledger
            .withdraw(account)
            .await
            .map_err(|e| FlowError::Withdrawal(e.to_string()))?;
        debug!("withdrew {} wei for {}", amount, account);
        Ok(amount)
    }

    async fn check_current(
        &self,
        session: &Arc<RwLock<Session>>,
        generation: u64,
    ) -> Result<(), FlowError> {
        if session.read().await.generation != generation {
            return Err(FlowError::Superseded);
        }
        Ok(())
    }
    async fn set_state(
        &self,
        session: &Arc<RwLock<Session>>,
        generation: u64,
        state: FlowState,
    ) -> Result<(), FlowError> {
        let mut s = session.write().await;
        if s.generation != generation {
            return Err(FlowError::Superseded);
        }
        s.state = state;
        Ok(())
    }
}
