use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use log::debug;
use thiserror::Error;

use crate::api::{EventId, Receipt};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("payment is below the required prediction price")]
    InsufficientPayment,
    #[error("prediction already purchased for this event")]
    AlreadyPurchased,
    #[error("caller is not the contract owner")]
    NotOwner,
    #[error("nothing to withdraw")]
    NothingToWithdraw,
    #[error("transaction rejected in the wallet")]
    UserRejected,
    #[error("wallet balance too low for this payment")]
    InsufficientFunds,
    #[error("wrong network: expected chain {expected}, connected to chain {actual}")]
    WrongNetwork { expected: u64, actual: u64 },
    #[error("ledger unreachable: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Pending,
    Confirmed,
    Reverted,
}

/// The on-chain access-control contract, seen from the flow.
///
/// Reads are always fresh, a grant observed here is never cached across a
/// check-then-use window by callers. Once `(account, event)` is marked
/// paid it is never unmarked, and price changes never retroactively
/// affect granted access.
#[async_trait]
pub trait AccessLedger {
    /// Advertised price of one prediction, in wei.
    async fn price(&self) -> Result<U256, LedgerError>;
    /// Whether `account` has paid for `event`.
    async fn can_access(&self, account: Address, event: EventId) -> Result<bool, LedgerError>;
    /// Submits the payment transaction. One logical attempt, never
    /// retried here.
    async fn purchase(
        &self,
        account: Address,
        event: EventId,
        amount: U256,
    ) -> Result<Receipt, LedgerError>;
    /// Inclusion state of a previously submitted payment.
    async fn settlement(&self, receipt: &Receipt) -> Result<Settlement, LedgerError>;
    /// Owner-only sweep of accumulated fees. Returns the amount swept.
    async fn withdraw(&self, account: Address) -> Result<U256, LedgerError>;
    async fn owner(&self) -> Result<Address, LedgerError>;
    /// Validates the chain id, attempting one automatic network switch
    /// before failing.
    async fn ensure_network(&self) -> Result<(), LedgerError>;
}

struct PendingTx {
    account: Address,
    event: EventId,
    amount: U256,
    polls_left: u32,
}

#[derive(Default)]
struct Inner {
    owner: Address,
    price: U256,
    paid: HashSet<(Address, EventId)>,
    balance: U256,
    wallets: HashMap<Address, U256>,
    pending: HashMap<Receipt, PendingTx>,
    next_receipt: u64,
    confirmations: u32,
    reject_next: bool,
    fail_price_reads: bool,
    grant_on_settlement: bool,
    network_mismatch: Option<u64>,
    switchable: bool,
    chain_id: u64,
    purchases: u32,
}

/// In-memory realization of the access contract, with wallet-side
/// failures and settlement latency modeled so every flow path is
/// reachable without a chain.
#[derive(Clone)]
pub struct MemoryLedger {
    inner: Arc<Mutex<Inner>>,
}
impl MemoryLedger {
    pub fn new(owner: Address, price: U256) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                owner,
                price,
                confirmations: 1,
                grant_on_settlement: true,
                switchable: true,
                chain_id: 1,
                ..Inner::default()
            })),
        }
    }
    /// Credits a wallet so it can afford purchases.
    pub fn fund(&self, account: Address, amount: U256) {
        let mut inner = self.inner.lock().unwrap();
        let balance = inner.wallets.entry(account).or_default();
        *balance += amount;
    }
    /// Marks access as already granted, as if paid in an earlier session.
    pub fn grant(&self, account: Address, event: EventId) {
        self.inner.lock().unwrap().paid.insert((account, event));
    }
    pub fn set_price(&self, price: U256) {
        self.inner.lock().unwrap().price = price;
    }
    /// Number of polls a receipt stays pending before confirming.
    pub fn set_confirmations(&self, polls: u32) {
        self.inner.lock().unwrap().confirmations = polls;
    }
    /// The next purchase is rejected in the wallet.
    pub fn reject_next_purchase(&self) {
        self.inner.lock().unwrap().reject_next = true;
    }
    /// Price reads fail from now on, forcing callers onto their
    /// configured fallback.
    pub fn fail_price_reads(&self) {
        self.inner.lock().unwrap().fail_price_reads = true;
    }
    /// Settled payments no longer grant access, for exercising the
    /// post-settlement verification stop.
    pub fn deny_grant_on_settlement(&self) {
        self.inner.lock().unwrap().grant_on_settlement = false;
    }
    /// Puts the wallet on `actual` instead of the expected chain.
    /// A switchable wallet honors the one switch attempt, a
    /// non-switchable one surfaces the mismatch.
    pub fn set_network_mismatch(&self, actual: u64, switchable: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.network_mismatch = Some(actual);
        inner.switchable = switchable;
    }
    pub fn purchase_count(&self) -> u32 {
        self.inner.lock().unwrap().purchases
    }
    pub fn wallet_balance(&self, account: Address) -> U256 {
        self.inner
            .lock()
            .unwrap()
            .wallets
            .get(&account)
            .copied()
            .unwrap_or_default()
    }
}
#[async_trait]
impl AccessLedger for MemoryLedger {
    async fn price(&self) -> Result<U256, LedgerError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_price_reads {
            return Err(LedgerError::Transport("price read failed".to_string()));
        }
        Ok(inner.price)
    }
    async fn can_access(&self, account: Address, event: EventId) -> Result<bool, LedgerError> {
        Ok(self.inner.lock().unwrap().paid.contains(&(account, event)))
    }
    async fn purchase(
        &self,
        account: Address,
        event: EventId,
        amount: U256,
    ) -> Result<Receipt, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.purchases += 1;
        if inner.reject_next {
            inner.reject_next = false;
            return Err(LedgerError::UserRejected);
        }
        let balance = inner.wallets.get(&account).copied().unwrap_or_default();
        if balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        if inner.paid.contains(&(account, event)) {
            return Err(LedgerError::AlreadyPurchased);
        }
        if amount < inner.price {
            debug!(
                "purchase of {} wei below price {} wei rejected",
                amount, inner.price
            );
            return Err(LedgerError::InsufficientPayment);
        }
        inner.wallets.insert(account, balance - amount);
        inner.next_receipt += 1;
        let receipt = format!("0x{:064x}", inner.next_receipt);
        let polls_left = inner.confirmations;
        inner.pending.insert(
            receipt.clone(),
            PendingTx {
                account,
                event,
                amount,
                polls_left,
            },
        );
        debug!("payment for event {} submitted as {}", event, receipt);
        Ok(receipt)
    }
    async fn settlement(&self, receipt: &Receipt) -> Result<Settlement, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(tx) = inner.pending.get_mut(receipt) else {
            return Err(LedgerError::Transport(format!(
                "unknown transaction {}",
                receipt
            )));
        };
        if tx.polls_left > 0 {
            tx.polls_left -= 1;
            return Ok(Settlement::Pending);
        }
        let tx = inner.pending.remove(receipt).unwrap();
        inner.balance += tx.amount;
        if inner.grant_on_settlement {
            inner.paid.insert((tx.account, tx.event));
        }
        Ok(Settlement::Confirmed)
    }
    async fn withdraw(&self, account: Address) -> Result<U256, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        if account != inner.owner {
            return Err(LedgerError::NotOwner);
        }
        if inner.balance.is_zero() {
            return Err(LedgerError::NothingToWithdraw);
        }
        let amount = inner.balance;
        inner.balance = U256::ZERO;
        let wallet = inner.wallets.entry(account).or_default();
        *wallet += amount;
        Ok(amount)
    }
    async fn owner(&self) -> Result<Address, LedgerError> {
        Ok(self.inner.lock().unwrap().owner)
    }
    async fn ensure_network(&self) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(actual) = inner.network_mismatch else {
            return Ok(());
        };
        if inner.switchable {
            inner.network_mismatch = None;
            debug!("switched wallet to chain {}", inner.chain_id);
            return Ok(());
        }
        Err(LedgerError::WrongNetwork {
            expected: inner.chain_id,
            actual,
        })
    }
}
