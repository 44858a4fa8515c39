//! Payments client
//!
//! SUP spends and refunds go through [`PaymentsClient`]. Calls may block on a
//! remote wallet service, so callers wrap them with [`bounded`] and never
//! hold their own locks across them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::game::types::PlayerId;

pub type TransactionId = String;

/// Account receiving a spend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TreasuryAccount {
    /// Queue fees held until the mech has fought or been refunded
    BattleQueue,
    /// Ability contributions for the running battle
    BattleSpoils,
}

#[derive(Debug, Clone)]
pub struct SpendSupsRequest {
    pub from: PlayerId,
    pub to: TreasuryAccount,
    pub amount: Decimal,
    /// Idempotency reference
    pub reference: String,
    pub description: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    #[error("Insufficient funds: {player} needs {needed}")]
    InsufficientFunds { player: PlayerId, needed: Decimal },
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),
    #[error("Transaction already refunded: {0}")]
    AlreadyRefunded(TransactionId),
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),
    #[error("Payments service unavailable: {0}")]
    Unavailable(String),
    #[error("Payments call timed out")]
    Timeout,
}

#[async_trait]
pub trait PaymentsClient: Send + Sync {
    /// Charge a player. Returns the transaction id to refund against.
    async fn spend_sups(&self, request: SpendSupsRequest) -> Result<TransactionId, PaymentError>;

    /// Reverse a previous spend. Returns the refund transaction id.
    async fn refund_sups(&self, transaction_id: &str) -> Result<TransactionId, PaymentError>;
}

/// Cap a collaborator call
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, PaymentError>
where
    F: Future<Output = Result<T, PaymentError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PaymentError::Timeout),
    }
}

#[derive(Debug, Clone)]
struct LocalTransaction {
    from: PlayerId,
    amount: Decimal,
    refund_id: Option<TransactionId>,
}

/// In-process ledger of player balances
///
/// Players without an explicit balance start with `starting_balance`.
pub struct LocalPayments {
    starting_balance: Decimal,
    balances: Mutex<HashMap<PlayerId, Decimal>>,
    transactions: Mutex<HashMap<TransactionId, LocalTransaction>>,
    refunds_available: AtomicBool,
}

impl LocalPayments {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            starting_balance,
            balances: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            refunds_available: AtomicBool::new(true),
        }
    }

    pub fn set_balance(&self, player: PlayerId, amount: Decimal) {
        self.balances.lock().insert(player, amount);
    }

    pub fn balance(&self, player: PlayerId) -> Decimal {
        self.balances
            .lock()
            .get(&player)
            .copied()
            .unwrap_or(self.starting_balance)
    }

    /// Toggle refund processing, e.g. during a wallet outage
    pub fn set_refunds_available(&self, available: bool) {
        self.refunds_available.store(available, Ordering::Relaxed);
    }

    pub fn is_refunded(&self, transaction_id: &str) -> bool {
        self.transactions
            .lock()
            .get(transaction_id)
            .map(|tx| tx.refund_id.is_some())
            .unwrap_or(false)
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().len()
    }
}

#[async_trait]
impl PaymentsClient for LocalPayments {
    async fn spend_sups(&self, request: SpendSupsRequest) -> Result<TransactionId, PaymentError> {
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(request.amount));
        }

        {
            let mut balances = self.balances.lock();
            let balance = balances
                .entry(request.from)
                .or_insert(self.starting_balance);
            if *balance < request.amount {
                return Err(PaymentError::InsufficientFunds {
                    player: request.from,
                    needed: request.amount,
                });
            }
            *balance -= request.amount;
        }

        let id = Uuid::new_v4().to_string();
        self.transactions.lock().insert(
            id.clone(),
            LocalTransaction {
                from: request.from,
                amount: request.amount,
                refund_id: None,
            },
        );

        tracing::debug!(
            "Spent {} from {} to {:?} ({}): {}",
            request.amount, request.from, request.to, request.reference, request.description
        );
        Ok(id)
    }

    async fn refund_sups(&self, transaction_id: &str) -> Result<TransactionId, PaymentError> {
        if !self.refunds_available.load(Ordering::Relaxed) {
            return Err(PaymentError::Unavailable("refunds disabled".to_string()));
        }

        let (from, amount, refund_id) = {
            let mut transactions = self.transactions.lock();
            let tx = transactions
                .get_mut(transaction_id)
                .ok_or_else(|| PaymentError::UnknownTransaction(transaction_id.to_string()))?;
            if tx.refund_id.is_some() {
                return Err(PaymentError::AlreadyRefunded(transaction_id.to_string()));
            }
            let refund_id = Uuid::new_v4().to_string();
            tx.refund_id = Some(refund_id.clone());
            (tx.from, tx.amount, refund_id)
        };

        *self
            .balances
            .lock()
            .entry(from)
            .or_insert(self.starting_balance) += amount;

        Ok(refund_id)
    }
}
