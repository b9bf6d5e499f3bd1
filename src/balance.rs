//! Balance Service
//!
//! The only writer of the denormalized balance field. Every mutation
//! pairs the balance change with exactly one ledger append inside one
//! transaction; the affordability check and the decrement run under the
//! same store lock, so concurrent deductions cannot drive a balance
//! negative.

use uuid::Uuid;

use crate::error::{CreditError, CreditResult};
use crate::ledger::{LedgerEntry, LedgerReason};
use crate::store::{CreditStore, StoreTx};

/// Outcome of a balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    /// Balance after the operation
    pub balance: i64,
    /// Ledger entry appended, absent for duplicate-payment no-ops
    pub entry_id: Option<Uuid>,
    /// True when a payment id was already applied and nothing changed
    pub duplicate: bool,
}

/// Read/check/deduct/grant operations against user balances
#[derive(Clone)]
pub struct BalanceService {
    store: CreditStore,
}

impl BalanceService {
    /// Service over a shared store
    pub fn new(store: CreditStore) -> Self {
        Self { store }
    }

    /// Current credits; missing account reads as 0
    pub fn balance(&self, user_id: Uuid) -> i64 {
        self.store.balance(user_id)
    }

    /// Whether the balance covers `amount`
    pub fn can_afford(&self, user_id: Uuid, amount: i64) -> bool {
        self.balance(user_id) >= amount
    }

    /// Deduct `amount` credits in one transaction.
    ///
    /// Insufficient funds leave state untouched and return
    /// [`CreditError::InsufficientCredits`] carrying the available
    /// balance, so callers can surface it (e.g. as HTTP 402).
    pub fn deduct(
        &self,
        user_id: Uuid,
        amount: i64,
        reason: LedgerReason,
        reference_id: Option<&str>,
    ) -> CreditResult<BalanceChange> {
        self.store
            .with_transaction(|tx| self.deduct_in(tx, user_id, amount, reason, reference_id))
    }

    /// Deduct inside a caller-owned transaction
    pub fn deduct_in(
        &self,
        tx: &mut StoreTx<'_>,
        user_id: Uuid,
        amount: i64,
        reason: LedgerReason,
        reference_id: Option<&str>,
    ) -> CreditResult<BalanceChange> {
        if amount <= 0 {
            return Err(CreditError::InvalidAmount(amount));
        }

        // Check and decrement under the same lock.
        let available = tx.balance(user_id);
        if available < amount {
            tracing::debug!(
                user_id = %user_id,
                required = amount,
                available,
                reason = %reason,
                "deduction refused"
            );
            return Err(CreditError::InsufficientCredits {
                required: amount,
                available,
            });
        }

        let mut entry = LedgerEntry::deduction(user_id, amount, reason);
        if let Some(reference_id) = reference_id {
            entry = entry.with_reference(reference_id);
        }
        let entry_id = entry.id;
        let balance = tx.apply_entry(entry);

        Ok(BalanceChange {
            balance,
            entry_id: Some(entry_id),
            duplicate: false,
        })
    }

    /// Grant `amount` credits in one transaction. No affordability
    /// check; a `payment_id` seen before makes the call a no-op.
    pub fn grant(
        &self,
        user_id: Uuid,
        amount: i64,
        reason: LedgerReason,
        payment_id: Option<&str>,
    ) -> CreditResult<BalanceChange> {
        self.store
            .with_transaction(|tx| self.grant_in(tx, user_id, amount, reason, payment_id))
    }

    /// Return credits from a refunded action, correlating the entry to
    /// the caller-side record that was refunded
    pub fn refund(
        &self,
        user_id: Uuid,
        amount: i64,
        reference_id: Option<&str>,
    ) -> CreditResult<BalanceChange> {
        self.store.with_transaction(|tx| {
            if amount <= 0 {
                return Err(CreditError::InvalidAmount(amount));
            }
            let mut entry = LedgerEntry::grant(user_id, amount, LedgerReason::Refund);
            if let Some(reference_id) = reference_id {
                entry = entry.with_reference(reference_id);
            }
            let entry_id = entry.id;
            let balance = tx.apply_entry(entry);
            Ok(BalanceChange {
                balance,
                entry_id: Some(entry_id),
                duplicate: false,
            })
        })
    }

    /// Grant inside a caller-owned transaction
    pub fn grant_in(
        &self,
        tx: &mut StoreTx<'_>,
        user_id: Uuid,
        amount: i64,
        reason: LedgerReason,
        payment_id: Option<&str>,
    ) -> CreditResult<BalanceChange> {
        if amount <= 0 {
            return Err(CreditError::InvalidAmount(amount));
        }

        if let Some(payment_id) = payment_id {
            if tx.payment_applied(payment_id) {
                tracing::debug!(payment_id, reason = %reason, "duplicate payment grant ignored");
                return Ok(BalanceChange {
                    balance: tx.balance(user_id),
                    entry_id: None,
                    duplicate: true,
                });
            }
            tx.mark_payment_applied(payment_id);
        }

        let mut entry = LedgerEntry::grant(user_id, amount, reason);
        if let Some(payment_id) = payment_id {
            entry = entry.with_payment(payment_id);
        }
        let entry_id = entry.id;
        let balance = tx.apply_entry(entry);

        Ok(BalanceChange {
            balance,
            entry_id: Some(entry_id),
            duplicate: false,
        })
    }
}
