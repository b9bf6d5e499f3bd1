//! Credit Store
//!
//! In-memory tables for accounts, the ledger, applied payment ids, and
//! installment schedules, behind one `parking_lot` lock. All mutation
//! flows through [`CreditStore::with_transaction`]: the closure runs
//! against a [`StoreTx`] with the write lock held, and an `Err` return
//! restores the pre-transaction snapshot, so a grant and its ledger
//! entry (or a grant and a schedule reset) commit together or not at
//! all.
//!
//! Schedule rows carry a `claimed_until` lease which stands in for
//! `SELECT ... FOR UPDATE SKIP LOCKED`: the due-row query skips rows
//! with an unexpired claim, letting overlapping sweeps partition work
//! without double-granting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CreditResult;
use crate::ledger::LedgerEntry;
use crate::schedule::InstallmentSchedule;

/// Denormalized per-user balance record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Account owner
    pub user_id: Uuid,
    /// Current credit balance
    pub credits: i64,
    /// Active plan, when subscribed
    pub plan_key: Option<String>,
    /// First time the account was touched
    pub created_at: DateTime<Utc>,
    /// Last balance change
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    accounts: HashMap<Uuid, UserAccount>,
    ledger: Vec<LedgerEntry>,
    applied_payments: HashSet<String>,
    schedules: HashMap<String, InstallmentSchedule>,
}

/// Shared billing state
#[derive(Clone, Default)]
pub struct CreditStore {
    state: Arc<RwLock<StoreState>>,
}

impl CreditStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as one atomic unit: commit on `Ok`, roll back on `Err`.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&mut StoreTx<'_>) -> CreditResult<T>,
    ) -> CreditResult<T> {
        let mut state = self.state.write();
        let snapshot = state.clone();
        let mut tx = StoreTx { state: &mut state };
        match f(&mut tx) {
            Ok(value) => Ok(value),
            Err(e) => {
                *state = snapshot;
                tracing::debug!(error = %e, "transaction rolled back");
                Err(e)
            }
        }
    }

    /// Current balance; a missing account reads as 0
    pub fn balance(&self, user_id: Uuid) -> i64 {
        self.state
            .read()
            .accounts
            .get(&user_id)
            .map(|a| a.credits)
            .unwrap_or(0)
    }

    /// Account record, if it exists
    pub fn account(&self, user_id: Uuid) -> Option<UserAccount> {
        self.state.read().accounts.get(&user_id).cloned()
    }

    /// Ledger entries for one user, oldest first
    pub fn ledger_for(&self, user_id: Uuid) -> Vec<LedgerEntry> {
        self.state
            .read()
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Schedule row for a subscription, if pending
    pub fn schedule(&self, subscription_id: &str) -> Option<InstallmentSchedule> {
        self.state.read().schedules.get(subscription_id).cloned()
    }

    /// All pending schedule rows
    pub fn schedules(&self) -> Vec<InstallmentSchedule> {
        self.state.read().schedules.values().cloned().collect()
    }
}

/// Open unit of work against the store
pub struct StoreTx<'a> {
    state: &'a mut StoreState,
}

impl StoreTx<'_> {
    /// Current balance; a missing account reads as 0
    pub fn balance(&self, user_id: Uuid) -> i64 {
        self.state
            .accounts
            .get(&user_id)
            .map(|a| a.credits)
            .unwrap_or(0)
    }

    /// Record the user's active plan, creating the account if missing
    pub fn set_plan(&mut self, user_id: Uuid, plan_key: &str) {
        let now = Utc::now();
        self.account_mut(user_id, now).plan_key = Some(plan_key.to_string());
    }

    /// Whether an external payment was already applied
    pub fn payment_applied(&self, payment_id: &str) -> bool {
        self.state.applied_payments.contains(payment_id)
    }

    pub(crate) fn mark_payment_applied(&mut self, payment_id: &str) {
        self.state.applied_payments.insert(payment_id.to_string());
    }

    /// Apply a ledger entry: adjust the balance by `delta` and append.
    /// The one place the balance field changes.
    pub(crate) fn apply_entry(&mut self, entry: LedgerEntry) -> i64 {
        let now = entry.created_at;
        let account = self.account_mut(entry.user_id, now);
        account.credits += entry.delta;
        account.updated_at = now;
        let balance = account.credits;
        self.state.ledger.push(entry);
        balance
    }

    /// Ledger entries for one user, oldest first
    pub fn ledger_for(&self, user_id: Uuid) -> Vec<LedgerEntry> {
        self.state
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Schedule row for a subscription, if pending
    pub fn schedule(&self, subscription_id: &str) -> Option<&InstallmentSchedule> {
        self.state.schedules.get(subscription_id)
    }

    /// Insert or fully replace a schedule row, keyed by subscription
    pub fn upsert_schedule(&mut self, schedule: InstallmentSchedule) {
        self.state
            .schedules
            .insert(schedule.subscription_id.clone(), schedule);
    }

    /// Remove a schedule row, returning it if present
    pub fn remove_schedule(&mut self, subscription_id: &str) -> Option<InstallmentSchedule> {
        self.state.schedules.remove(subscription_id)
    }

    /// Select up to `limit` due, unclaimed rows (oldest due first) and
    /// lease them until `now + lease`. The lease hides the rows from
    /// concurrent sweeps; an aborted sweep's leases simply expire.
    pub(crate) fn claim_due_schedules(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Vec<InstallmentSchedule> {
        let mut due: Vec<&mut InstallmentSchedule> = self
            .state
            .schedules
            .values_mut()
            .filter(|s| s.is_due(now) && !s.claim_active(now))
            .collect();
        due.sort_by_key(|s| s.next_grant_at);
        due.truncate(limit);

        due.into_iter()
            .map(|s| {
                s.claimed_until = Some(now + lease);
                s.clone()
            })
            .collect()
    }

    fn account_mut(&mut self, user_id: Uuid, now: DateTime<Utc>) -> &mut UserAccount {
        self.state.accounts.entry(user_id).or_insert_with(|| UserAccount {
            user_id,
            credits: 0,
            plan_key: None,
            created_at: now,
            updated_at: now,
        })
    }
}
